//! Structured generation: ask for one JSON object matching a schema and
//! deserialize it.

use crate::traits::{ChatRequest, LlmProvider, ResponseFormat};
use crate::util::strip_code_fence;
use dw_domain::error::{Error, Result};
use serde::de::DeserializeOwned;

/// Run `req` with a JSON-schema response format and parse the reply as `T`.
///
/// Malformed or schema-violating output surfaces as a provider error so
/// callers treat it exactly like a failed HTTP call.
pub async fn generate_object<T: DeserializeOwned>(
    provider: &dyn LlmProvider,
    mut req: ChatRequest,
    name: &str,
    schema: serde_json::Value,
) -> Result<T> {
    req.response_format = ResponseFormat::JsonSchema {
        name: name.to_string(),
        schema,
    };
    let resp = provider.chat(&req).await?;
    let json = strip_code_fence(&resp.content);
    serde_json::from_str(json).map_err(|e| {
        Error::provider(
            provider.provider_id(),
            format!("{name}: response did not match schema: {e}"),
        )
    })
}
