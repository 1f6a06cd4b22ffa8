//! OpenAI-compatible image generation (`/images/generations`).

use crate::traits::{GeneratedImage, ImageProvider, ImageRequest};
use crate::util::{from_reqwest, resolve_api_key};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use dw_domain::config::ImagesConfig;
use dw_domain::error::{Error, Result};
use serde_json::Value;
use std::time::Duration;

const PROVIDER_ID: &str = "images";

pub struct OpenAiImageProvider {
    endpoint: String,
    api_key: String,
    model: String,
    size: String,
    client: reqwest::Client,
}

impl OpenAiImageProvider {
    pub fn from_config(cfg: &ImagesConfig) -> Result<Self> {
        let base_url = cfg
            .base_url
            .as_deref()
            .ok_or_else(|| Error::Config("images.base_url is not set".into()))?;
        let api_key = resolve_api_key(&cfg.auth)?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(cfg.timeout_ms))
            .build()
            .map_err(from_reqwest)?;

        Ok(Self {
            endpoint: format!("{}/images/generations", base_url.trim_end_matches('/')),
            api_key,
            model: cfg.model.clone(),
            size: cfg.size.clone(),
            client,
        })
    }

    fn build_body(&self, req: &ImageRequest) -> Value {
        serde_json::json!({
            "model": self.model,
            "prompt": req.prompt,
            "n": 1,
            "size": req.size.as_deref().unwrap_or(&self.size),
            "response_format": "b64_json",
        })
    }
}

/// Decode the first `b64_json` entry of an images response.
fn decode_first_image(body: &Value) -> Result<Vec<u8>> {
    let b64 = body
        .get("data")
        .and_then(Value::as_array)
        .and_then(|rows| rows.first())
        .and_then(|row| row.get("b64_json"))
        .and_then(Value::as_str)
        .ok_or_else(|| Error::provider(PROVIDER_ID, "no b64_json image in response"))?;
    BASE64
        .decode(b64.as_bytes())
        .map_err(|e| Error::provider(PROVIDER_ID, format!("image base64 decode failed: {e}")))
}

#[async_trait::async_trait]
impl ImageProvider for OpenAiImageProvider {
    async fn generate(&self, req: &ImageRequest) -> Result<GeneratedImage> {
        tracing::debug!(model = %self.model, "image generation request");

        let resp = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&self.build_body(req))
            .send()
            .await
            .map_err(from_reqwest)?;

        let status = resp.status();
        let text = resp.text().await.map_err(from_reqwest)?;
        if !status.is_success() {
            return Err(Error::provider(
                PROVIDER_ID,
                format!("HTTP {} - {}", status.as_u16(), text),
            ));
        }

        let body: Value = serde_json::from_str(&text)?;
        Ok(GeneratedImage {
            bytes: decode_first_image(&body)?,
            content_type: "image/png".into(),
        })
    }

    fn provider_id(&self) -> &str {
        PROVIDER_ID
    }
}
