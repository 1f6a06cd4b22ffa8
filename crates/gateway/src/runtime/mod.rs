//! Runtime components: everything between the HTTP handlers and the
//! model gateway / store.

pub mod anchors;
pub mod deck_lock;
pub mod decks;
pub mod error;
pub mod finalize;
pub mod generator;
pub mod image_queue;
pub mod images;
pub mod readiness;
pub mod reconcile;
pub mod review;
pub mod tools;
pub mod turn;

pub use error::{DeckError, DeckResult};
pub use turn::{run_turn, TurnEvent, TurnInput};

use dw_domain::stream::Usage;
use dw_domain::trace::TraceEvent;
use dw_providers::{ChatRequest, ResolvedModel};

/// Build a request carrying the role's model settings.
pub(crate) fn request_for(model: &ResolvedModel) -> ChatRequest {
    ChatRequest {
        temperature: model.temperature,
        max_tokens: model.max_tokens,
        model: model.model.clone(),
        ..Default::default()
    }
}

/// Emit the `LlmRequest` trace event for a finished call.
pub(crate) fn trace_llm(
    model: &ResolvedModel,
    purpose: &str,
    streaming: bool,
    started: std::time::Instant,
    usage: Option<Usage>,
) {
    TraceEvent::LlmRequest {
        provider: model.provider.provider_id().to_string(),
        model: model.model.clone().unwrap_or_else(|| "default".into()),
        purpose: purpose.to_string(),
        streaming,
        duration_ms: started.elapsed().as_millis() as u64,
        prompt_tokens: usage.map(|u| u.prompt_tokens),
        completion_tokens: usage.map(|u| u.completion_tokens),
    }
    .emit();
}

/// Resolve the model for a role, or 503 when no provider is configured.
pub(crate) fn model_for(state: &crate::state::AppState, role: &str) -> DeckResult<ResolvedModel> {
    state.llm.for_role(role).ok_or_else(|| {
        DeckError::ServiceUnavailable("no language model provider is configured".into())
    })
}
