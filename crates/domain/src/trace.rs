use serde::Serialize;
use uuid::Uuid;

use crate::deck::{DeckStatus, ImageStatus};

/// Structured domain events, logged as one JSON line each so they can be
/// filtered out of the regular tracing output.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum TraceEvent {
    LlmRequest {
        provider: String,
        model: String,
        purpose: String,
        streaming: bool,
        duration_ms: u64,
        prompt_tokens: Option<u32>,
        completion_tokens: Option<u32>,
    },
    AnchorsExtracted {
        deck_id: Uuid,
        anchors: usize,
        target_cards: u32,
        is_ready: bool,
    },
    DraftsGenerated {
        deck_id: Option<Uuid>,
        cards: usize,
        attempts: u32,
    },
    DraftMutated {
        deck_id: Uuid,
        card_number: u32,
        operation: &'static str,
    },
    DeckFinalized {
        deck_id: Uuid,
        cards: usize,
    },
    DeckStatusChanged {
        deck_id: Uuid,
        status: DeckStatus,
    },
    CardImageStatus {
        deck_id: Uuid,
        card_id: Uuid,
        status: ImageStatus,
        attempt: u32,
    },
    ImageBatchFinished {
        deck_id: Uuid,
        processed: usize,
        failed: usize,
    },
}

impl TraceEvent {
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();
        tracing::info!(trace_event = %json, "dw_event");
    }
}
