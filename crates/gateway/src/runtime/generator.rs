//! Draft card generator.
//!
//! Three modes sharing one card schema: bulk (a full ordered set, retried
//! because nothing is committed yet), edit and regenerate (single attempt,
//! the caller decides whether to retry). Every failure surfaces as
//! [`DeckError::UpstreamGeneration`]; none of these functions write state.

use std::time::Instant;

use dw_domain::deck::{Anchor, CardContent, DraftCard};
use dw_domain::tool::Message;
use dw_domain::trace::TraceEvent;
use dw_providers::{generate_object, ResolvedModel};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use super::error::{DeckError, DeckResult};

const DRAFTING_PERSONA: &str = "\
You write oracle cards. Each card has a short evocative title, a meaning \
(what the card speaks to), guidance (what the reader might do with it) and \
an image prompt describing a single illustration without any text in it.";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Schemas
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn content_properties() -> serde_json::Value {
    json!({
        "title": { "type": "string" },
        "meaning": { "type": "string" },
        "guidance": { "type": "string" },
        "imagePrompt": { "type": "string" }
    })
}

fn card_schema() -> serde_json::Value {
    json!({
        "type": "object",
        "properties": content_properties(),
        "required": ["title", "meaning", "guidance", "imagePrompt"],
        "additionalProperties": false
    })
}

fn deck_schema() -> serde_json::Value {
    let mut props = content_properties();
    props["cardNumber"] = json!({ "type": "integer" });
    json!({
        "type": "object",
        "properties": {
            "cards": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": props,
                    "required": ["cardNumber", "title", "meaning", "guidance", "imagePrompt"],
                    "additionalProperties": false
                }
            }
        },
        "required": ["cards"],
        "additionalProperties": false
    })
}

#[derive(Deserialize)]
struct DraftSet {
    cards: Vec<DraftCard>,
}

fn render_anchors(anchors: &[Anchor]) -> String {
    if anchors.is_empty() {
        return "(none yet)".into();
    }
    anchors
        .iter()
        .map(|a| format!("- theme: {}; emotion: {}; symbol: {}", a.theme, a.emotion, a.symbol))
        .collect::<Vec<_>>()
        .join("\n")
}

fn upstream(e: dw_domain::error::Error) -> DeckError {
    DeckError::UpstreamGeneration(e.to_string())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Bulk
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone)]
pub struct BulkRequest {
    /// Set when drafting for an existing deck, for tracing only.
    pub deck_id: Option<Uuid>,
    pub title: String,
    pub theme: String,
    pub target_count: u32,
    pub anchors: Vec<Anchor>,
    pub summary: Option<String>,
}

fn bulk_prompt(req: &BulkRequest) -> String {
    let mut prompt = format!(
        "Create exactly {count} cards for the deck \"{title}\".\n\
         Theme: {theme}\n\n\
         Anchors from the conversation:\n{anchors}\n",
        count = req.target_count,
        title = req.title,
        theme = req.theme,
        anchors = render_anchors(&req.anchors),
    );
    if let Some(summary) = req.summary.as_deref().filter(|s| !s.is_empty()) {
        prompt.push_str(&format!("\nConversation summary:\n{summary}\n"));
    }
    prompt.push_str(&format!(
        "\nNumber the cards 1 to {count}. Together they should read as a \
         journey: the first cards lay a foundation, the middle cards face a \
         challenge, the last cards resolve it.",
        count = req.target_count,
    ));
    prompt
}

/// Generate a full draft set, retrying up to `max_attempts` times with no
/// delay. A reply with fewer cards than requested counts as a failure.
///
/// The result is sorted, truncated to the target and renumbered `1..=n`.
pub async fn generate_bulk(
    model: &ResolvedModel,
    req: &BulkRequest,
    max_attempts: u32,
) -> DeckResult<Vec<DraftCard>> {
    let max_attempts = max_attempts.max(1);
    let mut last_error = String::new();

    for attempt in 1..=max_attempts {
        match bulk_attempt(model, req).await {
            Ok(cards) => {
                TraceEvent::DraftsGenerated {
                    deck_id: req.deck_id,
                    cards: cards.len(),
                    attempts: attempt,
                }
                .emit();
                return Ok(cards);
            }
            Err(e) => {
                tracing::warn!(
                    attempt,
                    max_attempts,
                    deck_id = ?req.deck_id,
                    error = %e,
                    "bulk draft generation attempt failed"
                );
                last_error = e;
            }
        }
    }

    Err(DeckError::UpstreamGeneration(format!(
        "card generation failed after {max_attempts} attempts: {last_error}"
    )))
}

async fn bulk_attempt(model: &ResolvedModel, req: &BulkRequest) -> Result<Vec<DraftCard>, String> {
    let mut chat = super::request_for(model);
    chat.messages = vec![Message::system(DRAFTING_PERSONA), Message::user(bulk_prompt(req))];

    let started = Instant::now();
    let provider = model.provider.as_ref();
    let result = generate_object::<DraftSet>(provider, chat, "draft_deck", deck_schema()).await;
    super::trace_llm(model, "bulk_drafts", false, started, None);
    let mut cards = result.map_err(|e| e.to_string())?.cards;

    let target = req.target_count as usize;
    if cards.is_empty() || cards.len() < target {
        return Err(format!("model returned {} of {} cards", cards.len(), target));
    }

    cards.sort_by_key(|c| c.card_number);
    cards.truncate(target);
    for (i, card) in cards.iter_mut().enumerate() {
        card.card_number = i as u32 + 1;
        card.previous_version = None;
    }
    Ok(cards)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Edit
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Rewrite one card following `instruction`. Returns new content only; the
/// card number is the caller's and the snapshot is the caller's job.
pub async fn generate_edit(
    model: &ResolvedModel,
    card: &DraftCard,
    instruction: &str,
    context: Option<&str>,
) -> DeckResult<CardContent> {
    let mut prompt = format!(
        "Rewrite card {n} following the instruction.\n\n\
         Current card:\ntitle: {title}\nmeaning: {meaning}\nguidance: {guidance}\nimage prompt: {image}\n\n\
         Instruction: {instruction}\n",
        n = card.card_number,
        title = card.content.title,
        meaning = card.content.meaning,
        guidance = card.content.guidance,
        image = card.content.image_prompt,
    );
    if let Some(ctx) = context.filter(|c| !c.is_empty()) {
        prompt.push_str(&format!("\nConversation context:\n{ctx}\n"));
    }

    let mut chat = super::request_for(model);
    chat.messages = vec![Message::system(DRAFTING_PERSONA), Message::user(prompt)];
    let started = Instant::now();
    let result = generate_object(model.provider.as_ref(), chat, "draft_card", card_schema()).await;
    super::trace_llm(model, "edit_draft", false, started, None);
    result.map_err(upstream)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Regenerate
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy)]
pub struct RegenerateRequest<'a> {
    pub card_number: u32,
    pub title: &'a str,
    pub theme: &'a str,
    /// Already trimmed by the caller to the configured limit.
    pub anchors: &'a [Anchor],
    /// Every other card in the draft set.
    pub siblings: &'a [DraftCard],
    pub summary: Option<&'a str>,
}

fn regenerate_prompt(req: &RegenerateRequest<'_>) -> String {
    let siblings = req
        .siblings
        .iter()
        .filter(|c| c.card_number != req.card_number)
        .map(|c| format!("- {}: {}", c.card_number, c.content.title))
        .collect::<Vec<_>>()
        .join("\n");

    let mut prompt = format!(
        "Write a fresh card {n} for the deck \"{title}\".\n\
         Theme: {theme}\n\nAnchors:\n{anchors}\n\n\
         The other cards are listed below. Do not repeat their themes or titles:\n{siblings}\n",
        n = req.card_number,
        title = req.title,
        theme = req.theme,
        anchors = render_anchors(req.anchors),
    );
    if let Some(summary) = req.summary.filter(|s| !s.is_empty()) {
        prompt.push_str(&format!("\nConversation summary:\n{summary}\n"));
    }
    prompt
}

/// A new take on one card, prompted away from its siblings.
pub async fn generate_regenerate(
    model: &ResolvedModel,
    req: RegenerateRequest<'_>,
) -> DeckResult<CardContent> {
    let mut chat = super::request_for(model);
    chat.messages = vec![
        Message::system(DRAFTING_PERSONA),
        Message::user(regenerate_prompt(&req)),
    ];
    let started = Instant::now();
    let result = generate_object(model.provider.as_ref(), chat, "draft_card", card_schema()).await;
    super::trace_llm(model, "regenerate_draft", false, started, None);
    result.map_err(upstream)
}
