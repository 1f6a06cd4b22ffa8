//! Draft generation and review endpoints.
//!
//! - `POST  /api/ai/generate-deck`: drafts for a deck, or a whole deck
//! - `PATCH /api/decks/:id/drafts`: AI edit or verbatim overwrite
//! - `POST  /api/decks/:id/drafts/replace`: regenerate one card
//! - `POST  /api/decks/:id/drafts/undo`: one-level undo

use axum::extract::State;
use axum::response::Response;
use dw_domain::deck::DraftCard;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use super::auth::Caller;
use super::extract::{DeckId, JsonBody};
use super::ok;
use crate::runtime::decks::{self, CreateDeckRequest};
use crate::runtime::review::{self, DraftOverrides};
use crate::runtime::{DeckError, DeckResult};
use crate::state::AppState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /api/ai/generate-deck
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateDeckBody {
    /// Present: draft cards for this deck. Absent: create a whole deck.
    #[serde(default)]
    pub deck_id: Option<Uuid>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub theme: Option<String>,
    #[serde(default)]
    pub card_count: Option<u32>,
    #[serde(default)]
    pub art_style_id: Option<String>,
}

pub async fn generate_deck(
    State(state): State<AppState>,
    Caller(user): Caller,
    JsonBody(body): JsonBody<GenerateDeckBody>,
) -> DeckResult<Response> {
    match body.deck_id {
        Some(deck_id) => {
            let overrides = DraftOverrides {
                title: body.title.filter(|t| !t.trim().is_empty()),
                theme: body
                    .theme
                    .or(body.description)
                    .filter(|t| !t.trim().is_empty()),
                card_count: body.card_count,
            };
            let drafts = review::generate_drafts(&state, &user, deck_id, overrides).await?;
            Ok(ok(json!({ "draftCards": drafts })))
        }
        None => {
            let req = CreateDeckRequest {
                title: body.title,
                description: body.description,
                theme: body.theme,
                card_count: body.card_count,
                art_style_id: body.art_style_id,
            };
            let deck_id = decks::quick_generate(&state, &user, req).await?;
            Ok(ok(json!({ "deckId": deck_id })))
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// PATCH /api/decks/:id/drafts
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatchDraftsBody {
    #[serde(default)]
    pub card_number: Option<u32>,
    #[serde(default)]
    pub instruction: Option<String>,
    #[serde(default)]
    pub cards: Option<Vec<DraftCard>>,
}

pub async fn patch_drafts(
    State(state): State<AppState>,
    Caller(user): Caller,
    DeckId(deck_id): DeckId,
    JsonBody(body): JsonBody<PatchDraftsBody>,
) -> DeckResult<Response> {
    let instruction = body.instruction.filter(|i| !i.trim().is_empty());
    let drafts = match (body.cards, body.card_number, instruction) {
        (Some(cards), None, None) => review::overwrite_drafts(&state, &user, deck_id, cards).await?,
        (None, Some(card_number), Some(instruction)) => {
            review::edit_draft(&state, &user, deck_id, card_number, &instruction).await?
        }
        _ => {
            return Err(DeckError::invalid_input(
                "provide either {cardNumber, instruction} or {cards}",
            ))
        }
    };
    Ok(ok(json!({ "draftCards": drafts })))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /api/decks/:id/drafts/{replace,undo}
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardNumberBody {
    #[serde(default)]
    pub card_number: Option<u32>,
}

impl CardNumberBody {
    fn require(&self) -> DeckResult<u32> {
        self.card_number
            .ok_or_else(|| DeckError::invalid_input("cardNumber is required"))
    }
}

pub async fn replace_draft(
    State(state): State<AppState>,
    Caller(user): Caller,
    DeckId(deck_id): DeckId,
    JsonBody(body): JsonBody<CardNumberBody>,
) -> DeckResult<Response> {
    let drafts = review::regenerate_draft(&state, &user, deck_id, body.require()?).await?;
    Ok(ok(json!({ "draftCards": drafts })))
}

pub async fn undo_draft(
    State(state): State<AppState>,
    Caller(user): Caller,
    DeckId(deck_id): DeckId,
    JsonBody(body): JsonBody<CardNumberBody>,
) -> DeckResult<Response> {
    let drafts = review::undo_draft(&state, &user, deck_id, body.require()?).await?;
    Ok(ok(json!({ "draftCards": drafts })))
}
