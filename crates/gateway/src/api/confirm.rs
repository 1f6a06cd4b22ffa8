//! `POST /api/decks/:id/confirm`: finalize a draft deck.

use axum::extract::State;
use axum::response::Response;
use serde::Deserialize;
use serde_json::json;

use super::auth::Caller;
use super::extract::{DeckId, OptionalJson};
use super::ok;
use crate::runtime::finalize::finalize_deck;
use crate::runtime::DeckResult;
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmBody {
    #[serde(default)]
    pub art_style_id: Option<String>,
}

pub async fn confirm(
    State(state): State<AppState>,
    Caller(user): Caller,
    DeckId(deck_id): DeckId,
    OptionalJson(body): OptionalJson<ConfirmBody>,
) -> DeckResult<Response> {
    let deck_id = finalize_deck(&state, &user, deck_id, body.art_style_id).await?;
    Ok(ok(json!({ "deckId": deck_id })))
}
