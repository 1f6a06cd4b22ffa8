//! Image pipeline endpoints: single card, whole deck, status polling.

use axum::extract::State;
use axum::response::Response;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use super::auth::Caller;
use super::extract::{DeckId, JsonBody};
use super::ok;
use crate::runtime::decks::load_owned_deck;
use crate::runtime::images;
use crate::runtime::{DeckError, DeckResult};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardBody {
    #[serde(default)]
    pub card_id: Option<Uuid>,
}

pub async fn generate_image(
    State(state): State<AppState>,
    Caller(user): Caller,
    JsonBody(body): JsonBody<CardBody>,
) -> DeckResult<Response> {
    let card_id = body
        .card_id
        .ok_or_else(|| DeckError::invalid_input("cardId is required"))?;
    let image_url = images::retry_card_image(&state, &user, card_id).await?;
    Ok(ok(json!({ "imageUrl": image_url })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeckBody {
    #[serde(default)]
    pub deck_id: Option<Uuid>,
}

pub async fn generate_images_batch(
    State(state): State<AppState>,
    Caller(user): Caller,
    JsonBody(body): JsonBody<DeckBody>,
) -> DeckResult<Response> {
    let deck_id = body
        .deck_id
        .ok_or_else(|| DeckError::invalid_input("deckId is required"))?;
    load_owned_deck(&state, deck_id, &user).await?;
    let summary = images::generate_images_batch(&state, deck_id).await?;
    Ok(ok(summary))
}

pub async fn image_status(
    State(state): State<AppState>,
    Caller(user): Caller,
    DeckId(deck_id): DeckId,
) -> DeckResult<Response> {
    Ok(ok(images::image_status(&state, &user, deck_id).await?))
}
