//! Deck CRUD, conversation history, readiness and art styles.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use super::auth::Caller;
use super::extract::{DeckId, JsonBody};
use super::ok;
use crate::runtime::decks::{self, CreateDeckRequest, NewCardRequest};
use crate::runtime::DeckResult;
use crate::state::AppState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /api/art-styles
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn list_art_styles(State(state): State<AppState>, _caller: Caller) -> Response {
    let images = &state.config.images;
    ok(json!({
        "artStyles": images.art_styles,
        "defaultStyle": images.default_style,
    }))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// /api/decks
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn create_deck(
    State(state): State<AppState>,
    Caller(user): Caller,
    JsonBody(body): JsonBody<CreateDeckRequest>,
) -> DeckResult<Response> {
    let deck = decks::create_draft_deck(&state, &user, body).await?;
    Ok((StatusCode::CREATED, ok(json!({ "deck": deck, "deckId": deck.id }))).into_response())
}

pub async fn list_decks(
    State(state): State<AppState>,
    Caller(user): Caller,
) -> DeckResult<Response> {
    let decks = decks::list_decks(&state, &user).await?;
    Ok(ok(json!({ "decks": decks })))
}

pub async fn get_deck(
    State(state): State<AppState>,
    Caller(user): Caller,
    DeckId(deck_id): DeckId,
) -> DeckResult<Response> {
    let detail = decks::get_deck_detail(&state, deck_id, &user).await?;
    Ok(ok(detail))
}

pub async fn delete_deck(
    State(state): State<AppState>,
    Caller(user): Caller,
    DeckId(deck_id): DeckId,
) -> DeckResult<Response> {
    decks::delete_deck(&state, deck_id, &user).await?;
    Ok(ok(json!({})))
}

pub async fn list_messages(
    State(state): State<AppState>,
    Caller(user): Caller,
    DeckId(deck_id): DeckId,
) -> DeckResult<Response> {
    let messages = decks::list_messages(&state, deck_id, &user).await?;
    Ok(ok(json!({ "messages": messages })))
}

pub async fn readiness(
    State(state): State<AppState>,
    Caller(user): Caller,
    DeckId(deck_id): DeckId,
) -> DeckResult<Response> {
    Ok(ok(decks::deck_readiness(&state, deck_id, &user).await?))
}

pub async fn create_card(
    State(state): State<AppState>,
    Caller(user): Caller,
    DeckId(deck_id): DeckId,
    JsonBody(body): JsonBody<NewCardRequest>,
) -> DeckResult<Response> {
    let card = decks::create_card(&state, deck_id, &user, body).await?;
    Ok((StatusCode::CREATED, ok(json!({ "card": card }))).into_response())
}
