pub mod auth;
pub mod chat;
pub mod confirm;
pub mod decks;
pub mod drafts;
pub mod error;
pub mod extract;
pub mod health;
pub mod images;

use axum::middleware;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, patch, post};
use axum::Router;
use serde::Serialize;
use tower_http::services::ServeDir;

use crate::state::AppState;

/// Build the full API router.
///
/// Routes are split into **public** (no auth required) and **protected**
/// (gated behind the `DW_API_TOKEN` bearer-token middleware). Protected
/// handlers additionally require the caller identity header.
///
/// `state` is needed to wire up the auth middleware at build time.
pub fn router(state: AppState) -> Router<AppState> {
    let storage = &state.config.storage;
    let blobs = ServeDir::new(&storage.blob_dir);

    let public = Router::new()
        .route("/health", get(health::health))
        .route("/v1/models/readiness", get(health::readiness))
        // Card images are loaded by <img> tags, which carry no token.
        .nest_service(&storage.blob_route, blobs);

    let protected = Router::new()
        .route("/api/art-styles", get(decks::list_art_styles))
        // Decks
        .route("/api/decks", get(decks::list_decks).post(decks::create_deck))
        .route("/api/decks/:id", get(decks::get_deck).delete(decks::delete_deck))
        .route("/api/decks/:id/messages", get(decks::list_messages))
        .route("/api/decks/:id/readiness", get(decks::readiness))
        .route("/api/decks/:id/cards", post(decks::create_card))
        // Conversation
        .route("/api/chat", post(chat::chat))
        // Drafts
        .route("/api/ai/generate-deck", post(drafts::generate_deck))
        .route("/api/decks/:id/drafts", patch(drafts::patch_drafts))
        .route("/api/decks/:id/drafts/replace", post(drafts::replace_draft))
        .route("/api/decks/:id/drafts/undo", post(drafts::undo_draft))
        // Finalization
        .route("/api/decks/:id/confirm", post(confirm::confirm))
        // Images
        .route("/api/ai/generate-image", post(images::generate_image))
        .route("/api/ai/generate-images-batch", post(images::generate_images_batch))
        .route("/api/decks/:id/image-status", get(images::image_status))
        // Apply API auth middleware to all protected routes.
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_api_token,
        ));

    public.merge(protected)
}

/// Success response: the payload's fields plus `"success": true`.
pub(crate) fn ok(payload: impl Serialize) -> Response {
    let mut value = serde_json::to_value(payload).unwrap_or_else(|e| {
        tracing::error!(error = %e, "failed to serialize response");
        serde_json::Value::Object(Default::default())
    });
    if let Some(obj) = value.as_object_mut() {
        obj.insert("success".into(), serde_json::Value::Bool(true));
    }
    Json(value).into_response()
}
