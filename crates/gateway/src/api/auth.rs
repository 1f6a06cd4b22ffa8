//! API authentication.
//!
//! Two layers:
//! - a bearer-token middleware on protected routes. The token is read from
//!   the env var named by `config.server.api_token_env` (default
//!   `DW_API_TOKEN`) **once at startup** and only its SHA-256 digest is kept
//!   in `AppState`. When the variable is unset the middleware lets every
//!   request through (dev mode).
//! - the [`Caller`] extractor, which reads the end user's identity from the
//!   header named by `config.server.user_id_header`. The session system in
//!   front of this service sets it; a request without it is 401.

use axum::body::Body;
use axum::extract::{FromRequestParts, State};
use axum::http::request::Parts;
use axum::http::Request;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::runtime::DeckError;
use crate::state::AppState;

pub fn hash_token(token: &str) -> Vec<u8> {
    Sha256::digest(token.as_bytes()).to_vec()
}

/// Axum middleware that enforces bearer-token authentication on protected
/// routes. Attach via `axum::middleware::from_fn_with_state`.
pub async fn require_api_token(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let expected_hash = match &state.api_token_hash {
        Some(h) => h,
        None => return next.run(req).await,
    };

    let provided = req
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .unwrap_or("");

    // Compare fixed-length digests in constant time.
    let provided_hash = Sha256::digest(provided.as_bytes());
    if !bool::from(provided_hash.ct_eq(expected_hash.as_slice())) {
        return DeckError::Unauthorized.into_response();
    }

    next.run(req).await
}

/// The authenticated end user making the request.
#[derive(Debug, Clone)]
pub struct Caller(pub String);

#[axum::async_trait]
impl FromRequestParts<AppState> for Caller {
    type Rejection = DeckError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(state.config.server.user_id_header.as_str())
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(|v| Caller(v.to_string()))
            .ok_or(DeckError::Unauthorized)
    }
}
