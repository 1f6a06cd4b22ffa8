//! Extractors whose rejections use the API error shape instead of axum's
//! plain-text defaults.

use axum::extract::{FromRequest, FromRequestParts, Path, Request};
use axum::http::request::Parts;
use axum::Json;
use serde::de::DeserializeOwned;
use uuid::Uuid;

use crate::runtime::DeckError;

/// JSON request body; a malformed body is a 400.
pub struct JsonBody<T>(pub T);

#[axum::async_trait]
impl<T, S> FromRequest<S> for JsonBody<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = DeckError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(Self(value)),
            Err(rejection) => Err(DeckError::InvalidInput(rejection.body_text())),
        }
    }
}

/// JSON body that may be absent entirely, in which case `T::default()`.
pub struct OptionalJson<T>(pub T);

#[axum::async_trait]
impl<T, S> FromRequest<S> for OptionalJson<T>
where
    T: DeserializeOwned + Default,
    S: Send + Sync,
{
    type Rejection = DeckError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let bytes = axum::body::Bytes::from_request(req, state)
            .await
            .map_err(|e| DeckError::InvalidInput(e.body_text()))?;
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self(T::default()));
        }
        serde_json::from_slice(&bytes)
            .map(Self)
            .map_err(|e| DeckError::InvalidInput(format!("invalid JSON body: {e}")))
    }
}

/// The `:id` segment of a deck route. A malformed id cannot name a deck
/// the caller owns, so it is a 404 like any other.
pub struct DeckId(pub Uuid);

#[axum::async_trait]
impl<S> FromRequestParts<S> for DeckId
where
    S: Send + Sync,
{
    type Rejection = DeckError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        Path::<Uuid>::from_request_parts(parts, state)
            .await
            .map(|Path(id)| Self(id))
            .map_err(|_| DeckError::NotFound("deck"))
    }
}
