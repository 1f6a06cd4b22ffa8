//! Request-facing error taxonomy.

use dw_domain::error::Error;

/// Every failure a deck operation can surface to a caller.
///
/// Existence and ownership are deliberately folded into `NotFound` so a
/// non-owner cannot probe for other users' decks.
#[derive(Debug, thiserror::Error)]
pub enum DeckError {
    #[error("unauthorized")]
    Unauthorized,

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("{0}")]
    InvalidInput(String),

    #[error("{0}")]
    InvalidState(String),

    /// Plan limit reached.
    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    ServiceUnavailable(String),

    /// A model call failed after its retry budget.
    #[error("generation failed: {0}")]
    UpstreamGeneration(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl DeckError {
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }
}

/// Infrastructure errors reaching a handler are persistence failures.
/// Model failures are mapped to `UpstreamGeneration` at the call site.
impl From<Error> for DeckError {
    fn from(e: Error) -> Self {
        DeckError::Internal(e.to_string())
    }
}

pub type DeckResult<T> = std::result::Result<T, DeckError>;
