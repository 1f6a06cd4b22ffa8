//! `POST /api/chat`: one conversation turn, streamed as SSE.
//!
//! Event names: `text` (assistant prose), `card_updated`, `readiness`,
//! `restart`, `error`, `done`. Each data payload is the JSON of the event
//! including its `type` field.

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use dw_domain::deck::ChatMessage;
use futures_util::stream::Stream;
use serde::Deserialize;
use uuid::Uuid;

use super::auth::Caller;
use super::extract::JsonBody;
use crate::runtime::{run_turn, DeckResult, TurnEvent, TurnInput};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatBody {
    #[serde(default)]
    pub deck_id: Option<Uuid>,
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
}

pub async fn chat(
    State(state): State<AppState>,
    Caller(user): Caller,
    JsonBody(body): JsonBody<ChatBody>,
) -> DeckResult<Response> {
    let rx = run_turn(
        state,
        TurnInput {
            deck_id: body.deck_id,
            user_id: user,
            messages: body.messages,
        },
    )
    .await?;
    Ok(Sse::new(make_sse_stream(rx))
        .keep_alive(KeepAlive::default())
        .into_response())
}

fn make_sse_stream(
    mut rx: tokio::sync::mpsc::Receiver<TurnEvent>,
) -> impl Stream<Item = Result<Event, std::convert::Infallible>> {
    async_stream::stream! {
        while let Some(event) = rx.recv().await {
            let data = serde_json::to_string(&event).unwrap_or_default();
            yield Ok(Event::default().event(event.name()).data(data));
        }
    }
}
