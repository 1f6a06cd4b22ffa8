//! Conversation turn engine.
//!
//! One turn: build the system prompt from the deck's drafts, summary and
//! readiness, stream the model with the three deck tools for a bounded
//! number of steps, then run the finish sequence in order:
//!
//! 1. persist the latest user message, then the assistant text;
//! 2. apply `update_card` calls to the drafts (one snapshot each);
//! 3. on a confirmed `restart_journey`, delete the deck and stop;
//! 4. for a narrative turn (text, no tool calls), re-extract anchors and
//!    emit readiness. Extraction failures are logged only.
//!
//! The deck lock is held by the turn task from the first model call to the
//! last write, so it outlives a client that disconnects mid-stream.

use std::collections::HashMap;
use std::time::Instant;

use dw_domain::config::{ROLE_CONVERSATION, ROLE_EXTRACTION};
use dw_domain::deck::{
    find_draft_mut, ChatMessage, ChatRole, ConversationMessage, Deck, DeckMetadata, DraftCard,
};
use dw_domain::stream::{StreamEvent, Usage};
use dw_domain::tool::{Message, ToolCall};
use dw_domain::trace::TraceEvent;
use dw_providers::ResolvedModel;
use futures_util::StreamExt;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::Instrument;
use uuid::Uuid;

use super::anchors;
use super::decks::load_owned_deck;
use super::error::{DeckError, DeckResult};
use super::readiness::{self, Readiness};
use super::tools::{self, CardUpdate, ToolInvocation};
use crate::state::AppState;

/// Where the client goes after a confirmed restart.
pub const RESTART_REDIRECT: &str = "/decks/new";

const PERSONA: &str = "\
You are a warm, curious guide helping someone design a personal oracle \
card deck. Ask one question at a time. Draw out specific stories, the \
feelings attached to them, and the images and symbols they bring to mind. \
When cards have been drafted, help the user refine them with the tools \
you have. Never restart the journey unless the user clearly confirms.";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Events
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Everything a turn streams to the client. `Text` is the assistant
/// prose; the rest are structural side-channel signals.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnEvent {
    Text {
        text: String,
    },
    CardUpdated {
        #[serde(rename = "cardNumber")]
        card_number: u32,
        card: DraftCard,
    },
    Readiness(Readiness),
    Restart {
        redirect: String,
    },
    Error {
        message: String,
    },
    Done,
}

impl TurnEvent {
    /// SSE event name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Text { .. } => "text",
            Self::CardUpdated { .. } => "card_updated",
            Self::Readiness(_) => "readiness",
            Self::Restart { .. } => "restart",
            Self::Error { .. } => "error",
            Self::Done => "done",
        }
    }
}

#[derive(Debug, Clone)]
pub struct TurnInput {
    pub deck_id: Option<Uuid>,
    pub user_id: String,
    pub messages: Vec<ChatMessage>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Entry point
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Validate a turn and start it in the background.
///
/// Checks run in the order the HTTP contract reports them: provider
/// configured (503), input present (400), deck owned (404). Everything
/// after that is reported as stream events.
pub async fn run_turn(state: AppState, input: TurnInput) -> DeckResult<mpsc::Receiver<TurnEvent>> {
    let model = super::model_for(&state, ROLE_CONVERSATION)?;
    let deck_id = input
        .deck_id
        .ok_or_else(|| DeckError::invalid_input("deckId is required"))?;
    if input.messages.is_empty() {
        return Err(DeckError::invalid_input("messages must not be empty"));
    }
    load_owned_deck(&state, deck_id, &input.user_id).await?;

    let (tx, rx) = mpsc::channel(64);
    let span = tracing::info_span!("turn", deck_id = %deck_id);
    tokio::spawn(
        async move {
            let _permit = match state.deck_locks.acquire(deck_id).await {
                Ok(permit) => permit,
                Err(e) => {
                    send(&tx, TurnEvent::Error { message: e.to_string() }).await;
                    return;
                }
            };
            // The deck may have gone while we waited for the lock.
            let deck = match load_owned_deck(&state, deck_id, &input.user_id).await {
                Ok(deck) => deck,
                Err(e) => {
                    send(&tx, TurnEvent::Error { message: e.to_string() }).await;
                    return;
                }
            };
            if let Err(e) = execute(&state, &model, deck, &input.messages, &tx).await {
                tracing::warn!(error = %e, "turn failed");
                send(&tx, TurnEvent::Error { message: e.to_string() }).await;
            }
        }
        .instrument(span),
    );
    Ok(rx)
}

/// The client may be gone; the turn still runs to the end.
async fn send(tx: &mpsc::Sender<TurnEvent>, event: TurnEvent) {
    let _ = tx.send(event).await;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Prompt
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub fn build_system_prompt(deck: &Deck, metadata: &DeckMetadata) -> String {
    let mut prompt = format!(
        "{PERSONA}\n\nDeck: \"{title}\" ({count} cards)\nTheme: {theme}",
        title = deck.title,
        count = deck.card_count,
        theme = deck.theme,
    );

    let drafts = metadata.drafts();
    if !drafts.is_empty() {
        prompt.push_str("\n\nDrafted cards:");
        for card in drafts {
            prompt.push_str(&format!("\n{}. {}", card.card_number, card.content.title));
        }
    }
    if let Some(summary) = metadata.conversation_summary.as_deref().filter(|s| !s.is_empty()) {
        prompt.push_str(&format!("\n\nConversation so far: {summary}"));
    }

    let r = readiness::assess(metadata.extracted_anchors.len(), deck.card_count);
    prompt.push_str(&format!("\n\nReadiness: {}", r.readiness_text));
    if r.is_ready && drafts.is_empty() {
        prompt.push_str(" Let the user know their cards can be generated whenever they like.");
    }
    prompt
}

fn render_card_listing(drafts: &[DraftCard]) -> String {
    if drafts.is_empty() {
        return "No cards have been drafted yet.".into();
    }
    drafts
        .iter()
        .map(|c| {
            format!(
                "Card {n}: {title}\n  meaning: {meaning}\n  guidance: {guidance}\n  image: {image}",
                n = c.card_number,
                title = c.content.title,
                meaning = c.content.meaning,
                guidance = c.content.guidance,
                image = c.content.image_prompt,
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn to_model_message(m: &ChatMessage) -> Message {
    match m.role {
        ChatRole::User => Message::user(m.content.clone()),
        ChatRole::Assistant => Message::assistant(m.content.clone()),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Turn body
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// What the tool loop decided; applied in the finish sequence.
#[derive(Default)]
struct TurnOutcome {
    text: String,
    tool_calls: usize,
    updates: Vec<CardUpdate>,
    restart: bool,
}

/// One model step's accumulated output.
struct StepOutput {
    text: String,
    tool_calls: Vec<ToolCall>,
    usage: Option<Usage>,
}

async fn execute(
    state: &AppState,
    model: &ResolvedModel,
    deck: Deck,
    history: &[ChatMessage],
    tx: &mpsc::Sender<TurnEvent>,
) -> DeckResult<()> {
    let mut metadata = state
        .store
        .get_metadata(deck.id)
        .await?
        .unwrap_or_else(|| DeckMetadata::new(deck.id));

    let mut messages = Vec::with_capacity(history.len() + 1);
    messages.push(Message::system(build_system_prompt(&deck, &metadata)));
    messages.extend(history.iter().map(to_model_message));

    let Some(outcome) = tool_loop(state, model, &metadata, messages, tx).await else {
        // Provider failure: already reported, nothing persisted.
        return Ok(());
    };

    // ── 1. conversation rows ───────────────────────────────────────
    if let Some(last) = history.last().filter(|m| m.role == ChatRole::User) {
        let message = ConversationMessage::new(deck.id, ChatRole::User, last.content.clone());
        state.store.append_message(&message).await?;
    }
    if !outcome.text.is_empty() {
        state
            .store
            .append_message(&ConversationMessage::new(
                deck.id,
                ChatRole::Assistant,
                outcome.text.clone(),
            ))
            .await?;
    }

    // ── 2. card updates ────────────────────────────────────────────
    if !outcome.updates.is_empty() {
        let mut updated = Vec::new();
        if let Some(drafts) = metadata.draft_cards.as_mut() {
            for update in &outcome.updates {
                if let Some(card) = find_draft_mut(drafts, update.card_number) {
                    let content = update.apply_to(&card.content);
                    card.replace_content(content);
                    updated.push(card.clone());
                }
            }
        }
        if !updated.is_empty() {
            metadata.touch();
            state.store.save_metadata(&metadata).await?;
            for card in updated {
                TraceEvent::DraftMutated {
                    deck_id: deck.id,
                    card_number: card.card_number,
                    operation: "tool_update",
                }
                .emit();
                send(
                    tx,
                    TurnEvent::CardUpdated {
                        card_number: card.card_number,
                        card,
                    },
                )
                .await;
            }
        }
    }

    // ── 3. restart ─────────────────────────────────────────────────
    if outcome.restart {
        state.store.delete_deck(deck.id).await?;
        tracing::info!("journey restarted; deck deleted");
        send(
            tx,
            TurnEvent::Restart {
                redirect: RESTART_REDIRECT.into(),
            },
        )
        .await;
        send(tx, TurnEvent::Done).await;
        return Ok(());
    }

    // ── 4. anchor extraction ───────────────────────────────────────
    if !outcome.text.is_empty() && outcome.tool_calls == 0 {
        let mut transcript = history.to_vec();
        transcript.push(ChatMessage {
            role: ChatRole::Assistant,
            content: outcome.text.clone(),
        });
        if let Some(r) = refresh_anchors(state, &deck, &mut metadata, &transcript).await {
            send(tx, TurnEvent::Readiness(r)).await;
        }
    }

    send(tx, TurnEvent::Done).await;
    Ok(())
}

/// Run model steps until the model stops calling tools, a restart is
/// confirmed, or the step budget runs out. `None` means the model call
/// failed; the error event has been sent.
async fn tool_loop(
    state: &AppState,
    model: &ResolvedModel,
    metadata: &DeckMetadata,
    mut messages: Vec<Message>,
    tx: &mpsc::Sender<TurnEvent>,
) -> Option<TurnOutcome> {
    let max_steps = state.config.generation.max_tool_steps.max(1);
    let tool_defs = tools::definitions();
    let mut outcome = TurnOutcome::default();

    for step in 0..max_steps {
        let mut req = super::request_for(model);
        req.messages = messages.clone();
        req.tools = tool_defs.clone();

        let started = Instant::now();
        let output = match stream_step(model, &req, tx).await {
            Ok(output) => output,
            Err(message) => {
                tracing::warn!(step, error = %message, "conversation model call failed");
                send(tx, TurnEvent::Error { message }).await;
                return None;
            }
        };
        super::trace_llm(model, "conversation", true, started, output.usage);

        outcome.text.push_str(&output.text);
        if output.tool_calls.is_empty() {
            break;
        }

        messages.push(Message::assistant_with_tools(&output.text, &output.tool_calls));
        for call in &output.tool_calls {
            outcome.tool_calls += 1;
            let (result, is_error) = match tools::parse(call) {
                Ok(ToolInvocation::EnterEditMode) => {
                    (render_card_listing(metadata.drafts()), false)
                }
                Ok(ToolInvocation::UpdateCard(update)) => {
                    if metadata.drafts().iter().any(|c| c.card_number == update.card_number) {
                        let msg = format!("Card {} updated.", update.card_number);
                        outcome.updates.push(update);
                        (msg, false)
                    } else {
                        (format!("There is no drafted card {}.", update.card_number), true)
                    }
                }
                Ok(ToolInvocation::RestartJourney { confirmed: true }) => {
                    outcome.restart = true;
                    ("The journey will restart.".to_string(), false)
                }
                Ok(ToolInvocation::RestartJourney { confirmed: false }) => (
                    "Restart not performed: ask the user to confirm first.".to_string(),
                    false,
                ),
                Err(message) => {
                    tracing::warn!(tool = %call.tool_name, error = %message, "rejected tool call");
                    (message, true)
                }
            };
            messages.push(Message::tool_result(&call.call_id, result, is_error));
        }

        if outcome.restart {
            break;
        }
    }
    Some(outcome)
}

/// Stream one model step, forwarding text as it arrives and assembling
/// tool calls from their start/delta fragments.
async fn stream_step(
    model: &ResolvedModel,
    req: &dw_providers::ChatRequest,
    tx: &mpsc::Sender<TurnEvent>,
) -> Result<StepOutput, String> {
    let mut stream = model.provider.chat_stream(req).await.map_err(|e| e.to_string())?;

    let mut output = StepOutput {
        text: String::new(),
        tool_calls: Vec::new(),
        usage: None,
    };
    // call_id -> (name, argument json), in arrival order.
    let mut pending: HashMap<String, (String, String)> = HashMap::new();
    let mut order: Vec<String> = Vec::new();

    while let Some(event) = stream.next().await {
        match event.map_err(|e| e.to_string())? {
            StreamEvent::Token { text } => {
                output.text.push_str(&text);
                send(tx, TurnEvent::Text { text }).await;
            }
            StreamEvent::ToolCallStarted { call_id, tool_name } => {
                order.push(call_id.clone());
                pending.insert(call_id, (tool_name, String::new()));
            }
            StreamEvent::ToolCallDelta { call_id, delta } => {
                if let Some((_, args)) = pending.get_mut(&call_id) {
                    args.push_str(&delta);
                }
            }
            StreamEvent::ToolCallFinished {
                call_id,
                tool_name,
                arguments,
            } => {
                pending.remove(&call_id);
                order.retain(|id| id != &call_id);
                output.tool_calls.push(ToolCall {
                    call_id,
                    tool_name,
                    arguments,
                });
            }
            StreamEvent::Done { usage, .. } => output.usage = usage,
            StreamEvent::Error { message } => return Err(message),
        }
    }

    // Calls that arrived only as start + deltas.
    for call_id in order {
        let Some((tool_name, args)) = pending.remove(&call_id) else {
            continue;
        };
        let arguments = if args.trim().is_empty() {
            Value::Object(Default::default())
        } else {
            serde_json::from_str(&args).unwrap_or_else(|e| {
                tracing::warn!(
                    call_id = %call_id,
                    tool = %tool_name,
                    error = %e,
                    "tool arguments are not valid JSON"
                );
                Value::Null
            })
        };
        output.tool_calls.push(ToolCall {
            call_id,
            tool_name,
            arguments,
        });
    }
    Ok(output)
}

/// Re-extract anchors and persist them with the recomputed readiness.
/// Any failure leaves the stored anchors as they were.
async fn refresh_anchors(
    state: &AppState,
    deck: &Deck,
    metadata: &mut DeckMetadata,
    transcript: &[ChatMessage],
) -> Option<Readiness> {
    let model = state.llm.for_role(ROLE_EXTRACTION)?;
    let extraction = match anchors::extract_anchors(&model, transcript).await {
        Ok(extraction) => extraction,
        Err(e) => {
            tracing::warn!(error = %e, "anchor extraction failed");
            return None;
        }
    };

    let r = readiness::assess(extraction.anchors.len(), deck.card_count);
    let mut next = metadata.clone();
    next.extracted_anchors = extraction.anchors;
    next.conversation_summary = Some(extraction.summary);
    next.is_ready = r.is_ready;
    next.touch();
    if let Err(e) = state.store.save_metadata(&next).await {
        tracing::warn!(error = %e, "failed to store extracted anchors");
        return None;
    }
    *metadata = next;

    TraceEvent::AnchorsExtracted {
        deck_id: deck.id,
        anchors: r.anchors_found,
        target_cards: deck.card_count,
        is_ready: r.is_ready,
    }
    .emit();
    Some(r)
}
