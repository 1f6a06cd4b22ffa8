//! Draft review: bulk drafting into a deck, AI edit, regeneration,
//! one-level undo and verbatim overwrite.
//!
//! Every operation holds the deck lock across its read-modify-write of the
//! metadata row and returns the full draft list afterwards. A failed model
//! call returns before anything is written.

use dw_domain::config::ROLE_DRAFTING;
use dw_domain::deck::{find_draft_mut, DeckStatus, DraftCard};
use dw_domain::trace::TraceEvent;
use serde::Deserialize;
use uuid::Uuid;

use super::decks::{check_card_count, load_metadata, load_owned_deck};
use super::error::{DeckError, DeckResult};
use super::generator::{self, BulkRequest, RegenerateRequest};
use crate::state::AppState;

/// Optional overrides for drafting an existing deck. Absent fields fall
/// back to the deck's own values.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DraftOverrides {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub theme: Option<String>,
    #[serde(default)]
    pub card_count: Option<u32>,
}

/// Bulk-generate drafts for a draft deck from its anchors and summary,
/// replacing any existing drafts.
pub async fn generate_drafts(
    state: &AppState,
    user_id: &str,
    deck_id: Uuid,
    overrides: DraftOverrides,
) -> DeckResult<Vec<DraftCard>> {
    if let Some(count) = overrides.card_count {
        check_card_count(state, count)?;
    }
    let model = super::model_for(state, ROLE_DRAFTING)?;

    let _permit = state.deck_locks.acquire(deck_id).await?;
    let mut deck = load_owned_deck(state, deck_id, user_id).await?;
    let mut metadata = load_metadata(state, deck_id).await?;
    if deck.status != DeckStatus::Draft {
        return Err(DeckError::invalid_state("deck is no longer in draft"));
    }

    let target = overrides.card_count.unwrap_or(deck.card_count);
    let drafts = generator::generate_bulk(
        &model,
        &BulkRequest {
            deck_id: Some(deck_id),
            title: overrides.title.unwrap_or_else(|| deck.title.clone()),
            theme: overrides.theme.unwrap_or_else(|| deck.theme.clone()),
            target_count: target,
            anchors: metadata.extracted_anchors.clone(),
            summary: metadata.conversation_summary.clone(),
        },
        state.config.generation.bulk_max_attempts,
    )
    .await?;

    metadata.draft_cards = Some(drafts.clone());
    metadata.touch();
    state.store.save_metadata(&metadata).await?;

    if deck.card_count != target {
        deck.card_count = target;
        deck.updated_at = chrono::Utc::now();
        state.store.update_deck(&deck).await?;
    }
    Ok(drafts)
}

/// Rewrite one draft card following `instruction`.
pub async fn edit_draft(
    state: &AppState,
    user_id: &str,
    deck_id: Uuid,
    card_number: u32,
    instruction: &str,
) -> DeckResult<Vec<DraftCard>> {
    let _permit = state.deck_locks.acquire(deck_id).await?;
    load_owned_deck(state, deck_id, user_id).await?;
    let mut metadata = load_metadata(state, deck_id).await?;
    let model = super::model_for(state, ROLE_DRAFTING)?;

    let summary = metadata.conversation_summary.clone();
    let drafts = metadata.draft_cards.get_or_insert_with(Vec::new);
    let card = find_draft_mut(drafts, card_number).ok_or(DeckError::NotFound("card"))?;

    let content = generator::generate_edit(&model, card, instruction, summary.as_deref()).await?;
    card.replace_content(content);

    save_mutation(state, &mut metadata, card_number, "edit").await
}

/// Replace one draft card with a fresh take that avoids its siblings.
pub async fn regenerate_draft(
    state: &AppState,
    user_id: &str,
    deck_id: Uuid,
    card_number: u32,
) -> DeckResult<Vec<DraftCard>> {
    let _permit = state.deck_locks.acquire(deck_id).await?;
    let deck = load_owned_deck(state, deck_id, user_id).await?;
    let mut metadata = load_metadata(state, deck_id).await?;
    let model = super::model_for(state, ROLE_DRAFTING)?;

    if !metadata.drafts().iter().any(|c| c.card_number == card_number) {
        return Err(DeckError::NotFound("card"));
    }
    let anchor_limit = state.config.generation.regenerate_anchor_limit;
    let anchors = &metadata.extracted_anchors;
    let anchors = &anchors[..anchors.len().min(anchor_limit)];
    let content = generator::generate_regenerate(
        &model,
        RegenerateRequest {
            card_number,
            title: &deck.title,
            theme: &deck.theme,
            anchors,
            siblings: metadata.drafts(),
            summary: metadata.conversation_summary.as_deref(),
        },
    )
    .await?;

    let drafts = metadata.draft_cards.get_or_insert_with(Vec::new);
    let card = find_draft_mut(drafts, card_number).ok_or(DeckError::NotFound("card"))?;
    card.replace_content(content);

    save_mutation(state, &mut metadata, card_number, "regenerate").await
}

/// Restore a card's snapshot. A card without one is left as is.
pub async fn undo_draft(
    state: &AppState,
    user_id: &str,
    deck_id: Uuid,
    card_number: u32,
) -> DeckResult<Vec<DraftCard>> {
    let _permit = state.deck_locks.acquire(deck_id).await?;
    load_owned_deck(state, deck_id, user_id).await?;
    let mut metadata = load_metadata(state, deck_id).await?;

    let drafts = metadata.draft_cards.get_or_insert_with(Vec::new);
    let card = find_draft_mut(drafts, card_number).ok_or(DeckError::NotFound("card"))?;
    if !card.undo() {
        return Ok(metadata.drafts().to_vec());
    }
    save_mutation(state, &mut metadata, card_number, "undo").await
}

/// Store a client-computed draft list verbatim.
pub async fn overwrite_drafts(
    state: &AppState,
    user_id: &str,
    deck_id: Uuid,
    cards: Vec<DraftCard>,
) -> DeckResult<Vec<DraftCard>> {
    let _permit = state.deck_locks.acquire(deck_id).await?;
    load_owned_deck(state, deck_id, user_id).await?;
    let mut metadata = load_metadata(state, deck_id).await?;

    metadata.draft_cards = Some(cards);
    metadata.touch();
    state.store.save_metadata(&metadata).await?;
    tracing::debug!(deck_id = %deck_id, cards = metadata.drafts().len(), "drafts overwritten");
    Ok(metadata.drafts().to_vec())
}

async fn save_mutation(
    state: &AppState,
    metadata: &mut dw_domain::deck::DeckMetadata,
    card_number: u32,
    operation: &'static str,
) -> DeckResult<Vec<DraftCard>> {
    metadata.touch();
    state.store.save_metadata(metadata).await?;
    TraceEvent::DraftMutated {
        deck_id: metadata.deck_id,
        card_number,
        operation,
    }
    .emit();
    Ok(metadata.drafts().to_vec())
}
