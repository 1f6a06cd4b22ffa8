//! Repair half-finished finalizations.
//!
//! Without a transactional store, finalization can stop after inserting
//! cards but before flipping the deck. Such a deck is still `draft`, still
//! has its drafts, and has one card row per draft. This pass finishes the
//! transition for every deck in that state.

use dw_domain::deck::DeckStatus;
use dw_domain::trace::TraceEvent;
use uuid::Uuid;

use super::error::DeckResult;
use crate::state::AppState;

/// Finish interrupted finalizations. Returns the repaired deck ids; the
/// caller decides how their images get generated.
pub async fn reconcile_once(state: &AppState) -> DeckResult<Vec<Uuid>> {
    let mut repaired = Vec::new();

    for candidate in state.store.list_decks_by_status(DeckStatus::Draft).await? {
        let cards = state.store.list_cards(candidate.id).await?;
        if cards.is_empty() {
            continue;
        }

        let _permit = state.deck_locks.acquire(candidate.id).await?;
        // Re-read under the lock; a concurrent finalize may have finished.
        let Some(mut deck) = state.store.get_deck(candidate.id).await? else {
            continue;
        };
        if deck.status != DeckStatus::Draft {
            continue;
        }
        let Some(mut metadata) = state.store.get_metadata(deck.id).await? else {
            continue;
        };
        let mut draft_numbers: Vec<u32> = metadata.drafts().iter().map(|d| d.card_number).collect();
        let mut card_numbers: Vec<u32> = cards.iter().map(|c| c.card_number).collect();
        draft_numbers.sort_unstable();
        card_numbers.sort_unstable();
        if draft_numbers != card_numbers {
            // Cards added by hand to a deck still being authored.
            continue;
        }

        deck.status = DeckStatus::Generating;
        deck.card_count = cards.len() as u32;
        deck.updated_at = chrono::Utc::now();
        state.store.update_deck(&deck).await?;
        metadata.draft_cards = None;
        metadata.touch();
        state.store.save_metadata(&metadata).await?;

        tracing::info!(
            deck_id = %deck.id,
            cards = cards.len(),
            "reconciled interrupted finalization"
        );
        TraceEvent::DeckStatusChanged {
            deck_id: deck.id,
            status: DeckStatus::Generating,
        }
        .emit();
        repaired.push(deck.id);
    }

    Ok(repaired)
}

/// Server-side pass: queue image generation for every repaired deck.
pub async fn reconcile_and_enqueue(state: &AppState) -> DeckResult<usize> {
    let repaired = reconcile_once(state).await?;
    for deck_id in &repaired {
        if let Err(e) = state.image_queue.enqueue(*deck_id) {
            tracing::warn!(deck_id = %deck_id, error = %e, "failed to queue image generation");
        }
    }
    Ok(repaired.len())
}
