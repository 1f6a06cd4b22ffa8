//! Finalization: commit a draft deck's cards and hand it to the image
//! pipeline.

use std::collections::HashSet;

use dw_domain::deck::{Card, DeckStatus};
use dw_domain::trace::TraceEvent;
use dw_store::Finalization;
use uuid::Uuid;

use super::decks::{load_metadata, load_owned_deck};
use super::error::{DeckError, DeckResult};
use crate::state::AppState;

/// Turn the deck's drafts into card rows and move the deck to
/// `generating`.
///
/// Preconditions are checked in order and the first failure wins: owned
/// deck, metadata row, `draft` status, at least one draft card. Nothing is
/// written unless all of them hold. Image generation is queued after the
/// commit; a queueing failure is logged, not returned.
pub async fn finalize_deck(
    state: &AppState,
    user_id: &str,
    deck_id: Uuid,
    art_style_id: Option<String>,
) -> DeckResult<Uuid> {
    let permit = state.deck_locks.acquire(deck_id).await?;

    let mut deck = load_owned_deck(state, deck_id, user_id).await?;
    let mut metadata = load_metadata(state, deck_id).await?;
    if deck.status != DeckStatus::Draft {
        return Err(DeckError::invalid_state(format!(
            "deck is {}, only draft decks can be finalized",
            deck.status
        )));
    }
    if metadata.drafts().is_empty() {
        return Err(DeckError::invalid_state("deck has no draft cards"));
    }

    // A previous attempt may have stopped after inserting cards; those
    // numbers already have rows and are not inserted again.
    let existing: HashSet<u32> = state
        .store
        .list_cards(deck_id)
        .await?
        .iter()
        .map(|c| c.card_number)
        .collect();
    let card_total = metadata.drafts().len();
    let cards: Vec<Card> = metadata
        .drafts()
        .iter()
        .filter(|d| !existing.contains(&d.card_number))
        .map(|d| Card::from_draft(deck_id, d))
        .collect();
    if cards.len() < card_total {
        tracing::info!(
            deck_id = %deck_id,
            existing = card_total - cards.len(),
            "resuming interrupted finalization"
        );
    }

    deck.status = DeckStatus::Generating;
    deck.card_count = card_total as u32;
    if let Some(style) = art_style_id.filter(|s| !s.is_empty()) {
        deck.art_style_id = Some(style);
    }
    deck.updated_at = chrono::Utc::now();
    metadata.draft_cards = None;
    metadata.touch();

    state
        .store
        .commit_finalization(&Finalization {
            cards,
            deck,
            metadata,
        })
        .await
        .map_err(|e| {
            tracing::error!(deck_id = %deck_id, error = %e, "finalization failed");
            DeckError::Internal(e.to_string())
        })?;
    drop(permit);

    TraceEvent::DeckFinalized {
        deck_id,
        cards: card_total,
    }
    .emit();
    TraceEvent::DeckStatusChanged {
        deck_id,
        status: DeckStatus::Generating,
    }
    .emit();

    if let Err(e) = state.image_queue.enqueue(deck_id) {
        tracing::warn!(deck_id = %deck_id, error = %e, "failed to queue image generation");
    }
    Ok(deck_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::test_support::{content_json, OrderedStore, TestHarness};
    use dw_domain::deck::{DraftCard, ImageStatus};

    fn drafts(n: u32) -> Vec<DraftCard> {
        (1..=n)
            .map(|i| {
                let content = serde_json::from_str(&content_json(&format!("Card {i}"))).unwrap();
                DraftCard::new(i, content)
            })
            .collect()
    }

    #[tokio::test]
    async fn commits_cards_and_queues_images() {
        let mut h = TestHarness::new();
        let deck = h.seed_draft_deck("u1", 3).await;
        h.set_drafts(deck.id, drafts(3)).await;

        finalize_deck(&h.state, "u1", deck.id, Some("watercolor".into()))
            .await
            .unwrap();

        let cards = h.state.store.list_cards(deck.id).await.unwrap();
        assert_eq!(cards.len(), 3);
        assert!(cards.iter().all(|c| c.image_status == ImageStatus::Pending));
        let deck = h.state.store.get_deck(deck.id).await.unwrap().unwrap();
        assert_eq!(deck.status, DeckStatus::Generating);
        assert_eq!(deck.card_count, 3);
        assert_eq!(deck.art_style_id.as_deref(), Some("watercolor"));
        let meta = h.state.store.get_metadata(deck.id).await.unwrap().unwrap();
        assert!(meta.draft_cards.is_none());
        assert_eq!(h.jobs.try_recv().unwrap(), deck.id);
    }

    #[tokio::test]
    async fn non_draft_deck_is_rejected_before_any_insert() {
        let h = TestHarness::new();
        let mut deck = h.seed_draft_deck("u1", 2).await;
        h.set_drafts(deck.id, drafts(2)).await;
        deck.status = DeckStatus::Generating;
        h.state.store.update_deck(&deck).await.unwrap();

        let err = finalize_deck(&h.state, "u1", deck.id, None).await.unwrap_err();
        assert!(matches!(err, DeckError::InvalidState(_)));
        assert_eq!(h.store.card_inserts(), 0);
        assert!(h.state.store.list_cards(deck.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn empty_drafts_are_rejected() {
        let h = TestHarness::new();
        let deck = h.seed_draft_deck("u1", 2).await;
        let err = finalize_deck(&h.state, "u1", deck.id, None).await.unwrap_err();
        assert!(matches!(err, DeckError::InvalidState(_)));
        assert_eq!(h.store.card_inserts(), 0);
    }

    #[tokio::test]
    async fn not_found_wins_over_state_checks() {
        let h = TestHarness::new();
        let deck = h.seed_draft_deck("u1", 2).await;
        assert!(matches!(
            finalize_deck(&h.state, "u2", deck.id, None).await.unwrap_err(),
            DeckError::NotFound("deck")
        ));

        h.state.store.delete_deck(deck.id).await.unwrap();
        assert!(matches!(
            finalize_deck(&h.state, "u1", deck.id, None).await.unwrap_err(),
            DeckError::NotFound("deck")
        ));
    }

    #[tokio::test]
    async fn missing_metadata_is_not_found() {
        let h = TestHarness::new();
        let deck = dw_domain::deck::Deck::new(dw_domain::deck::NewDeck {
            user_id: "u1".into(),
            title: "Bare".into(),
            description: None,
            theme: "t".into(),
            status: DeckStatus::Draft,
            card_count: 1,
            art_style_id: None,
        });
        h.state.store.insert_deck(&deck).await.unwrap();
        assert!(matches!(
            finalize_deck(&h.state, "u1", deck.id, None).await.unwrap_err(),
            DeckError::NotFound("deck metadata")
        ));
    }

    #[tokio::test]
    async fn keeps_existing_style_without_override() {
        let h = TestHarness::new();
        let mut deck = h.seed_draft_deck("u1", 1).await;
        deck.art_style_id = Some("celestial".into());
        h.state.store.update_deck(&deck).await.unwrap();
        h.set_drafts(deck.id, drafts(1)).await;

        finalize_deck(&h.state, "u1", deck.id, None).await.unwrap();
        let deck = h.state.store.get_deck(deck.id).await.unwrap().unwrap();
        assert_eq!(deck.art_style_id.as_deref(), Some("celestial"));
    }

    #[tokio::test]
    async fn retry_after_partial_commit_does_not_duplicate_cards() {
        let mut h = TestHarness::new();
        let deck = h.seed_draft_deck("u1", 3).await;
        h.set_drafts(deck.id, drafts(3)).await;
        let store = Arc::new(OrderedStore::new(h.state.store.clone()));
        h.state.store = store.clone();

        store.fail_next_deck_update();
        let err = finalize_deck(&h.state, "u1", deck.id, None).await.unwrap_err();
        assert!(matches!(err, DeckError::Internal(_)));
        assert_eq!(h.state.store.list_cards(deck.id).await.unwrap().len(), 3);
        let stuck = h.state.store.get_deck(deck.id).await.unwrap().unwrap();
        assert_eq!(stuck.status, DeckStatus::Draft);

        finalize_deck(&h.state, "u1", deck.id, None).await.unwrap();

        let cards = h.state.store.list_cards(deck.id).await.unwrap();
        let numbers: Vec<u32> = cards.iter().map(|c| c.card_number).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
        let deck = h.state.store.get_deck(deck.id).await.unwrap().unwrap();
        assert_eq!(deck.status, DeckStatus::Generating);
        assert_eq!(deck.card_count, 3);
        let meta = h.state.store.get_metadata(deck.id).await.unwrap().unwrap();
        assert!(meta.draft_cards.is_none());
    }
}
