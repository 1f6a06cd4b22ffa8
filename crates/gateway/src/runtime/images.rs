//! Image generation pipeline.
//!
//! Per card: mark `generating`, then up to `images.max_attempts` attempts
//! of generate → upload → mark `completed`, with exponential backoff
//! between attempts. Exhaustion marks the card `failed`. Outcomes are
//! values, not errors, so a batch can tally them.
//!
//! Batches run sequentially with a fixed delay between cards, then check
//! whether the whole deck is done.

use std::time::Duration;

use dw_domain::deck::{Deck, DeckStatus, ImageStatus, ImageStatusCounts};
use dw_domain::trace::TraceEvent;
use dw_providers::ImageRequest;
use serde::Serialize;
use tracing::Instrument;
use uuid::Uuid;

use super::decks::load_owned_deck;
use super::error::{DeckError, DeckResult};
use crate::state::AppState;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// The deck disappeared while the card was being generated.
    DeckDeleted,
    /// Every attempt failed; carries the last error.
    Exhausted(String),
    /// Status bookkeeping failed before any attempt.
    Storage(String),
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DeckDeleted => f.write_str("deck was deleted"),
            Self::Exhausted(e) => write!(f, "image generation failed: {e}"),
            Self::Storage(e) => write!(f, "storage error: {e}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CardImageOutcome {
    Completed { card_id: Uuid, image_url: String },
    Failed { card_id: Uuid, reason: FailureReason },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub processed: usize,
    pub failed: usize,
}

fn combined_prompt(image_prompt: &str, style_prompt: Option<&str>) -> String {
    match style_prompt {
        Some(style) if !style.is_empty() => format!("{image_prompt}, {style}"),
        _ => image_prompt.to_string(),
    }
}

/// Wait before attempt `attempt + 1`: base, 2×base, 4×base, ...
fn backoff(base_ms: u64, attempt: u32) -> Duration {
    Duration::from_millis(base_ms.saturating_mul(1u64 << (attempt - 1).min(16)))
}

fn deck_style(state: &AppState, deck: &Deck) -> Option<String> {
    state
        .config
        .images
        .resolve_style(deck.art_style_id.as_deref())
        .map(|s| s.prompt.clone())
}

fn images_unavailable() -> DeckError {
    DeckError::ServiceUnavailable("no image provider is configured".into())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Per card
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Generate, upload and record one card image.
pub async fn generate_card_image(
    state: &AppState,
    card_id: Uuid,
    image_prompt: &str,
    style_prompt: Option<&str>,
    deck_id: Uuid,
) -> DeckResult<CardImageOutcome> {
    let provider = state.llm.images().ok_or_else(images_unavailable)?;
    let cfg = &state.config.images;
    let max_attempts = cfg.max_attempts.max(1);
    let span = tracing::info_span!("card_image", deck_id = %deck_id, card_id = %card_id);

    async move {
        if let Err(e) = state
            .store
            .update_card_image(card_id, ImageStatus::Generating, None)
            .await
        {
            return Ok(CardImageOutcome::Failed {
                card_id,
                reason: FailureReason::Storage(e.to_string()),
            });
        }
        TraceEvent::CardImageStatus {
            deck_id,
            card_id,
            status: ImageStatus::Generating,
            attempt: 0,
        }
        .emit();

        let request = ImageRequest {
            prompt: combined_prompt(image_prompt, style_prompt),
            size: Some(cfg.size.clone()),
        };
        let path = format!("cards/{deck_id}/{card_id}.png");
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            match state.store.get_deck(deck_id).await {
                Ok(Some(_)) => {}
                Ok(None) => {
                    tracing::info!("deck deleted during image generation");
                    return Ok(CardImageOutcome::Failed {
                        card_id,
                        reason: FailureReason::DeckDeleted,
                    });
                }
                Err(e) => {
                    last_error = e.to_string();
                    tracing::warn!(attempt, error = %e, "deck lookup failed");
                    if attempt < max_attempts {
                        tokio::time::sleep(backoff(cfg.retry_base_delay_ms, attempt)).await;
                    }
                    continue;
                }
            }

            let result = async {
                let image = provider.generate(&request).await?;
                let url = state.blobs.put(&path, image.bytes, &image.content_type).await?;
                state
                    .store
                    .update_card_image(card_id, ImageStatus::Completed, Some(url.clone()))
                    .await?;
                Ok::<_, dw_domain::error::Error>(url)
            }
            .await;

            match result {
                Ok(image_url) => {
                    TraceEvent::CardImageStatus {
                        deck_id,
                        card_id,
                        status: ImageStatus::Completed,
                        attempt,
                    }
                    .emit();
                    return Ok(CardImageOutcome::Completed { card_id, image_url });
                }
                Err(e) => {
                    tracing::warn!(attempt, max_attempts, error = %e, "image attempt failed");
                    last_error = e.to_string();
                    if attempt < max_attempts {
                        tokio::time::sleep(backoff(cfg.retry_base_delay_ms, attempt)).await;
                    }
                }
            }
        }

        if let Err(e) = state
            .store
            .update_card_image(card_id, ImageStatus::Failed, None)
            .await
        {
            tracing::error!(error = %e, "failed to mark card image as failed");
        }
        TraceEvent::CardImageStatus {
            deck_id,
            card_id,
            status: ImageStatus::Failed,
            attempt: max_attempts,
        }
        .emit();
        Ok(CardImageOutcome::Failed {
            card_id,
            reason: FailureReason::Exhausted(last_error),
        })
    }
    .instrument(span)
    .await
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Deck completion
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Move a `generating` deck to `completed` once every card image is done,
/// taking the cover from card #1. Returns whether the deck completed.
pub async fn complete_if_done(state: &AppState, deck_id: Uuid) -> DeckResult<bool> {
    let cards = state.store.list_cards(deck_id).await?;
    if !ImageStatusCounts::from_cards(&cards).all_completed() {
        return Ok(false);
    }
    let Some(mut deck) = state.store.get_deck(deck_id).await? else {
        return Ok(false);
    };
    if deck.status != DeckStatus::Generating {
        return Ok(false);
    }

    let cover = cards
        .iter()
        .find(|c| c.card_number == 1)
        .or_else(|| cards.first())
        .and_then(|c| c.image_url.clone());
    deck.status = DeckStatus::Completed;
    deck.cover_image_url = cover;
    deck.updated_at = chrono::Utc::now();
    state.store.update_deck(&deck).await?;

    TraceEvent::DeckStatusChanged {
        deck_id,
        status: DeckStatus::Completed,
    }
    .emit();
    Ok(true)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Batch
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Generate every pending or failed card of a `generating` deck, one at a
/// time. Individual card failures only count towards `failed`.
pub async fn generate_images_batch(state: &AppState, deck_id: Uuid) -> DeckResult<BatchSummary> {
    let deck = state
        .store
        .get_deck(deck_id)
        .await?
        .ok_or(DeckError::NotFound("deck"))?;
    if deck.status != DeckStatus::Generating {
        return Err(DeckError::invalid_state(format!(
            "deck is {}, images are generated for generating decks only",
            deck.status
        )));
    }
    if state.llm.images().is_none() {
        return Err(images_unavailable());
    }

    let style = deck_style(state, &deck);
    let cards: Vec<_> = state
        .store
        .list_cards(deck_id)
        .await?
        .into_iter()
        .filter(|c| c.image_status.is_batch_eligible())
        .collect();
    let delay = Duration::from_millis(state.config.images.batch_delay_ms);

    let mut summary = BatchSummary::default();
    for (i, card) in cards.iter().enumerate() {
        if i > 0 && !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        summary.processed += 1;
        let prompt = &card.image_prompt;
        let outcome = generate_card_image(state, card.id, prompt, style.as_deref(), deck_id).await?;
        match outcome {
            CardImageOutcome::Completed { .. } => {}
            CardImageOutcome::Failed { reason, .. } => {
                summary.failed += 1;
                if reason == FailureReason::DeckDeleted {
                    break;
                }
            }
        }
    }

    if let Err(e) = complete_if_done(state, deck_id).await {
        tracing::warn!(deck_id = %deck_id, error = %e, "completion check failed");
    }
    TraceEvent::ImageBatchFinished {
        deck_id,
        processed: summary.processed,
        failed: summary.failed,
    }
    .emit();
    Ok(summary)
}

/// Regenerate one card's image on request, then run the same completion
/// check as a batch so the last card can complete the deck.
pub async fn retry_card_image(
    state: &AppState,
    user_id: &str,
    card_id: Uuid,
) -> DeckResult<String> {
    let card = state
        .store
        .get_card(card_id)
        .await?
        .ok_or(DeckError::NotFound("card"))?;
    let deck = load_owned_deck(state, card.deck_id, user_id)
        .await
        .map_err(|_| DeckError::NotFound("card"))?;
    if deck.status != DeckStatus::Generating {
        return Err(DeckError::invalid_state(format!(
            "deck is {}, images are generated for generating decks only",
            deck.status
        )));
    }

    let style = deck_style(state, &deck);
    let prompt = &card.image_prompt;
    match generate_card_image(state, card.id, prompt, style.as_deref(), deck.id).await? {
        CardImageOutcome::Completed { image_url, .. } => {
            if let Err(e) = complete_if_done(state, deck.id).await {
                tracing::warn!(deck_id = %deck.id, error = %e, "completion check failed");
            }
            Ok(image_url)
        }
        CardImageOutcome::Failed {
            reason: FailureReason::DeckDeleted,
            ..
        } => Err(DeckError::NotFound("deck")),
        CardImageOutcome::Failed { reason, .. } => {
            Err(DeckError::UpstreamGeneration(reason.to_string()))
        }
    }
}

pub async fn image_status(
    state: &AppState,
    user_id: &str,
    deck_id: Uuid,
) -> DeckResult<ImageStatusCounts> {
    load_owned_deck(state, deck_id, user_id).await?;
    let cards = state.store.list_cards(deck_id).await?;
    Ok(ImageStatusCounts::from_cards(&cards))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::test_support::TestHarness;
    use dw_domain::config::ImagesConfig;

    /// The harness runs with zero delays; put the shipped ones back.
    fn with_default_delays(h: &mut TestHarness) {
        let defaults = ImagesConfig::default();
        let mut config = (*h.state.config).clone();
        config.images.retry_base_delay_ms = defaults.retry_base_delay_ms;
        config.images.batch_delay_ms = defaults.batch_delay_ms;
        h.state.config = Arc::new(config);
    }

    #[test]
    fn backoff_doubles_from_base() {
        assert_eq!(backoff(1000, 1), Duration::from_millis(1000));
        assert_eq!(backoff(1000, 2), Duration::from_millis(2000));
        assert_eq!(backoff(1000, 3), Duration::from_millis(4000));
    }

    #[test]
    fn style_is_appended_after_comma() {
        assert_eq!(combined_prompt("a fox", Some("watercolor")), "a fox, watercolor");
        assert_eq!(combined_prompt("a fox", None), "a fox");
    }

    #[tokio::test]
    async fn completed_card_is_uploaded_to_deterministic_path() {
        let h = TestHarness::new();
        let deck = h.seed_generating_deck("u1", 1).await;
        let card = &h.state.store.list_cards(deck.id).await.unwrap()[0];

        let outcome = generate_card_image(&h.state, card.id, "a fox", Some("ink"), deck.id)
            .await
            .unwrap();
        let expected_path = format!("cards/{}/{}.png", deck.id, card.id);
        assert_eq!(
            outcome,
            CardImageOutcome::Completed {
                card_id: card.id,
                image_url: format!("mem://{expected_path}"),
            }
        );
        assert!(h.blobs.contains(&expected_path));
        assert_eq!(h.images.prompts(), vec!["a fox, ink".to_string()]);
        let stored = h.state.store.get_card(card.id).await.unwrap().unwrap();
        assert_eq!(stored.image_status, ImageStatus::Completed);
    }

    #[tokio::test]
    async fn exhaustion_marks_failed_after_three_attempts() {
        let h = TestHarness::new();
        h.images.fail_next(3);
        let deck = h.seed_generating_deck("u1", 1).await;
        let card = h.state.store.list_cards(deck.id).await.unwrap().remove(0);

        let outcome = generate_card_image(&h.state, card.id, "p", None, deck.id).await.unwrap();
        assert!(matches!(
            outcome,
            CardImageOutcome::Failed {
                reason: FailureReason::Exhausted(_),
                ..
            }
        ));
        assert_eq!(h.images.calls(), 3);
        let stored = h.state.store.get_card(card.id).await.unwrap().unwrap();
        assert_eq!(stored.image_status, ImageStatus::Failed);
    }

    #[tokio::test]
    async fn retries_recover_within_budget() {
        let h = TestHarness::new();
        h.images.fail_next(2);
        let deck = h.seed_generating_deck("u1", 1).await;
        let card = h.state.store.list_cards(deck.id).await.unwrap().remove(0);

        let outcome = generate_card_image(&h.state, card.id, "p", None, deck.id).await.unwrap();
        assert!(matches!(outcome, CardImageOutcome::Completed { .. }));
        assert_eq!(h.images.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_wait_one_then_two_seconds() {
        let mut h = TestHarness::new();
        with_default_delays(&mut h);
        h.images.fail_next(2);
        let deck = h.seed_generating_deck("u1", 1).await;
        let card = h.state.store.list_cards(deck.id).await.unwrap().remove(0);

        let started = tokio::time::Instant::now();
        let outcome = generate_card_image(&h.state, card.id, "p", None, deck.id).await.unwrap();
        assert!(matches!(outcome, CardImageOutcome::Completed { .. }));
        assert_eq!(
            h.images.gaps(),
            vec![Duration::from_millis(1000), Duration::from_millis(2000)]
        );
        assert_eq!(started.elapsed(), Duration::from_millis(3000));
    }

    #[tokio::test(start_paused = true)]
    async fn batch_spaces_cards_half_a_second_apart() {
        let mut h = TestHarness::new();
        with_default_delays(&mut h);
        let deck = h.seed_generating_deck("u1", 3).await;

        let started = tokio::time::Instant::now();
        let summary = generate_images_batch(&h.state, deck.id).await.unwrap();
        assert_eq!(summary, BatchSummary { processed: 3, failed: 0 });
        assert_eq!(h.images.gaps(), vec![Duration::from_millis(500); 2]);
        assert_eq!(started.elapsed(), Duration::from_millis(1000));
    }

    #[tokio::test]
    async fn deleted_deck_fails_fast() {
        let h = TestHarness::new();
        let deck = h.seed_generating_deck("u1", 1).await;
        let card = h.state.store.list_cards(deck.id).await.unwrap().remove(0);
        h.state.store.delete_deck(deck.id).await.unwrap();

        let outcome = generate_card_image(&h.state, card.id, "p", None, deck.id).await.unwrap();
        assert!(matches!(
            outcome,
            CardImageOutcome::Failed {
                reason: FailureReason::DeckDeleted,
                ..
            }
        ));
        assert_eq!(h.images.calls(), 0);
    }

    #[tokio::test]
    async fn batch_completes_deck_with_cover_from_first_card() {
        let h = TestHarness::new();
        let deck = h.seed_generating_deck("u1", 3).await;

        let summary = generate_images_batch(&h.state, deck.id).await.unwrap();
        assert_eq!(summary, BatchSummary { processed: 3, failed: 0 });

        let cards = h.state.store.list_cards(deck.id).await.unwrap();
        let deck = h.state.store.get_deck(deck.id).await.unwrap().unwrap();
        assert_eq!(deck.status, DeckStatus::Completed);
        assert_eq!(deck.cover_image_url, cards[0].image_url);
        assert!(deck.cover_image_url.is_some());
    }

    #[tokio::test]
    async fn batch_with_a_failed_card_stays_generating() {
        let h = TestHarness::new();
        let deck = h.seed_generating_deck("u1", 2).await;
        // First card exhausts its three attempts, second succeeds.
        h.images.fail_next(3);

        let summary = generate_images_batch(&h.state, deck.id).await.unwrap();
        assert_eq!(summary, BatchSummary { processed: 2, failed: 1 });
        let stored = h.state.store.get_deck(deck.id).await.unwrap().unwrap();
        assert_eq!(stored.status, DeckStatus::Generating);

        // A second batch only picks up the failed card.
        let summary = generate_images_batch(&h.state, deck.id).await.unwrap();
        assert_eq!(summary, BatchSummary { processed: 1, failed: 0 });
        let stored = h.state.store.get_deck(deck.id).await.unwrap().unwrap();
        assert_eq!(stored.status, DeckStatus::Completed);
    }

    #[tokio::test]
    async fn batch_requires_generating_deck() {
        let h = TestHarness::new();
        let deck = h.seed_draft_deck("u1", 2).await;
        assert!(matches!(
            generate_images_batch(&h.state, deck.id).await.unwrap_err(),
            DeckError::InvalidState(_)
        ));
    }

    #[tokio::test]
    async fn single_retry_completes_the_last_card() {
        let h = TestHarness::new();
        let deck = h.seed_generating_deck("u1", 2).await;
        let cards = h.state.store.list_cards(deck.id).await.unwrap();
        h.state
            .store
            .update_card_image(cards[0].id, ImageStatus::Completed, Some("mem://one".into()))
            .await
            .unwrap();
        h.state
            .store
            .update_card_image(cards[1].id, ImageStatus::Failed, None)
            .await
            .unwrap();

        let url = retry_card_image(&h.state, "u1", cards[1].id).await.unwrap();
        assert!(url.ends_with(".png"));
        let deck = h.state.store.get_deck(deck.id).await.unwrap().unwrap();
        assert_eq!(deck.status, DeckStatus::Completed);
        assert_eq!(deck.cover_image_url.as_deref(), Some("mem://one"));
    }

    #[tokio::test]
    async fn single_retry_failure_is_upstream_error() {
        let h = TestHarness::new();
        h.images.fail_next(3);
        let deck = h.seed_generating_deck("u1", 1).await;
        let card = h.state.store.list_cards(deck.id).await.unwrap().remove(0);
        assert!(matches!(
            retry_card_image(&h.state, "u1", card.id).await.unwrap_err(),
            DeckError::UpstreamGeneration(_)
        ));
        assert!(matches!(
            retry_card_image(&h.state, "someone-else", card.id).await.unwrap_err(),
            DeckError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn status_counts() {
        let h = TestHarness::new();
        let deck = h.seed_generating_deck("u1", 3).await;
        let cards = h.state.store.list_cards(deck.id).await.unwrap();
        h.state
            .store
            .update_card_image(cards[0].id, ImageStatus::Failed, None)
            .await
            .unwrap();
        let counts = image_status(&h.state, "u1", deck.id).await.unwrap();
        assert_eq!(counts.pending, 2);
        assert_eq!(counts.failed, 1);
        assert_eq!(counts.total, 3);
    }
}
