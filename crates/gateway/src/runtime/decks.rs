//! Deck lifecycle: draft creation behind the plan gate, reads, deletion,
//! direct card creation and quick (conversation-less) generation.

use dw_domain::config::ROLE_DRAFTING;
use dw_domain::deck::{
    Card, CardContent, ConversationMessage, Deck, DeckMetadata, DeckStatus, NewDeck,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::{DeckError, DeckResult};
use super::generator::{self, BulkRequest};
use super::readiness::{self, Readiness};
use crate::state::AppState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Lookups shared by every deck-scoped operation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Load a deck the caller owns. Missing and foreign decks look the same.
pub async fn load_owned_deck(state: &AppState, deck_id: Uuid, user_id: &str) -> DeckResult<Deck> {
    match state.store.get_deck(deck_id).await? {
        Some(deck) if deck.is_owned_by(user_id) => Ok(deck),
        _ => Err(DeckError::NotFound("deck")),
    }
}

pub async fn load_metadata(state: &AppState, deck_id: Uuid) -> DeckResult<DeckMetadata> {
    state
        .store
        .get_metadata(deck_id)
        .await?
        .ok_or(DeckError::NotFound("deck metadata"))
}

/// 403 once the caller owns `plans.max_decks_per_user` decks.
pub async fn check_plan_limit(state: &AppState, user_id: &str) -> DeckResult<()> {
    let Some(max) = state.config.plans.max_decks_per_user else {
        return Ok(());
    };
    let owned = state.store.count_decks(user_id).await?;
    if owned >= max {
        return Err(DeckError::Forbidden(format!(
            "deck limit reached for your plan ({max} decks)"
        )));
    }
    Ok(())
}

pub(crate) fn check_card_count(state: &AppState, count: u32) -> DeckResult<()> {
    let generation = &state.config.generation;
    if !generation.card_count_in_range(count) {
        return Err(DeckError::invalid_input(format!(
            "cardCount must be between {} and {}",
            generation.min_card_count, generation.max_card_count
        )));
    }
    Ok(())
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Create / read / delete
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateDeckRequest {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub theme: Option<String>,
    #[serde(default)]
    pub card_count: Option<u32>,
    #[serde(default)]
    pub art_style_id: Option<String>,
}

/// Validated fields shared by draft creation and quick generation.
struct DeckFields {
    title: String,
    description: Option<String>,
    theme: String,
    card_count: u32,
    art_style_id: Option<String>,
}

fn validate_new_deck(state: &AppState, req: CreateDeckRequest) -> DeckResult<DeckFields> {
    let title = non_empty(req.title).ok_or_else(|| DeckError::invalid_input("title is required"))?;
    let description = non_empty(req.description);
    let theme = non_empty(req.theme)
        .or_else(|| description.clone())
        .ok_or_else(|| DeckError::invalid_input("theme or description is required"))?;
    let card_count = req
        .card_count
        .ok_or_else(|| DeckError::invalid_input("cardCount is required"))?;
    check_card_count(state, card_count)?;
    Ok(DeckFields {
        title,
        description,
        theme,
        card_count,
        art_style_id: non_empty(req.art_style_id),
    })
}

/// Start a deck in draft mode together with its empty metadata row.
pub async fn create_draft_deck(
    state: &AppState,
    user_id: &str,
    req: CreateDeckRequest,
) -> DeckResult<Deck> {
    let fields = validate_new_deck(state, req)?;
    check_plan_limit(state, user_id).await?;

    let deck = Deck::new(NewDeck {
        user_id: user_id.to_string(),
        title: fields.title,
        description: fields.description,
        theme: fields.theme,
        status: DeckStatus::Draft,
        card_count: fields.card_count,
        art_style_id: fields.art_style_id,
    });
    state.store.insert_deck(&deck).await?;
    if let Err(e) = state.store.save_metadata(&DeckMetadata::new(deck.id)).await {
        // Do not leave a draft deck that every draft operation would 404 on.
        let _ = state.store.delete_deck(deck.id).await;
        return Err(e.into());
    }
    tracing::info!(deck_id = %deck.id, user_id, card_count = deck.card_count, "draft deck created");
    Ok(deck)
}

pub async fn list_decks(state: &AppState, user_id: &str) -> DeckResult<Vec<Deck>> {
    Ok(state.store.list_decks(user_id).await?)
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeckDetail {
    pub deck: Deck,
    pub cards: Vec<Card>,
    pub metadata: Option<DeckMetadata>,
}

pub async fn get_deck_detail(
    state: &AppState,
    deck_id: Uuid,
    user_id: &str,
) -> DeckResult<DeckDetail> {
    let deck = load_owned_deck(state, deck_id, user_id).await?;
    let cards = state.store.list_cards(deck_id).await?;
    let metadata = state.store.get_metadata(deck_id).await?;
    Ok(DeckDetail {
        deck,
        cards,
        metadata,
    })
}

/// Delete a deck and everything under it. Waits for any in-flight turn or
/// draft mutation on the deck to finish first.
pub async fn delete_deck(state: &AppState, deck_id: Uuid, user_id: &str) -> DeckResult<()> {
    let _permit = state.deck_locks.acquire(deck_id).await?;
    load_owned_deck(state, deck_id, user_id).await?;
    state.store.delete_deck(deck_id).await?;
    tracing::info!(deck_id = %deck_id, "deck deleted");
    Ok(())
}

pub async fn list_messages(
    state: &AppState,
    deck_id: Uuid,
    user_id: &str,
) -> DeckResult<Vec<ConversationMessage>> {
    load_owned_deck(state, deck_id, user_id).await?;
    Ok(state.store.list_messages(deck_id).await?)
}

/// Readiness recomputed from the stored anchors.
pub async fn deck_readiness(
    state: &AppState,
    deck_id: Uuid,
    user_id: &str,
) -> DeckResult<Readiness> {
    let deck = load_owned_deck(state, deck_id, user_id).await?;
    let anchors = state
        .store
        .get_metadata(deck_id)
        .await?
        .map(|m| m.extracted_anchors.len())
        .unwrap_or(0);
    Ok(readiness::assess(anchors, deck.card_count))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Direct card creation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewCardRequest {
    /// Defaults to one past the highest existing number.
    #[serde(default)]
    pub card_number: Option<u32>,
    #[serde(flatten)]
    pub content: CardContent,
}

pub async fn create_card(
    state: &AppState,
    deck_id: Uuid,
    user_id: &str,
    req: NewCardRequest,
) -> DeckResult<Card> {
    let _permit = state.deck_locks.acquire(deck_id).await?;
    let mut deck = load_owned_deck(state, deck_id, user_id).await?;
    if req.content.title.trim().is_empty() {
        return Err(DeckError::invalid_input("title is required"));
    }

    let existing = state.store.list_cards(deck_id).await?;
    let card_number = match req.card_number {
        Some(0) => return Err(DeckError::invalid_input("cardNumber starts at 1")),
        Some(n) if existing.iter().any(|c| c.card_number == n) => {
            return Err(DeckError::invalid_input(format!("card {n} already exists")));
        }
        Some(n) => n,
        None => existing.iter().map(|c| c.card_number).max().unwrap_or(0) + 1,
    };

    let card = Card::new(deck_id, card_number, req.content);
    state.store.insert_cards(std::slice::from_ref(&card)).await?;

    let total = existing.len() as u32 + 1;
    if deck.status != DeckStatus::Draft && deck.card_count < total {
        deck.card_count = total;
        deck.updated_at = chrono::Utc::now();
        state.store.update_deck(&deck).await?;
    }
    Ok(card)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Quick generation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Generate a whole deck without a conversation.
///
/// Cards are generated (with retries) before anything is written, so a
/// generation failure leaves no deck behind. On success the deck starts in
/// `generating` and its images are queued.
pub async fn quick_generate(
    state: &AppState,
    user_id: &str,
    req: CreateDeckRequest,
) -> DeckResult<Uuid> {
    let fields = validate_new_deck(state, req)?;
    check_plan_limit(state, user_id).await?;
    let model = super::model_for(state, ROLE_DRAFTING)?;

    let drafts = generator::generate_bulk(
        &model,
        &BulkRequest {
            deck_id: None,
            title: fields.title.clone(),
            theme: fields.theme.clone(),
            target_count: fields.card_count,
            anchors: Vec::new(),
            summary: fields.description.clone(),
        },
        state.config.generation.bulk_max_attempts,
    )
    .await?;

    let deck = Deck::new(NewDeck {
        user_id: user_id.to_string(),
        title: fields.title,
        description: fields.description,
        theme: fields.theme,
        status: DeckStatus::Generating,
        card_count: drafts.len() as u32,
        art_style_id: fields.art_style_id,
    });
    let cards: Vec<Card> = drafts.iter().map(|d| Card::from_draft(deck.id, d)).collect();
    let mut metadata = DeckMetadata::new(deck.id);
    metadata.draft_cards = None;

    state.store.insert_deck(&deck).await?;
    let rows = async {
        state.store.save_metadata(&metadata).await?;
        state.store.insert_cards(&cards).await
    }
    .await;
    if let Err(e) = rows {
        tracing::error!(
            deck_id = %deck.id,
            error = %e,
            "generated deck write failed, removing deck"
        );
        if let Err(cleanup) = state.store.delete_deck(deck.id).await {
            tracing::warn!(deck_id = %deck.id, error = %cleanup, "failed to remove partial deck");
        }
        return Err(e.into());
    }
    tracing::info!(deck_id = %deck.id, cards = cards.len(), "deck generated");

    if let Err(e) = state.image_queue.enqueue(deck.id) {
        tracing::warn!(deck_id = %deck.id, error = %e, "failed to queue image generation");
    }
    Ok(deck.id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::test_support::{cards_json, OrderedStore, TestHarness};

    fn request(count: u32) -> CreateDeckRequest {
        CreateDeckRequest {
            title: Some("Tides".into()),
            description: Some("growing up by the sea".into()),
            theme: None,
            card_count: Some(count),
            art_style_id: None,
        }
    }

    #[tokio::test]
    async fn create_draft_deck_creates_metadata() {
        let h = TestHarness::new();
        let deck = create_draft_deck(&h.state, "u1", request(5)).await.unwrap();
        assert_eq!(deck.status, DeckStatus::Draft);
        assert_eq!(deck.theme, "growing up by the sea");
        let meta = h.state.store.get_metadata(deck.id).await.unwrap().unwrap();
        assert_eq!(meta.draft_cards, Some(vec![]));
    }

    #[tokio::test]
    async fn create_rejects_bad_input() {
        let h = TestHarness::new();
        for count in [0, 31] {
            let err = create_draft_deck(&h.state, "u1", request(count)).await.unwrap_err();
            assert!(matches!(err, DeckError::InvalidInput(_)));
        }
        let mut no_theme = request(3);
        no_theme.description = None;
        assert!(matches!(
            create_draft_deck(&h.state, "u1", no_theme).await.unwrap_err(),
            DeckError::InvalidInput(_)
        ));
    }

    #[tokio::test]
    async fn plan_limit_blocks_creation() {
        let h = TestHarness::builder().max_decks(1).build();
        create_draft_deck(&h.state, "u1", request(3)).await.unwrap();
        let err = create_draft_deck(&h.state, "u1", request(3)).await.unwrap_err();
        assert!(matches!(err, DeckError::Forbidden(_)));
        // Other users are unaffected.
        create_draft_deck(&h.state, "u2", request(3)).await.unwrap();
    }

    #[tokio::test]
    async fn foreign_deck_is_not_found() {
        let h = TestHarness::new();
        let deck = create_draft_deck(&h.state, "owner", request(3)).await.unwrap();
        assert!(matches!(
            get_deck_detail(&h.state, deck.id, "intruder").await.unwrap_err(),
            DeckError::NotFound(_)
        ));
        assert!(matches!(
            delete_deck(&h.state, deck.id, "intruder").await.unwrap_err(),
            DeckError::NotFound(_)
        ));
        delete_deck(&h.state, deck.id, "owner").await.unwrap();
        assert!(h.state.store.get_deck(deck.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn quick_generate_creates_generating_deck_and_queues_images() {
        let mut h = TestHarness::new();
        h.llm.push_chat(&cards_json(&[1, 2, 3]));

        let deck_id = quick_generate(&h.state, "u1", request(3)).await.unwrap();
        let deck = h.state.store.get_deck(deck_id).await.unwrap().unwrap();
        assert_eq!(deck.status, DeckStatus::Generating);
        assert_eq!(deck.card_count, 3);
        assert_eq!(h.state.store.list_cards(deck_id).await.unwrap().len(), 3);
        assert_eq!(h.jobs.try_recv().unwrap(), deck_id);
    }

    #[tokio::test]
    async fn quick_generate_failure_writes_nothing() {
        let h = TestHarness::new();
        for _ in 0..3 {
            h.llm.push_chat_err("model down");
        }
        let err = quick_generate(&h.state, "u1", request(3)).await.unwrap_err();
        assert!(matches!(err, DeckError::UpstreamGeneration(_)));
        assert_eq!(h.llm.chat_calls(), 3);
        assert_eq!(h.store.deck_inserts(), 0);
        assert_eq!(h.store.card_inserts(), 0);
        assert_eq!(h.store.metadata_writes(), 0);
    }

    #[tokio::test]
    async fn quick_generate_card_write_failure_removes_deck() {
        let mut h = TestHarness::new();
        let store = Arc::new(OrderedStore::new(h.state.store.clone()));
        h.state.store = store.clone();
        h.llm.push_chat(&cards_json(&[1, 2, 3]));

        store.fail_next_card_insert();
        let err = quick_generate(&h.state, "u1", request(3)).await.unwrap_err();
        assert!(matches!(err, DeckError::Internal(_)));
        assert!(h.state.store.list_decks("u1").await.unwrap().is_empty());
        assert!(h.jobs.try_recv().is_err());
    }

    #[tokio::test]
    async fn quick_generate_without_provider_is_unavailable() {
        let h = TestHarness::builder().without_llm().build();
        let err = quick_generate(&h.state, "u1", request(3)).await.unwrap_err();
        assert!(matches!(err, DeckError::ServiceUnavailable(_)));
    }

    #[tokio::test]
    async fn create_card_assigns_next_number() {
        let h = TestHarness::new();
        let deck = create_draft_deck(&h.state, "u1", request(3)).await.unwrap();
        let content = CardContent {
            title: "Shell".into(),
            meaning: "m".into(),
            guidance: "g".into(),
            image_prompt: "p".into(),
        };
        let first = create_card(
            &h.state,
            deck.id,
            "u1",
            NewCardRequest {
                card_number: None,
                content: content.clone(),
            },
        )
        .await
        .unwrap();
        assert_eq!(first.card_number, 1);

        let dup = create_card(
            &h.state,
            deck.id,
            "u1",
            NewCardRequest {
                card_number: Some(1),
                content,
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(dup, DeckError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn readiness_uses_stored_anchors() {
        let h = TestHarness::new();
        let deck = create_draft_deck(&h.state, "u1", request(5)).await.unwrap();
        let mut meta = h.state.store.get_metadata(deck.id).await.unwrap().unwrap();
        meta.extracted_anchors = crate::test_support::anchors(4);
        h.state.store.save_metadata(&meta).await.unwrap();

        let r = deck_readiness(&h.state, deck.id, "u1").await.unwrap();
        assert_eq!(r.anchors_found, 4);
        assert!(r.is_ready);
    }
}
