use dw_domain::deck::{
    Card, ConversationMessage, Deck, DeckMetadata, DeckStatus, ImageStatus,
};
use dw_domain::error::Result;
use uuid::Uuid;

/// The writes that turn a draft deck into a generating one.
#[derive(Debug, Clone)]
pub struct Finalization {
    pub cards: Vec<Card>,
    /// The deck row as it should look afterwards.
    pub deck: Deck,
    /// Metadata with `draft_cards` cleared.
    pub metadata: DeckMetadata,
}

/// Row-level persistence for decks and everything hanging off them.
///
/// Every method is a single statement; nothing here spans rows except
/// [`DeckStore::delete_deck`] (cascade) and [`DeckStore::commit_finalization`].
#[async_trait::async_trait]
pub trait DeckStore: Send + Sync {
    async fn insert_deck(&self, deck: &Deck) -> Result<()>;
    async fn get_deck(&self, deck_id: Uuid) -> Result<Option<Deck>>;
    /// Overwrite an existing deck row. Fails if the row is gone.
    async fn update_deck(&self, deck: &Deck) -> Result<()>;
    /// Delete a deck with its cards, metadata and conversation rows.
    /// Returns whether the deck existed.
    async fn delete_deck(&self, deck_id: Uuid) -> Result<bool>;
    /// Decks owned by `user_id`, newest first.
    async fn list_decks(&self, user_id: &str) -> Result<Vec<Deck>>;
    async fn list_decks_by_status(&self, status: DeckStatus) -> Result<Vec<Deck>>;
    async fn count_decks(&self, user_id: &str) -> Result<usize>;

    async fn get_metadata(&self, deck_id: Uuid) -> Result<Option<DeckMetadata>>;
    /// Insert or replace the metadata row.
    async fn save_metadata(&self, metadata: &DeckMetadata) -> Result<()>;

    async fn insert_cards(&self, cards: &[Card]) -> Result<()>;
    /// Cards of a deck ordered by `card_number`.
    async fn list_cards(&self, deck_id: Uuid) -> Result<Vec<Card>>;
    async fn get_card(&self, card_id: Uuid) -> Result<Option<Card>>;
    /// Set a card's image status, and its URL when one is given.
    async fn update_card_image(
        &self,
        card_id: Uuid,
        status: ImageStatus,
        image_url: Option<String>,
    ) -> Result<()>;

    async fn append_message(&self, message: &ConversationMessage) -> Result<()>;
    /// Conversation rows of a deck in insertion order.
    async fn list_messages(&self, deck_id: Uuid) -> Result<Vec<ConversationMessage>>;

    /// Apply a finalization.
    ///
    /// The default runs three separate writes in the order cards, deck,
    /// metadata, so a failure part way leaves cards under a deck that is
    /// still `draft`, which reconciliation repairs. Stores with
    /// transactions override this to apply all three atomically.
    async fn commit_finalization(&self, fin: &Finalization) -> Result<()> {
        self.insert_cards(&fin.cards).await?;
        self.update_deck(&fin.deck).await?;
        self.save_metadata(&fin.metadata).await
    }

    /// Persist buffered state, if the store buffers at all.
    async fn flush(&self) -> Result<()> {
        Ok(())
    }
}
