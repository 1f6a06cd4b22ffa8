//! Deck data model: decks, committed cards, draft cards with their
//! one-level undo snapshot, extracted anchors, and per-deck metadata.
//!
//! Wire names are camelCase to match what the web client sends and reads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Status machines
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Deck lifecycle: `draft` → `generating` → `completed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeckStatus {
    /// Conversational authoring in progress.
    Draft,
    /// Cards committed, images in flight.
    Generating,
    /// Every card image resolved and the cover is set.
    Completed,
}

impl DeckStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Generating => "generating",
            Self::Completed => "completed",
        }
    }
}

impl std::fmt::Display for DeckStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-card image state, driven only by the image pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageStatus {
    Pending,
    Generating,
    Completed,
    Failed,
}

impl ImageStatus {
    /// Cards a batch run picks up: never attempted, or failed last time.
    pub fn is_batch_eligible(self) -> bool {
        matches!(self, Self::Pending | Self::Failed)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Anchors
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A recurring motif pulled out of the conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Anchor {
    pub theme: String,
    pub emotion: String,
    pub symbol: String,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Draft cards
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The four content fields of a card. Everything an edit or regeneration
/// may change; `cardNumber` is deliberately not part of it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardContent {
    pub title: String,
    pub meaning: String,
    pub guidance: String,
    pub image_prompt: String,
}

/// An editable candidate card living in deck metadata until finalization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DraftCard {
    pub card_number: u32,
    #[serde(flatten)]
    pub content: CardContent,
    /// Snapshot taken before the last edit/regeneration. One level only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_version: Option<CardContent>,
}

impl DraftCard {
    pub fn new(card_number: u32, content: CardContent) -> Self {
        Self {
            card_number,
            content,
            previous_version: None,
        }
    }

    /// Swap in new content, keeping the old content as the undo snapshot.
    /// Any older snapshot is discarded.
    pub fn replace_content(&mut self, content: CardContent) {
        let previous = std::mem::replace(&mut self.content, content);
        self.previous_version = Some(previous);
    }

    /// Restore the snapshot and clear it. Returns `false` (and changes
    /// nothing) when there is no snapshot.
    pub fn undo(&mut self) -> bool {
        match self.previous_version.take() {
            Some(previous) => {
                self.content = previous;
                true
            }
            None => false,
        }
    }
}

/// Find a draft card by number.
pub fn find_draft_mut(cards: &mut [DraftCard], card_number: u32) -> Option<&mut DraftCard> {
    cards.iter_mut().find(|c| c.card_number == card_number)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Deck metadata
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Auxiliary per-deck state used while the deck is being authored.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeckMetadata {
    pub deck_id: Uuid,
    /// `None` once the drafts have been finalized into cards.
    #[serde(default)]
    pub draft_cards: Option<Vec<DraftCard>>,
    #[serde(default)]
    pub extracted_anchors: Vec<Anchor>,
    #[serde(default)]
    pub conversation_summary: Option<String>,
    #[serde(default)]
    pub is_ready: bool,
    pub updated_at: DateTime<Utc>,
}

impl DeckMetadata {
    pub fn new(deck_id: Uuid) -> Self {
        Self {
            deck_id,
            draft_cards: Some(Vec::new()),
            extracted_anchors: Vec::new(),
            conversation_summary: None,
            is_ready: false,
            updated_at: Utc::now(),
        }
    }

    /// Draft cards, treating a cleared list as empty.
    pub fn drafts(&self) -> &[DraftCard] {
        self.draft_cards.as_deref().unwrap_or_default()
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Deck and card rows
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Deck {
    pub id: Uuid,
    pub user_id: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub theme: String,
    pub status: DeckStatus,
    pub card_count: u32,
    #[serde(default)]
    pub cover_image_url: Option<String>,
    #[serde(default)]
    pub art_style_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields needed to create a deck row.
#[derive(Debug, Clone)]
pub struct NewDeck {
    pub user_id: String,
    pub title: String,
    pub description: Option<String>,
    pub theme: String,
    pub status: DeckStatus,
    pub card_count: u32,
    pub art_style_id: Option<String>,
}

impl Deck {
    pub fn new(new: NewDeck) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id: new.user_id,
            title: new.title,
            description: new.description,
            theme: new.theme,
            status: new.status,
            card_count: new.card_count,
            cover_image_url: None,
            art_style_id: new.art_style_id,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_owned_by(&self, user_id: &str) -> bool {
        self.user_id == user_id
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Card {
    pub id: Uuid,
    pub deck_id: Uuid,
    pub card_number: u32,
    pub title: String,
    pub meaning: String,
    pub guidance: String,
    #[serde(default)]
    pub image_url: Option<String>,
    pub image_prompt: String,
    pub image_status: ImageStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Card {
    /// A fresh card row with `imageStatus = pending`.
    pub fn new(deck_id: Uuid, card_number: u32, content: CardContent) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            deck_id,
            card_number,
            title: content.title,
            meaning: content.meaning,
            guidance: content.guidance,
            image_url: None,
            image_prompt: content.image_prompt,
            image_status: ImageStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn from_draft(deck_id: Uuid, draft: &DraftCard) -> Self {
        Self::new(deck_id, draft.card_number, draft.content.clone())
    }
}

/// Aggregate of a deck's card image states, polled by the client.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ImageStatusCounts {
    pub pending: usize,
    pub generating: usize,
    pub completed: usize,
    pub failed: usize,
    pub total: usize,
}

impl ImageStatusCounts {
    pub fn from_cards(cards: &[Card]) -> Self {
        let mut counts = Self::default();
        for card in cards {
            match card.image_status {
                ImageStatus::Pending => counts.pending += 1,
                ImageStatus::Generating => counts.generating += 1,
                ImageStatus::Completed => counts.completed += 1,
                ImageStatus::Failed => counts.failed += 1,
            }
        }
        counts.total = cards.len();
        counts
    }

    /// True when the deck may transition to `completed`.
    pub fn all_completed(&self) -> bool {
        self.total > 0 && self.completed == self.total
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Conversation rows
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

impl ChatRole {
    pub fn label(self) -> &'static str {
        match self {
            Self::User => "USER",
            Self::Assistant => "ASSISTANT",
        }
    }
}

/// A message as the client sends it in a conversation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

/// A persisted conversation row. Rows are ordered by insertion.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationMessage {
    pub id: Uuid,
    pub deck_id: Uuid,
    pub role: ChatRole,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl ConversationMessage {
    pub fn new(deck_id: Uuid, role: ChatRole, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            deck_id,
            role,
            content: content.into(),
            created_at: Utc::now(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    fn content(title: &str) -> CardContent {
        CardContent {
            title: title.into(),
            meaning: format!("{title} meaning"),
            guidance: format!("{title} guidance"),
            image_prompt: format!("{title} prompt"),
        }
    }

    #[test]
    fn replace_keeps_only_one_snapshot() {
        let mut card = DraftCard::new(3, content("first"));
        card.replace_content(content("second"));
        card.replace_content(content("third"));

        assert_eq!(card.content.title, "third");
        assert_eq!(card.previous_version.as_ref().unwrap().title, "second");
        assert_eq!(card.card_number, 3);
    }

    #[test]
    fn undo_restores_and_clears() {
        let mut card = DraftCard::new(1, content("original"));
        card.replace_content(content("edited"));

        assert!(card.undo());
        assert_eq!(card.content, content("original"));
        assert!(card.previous_version.is_none());

        // Second undo has nothing to restore.
        assert!(!card.undo());
        assert_eq!(card.content, content("original"));
    }

    #[test]
    fn draft_card_wire_shape_is_flat_camel_case() {
        let mut card = DraftCard::new(2, content("sun"));
        card.replace_content(content("moon"));
        let json = serde_json::to_value(&card).unwrap();

        assert_eq!(json["cardNumber"], 2);
        assert_eq!(json["title"], "moon");
        assert_eq!(json["imagePrompt"], "moon prompt");
        assert_eq!(json["previousVersion"]["title"], "sun");
    }

    #[test]
    fn draft_card_parses_without_previous_version() {
        let raw = r#"{"cardNumber":4,"title":"t","meaning":"m","guidance":"g","imagePrompt":"p"}"#;
        let card: DraftCard = serde_json::from_str(raw).unwrap();
        assert_eq!(card.card_number, 4);
        assert!(card.previous_version.is_none());
    }

    #[test]
    fn image_counts_require_every_card_completed() {
        let deck_id = Uuid::new_v4();
        let mut a = Card::new(deck_id, 1, content("a"));
        let mut b = Card::new(deck_id, 2, content("b"));
        a.image_status = ImageStatus::Completed;
        b.image_status = ImageStatus::Failed;

        let counts = ImageStatusCounts::from_cards(&[a.clone(), b.clone()]);
        assert_eq!(counts.completed, 1);
        assert_eq!(counts.failed, 1);
        assert_eq!(counts.total, 2);
        assert!(!counts.all_completed());

        b.image_status = ImageStatus::Completed;
        assert!(ImageStatusCounts::from_cards(&[a, b]).all_completed());
        assert!(!ImageStatusCounts::from_cards(&[]).all_completed());
    }

    #[test]
    fn metadata_drafts_treats_cleared_as_empty() {
        let mut meta = DeckMetadata::new(Uuid::new_v4());
        meta.draft_cards = None;
        assert!(meta.drafts().is_empty());
    }
}
