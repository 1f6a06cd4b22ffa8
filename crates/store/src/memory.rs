//! In-memory store with JSON snapshot persistence.
//!
//! All tables live behind one `RwLock`, which makes multi-row writes
//! (cascading delete, finalization) atomic. `flush` writes a snapshot via
//! a temp file and rename so a crash never leaves a truncated file.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use dw_domain::deck::{
    Card, ConversationMessage, Deck, DeckMetadata, DeckStatus, ImageStatus,
};
use dw_domain::error::{Error, Result};

use crate::traits::{DeckStore, Finalization};

#[derive(Default)]
struct Tables {
    decks: HashMap<Uuid, Deck>,
    cards: HashMap<Uuid, Card>,
    metadata: HashMap<Uuid, DeckMetadata>,
    messages: Vec<ConversationMessage>,
}

/// On-disk shape. Rows are stored as lists so the file stays diffable.
#[derive(Default, Serialize, Deserialize)]
struct Snapshot {
    #[serde(default)]
    decks: Vec<Deck>,
    #[serde(default)]
    cards: Vec<Card>,
    #[serde(default)]
    metadata: Vec<DeckMetadata>,
    #[serde(default)]
    messages: Vec<ConversationMessage>,
}

impl From<Snapshot> for Tables {
    fn from(s: Snapshot) -> Self {
        Self {
            decks: s.decks.into_iter().map(|d| (d.id, d)).collect(),
            cards: s.cards.into_iter().map(|c| (c.id, c)).collect(),
            metadata: s.metadata.into_iter().map(|m| (m.deck_id, m)).collect(),
            messages: s.messages,
        }
    }
}

pub struct MemoryStore {
    snapshot_path: Option<PathBuf>,
    tables: RwLock<Tables>,
    dirty: AtomicBool,
}

impl MemoryStore {
    /// A store that never touches disk.
    pub fn in_memory() -> Self {
        Self {
            snapshot_path: None,
            tables: RwLock::new(Tables::default()),
            dirty: AtomicBool::new(false),
        }
    }

    /// Load the snapshot at `path`, or start empty when it does not exist.
    pub fn open(path: &Path) -> Result<Self> {
        let tables = if path.exists() {
            let raw = std::fs::read_to_string(path)?;
            let snapshot: Snapshot = serde_json::from_str(&raw)?;
            Tables::from(snapshot)
        } else {
            Tables::default()
        };

        tracing::info!(
            decks = tables.decks.len(),
            cards = tables.cards.len(),
            path = %path.display(),
            "deck store loaded"
        );

        Ok(Self {
            snapshot_path: Some(path.to_path_buf()),
            tables: RwLock::new(tables),
            dirty: AtomicBool::new(false),
        })
    }

    fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Release);
    }

    fn snapshot_json(&self) -> Result<String> {
        let t = self.tables.read();
        let mut snapshot = Snapshot {
            decks: t.decks.values().cloned().collect(),
            cards: t.cards.values().cloned().collect(),
            metadata: t.metadata.values().cloned().collect(),
            messages: t.messages.clone(),
        };
        snapshot.decks.sort_by_key(|d| d.created_at);
        snapshot
            .cards
            .sort_by(|a, b| (a.deck_id, a.card_number).cmp(&(b.deck_id, b.card_number)));
        snapshot.metadata.sort_by_key(|m| m.deck_id);
        Ok(serde_json::to_string_pretty(&snapshot)?)
    }

    fn write_snapshot(path: &Path, json: &str) -> Result<()> {
        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(dir)?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(json.as_bytes())?;
        tmp.persist(path).map_err(|e| Error::Io(e.error))?;
        Ok(())
    }
}

fn missing(what: &str, id: Uuid) -> Error {
    Error::Storage(format!("{what} {id} not found"))
}

#[async_trait::async_trait]
impl DeckStore for MemoryStore {
    async fn insert_deck(&self, deck: &Deck) -> Result<()> {
        let mut t = self.tables.write();
        if t.decks.contains_key(&deck.id) {
            return Err(Error::Storage(format!("deck {} already exists", deck.id)));
        }
        t.decks.insert(deck.id, deck.clone());
        drop(t);
        self.mark_dirty();
        Ok(())
    }

    async fn get_deck(&self, deck_id: Uuid) -> Result<Option<Deck>> {
        Ok(self.tables.read().decks.get(&deck_id).cloned())
    }

    async fn update_deck(&self, deck: &Deck) -> Result<()> {
        let mut t = self.tables.write();
        let row = t.decks.get_mut(&deck.id).ok_or_else(|| missing("deck", deck.id))?;
        *row = deck.clone();
        row.updated_at = Utc::now();
        drop(t);
        self.mark_dirty();
        Ok(())
    }

    async fn delete_deck(&self, deck_id: Uuid) -> Result<bool> {
        let mut t = self.tables.write();
        let existed = t.decks.remove(&deck_id).is_some();
        t.cards.retain(|_, c| c.deck_id != deck_id);
        t.metadata.remove(&deck_id);
        t.messages.retain(|m| m.deck_id != deck_id);
        drop(t);
        self.mark_dirty();
        Ok(existed)
    }

    async fn list_decks(&self, user_id: &str) -> Result<Vec<Deck>> {
        let mut decks: Vec<Deck> = self
            .tables
            .read()
            .decks
            .values()
            .filter(|d| d.user_id == user_id)
            .cloned()
            .collect();
        decks.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(decks)
    }

    async fn list_decks_by_status(&self, status: DeckStatus) -> Result<Vec<Deck>> {
        let mut decks: Vec<Deck> = self
            .tables
            .read()
            .decks
            .values()
            .filter(|d| d.status == status)
            .cloned()
            .collect();
        decks.sort_by_key(|d| d.created_at);
        Ok(decks)
    }

    async fn count_decks(&self, user_id: &str) -> Result<usize> {
        Ok(self
            .tables
            .read()
            .decks
            .values()
            .filter(|d| d.user_id == user_id)
            .count())
    }

    async fn get_metadata(&self, deck_id: Uuid) -> Result<Option<DeckMetadata>> {
        Ok(self.tables.read().metadata.get(&deck_id).cloned())
    }

    async fn save_metadata(&self, metadata: &DeckMetadata) -> Result<()> {
        let mut t = self.tables.write();
        if !t.decks.contains_key(&metadata.deck_id) {
            return Err(missing("deck", metadata.deck_id));
        }
        t.metadata.insert(metadata.deck_id, metadata.clone());
        drop(t);
        self.mark_dirty();
        Ok(())
    }

    async fn insert_cards(&self, cards: &[Card]) -> Result<()> {
        let mut t = self.tables.write();
        if let Some(orphan) = cards.iter().find(|c| !t.decks.contains_key(&c.deck_id)) {
            return Err(missing("deck", orphan.deck_id));
        }
        for card in cards {
            t.cards.insert(card.id, card.clone());
        }
        drop(t);
        self.mark_dirty();
        Ok(())
    }

    async fn list_cards(&self, deck_id: Uuid) -> Result<Vec<Card>> {
        let mut cards: Vec<Card> = self
            .tables
            .read()
            .cards
            .values()
            .filter(|c| c.deck_id == deck_id)
            .cloned()
            .collect();
        cards.sort_by_key(|c| c.card_number);
        Ok(cards)
    }

    async fn get_card(&self, card_id: Uuid) -> Result<Option<Card>> {
        Ok(self.tables.read().cards.get(&card_id).cloned())
    }

    async fn update_card_image(
        &self,
        card_id: Uuid,
        status: ImageStatus,
        image_url: Option<String>,
    ) -> Result<()> {
        let mut t = self.tables.write();
        let card = t.cards.get_mut(&card_id).ok_or_else(|| missing("card", card_id))?;
        card.image_status = status;
        if image_url.is_some() {
            card.image_url = image_url;
        }
        card.updated_at = Utc::now();
        drop(t);
        self.mark_dirty();
        Ok(())
    }

    async fn append_message(&self, message: &ConversationMessage) -> Result<()> {
        let mut t = self.tables.write();
        if !t.decks.contains_key(&message.deck_id) {
            return Err(missing("deck", message.deck_id));
        }
        t.messages.push(message.clone());
        drop(t);
        self.mark_dirty();
        Ok(())
    }

    async fn list_messages(&self, deck_id: Uuid) -> Result<Vec<ConversationMessage>> {
        Ok(self
            .tables
            .read()
            .messages
            .iter()
            .filter(|m| m.deck_id == deck_id)
            .cloned()
            .collect())
    }

    async fn commit_finalization(&self, fin: &Finalization) -> Result<()> {
        let mut t = self.tables.write();
        let deck_id = fin.deck.id;
        if !t.decks.contains_key(&deck_id) {
            return Err(missing("deck", deck_id));
        }
        for card in &fin.cards {
            t.cards.insert(card.id, card.clone());
        }
        let mut deck = fin.deck.clone();
        deck.updated_at = Utc::now();
        t.decks.insert(deck_id, deck);
        t.metadata.insert(deck_id, fin.metadata.clone());
        drop(t);
        self.mark_dirty();
        Ok(())
    }

    async fn flush(&self) -> Result<()> {
        let Some(path) = &self.snapshot_path else {
            return Ok(());
        };
        if !self.dirty.swap(false, Ordering::AcqRel) {
            return Ok(());
        }
        let json = self.snapshot_json()?;
        let path = path.clone();
        let result = tokio::task::spawn_blocking(move || Self::write_snapshot(&path, &json))
            .await
            .map_err(|e| Error::Other(format!("snapshot task: {e}")))?;
        if result.is_err() {
            self.mark_dirty();
        }
        result
    }
}
