//! Fakes for exercising the runtime without network or disk.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dw_domain::config::Config;
use dw_domain::deck::{
    Anchor, Card, CardContent, ConversationMessage, Deck, DeckMetadata, DeckStatus, DraftCard,
    ImageStatus, NewDeck,
};
use dw_domain::error::{Error, Result};
use dw_domain::stream::{BoxStream, StreamEvent, Usage};
use dw_providers::{
    ChatRequest, ChatResponse, GeneratedImage, ImageProvider, ImageRequest, LlmProvider,
    ProviderRegistry,
};
use dw_store::{BlobStore, DeckStore, Finalization, MemoryStore};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::runtime::deck_lock::DeckLockMap;
use crate::runtime::image_queue::ImageQueue;
use crate::state::AppState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scripted LLM
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Replays queued replies in order. An empty queue is a provider error.
#[derive(Default)]
pub struct ScriptedLlm {
    chats: Mutex<VecDeque<std::result::Result<String, String>>>,
    streams: Mutex<VecDeque<Vec<StreamEvent>>>,
    chat_requests: Mutex<Vec<ChatRequest>>,
    stream_requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedLlm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_chat(&self, content: &str) {
        self.chats.lock().push_back(Ok(content.to_string()));
    }

    pub fn push_chat_err(&self, message: &str) {
        self.chats.lock().push_back(Err(message.to_string()));
    }

    pub fn push_stream(&self, events: Vec<StreamEvent>) {
        self.streams.lock().push_back(events);
    }

    /// Non-streaming requests seen so far.
    pub fn requests(&self) -> Vec<ChatRequest> {
        self.chat_requests.lock().clone()
    }

    pub fn stream_requests(&self) -> Vec<ChatRequest> {
        self.stream_requests.lock().clone()
    }

    pub fn chat_calls(&self) -> usize {
        self.chat_requests.lock().len()
    }

    pub fn stream_calls(&self) -> usize {
        self.stream_requests.lock().len()
    }
}

#[async_trait::async_trait]
impl LlmProvider for ScriptedLlm {
    async fn chat(&self, req: &ChatRequest) -> Result<ChatResponse> {
        self.chat_requests.lock().push(req.clone());
        let next = self.chats.lock().pop_front();
        match next {
            Some(Ok(content)) => Ok(ChatResponse {
                content,
                tool_calls: Vec::new(),
                usage: None,
                model: "scripted".into(),
                finish_reason: Some("stop".into()),
            }),
            Some(Err(message)) => Err(Error::provider("scripted", message)),
            None => Err(Error::provider("scripted", "no scripted reply")),
        }
    }

    async fn chat_stream(
        &self,
        req: &ChatRequest,
    ) -> Result<BoxStream<'static, Result<StreamEvent>>> {
        self.stream_requests.lock().push(req.clone());
        let events = self
            .streams
            .lock()
            .pop_front()
            .ok_or_else(|| Error::provider("scripted", "no scripted stream"))?;
        Ok(Box::pin(futures_util::stream::iter(events.into_iter().map(Ok))))
    }

    fn provider_id(&self) -> &str {
        "scripted"
    }
}

fn done() -> StreamEvent {
    StreamEvent::Done {
        usage: Some(Usage::default()),
        finish_reason: Some("stop".into()),
    }
}

/// Text split into two token chunks, then `done`.
pub fn text_stream(text: &str) -> Vec<StreamEvent> {
    let mid = text
        .char_indices()
        .nth(text.chars().count() / 2)
        .map(|(i, _)| i)
        .unwrap_or(0);
    let (a, b) = text.split_at(mid);
    vec![
        StreamEvent::Token { text: a.into() },
        StreamEvent::Token { text: b.into() },
        done(),
    ]
}

/// Optional text followed by tool calls delivered as start + delta.
pub fn tool_stream(text: &str, calls: &[(&str, &str, Value)]) -> Vec<StreamEvent> {
    let mut events = Vec::new();
    if !text.is_empty() {
        events.push(StreamEvent::Token { text: text.into() });
    }
    for (call_id, name, args) in calls {
        events.push(StreamEvent::ToolCallStarted {
            call_id: (*call_id).into(),
            tool_name: (*name).into(),
        });
        let args = args.to_string();
        let (a, b) = args.split_at(args.len() / 2);
        for part in [a, b] {
            events.push(StreamEvent::ToolCallDelta {
                call_id: (*call_id).into(),
                delta: part.into(),
            });
        }
    }
    events.push(done());
    events
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// JSON fixtures
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub fn content(title: &str) -> CardContent {
    CardContent {
        title: title.into(),
        meaning: format!("{title} meaning"),
        guidance: format!("{title} guidance"),
        image_prompt: format!("{title} image"),
    }
}

pub fn content_json(title: &str) -> String {
    serde_json::to_string(&content(title)).unwrap()
}

/// A `{cards: [...]}` reply with the given card numbers, titled `Card n`.
pub fn cards_json(numbers: &[u32]) -> String {
    let cards: Vec<Value> = numbers
        .iter()
        .map(|n| serde_json::to_value(DraftCard::new(*n, content(&format!("Card {n}")))).unwrap())
        .collect();
    json!({ "cards": cards }).to_string()
}

pub fn drafts(n: u32) -> Vec<DraftCard> {
    (1..=n).map(|i| DraftCard::new(i, content(&format!("Card {i}")))).collect()
}

pub fn anchors(n: usize) -> Vec<Anchor> {
    (0..n)
        .map(|i| Anchor {
            theme: format!("theme{i}"),
            emotion: format!("emotion{i}"),
            symbol: format!("symbol{i}"),
        })
        .collect()
}

pub fn anchors_json(n: usize, summary: &str) -> String {
    json!({
        "anchors": anchors(n),
        "summary": summary,
        "readinessAssessment": "advisory only"
    })
    .to_string()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Images and blobs
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Default)]
pub struct FakeImages {
    fail_remaining: AtomicUsize,
    calls: AtomicUsize,
    prompts: Mutex<Vec<String>>,
    called_at: Mutex<Vec<tokio::time::Instant>>,
}

impl FakeImages {
    /// Make the next `n` calls fail.
    pub fn fail_next(&self, n: usize) {
        self.fail_remaining.store(n, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().clone()
    }

    /// Time between consecutive calls, on the tokio clock.
    pub fn gaps(&self) -> Vec<Duration> {
        self.called_at.lock().windows(2).map(|w| w[1] - w[0]).collect()
    }
}

#[async_trait::async_trait]
impl ImageProvider for FakeImages {
    async fn generate(&self, req: &ImageRequest) -> Result<GeneratedImage> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().push(req.prompt.clone());
        self.called_at.lock().push(tokio::time::Instant::now());
        let failing = self
            .fail_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(Error::provider("images", "scripted failure"));
        }
        Ok(GeneratedImage {
            bytes: vec![0x89, b'P', b'N', b'G'],
            content_type: "image/png".into(),
        })
    }

    fn provider_id(&self) -> &str {
        "fake-images"
    }
}

#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryBlobStore {
    pub fn contains(&self, path: &str) -> bool {
        self.blobs.lock().contains_key(path)
    }
}

#[async_trait::async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, path: &str, bytes: Vec<u8>, _content_type: &str) -> Result<String> {
        self.blobs.lock().insert(path.to_string(), bytes);
        Ok(format!("mem://{path}"))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Counting store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// `MemoryStore` that counts row-creating writes.
pub struct CountingStore {
    inner: MemoryStore,
    deck_inserts: AtomicUsize,
    card_inserts: AtomicUsize,
    metadata_writes: AtomicUsize,
}

impl CountingStore {
    pub fn new() -> Self {
        Self {
            inner: MemoryStore::in_memory(),
            deck_inserts: AtomicUsize::new(0),
            card_inserts: AtomicUsize::new(0),
            metadata_writes: AtomicUsize::new(0),
        }
    }

    pub fn deck_inserts(&self) -> usize {
        self.deck_inserts.load(Ordering::SeqCst)
    }

    pub fn card_inserts(&self) -> usize {
        self.card_inserts.load(Ordering::SeqCst)
    }

    pub fn metadata_writes(&self) -> usize {
        self.metadata_writes.load(Ordering::SeqCst)
    }

    /// Forget writes made while seeding a test.
    pub fn reset_counts(&self) {
        self.deck_inserts.store(0, Ordering::SeqCst);
        self.card_inserts.store(0, Ordering::SeqCst);
        self.metadata_writes.store(0, Ordering::SeqCst);
    }
}

#[async_trait::async_trait]
impl DeckStore for CountingStore {
    async fn insert_deck(&self, deck: &Deck) -> Result<()> {
        self.deck_inserts.fetch_add(1, Ordering::SeqCst);
        self.inner.insert_deck(deck).await
    }
    async fn get_deck(&self, deck_id: Uuid) -> Result<Option<Deck>> {
        self.inner.get_deck(deck_id).await
    }
    async fn update_deck(&self, deck: &Deck) -> Result<()> {
        self.inner.update_deck(deck).await
    }
    async fn delete_deck(&self, deck_id: Uuid) -> Result<bool> {
        self.inner.delete_deck(deck_id).await
    }
    async fn list_decks(&self, user_id: &str) -> Result<Vec<Deck>> {
        self.inner.list_decks(user_id).await
    }
    async fn list_decks_by_status(&self, status: DeckStatus) -> Result<Vec<Deck>> {
        self.inner.list_decks_by_status(status).await
    }
    async fn count_decks(&self, user_id: &str) -> Result<usize> {
        self.inner.count_decks(user_id).await
    }
    async fn get_metadata(&self, deck_id: Uuid) -> Result<Option<DeckMetadata>> {
        self.inner.get_metadata(deck_id).await
    }
    async fn save_metadata(&self, metadata: &DeckMetadata) -> Result<()> {
        self.metadata_writes.fetch_add(1, Ordering::SeqCst);
        self.inner.save_metadata(metadata).await
    }
    async fn insert_cards(&self, cards: &[Card]) -> Result<()> {
        self.card_inserts.fetch_add(cards.len(), Ordering::SeqCst);
        self.inner.insert_cards(cards).await
    }
    async fn list_cards(&self, deck_id: Uuid) -> Result<Vec<Card>> {
        self.inner.list_cards(deck_id).await
    }
    async fn get_card(&self, card_id: Uuid) -> Result<Option<Card>> {
        self.inner.get_card(card_id).await
    }
    async fn update_card_image(
        &self,
        card_id: Uuid,
        status: ImageStatus,
        image_url: Option<String>,
    ) -> Result<()> {
        self.inner.update_card_image(card_id, status, image_url).await
    }
    async fn append_message(&self, message: &ConversationMessage) -> Result<()> {
        self.inner.append_message(message).await
    }
    async fn list_messages(&self, deck_id: Uuid) -> Result<Vec<ConversationMessage>> {
        self.inner.list_messages(deck_id).await
    }
    async fn commit_finalization(&self, fin: &Finalization) -> Result<()> {
        self.card_inserts.fetch_add(fin.cards.len(), Ordering::SeqCst);
        self.metadata_writes.fetch_add(1, Ordering::SeqCst);
        self.inner.commit_finalization(fin).await
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Non-transactional store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Delegating store that keeps the trait's ordered `commit_finalization`
/// and can fail the next `update_deck` or `insert_cards` once.
pub struct OrderedStore {
    inner: Arc<dyn DeckStore>,
    fail_next_deck_update: AtomicBool,
    fail_next_card_insert: AtomicBool,
}

impl OrderedStore {
    pub fn new(inner: Arc<dyn DeckStore>) -> Self {
        Self {
            inner,
            fail_next_deck_update: AtomicBool::new(false),
            fail_next_card_insert: AtomicBool::new(false),
        }
    }

    pub fn fail_next_deck_update(&self) {
        self.fail_next_deck_update.store(true, Ordering::SeqCst);
    }

    pub fn fail_next_card_insert(&self) {
        self.fail_next_card_insert.store(true, Ordering::SeqCst);
    }
}

#[async_trait::async_trait]
impl DeckStore for OrderedStore {
    async fn insert_deck(&self, deck: &Deck) -> Result<()> {
        self.inner.insert_deck(deck).await
    }
    async fn get_deck(&self, deck_id: Uuid) -> Result<Option<Deck>> {
        self.inner.get_deck(deck_id).await
    }
    async fn update_deck(&self, deck: &Deck) -> Result<()> {
        if self.fail_next_deck_update.swap(false, Ordering::SeqCst) {
            return Err(Error::Storage("boom".into()));
        }
        self.inner.update_deck(deck).await
    }
    async fn delete_deck(&self, deck_id: Uuid) -> Result<bool> {
        self.inner.delete_deck(deck_id).await
    }
    async fn list_decks(&self, user_id: &str) -> Result<Vec<Deck>> {
        self.inner.list_decks(user_id).await
    }
    async fn list_decks_by_status(&self, status: DeckStatus) -> Result<Vec<Deck>> {
        self.inner.list_decks_by_status(status).await
    }
    async fn count_decks(&self, user_id: &str) -> Result<usize> {
        self.inner.count_decks(user_id).await
    }
    async fn get_metadata(&self, deck_id: Uuid) -> Result<Option<DeckMetadata>> {
        self.inner.get_metadata(deck_id).await
    }
    async fn save_metadata(&self, metadata: &DeckMetadata) -> Result<()> {
        self.inner.save_metadata(metadata).await
    }
    async fn insert_cards(&self, cards: &[Card]) -> Result<()> {
        if self.fail_next_card_insert.swap(false, Ordering::SeqCst) {
            return Err(Error::Storage("boom".into()));
        }
        self.inner.insert_cards(cards).await
    }
    async fn list_cards(&self, deck_id: Uuid) -> Result<Vec<Card>> {
        self.inner.list_cards(deck_id).await
    }
    async fn get_card(&self, card_id: Uuid) -> Result<Option<Card>> {
        self.inner.get_card(card_id).await
    }
    async fn update_card_image(
        &self,
        card_id: Uuid,
        status: ImageStatus,
        image_url: Option<String>,
    ) -> Result<()> {
        self.inner.update_card_image(card_id, status, image_url).await
    }
    async fn append_message(&self, message: &ConversationMessage) -> Result<()> {
        self.inner.append_message(message).await
    }
    async fn list_messages(&self, deck_id: Uuid) -> Result<Vec<ConversationMessage>> {
        self.inner.list_messages(deck_id).await
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Harness
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub fn test_config() -> Config {
    let mut config = Config::default();
    config.images.retry_base_delay_ms = 0;
    config.images.batch_delay_ms = 0;
    config
}

pub struct TestHarnessBuilder {
    config: Config,
    with_llm: bool,
    api_token: Option<String>,
}

impl TestHarnessBuilder {
    pub fn max_decks(mut self, n: usize) -> Self {
        self.config.plans.max_decks_per_user = Some(n);
        self
    }

    pub fn without_llm(mut self) -> Self {
        self.with_llm = false;
        self
    }

    pub fn api_token(mut self, token: &str) -> Self {
        self.api_token = Some(token.to_string());
        self
    }

    pub fn build(self) -> TestHarness {
        let llm = Arc::new(ScriptedLlm::new());
        let images = Arc::new(FakeImages::default());
        let store = Arc::new(CountingStore::new());
        let blobs = Arc::new(MemoryBlobStore::default());

        let mut registry = ProviderRegistry::default();
        if self.with_llm {
            registry.insert("scripted".into(), llm.clone());
        }
        registry.set_images(images.clone());

        let (image_queue, jobs) = ImageQueue::channel(64);
        let state = AppState {
            config: Arc::new(self.config),
            llm: Arc::new(registry),
            store: store.clone(),
            blobs: blobs.clone(),
            deck_locks: Arc::new(DeckLockMap::new()),
            image_queue,
            api_token_hash: self.api_token.map(|t| crate::api::auth::hash_token(&t)),
            shutdown_tx: Arc::new(tokio::sync::Notify::new()),
        };
        TestHarness {
            state,
            llm,
            images,
            store,
            blobs,
            jobs,
        }
    }
}

pub struct TestHarness {
    pub state: AppState,
    pub llm: Arc<ScriptedLlm>,
    pub images: Arc<FakeImages>,
    pub store: Arc<CountingStore>,
    pub blobs: Arc<MemoryBlobStore>,
    /// Deck ids handed to the image queue.
    pub jobs: mpsc::Receiver<Uuid>,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> TestHarnessBuilder {
        TestHarnessBuilder {
            config: test_config(),
            with_llm: true,
            api_token: None,
        }
    }

    /// Hand the queue receiver to a worker under test.
    pub fn take_jobs(&mut self) -> mpsc::Receiver<Uuid> {
        std::mem::replace(&mut self.jobs, mpsc::channel(1).1)
    }

    fn new_deck(user_id: &str, status: DeckStatus, card_count: u32) -> Deck {
        Deck::new(NewDeck {
            user_id: user_id.into(),
            title: "Tides".into(),
            description: Some("growing up by the sea".into()),
            theme: "the sea".into(),
            status,
            card_count,
            art_style_id: None,
        })
    }

    /// Draft deck with empty metadata. Seeding writes are not counted.
    pub async fn seed_draft_deck(&self, user_id: &str, card_count: u32) -> Deck {
        let deck = Self::new_deck(user_id, DeckStatus::Draft, card_count);
        self.store.insert_deck(&deck).await.unwrap();
        self.store.save_metadata(&DeckMetadata::new(deck.id)).await.unwrap();
        self.store.reset_counts();
        deck
    }

    /// Generating deck with `card_count` pending cards.
    pub async fn seed_generating_deck(&self, user_id: &str, card_count: u32) -> Deck {
        let deck = Self::new_deck(user_id, DeckStatus::Generating, card_count);
        self.store.insert_deck(&deck).await.unwrap();
        let mut meta = DeckMetadata::new(deck.id);
        meta.draft_cards = None;
        self.store.save_metadata(&meta).await.unwrap();
        let cards: Vec<Card> = drafts(card_count)
            .iter()
            .map(|d| Card::from_draft(deck.id, d))
            .collect();
        self.store.insert_cards(&cards).await.unwrap();
        self.store.reset_counts();
        deck
    }

    pub async fn set_drafts(&self, deck_id: Uuid, drafts: Vec<DraftCard>) {
        let mut meta = self.store.get_metadata(deck_id).await.unwrap().unwrap();
        meta.draft_cards = Some(drafts);
        self.store.save_metadata(&meta).await.unwrap();
        self.store.reset_counts();
    }

    pub async fn drafts(&self, deck_id: Uuid) -> Vec<DraftCard> {
        self.store
            .get_metadata(deck_id)
            .await
            .unwrap()
            .unwrap()
            .drafts()
            .to_vec()
    }
}
