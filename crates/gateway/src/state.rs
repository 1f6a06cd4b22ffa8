use std::sync::Arc;

use dw_domain::config::Config;
use dw_providers::ProviderRegistry;
use dw_store::{BlobStore, DeckStore};

use crate::runtime::deck_lock::DeckLockMap;
use crate::runtime::image_queue::ImageQueue;

/// Shared application state passed to all API handlers and runtime tasks.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    /// Model gateway: chat providers by role plus the image provider.
    pub llm: Arc<ProviderRegistry>,
    pub store: Arc<dyn DeckStore>,
    pub blobs: Arc<dyn BlobStore>,
    /// Serializes turns and draft mutations per deck.
    pub deck_locks: Arc<DeckLockMap>,
    /// Hand-off to the background image worker.
    pub image_queue: ImageQueue,
    /// SHA-256 hash of the API bearer token, computed once at startup.
    /// `None` means no token configured (dev mode, auth disabled).
    pub api_token_hash: Option<Vec<u8>>,
    /// Notified to trigger graceful server shutdown.
    pub shutdown_tx: Arc<tokio::sync::Notify>,
}
