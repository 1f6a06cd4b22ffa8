use serde::{Deserialize, Serialize};
use std::path::PathBuf;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Storage
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// JSON snapshot of decks, cards, metadata and conversation rows.
    /// `None` keeps everything in memory only.
    #[serde(default = "d_state_path")]
    pub state_path: Option<PathBuf>,
    #[serde(default = "d_flush_interval_secs")]
    pub flush_interval_secs: u64,
    /// Root directory for uploaded card images.
    #[serde(default = "d_blob_dir")]
    pub blob_dir: PathBuf,
    /// Route under which `blob_dir` is served.
    #[serde(default = "d_blob_route")]
    pub blob_route: String,
    /// Prefix for returned image URLs. Defaults to `blob_route` (relative URLs).
    #[serde(default)]
    pub public_base_url: Option<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            state_path: d_state_path(),
            flush_interval_secs: d_flush_interval_secs(),
            blob_dir: d_blob_dir(),
            blob_route: d_blob_route(),
            public_base_url: None,
        }
    }
}

impl StorageConfig {
    pub fn public_base(&self) -> &str {
        self.public_base_url
            .as_deref()
            .unwrap_or(self.blob_route.as_str())
            .trim_end_matches('/')
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Plans
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlansConfig {
    /// Deck limit per user. `None` = unlimited.
    #[serde(default)]
    pub max_decks_per_user: Option<usize>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Reconciliation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileConfig {
    #[serde(default = "d_true")]
    pub enabled: bool,
    #[serde(default = "d_reconcile_interval")]
    pub interval_secs: u64,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: d_reconcile_interval(),
        }
    }
}

fn d_state_path() -> Option<PathBuf> {
    Some(PathBuf::from("./data/state.json"))
}
fn d_flush_interval_secs() -> u64 {
    30
}
fn d_blob_dir() -> PathBuf {
    PathBuf::from("./data/blobs")
}
fn d_blob_route() -> String {
    "/blobs".into()
}
fn d_true() -> bool {
    true
}
fn d_reconcile_interval() -> u64 {
    300
}
