//! AppState construction and background-task spawning, shared by `serve`
//! and the one-shot `reconcile` command.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;

use dw_domain::config::{Config, ConfigSeverity};
use dw_providers::registry::ProviderRegistry;
use dw_store::{BlobStore, DeckStore, FsBlobStore, MemoryStore};

use crate::runtime::deck_lock::DeckLockMap;
use crate::runtime::image_queue::{self, ImageQueue};
use crate::state::AppState;

/// How often idle per-deck lock entries are dropped.
const LOCK_PRUNE_INTERVAL: Duration = Duration::from_secs(300);

/// Validate config, initialize every subsystem and return a fully-wired
/// [`AppState`] plus the receiving end of the image job queue.
pub async fn build_app_state(
    config: Arc<Config>,
    shutdown_tx: Arc<tokio::sync::Notify>,
) -> anyhow::Result<(AppState, tokio::sync::mpsc::Receiver<uuid::Uuid>)> {
    // ── Config validation ────────────────────────────────────────────
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
        anyhow::bail!(
            "config validation failed with {} error(s)",
            issues
                .iter()
                .filter(|i| i.severity == ConfigSeverity::Error)
                .count()
        );
    }

    // ── Model providers ──────────────────────────────────────────────
    let llm = Arc::new(ProviderRegistry::from_config(&config.llm, &config.images));
    for (provider_id, error) in llm.init_errors() {
        tracing::warn!(provider_id = %provider_id, error = %error, "provider failed to initialize");
    }
    if llm.is_configured() {
        tracing::info!(providers = ?llm.list_providers(), "language model registry ready");
    } else {
        tracing::warn!(
            "no language model provider initialized; chat and generation will return 503"
        );
    }
    if llm.images().is_none() {
        tracing::warn!("no image provider initialized; card images cannot be generated");
    }

    // ── Deck store ───────────────────────────────────────────────────
    let store: Arc<dyn DeckStore> = match &config.storage.state_path {
        Some(path) => Arc::new(
            MemoryStore::open(path)
                .with_context(|| format!("opening deck store at {}", path.display()))?,
        ),
        None => {
            tracing::warn!("storage.state_path unset; decks are kept in memory only");
            Arc::new(MemoryStore::in_memory())
        }
    };

    // ── Blob store ───────────────────────────────────────────────────
    let blob_dir = &config.storage.blob_dir;
    std::fs::create_dir_all(blob_dir)
        .with_context(|| format!("creating blob directory {}", blob_dir.display()))?;
    let blobs: Arc<dyn BlobStore> = Arc::new(FsBlobStore::new(
        blob_dir.clone(),
        config.storage.public_base().to_string(),
    ));
    tracing::info!(
        path = %blob_dir.display(),
        route = %config.storage.blob_route,
        "blob store ready"
    );

    // ── API token (read once, hash for constant-time comparison) ─────
    let api_token_hash = {
        let env_var = &config.server.api_token_env;
        match std::env::var(env_var).ok().filter(|t| !t.is_empty()) {
            Some(token) => {
                tracing::info!(source = %format!("env:{env_var}"), "API bearer-token auth enabled");
                Some(crate::api::auth::hash_token(&token))
            }
            None => {
                tracing::warn!("API bearer-token auth DISABLED; set the {env_var} env var");
                None
            }
        }
    };

    let (image_queue, jobs) = ImageQueue::channel(config.images.queue_capacity);

    let state = AppState {
        config,
        llm,
        store,
        blobs,
        deck_locks: Arc::new(DeckLockMap::new()),
        image_queue,
        api_token_hash,
        shutdown_tx,
    };
    Ok((state, jobs))
}

/// Spawn the image worker and the periodic maintenance loops.
pub fn spawn_background_tasks(state: &AppState, jobs: tokio::sync::mpsc::Receiver<uuid::Uuid>) {
    image_queue::spawn_worker(state.clone(), jobs);

    // ── Store flush loop ─────────────────────────────────────────────
    {
        let store = state.store.clone();
        let secs = state.config.storage.flush_interval_secs.max(1);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(secs));
            loop {
                interval.tick().await;
                if let Err(e) = store.flush().await {
                    tracing::warn!(error = %e, "periodic store flush failed");
                }
            }
        });
    }

    // ── Deck lock pruning ────────────────────────────────────────────
    {
        let locks = state.deck_locks.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(LOCK_PRUNE_INTERVAL);
            loop {
                interval.tick().await;
                let pruned = locks.prune_idle();
                if pruned > 0 {
                    tracing::debug!(
                        pruned,
                        remaining = locks.deck_count(),
                        "pruned idle deck locks"
                    );
                }
            }
        });
    }

    // ── Finalization reconciliation ──────────────────────────────────
    if state.config.reconcile.enabled {
        let state = state.clone();
        let secs = state.config.reconcile.interval_secs.max(1);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(secs));
            loop {
                interval.tick().await;
                match crate::runtime::reconcile::reconcile_and_enqueue(&state).await {
                    Ok(0) => {}
                    Ok(n) => tracing::info!(decks = n, "reconciled interrupted finalizations"),
                    Err(e) => tracing::warn!(error = %e, "reconciliation pass failed"),
                }
            }
        });
    } else {
        tracing::info!("finalization reconciliation disabled");
    }
}
