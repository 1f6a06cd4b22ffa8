//! Per-deck serialization.
//!
//! Conversation turns and every metadata mutation (edit, regenerate, undo,
//! overwrite, finalize) take the deck's lock first, so two writers can
//! never interleave a read-modify-write of the draft list or anchors.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use uuid::Uuid;

use super::error::{DeckError, DeckResult};

/// Each deck id maps to a `Semaphore(1)`; holding the permit is holding
/// the lock. Waiters queue in FIFO order.
#[derive(Default)]
pub struct DeckLockMap {
    locks: Mutex<HashMap<Uuid, Arc<Semaphore>>>,
}

impl DeckLockMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to a deck. Released when the permit drops.
    pub async fn acquire(&self, deck_id: Uuid) -> DeckResult<OwnedSemaphorePermit> {
        let sem = {
            let mut locks = self.locks.lock();
            locks
                .entry(deck_id)
                .or_insert_with(|| Arc::new(Semaphore::new(1)))
                .clone()
        };
        sem.acquire_owned()
            .await
            .map_err(|_| DeckError::Internal(format!("lock for deck {deck_id} was closed")))
    }

    /// Number of tracked decks (for monitoring).
    pub fn deck_count(&self) -> usize {
        self.locks.lock().len()
    }

    /// Drop locks nobody holds or waits on.
    pub fn prune_idle(&self) -> usize {
        let mut locks = self.locks.lock();
        let before = locks.len();
        locks.retain(|_, sem| sem.available_permits() == 0 || Arc::strong_count(sem) > 1);
        before - locks.len()
    }
}
