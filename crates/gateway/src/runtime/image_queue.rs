//! In-process hand-off from finalization to the image pipeline.
//!
//! A bounded channel of deck ids drained by one worker task, so batches
//! run one deck at a time and the external image API sees a single
//! sequential caller.

use dw_domain::error::{Error, Result};
use tokio::sync::mpsc;
use tracing::Instrument;
use uuid::Uuid;

use super::images::generate_images_batch;
use crate::state::AppState;

#[derive(Clone)]
pub struct ImageQueue {
    tx: mpsc::Sender<Uuid>,
}

impl ImageQueue {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Uuid>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Queue a batch run for `deck_id` without waiting.
    pub fn enqueue(&self, deck_id: Uuid) -> Result<()> {
        self.tx.try_send(deck_id).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => Error::Other("image queue is full".into()),
            mpsc::error::TrySendError::Closed(_) => Error::Other("image worker has stopped".into()),
        })?;
        tracing::debug!(deck_id = %deck_id, "image batch queued");
        Ok(())
    }
}

/// Drain the queue until every sender is gone.
pub fn spawn_worker(state: AppState, mut rx: mpsc::Receiver<Uuid>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(deck_id) = rx.recv().await {
            let span = tracing::info_span!("image_batch", deck_id = %deck_id);
            match generate_images_batch(&state, deck_id).instrument(span).await {
                Ok(summary) => tracing::info!(
                    processed = summary.processed,
                    failed = summary.failed,
                    "image batch finished"
                ),
                Err(e) => tracing::warn!(error = %e, "image batch skipped"),
            }
        }
        tracing::debug!("image worker stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::TestHarness;
    use dw_domain::deck::DeckStatus;

    #[tokio::test]
    async fn full_queue_reports_error() {
        let (queue, _rx) = ImageQueue::channel(1);
        queue.enqueue(Uuid::new_v4()).unwrap();
        assert!(queue.enqueue(Uuid::new_v4()).is_err());
    }

    #[tokio::test]
    async fn closed_queue_reports_error() {
        let (queue, rx) = ImageQueue::channel(4);
        drop(rx);
        assert!(queue.enqueue(Uuid::new_v4()).is_err());
    }

    #[tokio::test]
    async fn worker_runs_queued_batches() {
        let mut h = TestHarness::new();
        let deck = h.seed_generating_deck("u1", 2).await;
        let rx = h.take_jobs();
        let worker = spawn_worker(h.state.clone(), rx);

        h.state.image_queue.enqueue(deck.id).unwrap();
        for _ in 0..100 {
            let d = h.state.store.get_deck(deck.id).await.unwrap().unwrap();
            if d.status == DeckStatus::Completed {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        let d = h.state.store.get_deck(deck.id).await.unwrap().unwrap();
        assert_eq!(d.status, DeckStatus::Completed);
        worker.abort();
    }
}
