use crate::runtime::images::generate_images_batch;
use crate::runtime::reconcile::reconcile_once;
use crate::state::AppState;

/// One-shot repair: promote decks left half-finalized and generate their
/// images inline. Prints one line per deck.
pub async fn run(state: &AppState) -> anyhow::Result<()> {
    let promoted = reconcile_once(state)
        .await
        .map_err(|e| anyhow::anyhow!("reconciliation failed: {e}"))?;

    if promoted.is_empty() {
        println!("No decks needed reconciliation.");
        return Ok(());
    }

    for deck_id in &promoted {
        match generate_images_batch(state, *deck_id).await {
            Ok(summary) => println!(
                "{deck_id}: {} card(s) processed, {} failed",
                summary.processed, summary.failed
            ),
            Err(e) => println!("{deck_id}: image generation skipped ({e})"),
        }
    }

    if let Err(e) = state.store.flush().await {
        tracing::warn!(error = %e, "store flush after reconcile failed");
    }
    println!("{} deck(s) reconciled.", promoted.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::TestHarness;
    use dw_domain::deck::DeckStatus;

    #[tokio::test]
    async fn promotes_and_renders_stranded_deck() {
        let h = TestHarness::new();
        let deck = h.seed_draft_deck("u1", 2).await;
        let drafts = crate::test_support::drafts(2);
        h.set_drafts(deck.id, drafts.clone()).await;
        let cards: Vec<_> = drafts
            .iter()
            .map(|d| dw_domain::deck::Card::from_draft(deck.id, d))
            .collect();
        h.state.store.insert_cards(&cards).await.unwrap();

        run(&h.state).await.unwrap();

        let deck = h.state.store.get_deck(deck.id).await.unwrap().unwrap();
        assert_eq!(deck.status, DeckStatus::Completed);
        assert_eq!(h.images.calls(), 2);
    }

    #[tokio::test]
    async fn nothing_to_do_is_ok() {
        let h = TestHarness::new();
        h.seed_draft_deck("u1", 2).await;
        run(&h.state).await.unwrap();
        assert_eq!(h.images.calls(), 0);
    }
}
