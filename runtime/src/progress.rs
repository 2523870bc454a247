//! Progress broadcasting for rebuild runs.
//!
//! Progress records go out on a `tokio::sync::broadcast` channel. Sending
//! never blocks the pipeline: with no subscribers the record is dropped, and
//! a subscriber that falls behind by more than the channel capacity sees
//! `RecvError::Lagged` and skips ahead.

use money_age_core::{RebuildProgress, RebuildStage};
use tokio::sync::broadcast;

/// Fan-out channel for [`RebuildProgress`] records.
#[derive(Debug, Clone)]
pub struct ProgressBroadcaster {
    sender: broadcast::Sender<RebuildProgress>,
}

impl ProgressBroadcaster {
    /// Create a broadcaster buffering up to `capacity` records per subscriber
    ///
    /// A zero capacity is raised to one.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Subscribe to records published from now on
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<RebuildProgress> {
        self.sender.subscribe()
    }

    /// Number of live subscribers
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Publish a record to every current subscriber
    pub fn publish(&self, progress: RebuildProgress) {
        // Err only means nobody is listening
        let _ = self.sender.send(progress);
    }

    /// Publish a record built from counters
    pub fn report(
        &self,
        stage: RebuildStage,
        total: usize,
        processed_incomes: usize,
        processed_expenses: usize,
    ) {
        tracing::trace!(
            ?stage,
            total,
            processed_incomes,
            processed_expenses,
            "Rebuild progress"
        );
        self.publish(RebuildProgress::new(
            stage,
            total,
            processed_incomes,
            processed_expenses,
        ));
    }
}

impl Default for ProgressBroadcaster {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_PROGRESS_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)] // Tests can unwrap

    use super::*;

    #[test]
    fn test_publish_without_subscribers_is_dropped() {
        let broadcaster = ProgressBroadcaster::new(4);
        assert_eq!(broadcaster.subscriber_count(), 0);
        broadcaster.report(RebuildStage::Loading, 10, 0, 0);
    }

    #[tokio::test]
    async fn test_every_subscriber_receives_records() {
        let broadcaster = ProgressBroadcaster::new(4);
        let mut first = broadcaster.subscribe();
        let mut second = broadcaster.subscribe();

        broadcaster.report(RebuildStage::ProcessingIncomes, 10, 3, 0);

        for rx in [&mut first, &mut second] {
            let progress = rx.recv().await.unwrap();
            assert_eq!(progress.stage, RebuildStage::ProcessingIncomes);
            assert_eq!(progress.current, 3);
            assert_eq!(progress.total, 10);
        }
    }

    #[tokio::test]
    async fn test_slow_subscriber_lags_instead_of_blocking() {
        let broadcaster = ProgressBroadcaster::new(2);
        let mut rx = broadcaster.subscribe();

        for i in 0..5 {
            broadcaster.report(RebuildStage::ProcessingExpenses, 5, 0, i);
        }

        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Lagged(3))
        ));
        assert_eq!(rx.recv().await.unwrap().processed_expenses, 3);
    }

    #[test]
    fn test_zero_capacity_is_raised() {
        let broadcaster = ProgressBroadcaster::new(0);
        let _rx = broadcaster.subscribe();
        broadcaster.report(RebuildStage::Preparing, 0, 0, 0);
    }
}
