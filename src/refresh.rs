//! Periodic peer refresh
//!
//! Runs discovery at start-up and then on a fixed interval, handing every
//! result to the sink. Each run is independent; nothing is merged across
//! runs.

use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::discovery::PeerDiscovery;
use crate::snapshot::PeerSink;

const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Refresh until `cancel` fires; returns the number of results applied
///
/// A run interrupted by cancellation is not applied.
pub async fn run_refresh_loop(
    discovery: &PeerDiscovery,
    sink: &dyn PeerSink,
    every: Duration,
    cancel: &CancellationToken,
) -> u64 {
    let mut ticker = interval(every.max(MIN_INTERVAL));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!(interval_secs = every.as_secs(), "Starting peer refresh loop");

    let mut applied = 0u64;
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let result = discovery.discover_peers(cancel).await;
        if cancel.is_cancelled() {
            break;
        }

        sink.apply(&result).await;
        applied += 1;
    }

    info!(applied, "Peer refresh loop stopped");
    applied
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::fake::{instance, page, FakeInventory};
    use crate::metadata::fake::FakeMetadata;
    use crate::snapshot::PeerSnapshot;
    use crate::types::DiscoveryResult;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    /// Cancels the loop after `limit` results
    struct StopAfter {
        limit: u64,
        seen: AtomicU64,
        cancel: CancellationToken,
        snapshot: PeerSnapshot,
    }

    #[async_trait]
    impl PeerSink for StopAfter {
        async fn apply(&self, result: &DiscoveryResult) {
            self.snapshot.apply(result).await;
            if self.seen.fetch_add(1, Ordering::SeqCst) + 1 >= self.limit {
                self.cancel.cancel();
            }
        }
    }

    fn discovery() -> PeerDiscovery {
        PeerDiscovery::new(
            Arc::new(FakeMetadata::new("gen-1", "my-project", "gen")),
            Arc::new(FakeInventory::new(vec![page(
                vec![instance("1", "gen-1", Some("10.0.0.1"), &[("app", "gen")])],
                None,
            )])),
            "app",
        )
    }

    #[tokio::test]
    async fn test_refreshes_until_cancelled() {
        let cancel = CancellationToken::new();
        let sink = StopAfter {
            limit: 3,
            seen: AtomicU64::new(0),
            cancel: cancel.clone(),
            snapshot: PeerSnapshot::new(),
        };

        let applied = run_refresh_loop(&discovery(), &sink, Duration::from_millis(1), &cancel).await;

        assert_eq!(applied, 3);
        assert_eq!(sink.snapshot.current().generation, 3);
        assert_eq!(sink.snapshot.self_instance().unwrap().name, "gen-1");
    }

    #[tokio::test]
    async fn test_cancelled_loop_applies_nothing() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let snapshot = PeerSnapshot::new();

        let applied = run_refresh_loop(&discovery(), &snapshot, Duration::from_secs(60), &cancel).await;

        assert_eq!(applied, 0);
        assert_eq!(snapshot.current().generation, 0);
    }
}
