//! Peer snapshot handed to the cache layer
//!
//! Holds the latest discovery result. The cache engine reads "self" to
//! decide between serving locally and forwarding, and "peers" to build
//! its peer list.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::debug;

use crate::types::{DiscoveryResult, InstanceRecord, PeerEndpoint};

/// Receives every discovery result
#[async_trait]
pub trait PeerSink: Send + Sync {
    async fn apply(&self, result: &DiscoveryResult);
}

/// Latest published result with bookkeeping
#[derive(Debug, Clone, Default, Serialize)]
pub struct SnapshotState {
    pub result: DiscoveryResult,
    /// Number of results published so far
    pub generation: u64,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Shared, watchable view of the most recent discovery result
#[derive(Clone)]
pub struct PeerSnapshot {
    tx: Arc<watch::Sender<SnapshotState>>,
}

impl Default for PeerSnapshot {
    fn default() -> Self {
        Self::new()
    }
}

impl PeerSnapshot {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(SnapshotState::default());
        Self { tx: Arc::new(tx) }
    }

    /// Replace the current result
    pub fn publish(&self, result: DiscoveryResult) {
        self.tx.send_modify(|state| {
            state.result = result;
            state.generation += 1;
            state.updated_at = Some(Utc::now());
        });
        debug!(generation = self.tx.borrow().generation, "Published peer snapshot");
    }

    pub fn current(&self) -> SnapshotState {
        self.tx.borrow().clone()
    }

    pub fn self_instance(&self) -> Option<InstanceRecord> {
        self.tx.borrow().result.self_instance.clone()
    }

    pub fn peers(&self) -> Vec<InstanceRecord> {
        self.tx.borrow().result.peers.clone()
    }

    pub fn peer_endpoints(&self, port: u16) -> Vec<PeerEndpoint> {
        self.tx.borrow().result.peer_endpoints(port)
    }

    pub fn self_endpoint(&self, port: u16) -> Option<PeerEndpoint> {
        self.tx.borrow().result.self_endpoint(port)
    }

    /// Watch for newly published results
    pub fn subscribe(&self) -> watch::Receiver<SnapshotState> {
        self.tx.subscribe()
    }
}

#[async_trait]
impl PeerSink for PeerSnapshot {
    async fn apply(&self, result: &DiscoveryResult) {
        self.publish(result.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::membership::partition;
    use crate::types::fixtures::instance;

    fn sample() -> DiscoveryResult {
        partition(
            vec![
                instance("1", "gen-1", Some("10.0.0.1"), &[("app", "gen")]),
                instance("2", "gen-2", Some("10.0.0.2"), &[("app", "gen")]),
            ],
            "gen-2",
        )
    }

    #[test]
    fn test_starts_empty() {
        let snapshot = PeerSnapshot::new();
        let state = snapshot.current();

        assert_eq!(state.generation, 0);
        assert!(state.updated_at.is_none());
        assert!(snapshot.peers().is_empty());
        assert!(snapshot.self_instance().is_none());
    }

    #[test]
    fn test_publish_exposes_views() {
        let snapshot = PeerSnapshot::new();
        snapshot.publish(sample());

        assert_eq!(snapshot.current().generation, 1);
        assert_eq!(snapshot.self_instance().unwrap().name, "gen-2");
        assert_eq!(
            snapshot
                .peer_endpoints(8080)
                .into_iter()
                .map(|e| e.url)
                .collect::<Vec<_>>(),
            vec!["http://10.0.0.1:8080", "http://10.0.0.2:8080"]
        );
        assert_eq!(snapshot.self_endpoint(9000).unwrap().url, "http://10.0.0.2:9000");
    }

    #[tokio::test]
    async fn test_empty_result_replaces_previous() {
        let snapshot = PeerSnapshot::new();
        snapshot.apply(&sample()).await;
        snapshot.apply(&DiscoveryResult::empty()).await;

        assert_eq!(snapshot.current().generation, 2);
        assert!(snapshot.peers().is_empty());
    }

    #[tokio::test]
    async fn test_subscribers_see_updates() {
        let snapshot = PeerSnapshot::new();
        let mut rx = snapshot.subscribe();

        snapshot.publish(sample());
        rx.changed().await.unwrap();

        assert_eq!(rx.borrow().result.peers.len(), 2);
    }
}
