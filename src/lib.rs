//! Lornu AI Peer Discovery Library
//!
//! Derives cluster membership from GCE instance metadata: every instance
//! carrying the same `app` metadata value as the local instance is a peer.
//! No static configuration, gossip or registry service is involved.
//!
//! ## Flow
//!
//! - **Metadata Reader**: local instance name, project and app tag
//! - **Instance Enumerator**: paginated aggregated instance list, filtered by tag
//! - **Membership Filter**: drops unreachable instances, marks self
//! - **Orchestrator**: best-effort, an unavailable discovery yields an empty result

pub mod auth;
pub mod config;
pub mod discovery;
pub mod error;
pub mod inventory;
pub mod membership;
pub mod metadata;
pub mod refresh;
pub mod server;
pub mod snapshot;
pub mod types;

pub use config::{DiscoveryConfig, RefreshConfig};
pub use discovery::PeerDiscovery;
pub use error::DiscoveryError;
pub use inventory::{GceInventory, InventoryPage, InventorySource, PageFetcher};
pub use metadata::{GceMetadataClient, MetadataSource};
pub use snapshot::{PeerSink, PeerSnapshot};
pub use types::{DiscoveryResult, InstanceRecord, LocalIdentity, NetworkInterface, PeerEndpoint};
