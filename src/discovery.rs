//! Discovery Orchestrator
//!
//! Resolves the local identity, enumerates tagged instances and partitions
//! them into self and peers. `discover_peers` never fails: a run that
//! cannot complete yields an empty result so the node carries on as a
//! singleton.

use anyhow::Result;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::DiscoveryConfig;
use crate::error::DiscoveryError;
use crate::inventory::{self, GceInventory, InventorySource};
use crate::membership;
use crate::metadata::{self, GceMetadataClient, MetadataSource};
use crate::types::DiscoveryResult;

/// Peer discovery over injected metadata and inventory sources
#[derive(Clone)]
pub struct PeerDiscovery {
    metadata: Arc<dyn MetadataSource>,
    inventory: Arc<dyn InventorySource>,
    tag_key: String,
}

impl PeerDiscovery {
    pub fn new(
        metadata: Arc<dyn MetadataSource>,
        inventory: Arc<dyn InventorySource>,
        tag_key: impl Into<String>,
    ) -> Self {
        Self {
            metadata,
            inventory,
            tag_key: tag_key.into(),
        }
    }

    /// Discovery against the GCE metadata server and Compute API
    pub fn gce(config: &DiscoveryConfig) -> Result<Self> {
        Ok(Self::new(
            Arc::new(GceMetadataClient::new(config)?),
            Arc::new(GceInventory::new(config)?),
            config.tag_key.clone(),
        ))
    }

    pub fn tag_key(&self) -> &str {
        &self.tag_key
    }

    /// Run one discovery, surfacing failures to the caller
    pub async fn try_discover_peers(
        &self,
        cancel: &CancellationToken,
    ) -> Result<DiscoveryResult, DiscoveryError> {
        let identity =
            metadata::read_local_facts(self.metadata.as_ref(), &self.tag_key, cancel).await?;

        let instances = inventory::enumerate(
            self.inventory.as_ref(),
            &identity.project_id,
            &self.tag_key,
            &identity.app_tag,
            cancel,
        )
        .await?;

        Ok(membership::partition(instances, &identity.instance_name))
    }

    /// Run one discovery; failures are logged and yield an empty result
    pub async fn discover_peers(&self, cancel: &CancellationToken) -> DiscoveryResult {
        let started = Instant::now();

        match self.try_discover_peers(cancel).await {
            Ok(result) => {
                info!(
                    peers = result.peers.len(),
                    self_found = result.self_instance.is_some(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Peer discovery completed"
                );
                result
            }
            Err(e) => {
                error!(kind = e.kind(), error = %e, "Peer discovery failed, continuing as singleton");
                DiscoveryResult::empty()
            }
        }
    }
}
