//! Peer Discovery Types
//!
//! Core types for the local identity, enumerated instances and the
//! per-run discovery result handed to the cache layer.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Facts about the local instance read from the metadata server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalIdentity {
    /// Instance name (e.g., "generator-7x2k")
    pub instance_name: String,
    /// Owning GCP project ID
    pub project_id: String,
    /// Value of the application tag on this instance
    pub app_tag: String,
}

/// A network interface attached to an instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkInterface {
    /// Interface name (e.g., "nic0")
    pub name: String,
    /// Internal (VPC) address
    pub network_ip: String,
    /// External NAT address from the first access config, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_ip: Option<String>,
}

/// A compute instance as seen by the enumerator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceRecord {
    /// Provider instance ID (may be empty for sparse responses)
    pub id: String,
    pub name: String,
    /// Short zone name (e.g., "us-central1-a")
    pub zone: String,
    pub network_interfaces: Vec<NetworkInterface>,
    /// Metadata items, first occurrence of a key wins
    pub tags: BTreeMap<String, String>,
}

impl InstanceRecord {
    /// Identity used for deduplication
    ///
    /// The provider ID when known, otherwise zone and name.
    pub fn identity(&self) -> String {
        if self.id.is_empty() {
            format!("{}/{}", self.zone, self.name)
        } else {
            self.id.clone()
        }
    }

    pub fn is_reachable(&self) -> bool {
        !self.network_interfaces.is_empty()
    }

    /// Internal address of the primary interface
    pub fn primary_ip(&self) -> Option<&str> {
        self.network_interfaces
            .first()
            .map(|nic| nic.network_ip.as_str())
            .filter(|ip| !ip.is_empty())
    }

    pub fn external_ip(&self) -> Option<&str> {
        self.network_interfaces
            .first()
            .and_then(|nic| nic.external_ip.as_deref())
    }

    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(String::as_str)
    }

    /// Addressable view for the cache layer
    pub fn endpoint(&self, port: u16) -> Option<PeerEndpoint> {
        let address = self.primary_ip()?.to_string();
        Some(PeerEndpoint {
            name: self.name.clone(),
            url: format!("http://{}:{}", address, port),
            address,
        })
    }
}

/// Output of one discovery run
///
/// Every peer has at least one network interface, and `self_instance`,
/// when set, is also one of `peers`. `peers` is kept sorted by name and
/// zone; the order carries no meaning beyond stable output.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryResult {
    pub self_instance: Option<InstanceRecord>,
    pub peers: Vec<InstanceRecord>,
}

impl DiscoveryResult {
    /// Result of a run that could not complete
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.self_instance.is_none() && self.peers.is_empty()
    }

    pub fn peer_names(&self) -> BTreeSet<String> {
        self.peers.iter().map(|p| p.name.clone()).collect()
    }

    pub fn peer_identities(&self) -> BTreeSet<String> {
        self.peers.iter().map(InstanceRecord::identity).collect()
    }

    /// Endpoints for every peer with an internal address
    pub fn peer_endpoints(&self, port: u16) -> Vec<PeerEndpoint> {
        self.peers.iter().filter_map(|p| p.endpoint(port)).collect()
    }

    pub fn self_endpoint(&self, port: u16) -> Option<PeerEndpoint> {
        self.self_instance.as_ref().and_then(|s| s.endpoint(port))
    }
}

/// A peer as the cache engine addresses it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerEndpoint {
    pub name: String,
    pub address: String,
    pub url: String,
}
