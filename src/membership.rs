//! Membership Filter
//!
//! Splits the tagged inventory into the local instance and the peer set.

use tracing::{debug, warn};

use crate::types::{DiscoveryResult, InstanceRecord};

/// Partition tagged instances into self and peers
///
/// Instances without a network interface are dropped. The instance named
/// `local_name` becomes `self_instance` and stays in `peers`; when it is
/// missing, `self_instance` is left unset.
pub fn partition(instances: Vec<InstanceRecord>, local_name: &str) -> DiscoveryResult {
    let mut self_instance: Option<InstanceRecord> = None;
    let mut peers = Vec::with_capacity(instances.len());

    for instance in instances {
        if !instance.is_reachable() {
            debug!(instance = %instance.name, "Dropping instance without network interface");
            continue;
        }

        if instance.name == local_name {
            match &self_instance {
                None => self_instance = Some(instance.clone()),
                Some(first) => warn!(
                    instance = %local_name,
                    chosen_zone = %first.zone,
                    ignored_zone = %instance.zone,
                    "Local instance name matches more than one instance"
                ),
            }
        }

        // peers including ourself
        peers.push(instance);
    }

    if self_instance.is_none() {
        warn!(instance = %local_name, "Local instance not found in its own inventory");
    }

    peers.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.zone.cmp(&b.zone)));

    DiscoveryResult {
        self_instance,
        peers,
    }
}
