//! GCE Metadata Reader
//!
//! Reads scalar facts about the local instance from the metadata server.
//! Every request must carry `Metadata-Flavor: Google` or the server
//! rejects it.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::DiscoveryConfig;
use crate::error::DiscoveryError;
use crate::types::LocalIdentity;

pub const INSTANCE_NAME_PATH: &str = "instance/name";
pub const PROJECT_ID_PATH: &str = "project/project-id";

const METADATA_FLAVOR_HEADER: &str = "Metadata-Flavor";
const METADATA_FLAVOR: &str = "Google";

/// Path of the instance attribute carrying the application tag
pub fn app_tag_path(tag_key: &str) -> String {
    format!("instance/attributes/{}", tag_key)
}

/// Source of raw metadata values keyed by path
#[async_trait]
pub trait MetadataSource: Send + Sync {
    /// Fetch the raw value stored at `path`
    async fn fetch(&self, path: &str) -> Result<String>;
}

/// Metadata server client
#[derive(Clone)]
pub struct GceMetadataClient {
    http_client: Client,
    base_url: String,
}

impl GceMetadataClient {
    pub fn new(config: &DiscoveryConfig) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            http_client,
            base_url: config.metadata_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl MetadataSource for GceMetadataClient {
    async fn fetch(&self, path: &str) -> Result<String> {
        let url = format!("{}/{}", self.base_url, path);
        debug!(%url, "Querying metadata server");

        let response = self
            .http_client
            .get(&url)
            .header(METADATA_FLAVOR_HEADER, METADATA_FLAVOR)
            .send()
            .await
            .context("Cannot query metadata server")?;

        let status = response.status();
        if !status.is_success() {
            bail!("Metadata server returned {}", status);
        }

        let body = response.text().await.context("Cannot read metadata response")?;
        // Values are compared byte for byte against instance metadata, so the
        // body is returned as served.
        if body.trim().is_empty() {
            bail!("Metadata value is empty");
        }

        Ok(body)
    }
}

async fn lookup<M: MetadataSource + ?Sized>(
    source: &M,
    path: &str,
    cancel: &CancellationToken,
) -> Result<String, DiscoveryError> {
    let value = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(DiscoveryError::metadata(path, "cancelled")),
        result = source.fetch(path) => result,
    };

    value.map_err(|e| DiscoveryError::metadata(path, format!("{:#}", e)))
}

/// Resolve the local instance name, project and application tag
///
/// Any of the three lookups failing aborts the whole read; a partial
/// identity cannot drive enumeration.
pub async fn read_local_facts<M: MetadataSource + ?Sized>(
    source: &M,
    tag_key: &str,
    cancel: &CancellationToken,
) -> Result<LocalIdentity, DiscoveryError> {
    let instance_name = lookup(source, INSTANCE_NAME_PATH, cancel).await?;
    let project_id = lookup(source, PROJECT_ID_PATH, cancel).await?;
    let app_tag = lookup(source, &app_tag_path(tag_key), cancel).await?;

    debug!(
        instance = %instance_name,
        project = %project_id,
        app = %app_tag,
        "Resolved local identity"
    );

    Ok(LocalIdentity {
        instance_name,
        project_id,
        app_tag,
    })
}

#[cfg(test)]
pub(crate) mod fake {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Metadata source answering from a fixed map
    #[derive(Default)]
    pub struct FakeMetadata {
        values: HashMap<String, String>,
        pub calls: AtomicUsize,
    }

    impl FakeMetadata {
        pub fn new(instance: &str, project: &str, app: &str) -> Self {
            Self::default()
                .with(INSTANCE_NAME_PATH, instance)
                .with(PROJECT_ID_PATH, project)
                .with("instance/attributes/app", app)
        }

        pub fn with(mut self, path: &str, value: &str) -> Self {
            self.values.insert(path.to_string(), value.to_string());
            self
        }

        pub fn without(mut self, path: &str) -> Self {
            self.values.remove(path);
            self
        }
    }

    #[async_trait]
    impl MetadataSource for FakeMetadata {
        async fn fetch(&self, path: &str) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.values.get(path) {
                Some(v) => Ok(v.clone()),
                None => bail!("Metadata server returned 404 Not Found"),
            }
        }
    }
}
