//! Instance Enumerator
//!
//! Lists every instance in a project through the Compute API aggregated
//! list, follows continuation tokens to the last page, and keeps only
//! instances tagged with the caller's application.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::auth::TokenProvider;
use crate::config::DiscoveryConfig;
use crate::error::DiscoveryError;
use crate::types::{InstanceRecord, NetworkInterface};

// ============================================================
// Compute API wire types
// ============================================================

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Instance {
    #[serde(default)]
    pub id: String,
    pub name: String,
    /// Zone URL (".../zones/us-central1-a")
    #[serde(default)]
    pub zone: String,
    #[serde(default)]
    pub network_interfaces: Vec<WireNetworkInterface>,
    #[serde(default)]
    pub metadata: Option<InstanceMetadata>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireNetworkInterface {
    #[serde(default)]
    pub name: String,
    #[serde(default, rename = "networkIP")]
    pub network_ip: String,
    #[serde(default)]
    pub access_configs: Vec<AccessConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AccessConfig {
    #[serde(default, rename = "natIP")]
    pub nat_ip: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct InstanceMetadata {
    #[serde(default)]
    pub items: Vec<MetadataItem>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetadataItem {
    pub key: String,
    #[serde(default)]
    pub value: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AggregatedListResponse {
    #[serde(default)]
    items: BTreeMap<String, InstancesScopedList>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct InstancesScopedList {
    #[serde(default)]
    instances: Vec<Instance>,
}

impl Instance {
    /// True iff some metadata item matches `key` and `value` exactly
    pub fn has_tag(&self, key: &str, value: &str) -> bool {
        self.metadata.as_ref().map_or(false, |m| {
            m.items
                .iter()
                .any(|item| item.key == key && item.value.as_deref() == Some(value))
        })
    }

    pub fn into_record(self) -> InstanceRecord {
        let zone = self
            .zone
            .rsplit('/')
            .next()
            .unwrap_or_default()
            .to_string();

        let network_interfaces = self
            .network_interfaces
            .into_iter()
            .map(|nic| NetworkInterface {
                external_ip: nic
                    .access_configs
                    .into_iter()
                    .find_map(|ac| ac.nat_ip)
                    .filter(|ip| !ip.is_empty()),
                name: nic.name,
                network_ip: nic.network_ip,
            })
            .collect();

        let mut tags = BTreeMap::new();
        for item in self.metadata.map(|m| m.items).unwrap_or_default() {
            if let Some(value) = item.value {
                tags.entry(item.key).or_insert(value);
            }
        }

        InstanceRecord {
            id: self.id,
            name: self.name,
            zone,
            network_interfaces,
            tags,
        }
    }
}

// ============================================================
// Paging capability
// ============================================================

/// One page of the inventory
#[derive(Debug, Clone, Default)]
pub struct InventoryPage {
    pub instances: Vec<Instance>,
    /// Continuation token; `None` or empty means this was the last page
    pub next_page_token: Option<String>,
}

/// Provider cursor over the instance inventory of one project
#[async_trait]
pub trait PageFetcher: Send {
    async fn fetch_page(&mut self, page_token: Option<&str>) -> Result<InventoryPage>;
}

/// Opens a per-run page fetcher for a project
///
/// The returned fetcher owns any credentials it needs and is dropped
/// when the run ends.
#[async_trait]
pub trait InventorySource: Send + Sync {
    async fn connect(&self, project_id: &str) -> Result<Box<dyn PageFetcher>>;
}

/// List every instance tagged `tag_key = app_tag`
///
/// Each instance appears once no matter how often the provider yields it.
/// Any page failure, a repeated continuation token or cancellation fails
/// the whole call; no partial inventory is returned.
pub async fn list_tagged_instances(
    fetcher: &mut dyn PageFetcher,
    tag_key: &str,
    app_tag: &str,
    cancel: &CancellationToken,
) -> Result<Vec<InstanceRecord>, DiscoveryError> {
    let mut matched = Vec::new();
    let mut seen = HashSet::new();
    let mut seen_tokens = HashSet::new();
    let mut page_token: Option<String> = None;
    let mut pages = 0usize;

    loop {
        let fetched = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(DiscoveryError::Enumeration(format!(
                    "cancelled after {} page(s)",
                    pages
                )));
            }
            result = fetcher.fetch_page(page_token.as_deref()) => result,
        };
        let page = fetched
            .map_err(|e| DiscoveryError::Enumeration(format!("page {}: {:#}", pages + 1, e)))?;

        pages += 1;
        let listed = page.instances.len();

        for instance in page.instances {
            if !instance.has_tag(tag_key, app_tag) {
                continue;
            }
            // A key can repeat in instance metadata; the record keeps the
            // value it was selected by.
            let mut record = instance.into_record();
            record.tags.insert(tag_key.to_string(), app_tag.to_string());
            if seen.insert(record.identity()) {
                matched.push(record);
            } else {
                debug!(instance = %record.name, "Skipping duplicate instance");
            }
        }

        debug!(page = pages, listed, matched = matched.len(), "Fetched inventory page");

        match page.next_page_token.filter(|t| !t.is_empty()) {
            Some(token) => {
                if !seen_tokens.insert(token.clone()) {
                    return Err(DiscoveryError::Enumeration(format!(
                        "page token {} repeated after {} page(s)",
                        token, pages
                    )));
                }
                page_token = Some(token);
            }
            None => break,
        }
    }

    info!(pages, count = matched.len(), app = %app_tag, "Enumerated tagged instances");
    Ok(matched)
}

/// Connect to `project_id` and list its tagged instances
pub async fn enumerate<S: InventorySource + ?Sized>(
    source: &S,
    project_id: &str,
    tag_key: &str,
    app_tag: &str,
    cancel: &CancellationToken,
) -> Result<Vec<InstanceRecord>, DiscoveryError> {
    let connected = tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            return Err(DiscoveryError::Enumeration("cancelled while connecting".to_string()));
        }
        result = source.connect(project_id) => result,
    };

    let mut fetcher = connected
        .with_context(|| format!("Failed to open inventory for project {}", project_id))?;

    list_tagged_instances(fetcher.as_mut(), tag_key, app_tag, cancel).await
}

// ============================================================
// Compute API implementation
// ============================================================

/// Inventory backed by the Compute API
#[derive(Clone)]
pub struct GceInventory {
    http_client: Client,
    compute_url: String,
    page_size: u32,
    tokens: TokenProvider,
}

impl GceInventory {
    pub fn new(config: &DiscoveryConfig) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(config.request_timeout)
            .user_agent(concat!("lornu-peer-discovery/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            http_client,
            compute_url: config.compute_url.trim_end_matches('/').to_string(),
            page_size: config.page_size,
            tokens: TokenProvider::new(config)?,
        })
    }
}

#[async_trait]
impl InventorySource for GceInventory {
    async fn connect(&self, project_id: &str) -> Result<Box<dyn PageFetcher>> {
        let access_token = self
            .tokens
            .access_token()
            .await
            .context("Failed to obtain access token")?;

        Ok(Box::new(GceInstancePages {
            http_client: self.http_client.clone(),
            url: format!(
                "{}/projects/{}/aggregated/instances",
                self.compute_url, project_id
            ),
            page_size: self.page_size,
            access_token,
        }))
    }
}

/// Aggregated list cursor holding the bearer token for one run
struct GceInstancePages {
    http_client: Client,
    url: String,
    page_size: u32,
    access_token: String,
}

#[async_trait]
impl PageFetcher for GceInstancePages {
    async fn fetch_page(&mut self, page_token: Option<&str>) -> Result<InventoryPage> {
        let mut query = vec![("maxResults", self.page_size.to_string())];
        if let Some(token) = page_token {
            query.push(("pageToken", token.to_string()));
        }

        let response = self
            .http_client
            .get(&self.url)
            .bearer_auth(&self.access_token)
            .query(&query)
            .send()
            .await
            .context("Failed to list instances")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            bail!("Compute API returned {}: {}", status, body);
        }

        let list: AggregatedListResponse = response
            .json()
            .await
            .context("Failed to parse aggregated instance list")?;

        Ok(InventoryPage {
            instances: list
                .items
                .into_values()
                .flat_map(|scoped| scoped.instances)
                .collect(),
            next_page_token: list.next_page_token,
        })
    }
}

#[cfg(test)]
pub(crate) mod fake {
    use super::*;
    use std::sync::{Arc, Mutex};

    pub fn instance(id: &str, name: &str, ip: Option<&str>, items: &[(&str, &str)]) -> Instance {
        Instance {
            id: id.to_string(),
            name: name.to_string(),
            zone: "https://www.googleapis.com/compute/v1/projects/p/zones/us-central1-a"
                .to_string(),
            network_interfaces: ip
                .map(|ip| {
                    vec![WireNetworkInterface {
                        name: "nic0".to_string(),
                        network_ip: ip.to_string(),
                        access_configs: Vec::new(),
                    }]
                })
                .unwrap_or_default(),
            metadata: Some(InstanceMetadata {
                items: items
                    .iter()
                    .map(|(k, v)| MetadataItem {
                        key: k.to_string(),
                        value: Some(v.to_string()),
                    })
                    .collect(),
            }),
        }
    }

    pub fn page(instances: Vec<Instance>, next: Option<&str>) -> InventoryPage {
        InventoryPage {
            instances,
            next_page_token: next.map(str::to_string),
        }
    }

    /// Serves a fixed sequence of pages and records the tokens it was asked for
    #[derive(Clone, Default)]
    pub struct ScriptedPages {
        pages: Arc<Vec<InventoryPage>>,
        pub requests: Arc<Mutex<Vec<Option<String>>>>,
        fail_at: Option<usize>,
        cancel_at: Option<(usize, CancellationToken)>,
    }

    impl ScriptedPages {
        pub fn new(pages: Vec<InventoryPage>) -> Self {
            Self {
                pages: Arc::new(pages),
                ..Default::default()
            }
        }

        /// Fail the request for the page at `index`
        pub fn fail_at(mut self, index: usize) -> Self {
            self.fail_at = Some(index);
            self
        }

        /// Cancel `token` while serving the page at `index`
        pub fn cancel_at(mut self, index: usize, token: CancellationToken) -> Self {
            self.cancel_at = Some((index, token));
            self
        }

        pub fn request_count(&self) -> usize {
            self.requests.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl PageFetcher for ScriptedPages {
        async fn fetch_page(&mut self, page_token: Option<&str>) -> Result<InventoryPage> {
            let index = {
                let mut requests = self.requests.lock().unwrap();
                requests.push(page_token.map(str::to_string));
                requests.len() - 1
            };

            if self.fail_at == Some(index) {
                bail!("Compute API returned 500 Internal Server Error");
            }
            if let Some((at, token)) = &self.cancel_at {
                if *at == index {
                    token.cancel();
                }
            }

            self.pages
                .get(index)
                .cloned()
                .context("no more scripted pages")
        }
    }

    /// Inventory source handing out fresh copies of a scripted fetcher
    #[derive(Clone, Default)]
    pub struct FakeInventory {
        pub pages: ScriptedPages,
        pub connects: Arc<Mutex<Vec<String>>>,
        pub refuse: bool,
    }

    impl FakeInventory {
        pub fn new(pages: Vec<InventoryPage>) -> Self {
            Self {
                pages: ScriptedPages::new(pages),
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl InventorySource for FakeInventory {
        async fn connect(&self, project_id: &str) -> Result<Box<dyn PageFetcher>> {
            self.connects.lock().unwrap().push(project_id.to_string());
            if self.refuse {
                bail!("Failed to obtain access token");
            }
            Ok(Box::new(ScriptedPages {
                pages: self.pages.pages.clone(),
                requests: Arc::new(Mutex::new(Vec::new())),
                fail_at: self.pages.fail_at,
                cancel_at: self.pages.cancel_at.clone(),
            }))
        }
    }
}
