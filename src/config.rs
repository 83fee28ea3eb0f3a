//! Discovery configuration
//!
//! Defaults target a GCE instance talking to the real metadata server and
//! Compute API. The CLI overrides these from flags and environment.

use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_METADATA_URL: &str = "http://metadata.google.internal/computeMetadata/v1";
pub const DEFAULT_COMPUTE_URL: &str = "https://compute.googleapis.com/compute/v1";

/// Metadata key shared by every member of a cluster
pub const DEFAULT_TAG_KEY: &str = "app";

/// Configuration for a discovery run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// Metadata server base URL
    pub metadata_url: String,
    /// Compute API base URL
    pub compute_url: String,
    /// Metadata key holding the application tag
    pub tag_key: String,
    /// `maxResults` per inventory page
    pub page_size: u32,
    /// Timeout applied to every HTTP request
    #[serde(with = "duration_secs")]
    pub request_timeout: Duration,
    /// Pre-issued OAuth token, skips the metadata token endpoint
    #[serde(skip_serializing)]
    pub access_token: Option<String>,
    /// Fall back to the gcloud CLI when no token can be obtained
    pub gcloud_fallback: bool,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            metadata_url: DEFAULT_METADATA_URL.to_string(),
            compute_url: DEFAULT_COMPUTE_URL.to_string(),
            tag_key: DEFAULT_TAG_KEY.to_string(),
            page_size: 500,
            request_timeout: Duration::from_secs(10),
            access_token: None,
            gcloud_fallback: false,
        }
    }
}

impl DiscoveryConfig {
    /// Point both the metadata server and Compute API at one base URL
    pub fn with_base_url(mut self, base: &str) -> Self {
        let base = base.trim_end_matches('/');
        self.metadata_url = format!("{}/computeMetadata/v1", base);
        self.compute_url = format!("{}/compute/v1", base);
        self
    }

    pub fn tag_key(mut self, key: impl Into<String>) -> Self {
        self.tag_key = key.into();
        self
    }

    pub fn access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }
}

/// Configuration for the periodic refresh loop
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshConfig {
    /// Time between discovery runs
    #[serde(with = "duration_secs")]
    pub interval: Duration,
    /// Port peers serve the cache protocol on
    pub peer_port: u16,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            peer_port: 8080,
        }
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_secs)
    }
}
