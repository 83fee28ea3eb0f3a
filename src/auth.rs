//! Access tokens for the Compute API
//!
//! Resolution order:
//! - A token supplied up front (`GCE_ACCESS_TOKEN`)
//! - The metadata server's default service account token
//! - `gcloud auth application-default print-access-token` (local development, opt-in)

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::DiscoveryConfig;
use crate::metadata::{GceMetadataClient, MetadataSource};

pub const TOKEN_PATH: &str = "instance/service-accounts/default/token";

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

/// Resolves a bearer token for each discovery run
#[derive(Clone)]
pub struct TokenProvider {
    metadata: GceMetadataClient,
    static_token: Option<String>,
    gcloud_fallback: bool,
}

impl TokenProvider {
    pub fn new(config: &DiscoveryConfig) -> Result<Self> {
        Ok(Self {
            metadata: GceMetadataClient::new(config)?,
            static_token: config.access_token.clone().filter(|t| !t.is_empty()),
            gcloud_fallback: config.gcloud_fallback,
        })
    }

    pub async fn access_token(&self) -> Result<String> {
        if let Some(token) = &self.static_token {
            return Ok(token.clone());
        }

        match self.metadata_token().await {
            Ok(token) => Ok(token),
            Err(e) if self.gcloud_fallback => {
                warn!(error = %format!("{:#}", e), "Metadata token unavailable, falling back to gcloud");
                gcloud_token().await
            }
            Err(e) => Err(e),
        }
    }

    async fn metadata_token(&self) -> Result<String> {
        let body = self
            .metadata
            .fetch(TOKEN_PATH)
            .await
            .context("Failed to fetch service account token")?;

        parse_token_response(&body)
    }
}

fn parse_token_response(body: &str) -> Result<String> {
    let response: TokenResponse =
        serde_json::from_str(body).context("Invalid token response")?;

    if response.access_token.is_empty() {
        bail!("Token response has an empty access_token");
    }

    debug!(expires_in = ?response.expires_in, "Obtained service account token");
    Ok(response.access_token)
}

async fn gcloud_token() -> Result<String> {
    let output = tokio::process::Command::new("gcloud")
        .args(["auth", "application-default", "print-access-token"])
        .output()
        .await
        .context("Failed to run gcloud CLI")?;

    if !output.status.success() {
        bail!("gcloud auth failed");
    }

    let token = String::from_utf8(output.stdout)
        .context("gcloud printed a non UTF-8 token")?
        .trim()
        .to_string();

    if token.is_empty() {
        bail!("gcloud printed an empty token");
    }

    Ok(token)
}
