//! Discovery error kinds
//!
//! Adapters (HTTP clients, token provider) work in `anyhow` and are folded
//! into these at the trait boundary.

use thiserror::Error;

/// Errors that abort a discovery run
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// One of the local metadata lookups failed
    #[error("Metadata unavailable at {path}: {reason}")]
    MetadataUnavailable { path: String, reason: String },

    /// Listing or paging the instance inventory failed
    #[error("Enumeration failed: {0}")]
    Enumeration(String),
}

impl DiscoveryError {
    pub fn metadata(path: &str, err: impl std::fmt::Display) -> Self {
        DiscoveryError::MetadataUnavailable {
            path: path.to_string(),
            reason: err.to_string(),
        }
    }

    /// Short label used in structured logs
    pub fn kind(&self) -> &'static str {
        match self {
            DiscoveryError::MetadataUnavailable { .. } => "metadata_unavailable",
            DiscoveryError::Enumeration(_) => "enumeration_error",
        }
    }
}

impl From<anyhow::Error> for DiscoveryError {
    fn from(err: anyhow::Error) -> Self {
        DiscoveryError::Enumeration(format!("{:#}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DiscoveryError::metadata("instance/name", "connection refused");
        assert_eq!(
            err.to_string(),
            "Metadata unavailable at instance/name: connection refused"
        );
        assert_eq!(err.kind(), "metadata_unavailable");
    }

    #[test]
    fn test_anyhow_keeps_context_chain() {
        let err: DiscoveryError = anyhow::anyhow!("HTTP 503")
            .context("Failed to list instances")
            .into();

        assert_eq!(err.kind(), "enumeration_error");
        assert_eq!(
            err.to_string(),
            "Enumeration failed: Failed to list instances: HTTP 503"
        );
    }
}
