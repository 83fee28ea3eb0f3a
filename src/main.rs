//! Peer Discovery Agent
//!
//! Resolves the instances sharing this node's `app` metadata value.
//!
//! # Usage
//! ```bash
//! # One-shot discovery, result printed as JSON
//! peer-discovery once
//!
//! # Refresh every minute and serve the snapshot on :8090
//! peer-discovery serve --interval-secs 60 --listen 0.0.0.0:8090
//! ```

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::net::SocketAddr;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use lornu_peer_discovery::config::{DEFAULT_COMPUTE_URL, DEFAULT_METADATA_URL, DEFAULT_TAG_KEY};
use lornu_peer_discovery::{refresh, server};
use lornu_peer_discovery::{DiscoveryConfig, PeerDiscovery, PeerSnapshot, RefreshConfig};

// ============================================================
// CLI Definition
// ============================================================

#[derive(Parser)]
#[command(name = "peer-discovery")]
#[command(about = "Lornu AI GCE Peer Discovery", long_about = None)]
#[command(version)]
struct Cli {
    #[command(flatten)]
    discovery: DiscoveryArgs,

    /// Emit logs as JSON
    #[arg(long, env = "LOG_JSON")]
    json_logs: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct DiscoveryArgs {
    /// Metadata server base URL
    #[arg(long, env = "GCE_METADATA_URL", default_value = DEFAULT_METADATA_URL)]
    metadata_url: String,

    /// Compute API base URL
    #[arg(long, env = "GCE_COMPUTE_URL", default_value = DEFAULT_COMPUTE_URL)]
    compute_url: String,

    /// Metadata key shared by cluster members
    #[arg(long, env = "PEER_TAG_KEY", default_value = DEFAULT_TAG_KEY)]
    tag_key: String,

    /// Instances per inventory page
    #[arg(long, default_value = "500")]
    page_size: u32,

    /// Timeout for each HTTP request in seconds
    #[arg(long, env = "REQUEST_TIMEOUT_SECS", default_value = "10")]
    request_timeout_secs: u64,

    /// Pre-issued OAuth access token
    #[arg(long, env = "GCE_ACCESS_TOKEN", hide_env_values = true)]
    access_token: Option<String>,

    /// Fall back to `gcloud auth application-default print-access-token`
    #[arg(long)]
    gcloud_fallback: bool,
}

impl From<DiscoveryArgs> for DiscoveryConfig {
    fn from(args: DiscoveryArgs) -> Self {
        Self {
            metadata_url: args.metadata_url,
            compute_url: args.compute_url,
            tag_key: args.tag_key,
            page_size: args.page_size,
            request_timeout: Duration::from_secs(args.request_timeout_secs),
            access_token: args.access_token,
            gcloud_fallback: args.gcloud_fallback,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Run discovery once and print the result
    Once,

    /// Refresh peers periodically and serve the snapshot
    Serve {
        /// Seconds between discovery runs
        #[arg(
            long,
            env = "REFRESH_INTERVAL_SECS",
            default_value = "60",
            value_parser = clap::value_parser!(u64).range(1..)
        )]
        interval_secs: u64,

        /// Status server address
        #[arg(long, env = "STATUS_LISTEN", default_value = "0.0.0.0:8090")]
        listen: SocketAddr,

        /// Port peers serve the cache protocol on
        #[arg(long, env = "PEER_PORT", default_value = "8080")]
        peer_port: u16,
    },
}

// ============================================================
// Main Entry Point
// ============================================================

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose, cli.json_logs)?;

    let config = DiscoveryConfig::from(cli.discovery);
    info!(
        metadata_url = %config.metadata_url,
        tag_key = %config.tag_key,
        "Peer discovery starting"
    );

    let discovery = PeerDiscovery::gce(&config)?;

    match cli.command {
        Commands::Once => {
            let result = discovery.discover_peers(&CancellationToken::new()).await;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }

        Commands::Serve {
            interval_secs,
            listen,
            peer_port,
        } => {
            let refresh_config = RefreshConfig {
                interval: Duration::from_secs(interval_secs),
                peer_port,
            };
            run_service(discovery, refresh_config, listen).await?;
        }
    }

    Ok(())
}

fn init_logging(verbose: bool, json: bool) -> Result<()> {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_str().to_lowercase()));

    let builder = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false);

    if json {
        tracing::subscriber::set_global_default(builder.json().finish())?;
    } else {
        tracing::subscriber::set_global_default(builder.finish())?;
    }

    Ok(())
}

async fn run_service(discovery: PeerDiscovery, config: RefreshConfig, listen: SocketAddr) -> Result<()> {
    let cancel = CancellationToken::new();
    let snapshot = PeerSnapshot::new();

    let listener = tokio::net::TcpListener::bind(listen)
        .await
        .with_context(|| format!("Failed to bind status server on {}", listen))?;
    let status = tokio::spawn(server::serve(
        listener,
        server::router(snapshot.clone(), config.peer_port),
        cancel.clone(),
    ));

    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown requested");
        }
        shutdown.cancel();
    });

    refresh::run_refresh_loop(&discovery, &snapshot, config.interval, &cancel).await;

    status.await.context("Status server task panicked")??;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_zero_interval_rejected() {
        let result = Cli::try_parse_from(["peer-discovery", "serve", "--interval-secs", "0"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_interval_accepted() {
        let cli = Cli::try_parse_from(["peer-discovery", "serve", "--interval-secs", "1"]).unwrap();
        match cli.command {
            Commands::Serve { interval_secs, .. } => assert_eq!(interval_secs, 1),
            Commands::Once => panic!("expected serve"),
        }
    }
}
