//! Status endpoint
//!
//! Exposes the current peer snapshot for operators:
//! - `GET /health`
//! - `GET /peers`: full snapshot with peer endpoints
//! - `GET /self`: the local instance, 404 when it was not found

use anyhow::Result;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::snapshot::PeerSnapshot;

#[derive(Clone)]
struct AppState {
    snapshot: PeerSnapshot,
    peer_port: u16,
}

pub fn router(snapshot: PeerSnapshot, peer_port: u16) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/peers", get(list_peers))
        .route("/self", get(self_instance))
        .with_state(AppState {
            snapshot,
            peer_port,
        })
}

/// Serve `router` on `listener` until `cancel` fires
pub async fn serve(listener: TcpListener, router: Router, cancel: CancellationToken) -> Result<()> {
    info!("Status server listening on {}", listener.local_addr()?);

    axum::serve(listener, router)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await?;

    Ok(())
}

async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "lornu-peer-discovery",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

async fn list_peers(State(state): State<AppState>) -> Json<serde_json::Value> {
    let current = state.snapshot.current();

    Json(serde_json::json!({
        "generation": current.generation,
        "updated_at": current.updated_at,
        "self": current.result.self_instance,
        "peers": current.result.peers,
        "endpoints": current.result.peer_endpoints(state.peer_port),
    }))
}

async fn self_instance(State(state): State<AppState>) -> Response {
    match state.snapshot.self_instance() {
        Some(instance) => Json(instance).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({"error": "self_not_found"})),
        )
            .into_response(),
    }
}
