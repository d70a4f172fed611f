//! HTTP surface of a junkNAS node.
//!
//! One axum listener serves three concerns: browsing the mounted files,
//! chunk GET/POST for replication, and the `/mesh/*` control plane. There
//! is no authentication beyond overlay network membership.

mod handlers;
mod ui;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use junknas_config::ConfigStore;
use junknas_core::CHUNK_SIZE;
use junknas_mesh::{MeshHandle, SyncClient};
use junknas_store::ChunkStore;
use tokio::sync::watch;
use tracing::info;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<ConfigStore>,
    pub chunks: Arc<ChunkStore>,
    pub mesh: Arc<MeshHandle>,
    pub sync: SyncClient,
}

/// Build the full router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(handlers::root_listing))
        .route("/browse/{*rel}", get(handlers::browse))
        .route("/files/{*rel}", get(handlers::file_bytes))
        .route(
            "/chunks/{hash}",
            get(handlers::chunk_get).post(handlers::chunk_post),
        )
        .route(
            "/mesh/peers",
            get(handlers::mesh_state_get).post(handlers::mesh_peers_post),
        )
        .route(
            "/mesh/config",
            get(handlers::mesh_config_get).post(handlers::mesh_config_post),
        )
        .route("/mesh/status", get(handlers::mesh_status))
        .route("/mesh/bootstrap", post(handlers::mesh_bootstrap))
        .route("/mesh/join", post(handlers::mesh_join))
        .route("/mesh/alternate", post(handlers::mesh_alternate))
        .route("/mesh/sync", post(handlers::mesh_sync))
        .route("/mesh/ui", get(ui::mesh_ui))
        .route("/mesh", get(ui::mesh_ui))
        .layer(DefaultBodyLimit::max(CHUNK_SIZE + 64 * 1024))
        .with_state(state)
}

/// Bind and serve in a background task (the supervisor and the tests both
/// use this). Returns the bound address, which matters when `addr` asked
/// for an ephemeral port.
pub async fn serve_in_background(
    state: AppState,
    addr: SocketAddr,
    shutdown: watch::Receiver<bool>,
) -> Result<SocketAddr> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind web listener on {addr}"))?;
    let bound = listener.local_addr()?;
    info!(addr = %bound, "web server listening");

    let mut shutdown = shutdown;
    tokio::spawn(async move {
        let _ = axum::serve(listener, router(state))
            .with_graceful_shutdown(async move {
                let _ = shutdown.wait_for(|stop| *stop).await;
            })
            .await;
    });
    Ok(bound)
}
