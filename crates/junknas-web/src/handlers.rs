//! Route handlers.

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{Html, IntoResponse, Json, Response};
use junknas_config::{
    keys, now_epoch, parse_endpoint, NodeState, PeerStatus, WgPeer, MAX_BOOTSTRAP_PEERS,
};
use junknas_core::is_hex64;
use junknas_mesh::{
    allocate_peer_ip, build_mesh_state, derive_role, merge_mesh_state, AlternateRequest,
    JoinConfig, MeshState,
};
use junknas_store::StoreError;
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use crate::ui;
use crate::AppState;

fn bad_request(msg: &str) -> Response {
    (StatusCode::BAD_REQUEST, msg.to_string()).into_response()
}

fn server_error(msg: String) -> Response {
    (StatusCode::INTERNAL_SERVER_ERROR, msg).into_response()
}

/// `/browse/` and `/files/` accept only relative, `..`-free paths.
fn is_safe_relative(path: &str) -> bool {
    !path.starts_with('/') && !path.contains("..")
}

// ----------------------------------------------------------------------
// Browse and file streaming
// ----------------------------------------------------------------------

pub async fn root_listing(State(state): State<AppState>) -> Response {
    listing_response(&state, "").await
}

pub async fn browse(State(state): State<AppState>, Path(rel): Path<String>) -> Response {
    if !is_safe_relative(&rel) {
        return bad_request("unsafe path");
    }
    listing_response(&state, &rel).await
}

async fn listing_response(state: &AppState, rel: &str) -> Response {
    let snapshot = state.store.snapshot();
    let base = std::path::PathBuf::from(&snapshot.mount_point);
    let dir = if rel.is_empty() { base } else { base.join(rel) };

    let entries = match std::fs::read_dir(&dir) {
        Ok(entries) => entries,
        Err(_) => return (StatusCode::NOT_FOUND, "Not Found").into_response(),
    };

    let mut dirs = Vec::new();
    let mut files = Vec::new();
    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().into_owned();
        if entry.path().is_dir() {
            dirs.push(name);
        } else {
            files.push(name);
        }
    }
    dirs.sort();
    files.sort();

    Html(ui::listing_page(&snapshot, rel, &dirs, &files)).into_response()
}

pub async fn file_bytes(State(state): State<AppState>, Path(rel): Path<String>) -> Response {
    if !is_safe_relative(&rel) {
        return bad_request("unsafe path");
    }
    let mount_point = state.store.read(|config| config.mount_point.clone());
    let path = std::path::PathBuf::from(mount_point).join(&rel);

    match tokio::fs::read(&path).await {
        Ok(bytes) => (
            [(header::CONTENT_TYPE, "application/octet-stream")],
            bytes,
        )
            .into_response(),
        Err(_) => (StatusCode::NOT_FOUND, "Not Found").into_response(),
    }
}

// ----------------------------------------------------------------------
// Chunk replication
// ----------------------------------------------------------------------

pub async fn chunk_get(State(state): State<AppState>, Path(hash): Path<String>) -> Response {
    if !is_hex64(&hash) {
        return bad_request("bad chunk hash");
    }
    let Some(path) = state.chunks.find(&hash) else {
        return (StatusCode::NOT_FOUND, "Not Found").into_response();
    };
    match tokio::fs::read(&path).await {
        Ok(bytes) => (
            [(header::CONTENT_TYPE, "application/octet-stream")],
            bytes,
        )
            .into_response(),
        Err(err) => server_error(err.to_string()),
    }
}

pub async fn chunk_post(
    State(state): State<AppState>,
    Path(hash): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if !is_hex64(&hash) {
        return bad_request("bad chunk hash");
    }
    let content_length = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<i64>().ok());
    match content_length {
        None => return (StatusCode::LENGTH_REQUIRED, "Length Required").into_response(),
        Some(len) if len < 0 => return bad_request("negative content length"),
        Some(_) => {}
    }

    match state.chunks.put_if_absent(&hash, &body) {
        Ok(()) => (StatusCode::OK, "OK\n").into_response(),
        Err(StoreError::QuotaExceeded) => {
            (StatusCode::INSUFFICIENT_STORAGE, "quota exceeded").into_response()
        }
        Err(StoreError::InvalidHash(_)) => bad_request("bad chunk hash"),
        Err(err) => server_error(err.to_string()),
    }
}

// ----------------------------------------------------------------------
// Mesh state and config
// ----------------------------------------------------------------------

pub async fn mesh_state_get(State(state): State<AppState>) -> Json<MeshState> {
    Json(build_mesh_state(&state.store.snapshot()))
}

pub async fn mesh_peers_post(
    State(state): State<AppState>,
    Json(incoming): Json<MeshState>,
) -> Response {
    match merge_mesh_state(&state.store, &incoming) {
        Ok(_) => Json(build_mesh_state(&state.store.snapshot())).into_response(),
        Err(err) => server_error(err.to_string()),
    }
}

fn mesh_config_json(state: &AppState) -> serde_json::Value {
    state.store.read(|config| {
        json!({
            "self": {
                "public_key": config.wireguard.public_key,
                "endpoint": config.wireguard.endpoint,
                "wg_ip": config.wireguard.wg_ip,
                "listen_port": config.wireguard.listen_port,
                "web_port": config.web_port,
            },
            "node_state": config.node_state,
            "bootstrap_peers_updated_at": config.bootstrap_peers_updated_at,
            "bootstrap_peers": config.bootstrap_peers,
            "wg_peers_updated_at": config.wg_peers_updated_at,
            "wg_peers": config.wg_peers,
        })
    })
}

pub async fn mesh_config_get(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(mesh_config_json(&state))
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct MeshConfigUpdate {
    bootstrap_peers: Option<Vec<String>>,
    wg_peers: Option<Vec<WgPeer>>,
    node_state: Option<NodeState>,
}

pub async fn mesh_config_post(
    State(state): State<AppState>,
    Json(update): Json<MeshConfigUpdate>,
) -> Response {
    if let Some(bootstrap) = &update.bootstrap_peers {
        if bootstrap.len() > MAX_BOOTSTRAP_PEERS {
            return bad_request("too many bootstrap peers");
        }
        for endpoint in bootstrap {
            if parse_endpoint(endpoint).is_err() {
                return bad_request("invalid bootstrap endpoint");
            }
        }
    }

    let result = state.store.mutate(|config| {
        let now = now_epoch();
        if let Some(bootstrap) = update.bootstrap_peers {
            config.bootstrap_peers = bootstrap;
            config.bootstrap_status =
                vec![PeerStatus::Connecting; config.bootstrap_peers.len()];
            config.bootstrap_peers_updated_at = now;
        }
        if let Some(peers) = update.wg_peers {
            config.set_peers(peers);
            config.wg_peers_updated_at = now;
        }
        if let Some(node_state) = update.node_state {
            config.node_state = node_state;
        }
    });

    match result {
        Ok(()) => Json(mesh_config_json(&state)).into_response(),
        Err(err) => server_error(err.to_string()),
    }
}

pub async fn mesh_status(State(state): State<AppState>) -> Json<serde_json::Value> {
    let mesh_active = state.mesh.is_active();
    let mesh_standalone = state.mesh.is_standalone();
    state.store.read(|config| {
        let bootstrap: Vec<serde_json::Value> = config
            .bootstrap_peers
            .iter()
            .zip(
                config
                    .bootstrap_status
                    .iter()
                    .chain(std::iter::repeat(&PeerStatus::Connecting)),
            )
            .map(|(endpoint, status)| json!({ "endpoint": endpoint, "status": status }))
            .collect();

        let peers: Vec<serde_json::Value> = config
            .wg_peers
            .iter()
            .map(|peer| {
                json!({
                    "public_key": peer.public_key,
                    "wg_ip": peer.wg_ip,
                    "web_port": config.peer_web_port(peer),
                    "status": peer.status,
                })
            })
            .collect();

        Json(json!({
            "role": derive_role(config),
            "active": mesh_active,
            "standalone": mesh_standalone,
            "bootstrap_peers": bootstrap,
            "wg_peers": peers,
        }))
    })
}

// ----------------------------------------------------------------------
// Bootstrap mint, join, alternate, sync
// ----------------------------------------------------------------------

pub async fn mesh_bootstrap(State(state): State<AppState>) -> Response {
    let snapshot = state.store.snapshot();
    if snapshot.node_state == NodeState::End {
        return (StatusCode::FORBIDDEN, "end nodes cannot mint join configs").into_response();
    }

    let used: Vec<String> = snapshot.wg_peers.iter().map(|p| p.wg_ip.clone()).collect();
    let peer_wg_ip = match allocate_peer_ip(
        &snapshot.wireguard.wg_ip,
        used.iter().map(String::as_str),
    ) {
        Ok(ip) => ip,
        Err(err) => return server_error(err.to_string()),
    };

    let (peer_private_key, peer_public_key) = keys::generate_keypair();

    let result = state.store.mutate(|config| {
        let outcome = config.upsert_peer(WgPeer {
            public_key: peer_public_key.clone(),
            wg_ip: peer_wg_ip.clone(),
            ..Default::default()
        });
        if outcome == junknas_config::UpsertOutcome::Full {
            return Err("peer list full");
        }
        config.wg_peers_updated_at = now_epoch().max(config.wg_peers_updated_at);
        Ok(())
    });
    match result {
        Ok(Ok(())) => {}
        Ok(Err(msg)) => return bad_request(msg),
        Err(err) => return server_error(err.to_string()),
    }

    info!(%peer_wg_ip, "minted join config");
    Json(json!({
        "peer_private_key": peer_private_key,
        "peer_public_key": peer_public_key,
        "peer_wg_ip": peer_wg_ip,
        "server_public_key": snapshot.wireguard.public_key,
        "server_endpoint": snapshot.wireguard.endpoint,
        "server_wg_ip": snapshot.wireguard.wg_ip,
        "server_web_port": snapshot.web_port,
    }))
    .into_response()
}

pub async fn mesh_join(
    State(state): State<AppState>,
    Json(mut join): Json<JoinConfig>,
) -> Response {
    if !keys::is_valid_key(&join.peer_private_key) {
        return bad_request("invalid peer private key");
    }
    if join.server_public_key.is_empty() || join.server_wg_ip.is_empty() {
        return bad_request("incomplete join config");
    }

    // With allow_alternate the minted key is treated as a one-time
    // bootstrap secret: rotate to a fresh pair, tell the server, and the
    // old key is invalid from here on.
    let mut alternate_key: Option<(String, String)> = None;
    if join.allow_alternate {
        let (new_private, new_public) = keys::generate_keypair();
        let server_host = parse_endpoint(&join.server_endpoint)
            .map(|(host, _)| host)
            .unwrap_or_else(|_| join.server_wg_ip.clone());
        let url = format!(
            "http://{}:{}/mesh/alternate",
            server_host, join.server_web_port
        );
        let request = AlternateRequest {
            wg_ip: join.peer_wg_ip.clone(),
            public_key: new_public.clone(),
        };
        match state.sync.post_alternate(&url, &request).await {
            Ok(()) => info!("alternate identity accepted by server"),
            Err(err) => warn!(%err, "alternate notification failed, rotating anyway"),
        }
        alternate_key = Some((new_private, new_public));
    }

    if let Some((new_private, new_public)) = alternate_key {
        join.peer_private_key = new_private;
        join.peer_public_key = new_public;
    }

    // Keep the invariant: the stored public key is always the derivation
    // of the stored private key.
    let derived_public = match keys::derive_public_key(&join.peer_private_key) {
        Ok(public) => public,
        Err(_) => return bad_request("invalid peer private key"),
    };
    if derived_public != join.peer_public_key {
        warn!("join config public key does not match private key, using derived");
    }

    let key_path = state.store.read(|config| {
        junknas_config::key_file_path(state.store.path(), config)
    });
    if let Err(err) = keys::write_key_file(&key_path, &join.peer_private_key) {
        return server_error(err.to_string());
    }

    let result = state.store.mutate(|config| {
        config.wireguard.private_key = join.peer_private_key.clone();
        config.wireguard.public_key = derived_public.clone();
        config.wireguard.wg_ip = join.peer_wg_ip.clone();
        let _ = config.upsert_peer(WgPeer {
            public_key: join.server_public_key.clone(),
            endpoint: join.server_endpoint.clone(),
            wg_ip: join.server_wg_ip.clone(),
            web_port: join.server_web_port,
            ..Default::default()
        });
        config.wg_peers_updated_at = now_epoch().max(config.wg_peers_updated_at);
    });

    match result {
        Ok(()) => {
            info!(wg_ip = %join.peer_wg_ip, "joined mesh");
            Json(json!({ "status": "ok" })).into_response()
        }
        Err(err) => server_error(err.to_string()),
    }
}

pub async fn mesh_alternate(
    State(state): State<AppState>,
    Json(request): Json<AlternateRequest>,
) -> Response {
    if request.wg_ip.is_empty() || request.public_key.is_empty() {
        return bad_request("wg_ip and public_key required");
    }

    let result = state.store.mutate_if(|config| {
        let Some(peer) = config.wg_peers.iter_mut().find(|p| p.wg_ip == request.wg_ip)
        else {
            return false;
        };
        if peer.public_key == request.public_key {
            return false;
        }
        peer.public_key = request.public_key.clone();
        config.wg_peers_updated_at = now_epoch().max(config.wg_peers_updated_at);
        true
    });

    match result {
        Ok(true) => Json(json!({ "status": "ok" })).into_response(),
        Ok(false) => {
            let known = state
                .store
                .read(|config| config.wg_peers.iter().any(|p| p.wg_ip == request.wg_ip));
            if known {
                Json(json!({ "status": "ok" })).into_response()
            } else {
                (StatusCode::NOT_FOUND, "no peer with that wg_ip").into_response()
            }
        }
        Err(err) => server_error(err.to_string()),
    }
}

pub async fn mesh_sync(State(state): State<AppState>) -> Json<serde_json::Value> {
    let synced = state.sync.sync_round(&state.store).await;
    Json(json!({ "synced": synced }))
}
