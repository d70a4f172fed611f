//! Outbound mesh HTTP: state pushes, chunk fetch and replication.
//!
//! A slow or dead peer must never stall the mesh loop, so every request
//! rides a client with 1-second connect/read timeouts; failures just flip
//! the peer's advisory status and the next cycle retries.

use std::path::Path;
use std::time::Duration;

use junknas_config::{ConfigStore, NodeConfig, PeerStatus};
use junknas_core::is_hex64;
use tracing::{debug, warn};

use crate::state::{merge_mesh_state, sync_payload, AlternateRequest, MeshState};
use crate::MeshError;

/// HTTP client for peer-to-peer mesh traffic.
#[derive(Clone)]
pub struct SyncClient {
    http: reqwest::Client,
}

impl Default for SyncClient {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncClient {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(1))
                .connect_timeout(Duration::from_secs(1))
                .build()
                .expect("reqwest client"),
        }
    }

    /// POST this node's state to a peer's `/mesh/peers` and return the
    /// peer's state from a 2xx response.
    pub async fn push_state(
        &self,
        endpoint: &str,
        state: &MeshState,
    ) -> Result<MeshState, MeshError> {
        let url = format!("http://{endpoint}/mesh/peers");
        let response = self.http.post(&url).json(state).send().await?;
        if !response.status().is_success() {
            return Err(MeshError::PeerStatus(response.status().as_u16()));
        }
        Ok(response.json::<MeshState>().await?)
    }

    /// Tell a server to rekey this node's peer entry.
    pub async fn post_alternate(
        &self,
        url: &str,
        request: &AlternateRequest,
    ) -> Result<(), MeshError> {
        let response = self.http.post(url).json(request).send().await?;
        if !response.status().is_success() {
            return Err(MeshError::PeerStatus(response.status().as_u16()));
        }
        Ok(())
    }

    /// One bidirectional sync round with every configured bootstrap
    /// endpoint and WireGuard peer. Returns how many peers answered 2xx.
    pub async fn sync_round(&self, store: &ConfigStore) -> usize {
        let snapshot = store.snapshot();
        let payload = sync_payload(&snapshot);

        let mut targets: Vec<(SyncTarget, String)> = Vec::new();
        for (index, endpoint) in snapshot.bootstrap_peers.iter().enumerate() {
            targets.push((SyncTarget::Bootstrap(index), endpoint.clone()));
        }
        for peer in &snapshot.wg_peers {
            let endpoint = format!("{}:{}", peer.wg_ip, snapshot.peer_web_port(peer));
            targets.push((SyncTarget::Peer(peer.public_key.clone()), endpoint));
        }

        let mut synced = 0usize;
        for (target, endpoint) in targets {
            match self.push_state(&endpoint, &payload).await {
                Ok(remote_state) => {
                    synced += 1;
                    mark(store, &target, PeerStatus::Connected);
                    if let Err(err) = merge_mesh_state(store, &remote_state) {
                        warn!(%endpoint, %err, "failed to merge peer state");
                    }
                }
                Err(err) => {
                    debug!(%endpoint, %err, "peer unreachable");
                    mark(store, &target, PeerStatus::Unreachable);
                }
            }
        }
        synced
    }

    /// Download a chunk from the first peer that has it, writing the raw
    /// bytes to `dest`. The store's read path re-verifies the hash, so a
    /// lying peer cannot poison reads.
    pub async fn fetch_chunk(
        &self,
        config: &NodeConfig,
        hash_hex: &str,
        dest: &Path,
    ) -> Result<(), MeshError> {
        if !is_hex64(hash_hex) {
            return Err(MeshError::InvalidAddress(hash_hex.to_string()));
        }
        for peer in &config.wg_peers {
            let endpoint = format!("{}:{}", peer.wg_ip, config.peer_web_port(peer));
            let url = format!("http://{endpoint}/chunks/{hash_hex}");
            let response = match self.http.get(&url).send().await {
                Ok(r) if r.status().is_success() => r,
                _ => continue,
            };
            match response.bytes().await {
                Ok(bytes) => {
                    tokio::fs::write(dest, &bytes).await?;
                    debug!(chunk = &hash_hex[..12], %endpoint, "fetched chunk");
                    return Ok(());
                }
                Err(err) => {
                    debug!(%endpoint, %err, "chunk body read failed");
                }
            }
        }
        Err(MeshError::PeerStatus(404))
    }

    /// Best-effort push of a chunk to every known peer.
    pub async fn replicate_chunk(
        &self,
        config: &NodeConfig,
        hash_hex: &str,
        data: Vec<u8>,
    ) -> usize {
        let mut stored = 0usize;
        for peer in &config.wg_peers {
            let endpoint = format!("{}:{}", peer.wg_ip, config.peer_web_port(peer));
            let url = format!("http://{endpoint}/chunks/{hash_hex}");
            match self.http.post(&url).body(data.clone()).send().await {
                Ok(response) if response.status().is_success() => stored += 1,
                Ok(response) => {
                    debug!(%endpoint, status = %response.status(), "replicate rejected");
                }
                Err(err) => {
                    debug!(%endpoint, %err, "replicate failed");
                }
            }
        }
        stored
    }
}

enum SyncTarget {
    Bootstrap(usize),
    Peer(String),
}

/// Flip the advisory status of one sync target. Never persisted.
fn mark(store: &ConfigStore, target: &SyncTarget, status: PeerStatus) {
    store.mutate_volatile(|config| match target {
        SyncTarget::Bootstrap(index) => {
            if let Some(slot) = config.bootstrap_status.get_mut(*index) {
                *slot = status;
            }
        }
        SyncTarget::Peer(key) => {
            if let Some(peer) = config.wg_peers.iter_mut().find(|p| &p.public_key == key) {
                peer.status = status;
            }
        }
    });
}
