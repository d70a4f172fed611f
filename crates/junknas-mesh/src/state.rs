//! Mesh state payloads and the merge rules.
//!
//! `MeshState` is what travels in `POST /mesh/peers` bodies in both
//! directions: this node's identity, its stored peers, and its advertised
//! mount points, stamped with the monotonic clocks that arbitrate merges.

use junknas_config::{now_epoch, ConfigError, ConfigStore, NodeConfig, UpsertOutcome, WgPeer};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// The sending node's own identity inside a mesh state document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MeshSelf {
    #[serde(default)]
    pub public_key: String,
    #[serde(default)]
    pub endpoint: String,
    #[serde(default)]
    pub wg_ip: String,
    #[serde(default)]
    pub web_port: u16,
    #[serde(default)]
    pub persistent_keepalive: u16,
    #[serde(default)]
    pub listen_port: u16,
}

impl MeshSelf {
    /// View the sender as a candidate peer entry.
    pub fn as_peer(&self) -> WgPeer {
        WgPeer {
            public_key: self.public_key.clone(),
            endpoint: self.endpoint.clone(),
            wg_ip: self.wg_ip.clone(),
            persistent_keepalive: self.persistent_keepalive,
            web_port: self.web_port,
            ..Default::default()
        }
    }
}

/// Full mesh state exchanged between nodes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MeshState {
    #[serde(default)]
    pub updated_at: u64,
    #[serde(default)]
    pub mounts_updated_at: u64,
    #[serde(rename = "self", default, skip_serializing_if = "Option::is_none")]
    pub node: Option<MeshSelf>,
    #[serde(default)]
    pub peers: Vec<WgPeer>,
    #[serde(default)]
    pub mount_points: Vec<String>,
}

/// A join config minted by a `node`-role host: the new node's keypair and
/// the hub's coordinates.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JoinConfig {
    pub peer_private_key: String,
    pub peer_public_key: String,
    pub peer_wg_ip: String,
    pub server_public_key: String,
    pub server_endpoint: String,
    pub server_wg_ip: String,
    pub server_web_port: u16,
    #[serde(default)]
    pub allow_alternate: bool,
}

/// Peer-to-server rekey request: replace the public key of the peer stored
/// under `wg_ip`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlternateRequest {
    pub wg_ip: String,
    pub public_key: String,
}

/// Derived connectivity role for `GET /mesh/status`.
pub fn derive_role(config: &NodeConfig) -> &'static str {
    use junknas_config::PeerStatus;
    if config.bootstrap_peers.is_empty() && config.wg_peers.is_empty() {
        return "standalone";
    }
    let any_reachable = config
        .bootstrap_status
        .iter()
        .any(|s| *s == PeerStatus::Connected)
        || config.wg_peers.iter().any(|p| p.status == PeerStatus::Connected);
    if any_reachable {
        "central"
    } else {
        "dead_end"
    }
}

/// Build this node's full mesh state from a config snapshot.
pub fn build_mesh_state(config: &NodeConfig) -> MeshState {
    MeshState {
        updated_at: config.wg_peers_updated_at,
        mounts_updated_at: config.data_mount_points_updated_at,
        node: Some(MeshSelf {
            public_key: config.wireguard.public_key.clone(),
            endpoint: config.wireguard.endpoint.clone(),
            wg_ip: config.wireguard.wg_ip.clone(),
            web_port: config.web_port,
            persistent_keepalive: 0,
            listen_port: config.wireguard.listen_port,
        }),
        peers: config.wg_peers.clone(),
        mount_points: config.data_mount_points.clone(),
    }
}

/// Payload for an outbound sync push. An `end` node does not host the
/// overlay server, so it learns state but advertises none.
pub fn sync_payload(config: &NodeConfig) -> MeshState {
    if config.node_state == junknas_config::NodeState::End {
        MeshState::default()
    } else {
        build_mesh_state(config)
    }
}

/// Merge an incoming mesh state into the local store.
///
/// Rules: never adopt a peer carrying this node's own public key; upsert
/// everything else by identity; replace the mount-point set wholesale when
/// the incoming stamp is newer (equal stamps only reconcile a differing
/// set); bump `wg_peers_updated_at` iff some upsert changed anything, and
/// persist only on change. Returns whether anything changed.
pub fn merge_mesh_state(
    store: &ConfigStore,
    incoming: &MeshState,
) -> Result<bool, ConfigError> {
    store.mutate_if(|config| {
        let local_pub = config.wireguard.public_key.clone();
        let mut peers_changed = false;
        let mut mounts_changed = false;

        if let Some(sender) = &incoming.node {
            let peer = sender.as_peer();
            if peer.is_complete() && peer.public_key != local_pub {
                if config.upsert_peer(peer) == UpsertOutcome::Changed {
                    peers_changed = true;
                }
            }
        }

        for peer in &incoming.peers {
            if !peer.is_complete() || peer.public_key == local_pub {
                continue;
            }
            if config.upsert_peer(peer.clone()) == UpsertOutcome::Changed {
                peers_changed = true;
            }
        }

        if incoming.mounts_updated_at > config.data_mount_points_updated_at {
            config.data_mount_points = incoming.mount_points.clone();
            config.data_mount_points_updated_at = incoming.mounts_updated_at;
            mounts_changed = true;
        } else if incoming.mounts_updated_at == config.data_mount_points_updated_at
            && incoming.mounts_updated_at != 0
            && incoming.mount_points != config.data_mount_points
        {
            config.data_mount_points = incoming.mount_points.clone();
            mounts_changed = true;
        }

        if peers_changed {
            config.wg_peers_updated_at = now_epoch().max(config.wg_peers_updated_at);
        }
        if peers_changed || mounts_changed {
            debug!(peers_changed, mounts_changed, "merged mesh state");
        }
        peers_changed || mounts_changed
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use junknas_config::NodeState;

    fn peer(key: &str, ip: &str) -> WgPeer {
        WgPeer {
            public_key: key.to_string(),
            wg_ip: ip.to_string(),
            ..Default::default()
        }
    }

    fn store_in(dir: &tempfile::TempDir) -> ConfigStore {
        let mut config = NodeConfig::default();
        config.data_dir = dir.path().join("data").display().to_string();
        config.mount_point = dir.path().join("mnt").display().to_string();
        let path = dir.path().join("config.json");
        std::fs::write(&path, serde_json::to_string(&config).unwrap()).unwrap();
        ConfigStore::init(&path).unwrap()
    }

    #[test]
    fn test_merge_upserts_sender_and_peers() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);

        let incoming = MeshState {
            node: Some(MeshSelf {
                public_key: "sender".into(),
                wg_ip: "10.99.0.5".into(),
                web_port: 8081,
                ..Default::default()
            }),
            peers: vec![peer("other", "10.99.0.6")],
            ..Default::default()
        };

        assert!(merge_mesh_state(&store, &incoming).unwrap());
        let snapshot = store.snapshot();
        let keys: Vec<&str> = snapshot
            .wg_peers
            .iter()
            .map(|p| p.public_key.as_str())
            .collect();
        assert_eq!(keys, vec!["sender", "other"]);
        assert!(snapshot.wg_peers_updated_at > 0);
    }

    #[test]
    fn test_merge_never_adopts_own_key() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        let own_key = store.snapshot().wireguard.public_key;

        let incoming = MeshState {
            peers: vec![peer(&own_key, "10.99.0.9")],
            ..Default::default()
        };
        assert!(!merge_mesh_state(&store, &incoming).unwrap());
        assert!(store.snapshot().wg_peers.is_empty());
    }

    #[test]
    fn test_merge_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        let incoming = MeshState {
            peers: vec![peer("p1", "10.99.0.4")],
            ..Default::default()
        };

        assert!(merge_mesh_state(&store, &incoming).unwrap());
        let stamp = store.snapshot().wg_peers_updated_at;
        // Same payload again: nothing changes, the clock does not move.
        assert!(!merge_mesh_state(&store, &incoming).unwrap());
        assert_eq!(store.snapshot().wg_peers_updated_at, stamp);
    }

    #[test]
    fn test_mounts_replaced_only_when_newer() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        store
            .mutate(|config| {
                config.data_mount_points = vec!["/mnt/local".into()];
                config.data_mount_points_updated_at = 100;
            })
            .unwrap();

        // Older stamp: ignored.
        let stale = MeshState {
            mounts_updated_at: 50,
            mount_points: vec!["/mnt/stale".into()],
            ..Default::default()
        };
        assert!(!merge_mesh_state(&store, &stale).unwrap());
        assert_eq!(store.snapshot().data_mount_points, vec!["/mnt/local"]);

        // Equal stamp, same set: untouched.
        let same = MeshState {
            mounts_updated_at: 100,
            mount_points: vec!["/mnt/local".into()],
            ..Default::default()
        };
        assert!(!merge_mesh_state(&store, &same).unwrap());

        // Newer stamp: replaced wholesale.
        let newer = MeshState {
            mounts_updated_at: 200,
            mount_points: vec!["/mnt/remote".into()],
            ..Default::default()
        };
        assert!(merge_mesh_state(&store, &newer).unwrap());
        let snapshot = store.snapshot();
        assert_eq!(snapshot.data_mount_points, vec!["/mnt/remote"]);
        assert_eq!(snapshot.data_mount_points_updated_at, 200);
    }

    #[test]
    fn test_end_node_sync_payload_is_empty() {
        let mut config = NodeConfig::default();
        config.node_state = NodeState::End;
        config.wg_peers.push(peer("p", "10.99.0.3"));
        let state = sync_payload(&config);
        assert!(state.node.is_none());
        assert!(state.peers.is_empty());
        assert!(state.mount_points.is_empty());
        // The full state view still reports everything.
        assert_eq!(build_mesh_state(&config).peers.len(), 1);
    }

    #[test]
    fn test_role_derivation() {
        use junknas_config::PeerStatus;
        let mut config = NodeConfig::default();
        assert_eq!(derive_role(&config), "standalone");

        config.wg_peers.push(peer("p", "10.99.0.3"));
        assert_eq!(derive_role(&config), "dead_end");

        config.wg_peers[0].status = PeerStatus::Connected;
        assert_eq!(derive_role(&config), "central");
    }

    #[test]
    fn test_state_serde_field_names() {
        let mut config = NodeConfig::default();
        config.wireguard.public_key = "pk".into();
        let json = serde_json::to_value(build_mesh_state(&config)).unwrap();
        assert!(json.get("self").is_some());
        assert!(json.get("updated_at").is_some());
        assert!(json.get("mounts_updated_at").is_some());
        assert!(json.get("peers").is_some());
        assert!(json.get("mount_points").is_some());
    }
}
