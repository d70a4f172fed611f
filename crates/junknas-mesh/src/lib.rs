//! Mesh control plane and chunk replication.
//!
//! The coordinator wakes every few seconds, pushes this node's mesh state
//! to every configured bootstrap endpoint and WireGuard peer over HTTP,
//! merges whatever states come back, and reprograms the WireGuard device
//! when the peer set changed. Everything rides on the shared
//! [`junknas_config::ConfigStore`]; snapshots go out, merges come back in
//! under its single lock.

pub mod allocate;
pub mod coordinator;
pub mod state;
pub mod sync;
pub mod wireguard;

pub use allocate::allocate_peer_ip;
pub use coordinator::{MeshCoordinator, MeshHandle};
pub use state::{
    build_mesh_state, derive_role, merge_mesh_state, sync_payload, AlternateRequest,
    JoinConfig, MeshSelf, MeshState,
};
pub use sync::SyncClient;
pub use wireguard::WgDevice;

#[derive(Debug, thiserror::Error)]
pub enum MeshError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("config error: {0}")]
    Config(#[from] junknas_config::ConfigError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("peer returned status {0}")]
    PeerStatus(u16),
    #[error("no free host addresses in subnet")]
    SubnetFull,
    #[error("invalid overlay address: {0}")]
    InvalidAddress(String),
    #[error("wg command failed: {0}")]
    WgCommand(String),
}
