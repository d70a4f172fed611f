//! Node configuration for junkNAS.
//!
//! One process-wide [`ConfigStore`] owns the [`NodeConfig`] behind a single
//! mutex. Every read-modify-write (peer upsert, bootstrap edit, endpoint
//! refresh) happens under that lock and persists before releasing it, so
//! the on-disk JSON never lags a mutation. Persistence is atomic via
//! temp + fsync + rename.

pub mod keys;

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

pub const DEFAULT_DATA_DIR: &str = "/var/lib/junknas/data";
pub const DEFAULT_MOUNT_POINT: &str = "/mnt/junknas";
pub const DEFAULT_WEB_PORT: u16 = 8080;
pub const DEFAULT_WG_PORT: u16 = 51820;
pub const DEFAULT_WG_INTERFACE: &str = "jnk0";
pub const DEFAULT_STORAGE_SIZE: &str = "10G";
pub const DEFAULT_WG_IP: &str = "10.99.0.1";

pub const MAX_BOOTSTRAP_PEERS: usize = 10;
pub const MAX_DATA_DIRS: usize = 8;
pub const MAX_DATA_MOUNT_POINTS: usize = 16;
pub const MAX_WG_PEERS: usize = 64;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
    #[error("invalid key material")]
    InvalidKey,
    #[error("{0} list is full")]
    ListFull(&'static str),
    #[error("index {0} out of range")]
    OutOfRange(usize),
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),
}

/// Unix epoch seconds, used for every monotonic `*_updated_at` clock.
pub fn now_epoch() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Split `"host:port"`, accepting hostnames, IPv4 and bracketed IPv6.
pub fn parse_endpoint(endpoint: &str) -> Result<(String, u16), ConfigError> {
    let (host, port) = endpoint
        .rsplit_once(':')
        .ok_or_else(|| ConfigError::InvalidEndpoint(endpoint.to_string()))?;
    if host.is_empty() {
        return Err(ConfigError::InvalidEndpoint(endpoint.to_string()));
    }
    let port: u16 = port
        .parse()
        .map_err(|_| ConfigError::InvalidEndpoint(endpoint.to_string()))?;
    if port == 0 {
        return Err(ConfigError::InvalidEndpoint(endpoint.to_string()));
    }
    Ok((host.trim_matches(['[', ']']).to_string(), port))
}

/// Whether this node hosts the overlay server (`node`) or is a leaf that
/// must not mint join configs (`end`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeState {
    #[default]
    Node,
    End,
}

/// Advisory per-peer reachability. Never persisted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeerStatus {
    Connected,
    Unreachable,
    #[default]
    Connecting,
}

/// A WireGuard mesh peer, addressed by its public key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WgPeer {
    #[serde(default)]
    pub public_key: String,
    #[serde(default)]
    pub preshared_key: String,
    #[serde(default)]
    pub endpoint: String,
    #[serde(default)]
    pub wg_ip: String,
    /// Seconds; 0 = keepalive off.
    #[serde(default)]
    pub persistent_keepalive: u16,
    /// Overlay-side HTTP port; 0 = use the node-wide default.
    #[serde(default)]
    pub web_port: u16,
    #[serde(skip)]
    pub status: PeerStatus,
}

impl WgPeer {
    /// Identity and address must both be present for a peer to be stored.
    pub fn is_complete(&self) -> bool {
        !self.public_key.is_empty() && !self.wg_ip.is_empty()
    }

    /// True when every persisted field matches (status is advisory).
    pub fn same_fields(&self, other: &WgPeer) -> bool {
        self.public_key == other.public_key
            && self.preshared_key == other.preshared_key
            && self.endpoint == other.endpoint
            && self.wg_ip == other.wg_ip
            && self.persistent_keepalive == other.persistent_keepalive
            && self.web_port == other.web_port
    }
}

/// Outcome of [`NodeConfig::upsert_peer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Changed,
    Unchanged,
    Full,
}

/// This node's WireGuard identity and overlay address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WgConfig {
    pub interface_name: String,
    pub private_key: String,
    pub public_key: String,
    pub wg_ip: String,
    /// Advertised `host:port` peers use to reach this node's listener.
    pub endpoint: String,
    pub listen_port: u16,
    /// 0 = kernel default.
    pub mtu: u32,
}

impl Default for WgConfig {
    fn default() -> Self {
        Self {
            interface_name: DEFAULT_WG_INTERFACE.to_string(),
            private_key: String::new(),
            public_key: String::new(),
            wg_ip: DEFAULT_WG_IP.to_string(),
            endpoint: String::new(),
            listen_port: DEFAULT_WG_PORT,
            mtu: 0,
        }
    }
}

/// Full node configuration as persisted to the config JSON file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub storage_size: String,
    /// Parsed `storage_size`; derived, never persisted.
    #[serde(skip)]
    pub max_storage_bytes: u64,

    pub data_dir: String,
    /// Chunk store roots; when non-empty, overrides `data_dir` for chunks.
    pub data_dirs: Vec<String>,
    pub mount_point: String,

    pub web_port: u16,
    pub node_state: NodeState,
    pub wireguard: WgConfig,

    pub bootstrap_peers: Vec<String>,
    pub bootstrap_peers_updated_at: u64,
    #[serde(skip)]
    pub bootstrap_status: Vec<PeerStatus>,

    pub wg_peers: Vec<WgPeer>,
    pub wg_peers_updated_at: u64,

    pub data_mount_points: Vec<String>,
    pub data_mount_points_updated_at: u64,

    pub verbose: bool,
    pub enable_fuse: bool,
    pub daemon_mode: bool,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            storage_size: DEFAULT_STORAGE_SIZE.to_string(),
            max_storage_bytes: junknas_core::parse_storage_size(DEFAULT_STORAGE_SIZE)
                .unwrap_or(0),
            data_dir: DEFAULT_DATA_DIR.to_string(),
            data_dirs: Vec::new(),
            mount_point: DEFAULT_MOUNT_POINT.to_string(),
            web_port: DEFAULT_WEB_PORT,
            node_state: NodeState::Node,
            wireguard: WgConfig::default(),
            bootstrap_peers: Vec::new(),
            bootstrap_peers_updated_at: 0,
            bootstrap_status: Vec::new(),
            wg_peers: Vec::new(),
            wg_peers_updated_at: 0,
            data_mount_points: Vec::new(),
            data_mount_points_updated_at: 0,
            verbose: false,
            enable_fuse: true,
            daemon_mode: false,
        }
    }
}

impl NodeConfig {
    /// Backing roots for the chunk store: `data_dirs` when set, else the
    /// single `data_dir`. The first entry is the primary.
    pub fn backing_roots(&self) -> Vec<PathBuf> {
        if self.data_dirs.is_empty() {
            vec![PathBuf::from(&self.data_dir)]
        } else {
            self.data_dirs
                .iter()
                .take(MAX_DATA_DIRS)
                .map(PathBuf::from)
                .collect()
        }
    }

    pub fn primary_data_dir(&self) -> PathBuf {
        self.backing_roots().remove(0)
    }

    /// Web port a peer should be contacted on.
    pub fn peer_web_port(&self, peer: &WgPeer) -> u16 {
        if peer.web_port != 0 {
            peer.web_port
        } else {
            self.web_port
        }
    }

    /// Re-derive `max_storage_bytes` from `storage_size`, keeping the prior
    /// value when the string does not parse.
    pub fn reparse_storage_size(&mut self) {
        if let Some(bytes) = junknas_core::parse_storage_size(&self.storage_size) {
            self.max_storage_bytes = bytes;
        }
    }

    /// Structural validation; rejects the states nothing downstream can run
    /// with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.data_dir.is_empty() && self.data_dirs.is_empty() {
            return Err(ConfigError::Invalid("empty data_dir".into()));
        }
        if self.mount_point.is_empty() {
            return Err(ConfigError::Invalid("empty mount_point".into()));
        }
        if self.wireguard.interface_name.is_empty() {
            return Err(ConfigError::Invalid("empty interface_name".into()));
        }
        if self.wireguard.wg_ip.is_empty() {
            return Err(ConfigError::Invalid("empty wg_ip".into()));
        }
        if self.web_port == 0 {
            return Err(ConfigError::Invalid("web_port must be non-zero".into()));
        }
        if self.wireguard.listen_port == 0 {
            return Err(ConfigError::Invalid("listen_port must be non-zero".into()));
        }
        if junknas_core::parse_storage_size(&self.storage_size).is_none() {
            return Err(ConfigError::Invalid(format!(
                "unparseable storage_size {:?}",
                self.storage_size
            )));
        }
        if self.bootstrap_peers.len() > MAX_BOOTSTRAP_PEERS {
            return Err(ConfigError::Invalid("too many bootstrap peers".into()));
        }
        if self.wg_peers.len() > MAX_WG_PEERS {
            return Err(ConfigError::Invalid("too many wg peers".into()));
        }
        if self.data_dirs.len() > MAX_DATA_DIRS {
            return Err(ConfigError::Invalid("too many data dirs".into()));
        }
        if self.bootstrap_peers.iter().any(String::is_empty) {
            return Err(ConfigError::Invalid("empty bootstrap peer".into()));
        }
        if self.wg_peers.iter().any(|p| !p.is_complete()) {
            return Err(ConfigError::Invalid("peer with empty identity".into()));
        }
        Ok(())
    }

    /// Add or update a peer by `public_key`. Does not touch clocks or disk;
    /// callers decide whether the outcome warrants a bump and a save.
    pub fn upsert_peer(&mut self, peer: WgPeer) -> UpsertOutcome {
        if !peer.is_complete() {
            return UpsertOutcome::Unchanged;
        }
        if let Some(existing) = self
            .wg_peers
            .iter_mut()
            .find(|p| p.public_key == peer.public_key)
        {
            if existing.same_fields(&peer) {
                return UpsertOutcome::Unchanged;
            }
            let status = existing.status;
            *existing = peer;
            existing.status = status;
            return UpsertOutcome::Changed;
        }
        if self.wg_peers.len() >= MAX_WG_PEERS {
            return UpsertOutcome::Full;
        }
        self.wg_peers.push(peer);
        UpsertOutcome::Changed
    }

    /// Replace the peer set, dropping entries with an empty identity and
    /// resetting reachability to `Connecting`.
    pub fn set_peers(&mut self, peers: Vec<WgPeer>) {
        self.wg_peers = peers
            .into_iter()
            .filter(WgPeer::is_complete)
            .take(MAX_WG_PEERS)
            .map(|mut p| {
                p.status = PeerStatus::Connecting;
                p
            })
            .collect();
    }

    pub fn add_bootstrap_peer(&mut self, endpoint: &str) -> Result<(), ConfigError> {
        parse_endpoint(endpoint)?;
        if self.bootstrap_peers.len() >= MAX_BOOTSTRAP_PEERS {
            return Err(ConfigError::ListFull("bootstrap peer"));
        }
        self.bootstrap_peers.push(endpoint.to_string());
        self.bootstrap_status.push(PeerStatus::Connecting);
        Ok(())
    }

    pub fn add_mount_point(&mut self, path: &str) -> Result<(), ConfigError> {
        if path.is_empty() {
            return Err(ConfigError::Invalid("empty mount point".into()));
        }
        if self.data_mount_points.len() >= MAX_DATA_MOUNT_POINTS {
            return Err(ConfigError::ListFull("mount point"));
        }
        self.data_mount_points.push(path.to_string());
        Ok(())
    }

    fn sync_status_lengths(&mut self) {
        self.bootstrap_status
            .resize(self.bootstrap_peers.len(), PeerStatus::Connecting);
    }
}

/// Patch shape used when loading: every field optional so a partial or
/// slightly damaged file merges into the current values instead of
/// clobbering them. Unknown keys are ignored.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ConfigPatch {
    storage_size: Option<String>,
    data_dir: Option<String>,
    data_dirs: Option<Vec<String>>,
    mount_point: Option<String>,
    web_port: Option<u64>,
    node_state: Option<NodeState>,
    wireguard: Option<WgPatch>,
    bootstrap_peers: Option<Vec<String>>,
    bootstrap_peers_updated_at: Option<u64>,
    wg_peers: Option<Vec<WgPeer>>,
    wg_peers_updated_at: Option<u64>,
    data_mount_points: Option<Vec<String>>,
    data_mount_points_updated_at: Option<u64>,
    verbose: Option<bool>,
    enable_fuse: Option<bool>,
    daemon_mode: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct WgPatch {
    interface_name: Option<String>,
    private_key: Option<String>,
    public_key: Option<String>,
    wg_ip: Option<String>,
    endpoint: Option<String>,
    listen_port: Option<u64>,
    mtu: Option<u32>,
}

fn valid_port(value: Option<u64>) -> Option<u16> {
    match value {
        Some(p) if p > 0 && p < 65536 => Some(p as u16),
        _ => None,
    }
}

impl NodeConfig {
    /// Merge a loaded patch over the current values. Out-of-range numbers
    /// and unparseable sizes keep the prior value.
    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(v) = patch.storage_size {
            if junknas_core::parse_storage_size(&v).is_some() {
                self.storage_size = v;
                self.reparse_storage_size();
            }
        }
        if let Some(v) = patch.data_dir {
            if !v.is_empty() {
                self.data_dir = v;
            }
        }
        if let Some(v) = patch.data_dirs {
            self.data_dirs = v.into_iter().take(MAX_DATA_DIRS).collect();
        }
        if let Some(v) = patch.mount_point {
            if !v.is_empty() {
                self.mount_point = v;
            }
        }
        if let Some(p) = valid_port(patch.web_port) {
            self.web_port = p;
        }
        if let Some(v) = patch.node_state {
            self.node_state = v;
        }
        if let Some(wg) = patch.wireguard {
            if let Some(v) = wg.interface_name {
                if !v.is_empty() {
                    self.wireguard.interface_name = v;
                }
            }
            if let Some(v) = wg.private_key {
                self.wireguard.private_key = v;
            }
            if let Some(v) = wg.public_key {
                self.wireguard.public_key = v;
            }
            if let Some(v) = wg.wg_ip {
                if !v.is_empty() {
                    self.wireguard.wg_ip = v;
                }
            }
            if let Some(v) = wg.endpoint {
                self.wireguard.endpoint = v;
            }
            if let Some(p) = valid_port(wg.listen_port) {
                self.wireguard.listen_port = p;
            }
            if let Some(v) = wg.mtu {
                self.wireguard.mtu = v;
            }
        }
        if let Some(v) = patch.bootstrap_peers {
            self.bootstrap_peers = v
                .into_iter()
                .filter(|p| !p.is_empty())
                .take(MAX_BOOTSTRAP_PEERS)
                .collect();
        }
        if let Some(v) = patch.bootstrap_peers_updated_at {
            self.bootstrap_peers_updated_at = v;
        }
        if let Some(v) = patch.wg_peers {
            self.wg_peers = v
                .into_iter()
                .filter(WgPeer::is_complete)
                .take(MAX_WG_PEERS)
                .collect();
        }
        if let Some(v) = patch.wg_peers_updated_at {
            self.wg_peers_updated_at = v;
        }
        if let Some(v) = patch.data_mount_points {
            self.data_mount_points = v.into_iter().take(MAX_DATA_MOUNT_POINTS).collect();
        }
        if let Some(v) = patch.data_mount_points_updated_at {
            self.data_mount_points_updated_at = v;
        }
        if let Some(v) = patch.verbose {
            self.verbose = v;
        }
        if let Some(v) = patch.enable_fuse {
            self.enable_fuse = v;
        }
        if let Some(v) = patch.daemon_mode {
            self.daemon_mode = v;
        }
        self.sync_status_lengths();
    }
}

/// Process-wide configuration store: one mutex, snapshots out, atomic
/// persistence on every mutation.
pub struct ConfigStore {
    inner: Mutex<NodeConfig>,
    path: PathBuf,
}

impl ConfigStore {
    /// Defaults → overlay file values → ensure key pair → validate.
    pub fn init(path: &Path) -> Result<Self, ConfigError> {
        let mut config = NodeConfig::default();

        if path.exists() {
            let text = fs::read_to_string(path)?;
            let patch: ConfigPatch = serde_json::from_str(&text)?;
            config.apply_patch(patch);
            debug!(path = %path.display(), "loaded config file");
        } else {
            info!(path = %path.display(), "no config file, starting from defaults");
        }
        config.reparse_storage_size();

        ensure_wg_keys(&mut config, path)?;
        config.validate()?;

        let store = Self {
            inner: Mutex::new(config),
            path: path.to_path_buf(),
        };
        store.save()?;
        Ok(store)
    }

    /// Path of the backing config file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Immutable copy for handlers and the sync loop.
    pub fn snapshot(&self) -> NodeConfig {
        self.inner.lock().unwrap().clone()
    }

    /// Read under the lock without cloning.
    pub fn read<T>(&self, f: impl FnOnce(&NodeConfig) -> T) -> T {
        f(&self.inner.lock().unwrap())
    }

    /// Run a mutation under the lock and persist before releasing it.
    pub fn mutate<T>(&self, f: impl FnOnce(&mut NodeConfig) -> T) -> Result<T, ConfigError> {
        let mut guard = self.inner.lock().unwrap();
        let out = f(&mut guard);
        guard.sync_status_lengths();
        save_to(&guard, &self.path)?;
        Ok(out)
    }

    /// Mutation that only persists when the closure reports a change.
    /// Used by merge flows so no-op merges leave the file untouched.
    pub fn mutate_if(
        &self,
        f: impl FnOnce(&mut NodeConfig) -> bool,
    ) -> Result<bool, ConfigError> {
        let mut guard = self.inner.lock().unwrap();
        let changed = f(&mut guard);
        guard.sync_status_lengths();
        if changed {
            save_to(&guard, &self.path)?;
        }
        Ok(changed)
    }

    /// Mutation that must not hit the disk (advisory status updates).
    pub fn mutate_volatile<T>(&self, f: impl FnOnce(&mut NodeConfig) -> T) -> T {
        let mut guard = self.inner.lock().unwrap();
        let out = f(&mut guard);
        guard.sync_status_lengths();
        out
    }

    /// Explicit save of the current state.
    pub fn save(&self) -> Result<(), ConfigError> {
        save_to(&self.inner.lock().unwrap(), &self.path)
    }
}

/// Serialize to `<path>.tmp`, fsync, rename.
fn save_to(config: &NodeConfig, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("json.tmp");
    let text = serde_json::to_string_pretty(config)?;
    let mut file = File::create(&tmp)?;
    file.write_all(text.as_bytes())?;
    file.sync_all()?;
    drop(file);
    if let Err(err) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(err.into());
    }
    Ok(())
}

/// Path of the key file belonging to a config file: `private.key` next to
/// the config, falling back under the primary data dir when the config has
/// no usable parent.
pub fn key_file_path(config_path: &Path, config: &NodeConfig) -> PathBuf {
    match config_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.join(keys::KEY_FILE_NAME),
        _ => config.primary_data_dir().join(keys::KEY_FILE_NAME),
    }
}

/// Load `private.key` if present; else adopt the in-memory private key when
/// valid; else generate. Always recompute the public key from the effective
/// private key and write the key file back when it changed.
pub fn ensure_wg_keys(config: &mut NodeConfig, config_path: &Path) -> Result<(), ConfigError> {
    let key_path = key_file_path(config_path, config);

    let effective_private = if let Some(from_file) = keys::read_key_file(&key_path) {
        if !keys::is_valid_key(&from_file) {
            warn!(path = %key_path.display(), "key file contents invalid, regenerating");
            keys::generate_keypair().0
        } else {
            from_file
        }
    } else if keys::is_valid_key(&config.wireguard.private_key) {
        config.wireguard.private_key.clone()
    } else {
        info!("generating new overlay keypair");
        keys::generate_keypair().0
    };

    let public = keys::derive_public_key(&effective_private)?;

    if keys::read_key_file(&key_path).as_deref() != Some(effective_private.as_str()) {
        keys::write_key_file(&key_path, &effective_private)?;
    }

    config.wireguard.private_key = effective_private;
    config.wireguard.public_key = public;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(key: &str, ip: &str) -> WgPeer {
        WgPeer {
            public_key: key.to_string(),
            wg_ip: ip.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_defaults_validate() {
        let config = NodeConfig::default();
        config.validate().unwrap();
        assert_eq!(config.max_storage_bytes, 10u64 << 30);
    }

    #[test]
    fn test_upsert_inserts_then_updates_in_place() {
        let mut config = NodeConfig::default();
        assert_eq!(config.upsert_peer(peer("k1", "10.99.0.2")), UpsertOutcome::Changed);
        assert_eq!(config.upsert_peer(peer("k1", "10.99.0.2")), UpsertOutcome::Unchanged);

        let mut updated = peer("k1", "10.99.0.2");
        updated.endpoint = "example.com:51820".to_string();
        assert_eq!(config.upsert_peer(updated), UpsertOutcome::Changed);
        assert_eq!(config.wg_peers.len(), 1);
        assert_eq!(config.wg_peers[0].endpoint, "example.com:51820");
    }

    #[test]
    fn test_upsert_incomplete_peer_is_noop() {
        let mut config = NodeConfig::default();
        assert_eq!(config.upsert_peer(WgPeer::default()), UpsertOutcome::Unchanged);
        assert!(config.wg_peers.is_empty());
    }

    #[test]
    fn test_upsert_full_list() {
        let mut config = NodeConfig::default();
        for i in 0..MAX_WG_PEERS {
            let outcome = config.upsert_peer(peer(&format!("k{i}"), &format!("10.99.0.{i}")));
            assert_eq!(outcome, UpsertOutcome::Changed);
        }
        assert_eq!(
            config.upsert_peer(peer("overflow", "10.99.1.1")),
            UpsertOutcome::Full
        );
    }

    #[test]
    fn test_set_peers_drops_empty_identities() {
        let mut config = NodeConfig::default();
        config.set_peers(vec![peer("k1", "10.99.0.2"), WgPeer::default()]);
        assert_eq!(config.wg_peers.len(), 1);
        assert_eq!(config.wg_peers[0].status, PeerStatus::Connecting);
    }

    #[test]
    fn test_bootstrap_bounds() {
        let mut config = NodeConfig::default();
        for i in 0..MAX_BOOTSTRAP_PEERS {
            config
                .add_bootstrap_peer(&format!("host{i}:51820"))
                .unwrap();
        }
        assert!(matches!(
            config.add_bootstrap_peer("one-more:51820"),
            Err(ConfigError::ListFull(_))
        ));
        assert!(matches!(
            config.add_bootstrap_peer("no-port"),
            Err(ConfigError::InvalidEndpoint(_))
        ));
    }

    #[test]
    fn test_parse_endpoint() {
        assert_eq!(
            parse_endpoint("example.com:51820").unwrap(),
            ("example.com".to_string(), 51820)
        );
        assert_eq!(
            parse_endpoint("[fd44::1]:51820").unwrap(),
            ("fd44::1".to_string(), 51820)
        );
        assert!(parse_endpoint("nohost:").is_err());
        assert!(parse_endpoint(":51820").is_err());
        assert!(parse_endpoint("host:0").is_err());
    }

    #[test]
    fn test_validate_rejects_bad_states() {
        let mut config = NodeConfig::default();
        config.web_port = 0;
        assert!(config.validate().is_err());

        let mut config = NodeConfig::default();
        config.storage_size = "banana".to_string();
        assert!(config.validate().is_err());

        let mut config = NodeConfig::default();
        config.mount_point.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_patch_keeps_prior_on_out_of_range() {
        let mut config = NodeConfig::default();
        let patch: ConfigPatch = serde_json::from_str(
            r#"{"web_port": 0, "wireguard": {"listen_port": 700000}, "storage_size": "xyz"}"#,
        )
        .unwrap();
        config.apply_patch(patch);
        assert_eq!(config.web_port, DEFAULT_WEB_PORT);
        assert_eq!(config.wireguard.listen_port, DEFAULT_WG_PORT);
        assert_eq!(config.storage_size, DEFAULT_STORAGE_SIZE);
    }

    #[test]
    fn test_patch_ignores_unknown_fields() {
        let mut config = NodeConfig::default();
        let patch: ConfigPatch =
            serde_json::from_str(r#"{"future_field": true, "web_port": 9000}"#).unwrap();
        config.apply_patch(patch);
        assert_eq!(config.web_port, 9000);
    }

    #[test]
    fn test_peer_web_port_fallback() {
        let config = NodeConfig::default();
        let mut p = peer("k", "10.99.0.9");
        assert_eq!(config.peer_web_port(&p), DEFAULT_WEB_PORT);
        p.web_port = 9999;
        assert_eq!(config.peer_web_port(&p), 9999);
    }
}
