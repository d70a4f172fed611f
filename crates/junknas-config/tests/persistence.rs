//! Config store persistence behavior: round-trips, clocks, key handling.

use junknas_config::{
    ensure_wg_keys, key_file_path, keys, now_epoch, ConfigStore, NodeConfig, PeerStatus,
    UpsertOutcome, WgPeer,
};
use tempfile::TempDir;

fn test_config(dir: &TempDir) -> NodeConfig {
    let mut config = NodeConfig::default();
    config.data_dir = dir.path().join("data").display().to_string();
    config.mount_point = dir.path().join("mnt").display().to_string();
    config
}

fn write_config(dir: &TempDir, config: &NodeConfig) -> std::path::PathBuf {
    let path = dir.path().join("config.json");
    std::fs::write(&path, serde_json::to_string_pretty(config).unwrap()).unwrap();
    path
}

#[test]
fn test_init_creates_keys_and_persists() {
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, &test_config(&dir));

    let store = ConfigStore::init(&path).unwrap();
    let snapshot = store.snapshot();

    assert!(!snapshot.wireguard.private_key.is_empty());
    assert_eq!(
        keys::derive_public_key(&snapshot.wireguard.private_key).unwrap(),
        snapshot.wireguard.public_key
    );

    // Key file written next to the config, containing the same key.
    let key_path = key_file_path(&path, &snapshot);
    assert_eq!(
        keys::read_key_file(&key_path),
        Some(snapshot.wireguard.private_key.clone())
    );

    // Config on disk reflects the derived public key.
    let reloaded = ConfigStore::init(&path).unwrap().snapshot();
    assert_eq!(reloaded.wireguard.public_key, snapshot.wireguard.public_key);
}

#[test]
fn test_save_load_round_trip() {
    let dir = TempDir::new().unwrap();
    let mut config = test_config(&dir);
    config.storage_size = "2G".to_string();
    config.web_port = 9001;
    config.bootstrap_peers = vec!["peer.example:51820".to_string()];
    config.bootstrap_peers_updated_at = 1111;
    config.wg_peers = vec![WgPeer {
        public_key: "pk1".to_string(),
        wg_ip: "10.99.0.7".to_string(),
        endpoint: "peer.example:51820".to_string(),
        persistent_keepalive: 25,
        web_port: 8088,
        ..Default::default()
    }];
    config.wg_peers_updated_at = 2222;
    config.data_mount_points = vec!["/mnt/junknas".to_string()];
    config.data_mount_points_updated_at = 3333;
    let path = write_config(&dir, &config);

    let store = ConfigStore::init(&path).unwrap();
    let loaded = store.snapshot();

    assert_eq!(loaded.storage_size, "2G");
    assert_eq!(loaded.max_storage_bytes, 2u64 << 30);
    assert_eq!(loaded.web_port, 9001);
    assert_eq!(loaded.bootstrap_peers, config.bootstrap_peers);
    assert_eq!(loaded.bootstrap_peers_updated_at, 1111);
    assert_eq!(loaded.wg_peers.len(), 1);
    assert_eq!(loaded.wg_peers[0].public_key, "pk1");
    assert_eq!(loaded.wg_peers[0].web_port, 8088);
    assert_eq!(loaded.wg_peers_updated_at, 2222);
    assert_eq!(loaded.data_mount_points_updated_at, 3333);

    // Reserialization is byte-identical once the key pair has settled.
    let first = std::fs::read_to_string(&path).unwrap();
    ConfigStore::init(&path).unwrap();
    let second = std::fs::read_to_string(&path).unwrap();
    assert_eq!(first, second);
}

#[test]
fn test_unknown_fields_tolerated() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    let path = dir.path().join("config.json");
    let mut value = serde_json::to_value(&config).unwrap();
    value["some_future_knob"] = serde_json::json!({"nested": true});
    std::fs::write(&path, serde_json::to_string(&value).unwrap()).unwrap();

    let store = ConfigStore::init(&path).unwrap();
    assert_eq!(store.snapshot().mount_point, config.mount_point);
}

#[test]
fn test_mutation_persists_before_returning() {
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, &test_config(&dir));
    let store = ConfigStore::init(&path).unwrap();

    let before = now_epoch();
    store
        .mutate(|config| {
            config.add_bootstrap_peer("hub.example:51820").unwrap();
            config.bootstrap_peers_updated_at = now_epoch();
        })
        .unwrap();

    // A second store reading the same file observes the mutation.
    let reloaded = ConfigStore::init(&path).unwrap().snapshot();
    assert_eq!(reloaded.bootstrap_peers, vec!["hub.example:51820"]);
    assert!(reloaded.bootstrap_peers_updated_at >= before);
}

#[test]
fn test_statuses_are_not_persisted() {
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, &test_config(&dir));
    let store = ConfigStore::init(&path).unwrap();

    store
        .mutate(|config| {
            config.add_bootstrap_peer("hub.example:51820").unwrap();
            let _ = config.upsert_peer(WgPeer {
                public_key: "pk".to_string(),
                wg_ip: "10.99.0.3".to_string(),
                ..Default::default()
            });
        })
        .unwrap();
    store.mutate_volatile(|config| {
        config.bootstrap_status[0] = PeerStatus::Connected;
        config.wg_peers[0].status = PeerStatus::Unreachable;
    });

    let reloaded = ConfigStore::init(&path).unwrap().snapshot();
    assert_eq!(reloaded.bootstrap_status[0], PeerStatus::Connecting);
    assert_eq!(reloaded.wg_peers[0].status, PeerStatus::Connecting);
}

#[test]
fn test_data_dirs_override_data_dir() {
    let dir = TempDir::new().unwrap();
    let mut config = test_config(&dir);

    // Without data_dirs the single data_dir is the one root.
    assert_eq!(
        config.backing_roots(),
        vec![std::path::PathBuf::from(&config.data_dir)]
    );

    config.data_dirs = vec![
        dir.path().join("r0").display().to_string(),
        dir.path().join("r1").display().to_string(),
    ];
    let roots = config.backing_roots();
    assert_eq!(roots.len(), 2);
    assert_eq!(config.primary_data_dir(), roots[0]);

    // Persisted and reloaded, the override survives.
    let path = write_config(&dir, &config);
    let loaded = ConfigStore::init(&path).unwrap().snapshot();
    assert_eq!(loaded.backing_roots(), roots);
}

#[test]
fn test_ensure_wg_keys_adopts_config_key() {
    let dir = TempDir::new().unwrap();
    let (private, public) = keys::generate_keypair();
    let mut config = test_config(&dir);
    config.wireguard.private_key = private.clone();
    let path = dir.path().join("config.json");

    ensure_wg_keys(&mut config, &path).unwrap();
    assert_eq!(config.wireguard.private_key, private);
    assert_eq!(config.wireguard.public_key, public);
}

#[test]
fn test_ensure_wg_keys_prefers_key_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.json");
    let (file_private, file_public) = keys::generate_keypair();
    keys::write_key_file(&dir.path().join(keys::KEY_FILE_NAME), &file_private).unwrap();

    let (other_private, _) = keys::generate_keypair();
    let mut config = test_config(&dir);
    config.wireguard.private_key = other_private;

    ensure_wg_keys(&mut config, &path).unwrap();
    assert_eq!(config.wireguard.private_key, file_private);
    assert_eq!(config.wireguard.public_key, file_public);
}

#[test]
fn test_upsert_then_clock_bump_is_monotonic() {
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, &test_config(&dir));
    let store = ConfigStore::init(&path).unwrap();

    let mut last = 0u64;
    for i in 0..3 {
        let stamp = store
            .mutate(|config| {
                let outcome = config.upsert_peer(WgPeer {
                    public_key: format!("pk{i}"),
                    wg_ip: format!("10.99.0.{}", i + 2),
                    ..Default::default()
                });
                assert_eq!(outcome, UpsertOutcome::Changed);
                config.wg_peers_updated_at = now_epoch().max(config.wg_peers_updated_at);
                config.wg_peers_updated_at
            })
            .unwrap();
        assert!(stamp >= last);
        last = stamp;
    }
}
