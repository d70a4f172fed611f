//! Bootstrap peer list editing against the config store.

use anyhow::{Context, Result};
use clap::Subcommand;
use junknas_config::{now_epoch, parse_endpoint, ConfigStore};

#[derive(Subcommand)]
pub enum BootstrapAction {
    /// Print the configured bootstrap peers.
    List,
    /// Append a bootstrap peer endpoint.
    Add { endpoint: String },
    /// Remove the bootstrap peer at an index.
    Delete { index: usize },
    /// Replace the bootstrap peer at an index.
    Edit { index: usize, endpoint: String },
}

pub fn run_bootstrap_peers(store: &ConfigStore, action: BootstrapAction) -> Result<()> {
    match action {
        BootstrapAction::List => {
            for (index, endpoint) in
                store.read(|c| c.bootstrap_peers.clone()).iter().enumerate()
            {
                println!("{index}: {endpoint}");
            }
            Ok(())
        }
        BootstrapAction::Add { endpoint } => {
            store.mutate(|config| {
                config.add_bootstrap_peer(&endpoint)?;
                config.bootstrap_peers_updated_at = now_epoch();
                Ok::<(), junknas_config::ConfigError>(())
            })??;
            Ok(())
        }
        BootstrapAction::Delete { index } => {
            store.mutate(|config| {
                if index >= config.bootstrap_peers.len() {
                    anyhow::bail!("index {index} out of range");
                }
                config.bootstrap_peers.remove(index);
                if index < config.bootstrap_status.len() {
                    config.bootstrap_status.remove(index);
                }
                config.bootstrap_peers_updated_at = now_epoch();
                Ok(())
            })??;
            Ok(())
        }
        BootstrapAction::Edit { index, endpoint } => {
            parse_endpoint(&endpoint).context("invalid endpoint")?;
            store.mutate(|config| {
                if index >= config.bootstrap_peers.len() {
                    anyhow::bail!("index {index} out of range");
                }
                config.bootstrap_peers[index] = endpoint.clone();
                config.bootstrap_peers_updated_at = now_epoch();
                Ok(())
            })??;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use junknas_config::NodeConfig;
    use tempfile::TempDir;

    fn store_in(dir: &TempDir) -> ConfigStore {
        let mut config = NodeConfig::default();
        config.data_dir = dir.path().join("data").display().to_string();
        config.mount_point = dir.path().join("mnt").display().to_string();
        let path = dir.path().join("config.json");
        std::fs::write(&path, serde_json::to_string(&config).unwrap()).unwrap();
        ConfigStore::init(&path).unwrap()
    }

    fn peers(store: &ConfigStore) -> Vec<String> {
        store.read(|c| c.bootstrap_peers.clone())
    }

    #[test]
    fn test_add_then_list() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);

        run_bootstrap_peers(
            &store,
            BootstrapAction::Add {
                endpoint: "hub.example:51820".into(),
            },
        )
        .unwrap();
        assert_eq!(peers(&store), vec!["hub.example:51820"]);
        assert!(store.read(|c| c.bootstrap_peers_updated_at) > 0);
    }

    #[test]
    fn test_add_rejects_bad_endpoint() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);

        let result = run_bootstrap_peers(
            &store,
            BootstrapAction::Add {
                endpoint: "no-port".into(),
            },
        );
        assert!(result.is_err());
        assert!(peers(&store).is_empty());
    }

    #[test]
    fn test_delete_and_edit() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        for endpoint in ["a.example:1111", "b.example:2222", "c.example:3333"] {
            run_bootstrap_peers(
                &store,
                BootstrapAction::Add {
                    endpoint: endpoint.into(),
                },
            )
            .unwrap();
        }

        run_bootstrap_peers(&store, BootstrapAction::Delete { index: 1 }).unwrap();
        assert_eq!(peers(&store), vec!["a.example:1111", "c.example:3333"]);

        run_bootstrap_peers(
            &store,
            BootstrapAction::Edit {
                index: 1,
                endpoint: "d.example:4444".into(),
            },
        )
        .unwrap();
        assert_eq!(peers(&store), vec!["a.example:1111", "d.example:4444"]);
    }

    #[test]
    fn test_out_of_range_index_fails() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);

        assert!(run_bootstrap_peers(&store, BootstrapAction::Delete { index: 0 }).is_err());
        assert!(run_bootstrap_peers(
            &store,
            BootstrapAction::Edit {
                index: 5,
                endpoint: "x.example:1111".into(),
            },
        )
        .is_err());
    }

    #[test]
    fn test_edits_persist_across_reloads() {
        let dir = TempDir::new().unwrap();
        let path = {
            let store = store_in(&dir);
            run_bootstrap_peers(
                &store,
                BootstrapAction::Add {
                    endpoint: "hub.example:51820".into(),
                },
            )
            .unwrap();
            store.path().to_path_buf()
        };

        let reloaded = ConfigStore::init(&path).unwrap();
        assert_eq!(peers(&reloaded), vec!["hub.example:51820"]);
    }
}
