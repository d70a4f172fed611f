//! WireGuard device programming.
//!
//! The stored peer list is the single source of truth: each apply renders a
//! full configuration (interface private key + listen port, one `[Peer]`
//! block per stored peer) and hands it to `wg syncconf`, which replaces the
//! device's peer set in one step.

use std::io::Write;
use std::process::Command;

use junknas_config::NodeConfig;
use tracing::{debug, info, warn};

use crate::MeshError;

pub struct WgDevice;

impl WgDevice {
    /// Render the `wg syncconf` document for a config snapshot.
    pub fn render_sync_conf(config: &NodeConfig) -> String {
        let mut out = String::new();
        out.push_str("[Interface]\n");
        out.push_str(&format!("PrivateKey = {}\n", config.wireguard.private_key));
        out.push_str(&format!("ListenPort = {}\n", config.wireguard.listen_port));

        for peer in &config.wg_peers {
            out.push_str("\n[Peer]\n");
            out.push_str(&format!("PublicKey = {}\n", peer.public_key));
            if !peer.preshared_key.is_empty() {
                out.push_str(&format!("PresharedKey = {}\n", peer.preshared_key));
            }
            out.push_str(&format!("AllowedIPs = {}/32\n", peer.wg_ip));
            if !peer.endpoint.is_empty() {
                out.push_str(&format!("Endpoint = {}\n", peer.endpoint));
            }
            if peer.persistent_keepalive != 0 {
                out.push_str(&format!(
                    "PersistentKeepalive = {}\n",
                    peer.persistent_keepalive
                ));
            }
        }
        out
    }

    /// Program the device from a config snapshot. Called from the mesh
    /// loop only, so there is never more than one apply in flight.
    pub fn apply(config: &NodeConfig) -> Result<(), MeshError> {
        let iface = &config.wireguard.interface_name;
        let document = Self::render_sync_conf(config);

        let mut conf = tempfile::NamedTempFile::new()?;
        conf.write_all(document.as_bytes())?;
        conf.flush()?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(conf.path(), std::fs::Permissions::from_mode(0o600))?;
        }

        let output = Command::new("wg")
            .arg("syncconf")
            .arg(iface)
            .arg(conf.path())
            .output()?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            warn!(%iface, %stderr, "wg syncconf failed");
            return Err(MeshError::WgCommand(stderr));
        }

        if config.wireguard.mtu != 0 {
            let output = Command::new("ip")
                .args(["link", "set", "dev"])
                .arg(iface)
                .arg("mtu")
                .arg(config.wireguard.mtu.to_string())
                .output()?;
            if !output.status.success() {
                debug!(%iface, mtu = config.wireguard.mtu, "mtu update failed");
            }
        }

        info!(%iface, peers = config.wg_peers.len(), "programmed wireguard device");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use junknas_config::WgPeer;

    #[test]
    fn test_render_full_document() {
        let mut config = NodeConfig::default();
        config.wireguard.private_key = "PRIV".into();
        config.wireguard.listen_port = 51820;
        config.wg_peers.push(WgPeer {
            public_key: "PEER_A".into(),
            wg_ip: "10.99.0.2".into(),
            endpoint: "a.example:51820".into(),
            persistent_keepalive: 25,
            ..Default::default()
        });
        config.wg_peers.push(WgPeer {
            public_key: "PEER_B".into(),
            wg_ip: "10.99.0.3".into(),
            preshared_key: "PSK".into(),
            ..Default::default()
        });

        let doc = WgDevice::render_sync_conf(&config);
        assert!(doc.starts_with("[Interface]\nPrivateKey = PRIV\nListenPort = 51820\n"));
        assert_eq!(doc.matches("[Peer]").count(), 2);
        assert!(doc.contains("AllowedIPs = 10.99.0.2/32\n"));
        assert!(doc.contains("Endpoint = a.example:51820\n"));
        assert!(doc.contains("PersistentKeepalive = 25\n"));
        assert!(doc.contains("PresharedKey = PSK\n"));
        // Peer B has no endpoint and no keepalive: those lines are absent
        // in its block.
        let b_block = doc.split("[Peer]").nth(2).unwrap();
        assert!(!b_block.contains("Endpoint"));
        assert!(!b_block.contains("PersistentKeepalive"));
    }
}
