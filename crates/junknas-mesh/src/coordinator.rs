//! Background mesh loop.
//!
//! One task per process. Every cycle: refresh the advertised endpoint from
//! a public-IP probe (at most once a minute), push state to every known
//! peer, and reprogram the WireGuard device when the peer set advanced.
//! Shutdown cancels the pending sleep instead of waiting it out.

use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use junknas_config::ConfigStore;
use tokio::sync::watch;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::sync::SyncClient;
use crate::wireguard::WgDevice;

const SYNC_INTERVAL: Duration = Duration::from_secs(5);
const IP_PROBE_INTERVAL: Duration = Duration::from_secs(60);
const DEFAULT_IP_ECHO_URL: &str = "https://api.ipify.org";

/// Shared mesh flags, readable from the web service.
#[derive(Default)]
pub struct MeshHandle {
    active: AtomicBool,
    standalone: AtomicBool,
}

impl MeshHandle {
    /// True once any peer is configured.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Relaxed)
    }

    /// True when neither bootstrap peers nor WG peers are configured.
    pub fn is_standalone(&self) -> bool {
        self.standalone.load(Ordering::Relaxed)
    }
}

pub struct MeshCoordinator {
    store: Arc<ConfigStore>,
    client: SyncClient,
    handle: Arc<MeshHandle>,
    shutdown: watch::Receiver<bool>,
}

impl MeshCoordinator {
    pub fn new(store: Arc<ConfigStore>, shutdown: watch::Receiver<bool>) -> Self {
        Self {
            store,
            client: SyncClient::new(),
            handle: Arc::new(MeshHandle::default()),
            shutdown,
        }
    }

    /// Shared flags for the web layer.
    pub fn handle(&self) -> Arc<MeshHandle> {
        self.handle.clone()
    }

    pub async fn run(mut self) {
        info!("mesh coordinator started");
        self.register_local_mount();

        let mut last_probe: Option<Instant> = None;
        let mut last_applied_stamp: u64 = 0;

        loop {
            if last_probe.is_none_or(|t| t.elapsed() >= IP_PROBE_INTERVAL) {
                last_probe = Some(Instant::now());
                self.refresh_endpoint().await;
            }

            let synced = self.client.sync_round(&self.store).await;

            let snapshot = self.store.snapshot();
            let has_peers = !snapshot.wg_peers.is_empty();
            let has_bootstrap = !snapshot.bootstrap_peers.is_empty();
            self.handle.active.store(has_peers, Ordering::Relaxed);
            self.handle
                .standalone
                .store(!has_peers && !has_bootstrap, Ordering::Relaxed);

            if snapshot.wg_peers_updated_at > last_applied_stamp {
                match WgDevice::apply(&snapshot) {
                    Ok(()) => last_applied_stamp = snapshot.wg_peers_updated_at,
                    Err(err) => warn!(%err, "wireguard apply failed, retrying next cycle"),
                }
            }

            debug!(synced, peers = snapshot.wg_peers.len(), "mesh cycle complete");

            tokio::select! {
                _ = sleep(SYNC_INTERVAL) => {}
                changed = self.shutdown.changed() => {
                    if changed.is_err() || *self.shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("mesh coordinator stopped");
    }

    /// Advertise this node's own mount point to the mesh.
    fn register_local_mount(&self) {
        let result = self.store.mutate_if(|config| {
            let mount_point = config.mount_point.clone();
            if config.data_mount_points.contains(&mount_point) {
                return false;
            }
            if config.add_mount_point(&mount_point).is_err() {
                return false;
            }
            config.data_mount_points_updated_at = junknas_config::now_epoch();
            true
        });
        if let Err(err) = result {
            warn!(%err, "failed to register local mount point");
        }
    }

    /// Probe the public IP and rewrite `wg.endpoint` when it drifted.
    /// A DNS-name endpoint is the operator's choice and is never touched.
    async fn refresh_endpoint(&self) {
        let (current_endpoint, listen_port) = self.store.read(|config| {
            (
                config.wireguard.endpoint.clone(),
                config.wireguard.listen_port,
            )
        });

        if !endpoint_is_refreshable(&current_endpoint) {
            return;
        }
        let Some(public_ip) = self.probe_public_ip().await else {
            return;
        };
        if !endpoint_needs_update(&current_endpoint, &public_ip) {
            return;
        }

        let endpoint = format!("{public_ip}:{listen_port}");
        info!(%endpoint, "advertised endpoint updated from public-IP probe");
        let result = self.store.mutate(|config| {
            config.wireguard.endpoint = endpoint;
        });
        if let Err(err) = result {
            warn!(%err, "failed to persist endpoint update");
        }
    }

    async fn probe_public_ip(&self) -> Option<String> {
        let response = self
            .client_for_probe()
            .get(DEFAULT_IP_ECHO_URL)
            .send()
            .await
            .ok()?;
        if !response.status().is_success() {
            return None;
        }
        let text = response.text().await.ok()?;
        let trimmed = text.trim();
        trimmed.parse::<Ipv4Addr>().ok()?;
        Some(trimmed.to_string())
    }

    fn client_for_probe(&self) -> reqwest::Client {
        reqwest::Client::builder()
            .timeout(Duration::from_secs(3))
            .build()
            .expect("reqwest client")
    }
}

/// An endpoint may be rewritten by the probe iff it is unset or its host
/// part is a literal IPv4 address. DNS names belong to the operator.
fn endpoint_is_refreshable(endpoint: &str) -> bool {
    match endpoint.rsplit_once(':') {
        None => endpoint.is_empty(),
        Some((host, _)) => host.is_empty() || host.parse::<Ipv4Addr>().is_ok(),
    }
}

/// Whether the probed address differs from what is currently advertised.
fn endpoint_needs_update(endpoint: &str, probed_ip: &str) -> bool {
    endpoint.rsplit_once(':').map(|(host, _)| host) != Some(probed_ip)
}
