//! junkNAS node daemon and admin CLI.
//!
//! Usage:
//!   junknas <config.json>                 run the node (mesh + web + fuse)
//!   junknas <config.json> bootstrap-peers list
//!   junknas <config.json> bootstrap-peers add <ip:port>
//!   junknas <config.json> bootstrap-peers delete <index>
//!   junknas <config.json> bootstrap-peers edit <index> <ip:port>
//!
//! Exit codes: 0 success, 1 operational error, 2 usage error.

mod commands;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use commands::{run_bootstrap_peers, BootstrapAction};
use junknas_config::ConfigStore;
use junknas_fuse::JunkFs;
use junknas_mesh::{MeshCoordinator, SyncClient};
use junknas_store::ChunkStore;
use junknas_web::{serve_in_background, AppState};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "junknas")]
#[command(about = "Distributed mesh-native chunk filesystem node", long_about = None)]
struct Cli {
    /// Path to the node's JSON config file.
    config: PathBuf,

    /// Verbose startup logging (overrides the config's `verbose` flag).
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Edit the bootstrap peer list.
    #[command(name = "bootstrap-peers")]
    BootstrapPeers {
        #[command(subcommand)]
        action: BootstrapAction,
    },
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let store = match ConfigStore::init(&cli.config) {
        Ok(store) => Arc::new(store),
        Err(err) => {
            // Tracing is not up yet for config-load failures.
            eprintln!("junknas: failed to load config {}: {err}", cli.config.display());
            return ExitCode::from(1);
        }
    };

    init_tracing(cli.verbose || store.read(|c| c.verbose));

    let result = match cli.command {
        Some(Commands::BootstrapPeers { action }) => run_bootstrap_peers(&store, action),
        None => run_node(store),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err:#}");
            ExitCode::from(1)
        }
    }
}

/// Run the node: mesh loop, web server, then the FUSE mount; tear down in
/// reverse order on ctrl-c.
fn run_node(store: Arc<ConfigStore>) -> Result<()> {
    let runtime = tokio::runtime::Runtime::new().context("failed to start runtime")?;
    runtime.block_on(async move {
        let snapshot = store.snapshot();
        if snapshot.daemon_mode {
            info!("daemon_mode set; expecting a service manager to supervise this process");
        }

        let chunks = Arc::new(
            ChunkStore::open(snapshot.backing_roots(), snapshot.max_storage_bytes)
                .context("failed to open chunk store")?,
        );

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        // Mesh first: peers and the WireGuard device come up before any
        // traffic can arrive.
        let coordinator = MeshCoordinator::new(store.clone(), shutdown_rx.clone());
        let mesh_handle = coordinator.handle();
        let mesh_task = tokio::spawn(coordinator.run());

        // Web next.
        let state = AppState {
            store: store.clone(),
            chunks: chunks.clone(),
            mesh: mesh_handle,
            sync: SyncClient::new(),
        };
        let addr: SocketAddr = ([0, 0, 0, 0], snapshot.web_port).into();
        serve_in_background(state, addr, shutdown_rx.clone()).await?;

        // Filesystem last.
        let mut fuse_session = None;
        if snapshot.enable_fuse {
            let fs = Arc::new(JunkFs::new(chunks.clone()).context("failed to open filesystem")?);
            let mountpoint = PathBuf::from(&snapshot.mount_point);
            match junknas_fuse::mount(fs, &mountpoint) {
                Ok(session) => fuse_session = Some(session),
                Err(err) => {
                    warn!(%err, mountpoint = %mountpoint.display(), "fuse mount failed, continuing without it");
                }
            }
        } else {
            info!("fuse disabled by config");
        }

        info!("node running; ctrl-c to stop");
        tokio::signal::ctrl_c().await.context("signal handler")?;
        info!("shutting down");

        // Reverse order: unmount, then stop web and mesh together.
        drop(fuse_session);
        let _ = shutdown_tx.send(true);
        let _ = mesh_task.await;
        Ok(())
    })
}
