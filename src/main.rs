//! # TaskMesh — clustered job scheduler node
//!
//! Joins the cluster registry, verifies every known peer, then runs the
//! scheduler loop and the periodic health sweep.
//!
//! Usage:
//!   taskmesh                          # ~/.taskmesh/config.toml
//!   taskmesh --config node-b.toml     # Explicit config file
//!   taskmesh --port 2307 --cluster-port 12307

mod catalog;
mod node;

use anyhow::Result;
use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use taskmesh_cluster::{ClusterCoordinator, HttpPeerClient, SqliteRegistry, spawn_health_sweeper};
use taskmesh_core::TaskMeshConfig;
use taskmesh_core::config::expand_path;
use taskmesh_scheduler::{SchedulerEngine, SqliteRunHistory, spawn_scheduler};

use crate::node::NodeControl;

#[derive(Parser)]
#[command(name = "taskmesh", version, about = "⏱️ TaskMesh — clustered job scheduler node")]
struct Cli {
    /// Config file (default: ~/.taskmesh/config.toml)
    #[arg(short, long)]
    config: Option<String>,

    /// Main API port, part of this node's cluster identity
    #[arg(short, long)]
    port: Option<u16>,

    /// Port for peer control calls
    #[arg(long)]
    cluster_port: Option<u16>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "taskmesh=debug,taskmesh_cluster=debug,taskmesh_scheduler=debug,tower_http=debug"
    } else {
        "taskmesh=info,taskmesh_cluster=info,taskmesh_scheduler=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_target(false)
        .init();

    let mut config = match &cli.config {
        Some(path) => TaskMeshConfig::load_from(&expand_path(path))?,
        None => TaskMeshConfig::load()?,
    };
    if let Some(port) = cli.port {
        config.node.port = port;
    }
    if let Some(port) = cli.cluster_port {
        config.node.cluster_port = port;
    }

    let identity = config.node.identity();
    tracing::info!(
        "⏱️ TaskMesh v{} node {} (instance {})",
        env!("CARGO_PKG_VERSION"),
        identity.key(),
        identity.instance_id
    );

    let history = Arc::new(SqliteRunHistory::open(&expand_path(&config.scheduler.history_path))?);
    let mut engine =
        SchedulerEngine::new(config.scheduler.clone(), catalog::builtin_catalog()).with_history(history);

    let coordinator = if config.cluster.enabled {
        let registry = Arc::new(SqliteRegistry::open(&expand_path(&config.cluster.registry_path))?);
        let client = Arc::new(HttpPeerClient::new(config.cluster.probe_timeout()));
        let coordinator = Arc::new(ClusterCoordinator::from_config(
            identity.clone(),
            registry,
            client,
            &config.cluster,
        ));
        engine = engine.with_cluster(coordinator.clone());
        Some(coordinator)
    } else {
        tracing::info!("🔕 Clustering disabled, running standalone");
        None
    };

    let engine = Arc::new(engine);
    let jobs_file = expand_path(&config.scheduler.jobs_dir).join("jobs.toml");
    for def in catalog::load_jobs_file(&jobs_file)? {
        engine.add_job(def)?;
    }

    // A duplicate live identity aborts before anything is served.
    if let Some(coordinator) = &coordinator {
        coordinator.join()?;
    }

    let control = Arc::new(NodeControl::new(engine.clone()));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let addr = SocketAddr::from(([0, 0, 0, 0], identity.cluster_port));
    let server = tokio::spawn(taskmesh_cluster::server::serve(
        control.clone(),
        addr,
        shutdown_rx.clone(),
    ));

    let ready = match &coordinator {
        Some(coordinator) => match coordinator.verify_startup().await {
            Ok(report) => {
                tracing::info!("✅ Startup check passed: {} live peer(s)", report.live.len().saturating_sub(1));
                true
            }
            Err(e) => {
                tracing::error!("❌ {e}. Staying in standby; the scheduler will not start.");
                control.enter_standby();
                false
            }
        },
        None => true,
    };

    if ready {
        tokio::spawn(spawn_scheduler(
            engine.clone(),
            std::time::Duration::from_secs(config.scheduler.tick_interval_secs.max(1)),
            shutdown_rx.clone(),
        ));
        if let Some(coordinator) = &coordinator {
            let sweeper = spawn_health_sweeper(
                coordinator.clone(),
                config.cluster.checkin_interval(),
                shutdown_rx.clone(),
            );
            let control = control.clone();
            tokio::spawn(async move {
                // another live instance owns our identity now
                if let Err(e) = sweeper.await {
                    tracing::error!("❌ {e}. Entering standby.");
                    control.enter_standby();
                }
            });
        }
    }

    tokio::signal::ctrl_c().await?;
    tracing::info!("👋 Shutting down");
    shutdown_tx.send(true).ok();

    if let Some(coordinator) = &coordinator {
        if let Err(e) = coordinator.leave() {
            tracing::warn!("⚠️ Failed to leave cluster registry: {e}");
        }
    }
    match server.await {
        Ok(Err(e)) => tracing::warn!("⚠️ {e}"),
        Err(e) => tracing::warn!("⚠️ Control server task failed: {e}"),
        Ok(Ok(())) => {}
    }
    Ok(())
}
