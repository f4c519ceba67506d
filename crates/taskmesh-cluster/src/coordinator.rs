//! Cluster coordinator — join, health sweeps, conflict detection and the
//! cluster-wide control fan-out.
//!
//! Eviction is decided by any single observer: a peer that fails every probe
//! attempt is deleted immediately. Concurrent evictions by several nodes are
//! harmless because deletes are idempotent on (host, port).

use chrono::{DateTime, Utc};
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use crate::probe::{HealthProbe, PeerError};
use crate::registry::{ClusterRegistry, NodeRecord};
use taskmesh_core::config::ClusterConfig;
use taskmesh_core::error::{Result, TaskMeshError};
use taskmesh_core::identity::{JobKey, NodeIdentity, NodeKey};

/// Outcome of one health sweep.
#[derive(Debug, Default, Clone)]
pub struct HealthReport {
    /// Nodes that are live after the sweep, self included.
    pub live: Vec<NodeKey>,
    /// Peers removed from the registry, with the last probe error.
    pub evicted: Vec<(NodeKey, PeerError)>,
}

impl HealthReport {
    /// Evicted peers whose control server answered but refused the probe.
    pub fn unhealthy_peers(&self) -> Vec<&NodeKey> {
        self.evicted
            .iter()
            .filter(|(_, e)| e.is_reachable())
            .map(|(k, _)| k)
            .collect()
    }
}

pub struct ClusterCoordinator {
    identity: NodeIdentity,
    registry: Arc<dyn ClusterRegistry>,
    probe: HealthProbe,
    /// checkin interval + tolerance.
    liveness_window: Duration,
}

impl ClusterCoordinator {
    pub fn new(
        identity: NodeIdentity,
        registry: Arc<dyn ClusterRegistry>,
        probe: HealthProbe,
        liveness_window: Duration,
    ) -> Self {
        Self {
            identity,
            registry,
            probe,
            liveness_window,
        }
    }

    pub fn from_config(
        identity: NodeIdentity,
        registry: Arc<dyn ClusterRegistry>,
        client: Arc<dyn crate::probe::PeerClient>,
        config: &ClusterConfig,
    ) -> Self {
        let probe = HealthProbe::new(client, config.probe_attempts, config.probe_backoff());
        Self::new(identity, registry, probe, config.liveness_window())
    }

    pub fn identity(&self) -> &NodeIdentity {
        &self.identity
    }

    /// Fail if another live instance holds this node's (host, port).
    pub fn detect_conflict(&self, now: DateTime<Utc>) -> Result<()> {
        let Some(existing) = self.registry.get_node(&self.identity.key())? else {
            return Ok(());
        };
        if existing.instance_id != self.identity.instance_id
            && existing.is_live(now, self.liveness_window)
        {
            tracing::error!(
                node = %self.identity.key(),
                other_instance = %existing.instance_id,
                health_gap_secs = existing.health_gap(now).num_seconds(),
                "❌ Node identity is held by another live instance"
            );
            return Err(TaskMeshError::IdentityConflict {
                node: self.identity.key().to_string(),
                instance_id: existing.instance_id,
            });
        }
        Ok(())
    }

    /// Register this process. A stale row for the same (host, port) belongs
    /// to a prior incarnation and is overwritten.
    pub fn join(&self) -> Result<NodeRecord> {
        let now = Utc::now();
        self.detect_conflict(now)?;

        let record = NodeRecord::joining(&self.identity, now);
        match self.registry.get_node(&record.key())? {
            Some(previous) => tracing::info!(
                node = %record.key(),
                previous_instance = %previous.instance_id,
                "🔄 Rejoining cluster, replacing prior incarnation"
            ),
            None => tracing::info!(node = %record.key(), "🤝 Joining cluster"),
        }
        self.registry.upsert_node(&record)?;
        Ok(record)
    }

    /// Remove this node's row on graceful shutdown.
    pub fn leave(&self) -> Result<()> {
        let key = self.identity.key();
        if let Some(row) = self.registry.get_node(&key)? {
            if row.instance_id == self.identity.instance_id {
                self.registry.delete_node(&key)?;
                tracing::info!(node = %key, "👋 Left cluster");
            }
        }
        Ok(())
    }

    /// Probe every node in `nodes`. Self is live without a network call;
    /// peers that fail every attempt are deleted.
    pub async fn health_check(&self, nodes: &[NodeRecord]) -> Result<HealthReport> {
        let mut report = HealthReport::default();
        let mut peers = Vec::new();
        for node in nodes {
            if self.identity.is(&node.key()) {
                self.touch_self(Utc::now())?;
                report.live.push(node.key());
            } else {
                peers.push(node);
            }
        }

        let results = join_all(peers.into_iter().map(|peer| async move {
            let result = self.probe.health_check(peer).await;
            (peer, result)
        }))
        .await;

        for (peer, result) in results {
            match result {
                Ok(()) => {
                    self.touch_peer(peer, Utc::now())?;
                    report.live.push(peer.key());
                }
                Err(e) => {
                    tracing::warn!(
                        peer = %peer.key(),
                        instance_id = %peer.instance_id,
                        attempts = self.probe.attempts(),
                        "🪦 Evicting peer after failed health checks: {e}"
                    );
                    self.registry.delete_node(&peer.key())?;
                    report.evicted.push((peer.key(), e));
                }
            }
        }

        tracing::debug!(
            live = report.live.len(),
            evicted = report.evicted.len(),
            "💓 Health sweep finished"
        );
        Ok(report)
    }

    /// One sweep over the registry's current view.
    pub async fn sweep(&self) -> Result<HealthReport> {
        let nodes = self.registry.list_nodes()?;
        self.health_check(&nodes).await
    }

    /// Full health pass required before scheduling starts. Dead peers are
    /// evicted as usual; a peer that answers but reports itself unhealthy
    /// blocks startup.
    pub async fn verify_startup(&self) -> Result<HealthReport> {
        let report = self.sweep().await?;
        let unhealthy = report.unhealthy_peers();
        if !unhealthy.is_empty() {
            let names: Vec<String> = unhealthy.iter().map(|k| k.to_string()).collect();
            return Err(TaskMeshError::StartupGate(format!(
                "peers reachable but unhealthy: {}",
                names.join(", ")
            )));
        }
        Ok(report)
    }

    /// Ask every known peer to pause scheduling. Returns how many acknowledged.
    pub async fn stop_cluster(&self) -> Result<usize> {
        let peers = self.peers()?;
        let results = join_all(peers.iter().map(|p| self.probe.stop_scheduler(p))).await;
        Ok(results.iter().filter(|r| r.is_ok()).count())
    }

    /// Ask every known peer to resume scheduling. Returns how many acknowledged.
    pub async fn start_cluster(&self) -> Result<usize> {
        let peers = self.peers()?;
        let results = join_all(peers.iter().map(|p| self.probe.start_scheduler(p))).await;
        Ok(results.iter().filter(|r| r.is_ok()).count())
    }

    /// Whether any peer reports `job` as running. A peer that does not
    /// answer counts as not running.
    pub async fn is_job_running_in_cluster(&self, job: &JobKey) -> bool {
        let peers = match self.peers() {
            Ok(peers) => peers,
            Err(e) => {
                tracing::warn!("⚠️ Cannot list peers for is-job-running({job}): {e}");
                return false;
            }
        };
        let results = join_all(peers.iter().map(|p| self.probe.is_job_running(p, job))).await;
        results.into_iter().any(|r| r.unwrap_or(false))
    }

    fn peers(&self) -> Result<Vec<NodeRecord>> {
        Ok(self
            .registry
            .list_nodes()?
            .into_iter()
            .filter(|n| !self.identity.is(&n.key()))
            .collect())
    }

    /// Refresh our own row, re-inserting it if a peer evicted us. A live row
    /// owned by another instance is never overwritten.
    fn touch_self(&self, now: DateTime<Utc>) -> Result<()> {
        let mut row = match self.registry.get_node(&self.identity.key())? {
            Some(row) if row.instance_id == self.identity.instance_id => row,
            _ => {
                self.detect_conflict(now)?;
                tracing::info!(node = %self.identity.key(), "🔄 Own registry row missing, re-registering");
                NodeRecord::joining(&self.identity, now)
            }
        };
        row.last_health_check = Some(now);
        self.registry.upsert_node(&row)
    }

    /// Refresh a peer's row unless it was deleted or replaced meanwhile.
    fn touch_peer(&self, peer: &NodeRecord, now: DateTime<Utc>) -> Result<()> {
        if let Some(mut row) = self.registry.get_node(&peer.key())? {
            if row.instance_id == peer.instance_id {
                row.last_health_check = Some(now);
                self.registry.upsert_node(&row)?;
            }
        }
        Ok(())
    }
}

/// Run a health sweep every `interval` until `shutdown` flips to true.
/// Returns early with the error if another live instance took over this
/// node's identity; any other sweep failure is logged and retried.
pub async fn spawn_health_sweeper(
    coordinator: Arc<ClusterCoordinator>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    tracing::info!("💓 Health sweeper started (every {}s)", interval.as_secs());
    let mut tick = tokio::time::interval(interval);

    loop {
        tokio::select! {
            _ = tick.tick() => {},
            _ = shutdown.changed() => { if *shutdown.borrow() { break; } }
        }

        match coordinator.sweep().await {
            Ok(_) => {}
            Err(e @ TaskMeshError::IdentityConflict { .. }) => {
                tracing::error!("❌ Health sweeper stopping: {e}");
                return Err(e);
            }
            Err(e) => tracing::warn!("⚠️ Health sweep failed: {e}"),
        }
    }

    tracing::info!("💓 Health sweeper stopped");
    Ok(())
}
