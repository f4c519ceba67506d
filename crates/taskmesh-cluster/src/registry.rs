//! Cluster registry — the one resource shared by every node.
//!
//! Writes are idempotent upserts/deletes keyed by (host, port), so two
//! coordinators racing on the same row converge to whichever write lands last.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Duration;

use taskmesh_core::error::{Result, TaskMeshError};
use taskmesh_core::identity::{NodeIdentity, NodeKey};

/// One row of the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub host: String,
    pub port: u16,
    pub instance_id: String,
    pub cluster_port: u16,
    pub join_timestamp: DateTime<Utc>,
    /// Cleared on join, refreshed by every successful probe.
    pub last_health_check: Option<DateTime<Utc>>,
}

impl NodeRecord {
    /// Fresh row for a process that is joining now.
    pub fn joining(identity: &NodeIdentity, now: DateTime<Utc>) -> Self {
        Self {
            host: identity.host.clone(),
            port: identity.port,
            instance_id: identity.instance_id.clone(),
            cluster_port: identity.cluster_port,
            join_timestamp: now,
            last_health_check: None,
        }
    }

    pub fn key(&self) -> NodeKey {
        NodeKey::new(self.host.clone(), self.port)
    }

    /// Last moment this row was known to be alive. A row that was never
    /// probed counts from its join.
    pub fn last_seen(&self) -> DateTime<Utc> {
        self.last_health_check.unwrap_or(self.join_timestamp)
    }

    pub fn health_gap(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.last_seen()
    }

    /// healthGap < checkin interval + tolerance.
    pub fn is_live(&self, now: DateTime<Utc>, window: Duration) -> bool {
        match chrono::Duration::from_std(window) {
            Ok(window) => self.health_gap(now) < window,
            Err(_) => true,
        }
    }

    /// Base URL of the peer's control server.
    pub fn control_url(&self) -> String {
        format!("http://{}:{}", self.host, self.cluster_port)
    }
}

/// Storage surface consumed by the coordinator.
pub trait ClusterRegistry: Send + Sync {
    fn list_nodes(&self) -> Result<Vec<NodeRecord>>;

    fn get_node(&self, key: &NodeKey) -> Result<Option<NodeRecord>>;

    /// Insert or replace the row for `record.key()`.
    fn upsert_node(&self, record: &NodeRecord) -> Result<()>;

    /// Remove the row. Returns whether a row existed; deleting a missing row is not an error.
    fn delete_node(&self, key: &NodeKey) -> Result<bool>;
}

/// In-process registry, for single-node deployments and tests.
#[derive(Default)]
pub struct MemoryRegistry {
    nodes: Mutex<BTreeMap<NodeKey, NodeRecord>>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn nodes(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<NodeKey, NodeRecord>>> {
        self.nodes
            .lock()
            .map_err(|e| TaskMeshError::Registry(format!("Lock: {e}")))
    }
}

impl ClusterRegistry for MemoryRegistry {
    fn list_nodes(&self) -> Result<Vec<NodeRecord>> {
        Ok(self.nodes()?.values().cloned().collect())
    }

    fn get_node(&self, key: &NodeKey) -> Result<Option<NodeRecord>> {
        Ok(self.nodes()?.get(key).cloned())
    }

    fn upsert_node(&self, record: &NodeRecord) -> Result<()> {
        self.nodes()?.insert(record.key(), record.clone());
        Ok(())
    }

    fn delete_node(&self, key: &NodeKey) -> Result<bool> {
        Ok(self.nodes()?.remove(key).is_some())
    }
}
