//! TaskMesh configuration system.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Result, TaskMeshError};
use crate::identity::NodeIdentity;

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskMeshConfig {
    #[serde(default)]
    pub node: NodeConfig,
    #[serde(default)]
    pub cluster: ClusterConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

impl TaskMeshConfig {
    /// Load config from the default path (~/.taskmesh/config.toml).
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            tracing::info!("📄 No config at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| TaskMeshError::Config(format!("Failed to read config: {e}")))?;
        tracing::debug!("📄 Loading config from {}", path.display());
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| TaskMeshError::Config(format!("Failed to parse config: {e}")))
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the TaskMesh home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".taskmesh")
    }
}

/// Identity of this process inside the cluster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Host name advertised to peers. Empty = machine hostname.
    #[serde(default)]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_cluster_port")]
    pub cluster_port: u16,
    /// Empty = fresh uuid per process start.
    #[serde(default)]
    pub instance_id: String,
}

fn default_port() -> u16 { 2306 }
fn default_cluster_port() -> u16 { 12306 }

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: default_port(),
            cluster_port: default_cluster_port(),
            instance_id: String::new(),
        }
    }
}

impl NodeConfig {
    /// Resolve the configured values into this process's identity.
    pub fn identity(&self) -> NodeIdentity {
        let host = if self.host.is_empty() {
            hostname::get()
                .ok()
                .and_then(|h| h.into_string().ok())
                .unwrap_or_else(|| "localhost".into())
        } else {
            self.host.clone()
        };
        let identity = NodeIdentity::new(host, self.port, self.cluster_port);
        if self.instance_id.is_empty() {
            identity
        } else {
            identity.with_instance_id(self.instance_id.clone())
        }
    }
}

/// Cluster membership and health-check tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Period of the health sweep.
    #[serde(default = "default_checkin_interval")]
    pub checkin_interval_secs: u64,
    /// Extra slack on top of the checkin interval before a row counts as stale.
    #[serde(default = "default_liveness_tolerance")]
    pub liveness_tolerance_secs: u64,
    #[serde(default = "default_probe_attempts")]
    pub probe_attempts: u32,
    #[serde(default = "default_probe_backoff")]
    pub probe_backoff_ms: u64,
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_ms: u64,
    #[serde(default = "default_registry_path")]
    pub registry_path: String,
}

fn default_checkin_interval() -> u64 { 30 }
fn default_liveness_tolerance() -> u64 { 15 }
fn default_probe_attempts() -> u32 { 3 }
fn default_probe_backoff() -> u64 { 500 }
fn default_probe_timeout() -> u64 { 2000 }
fn default_registry_path() -> String { "~/.taskmesh/cluster.db".into() }

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            checkin_interval_secs: default_checkin_interval(),
            liveness_tolerance_secs: default_liveness_tolerance(),
            probe_attempts: default_probe_attempts(),
            probe_backoff_ms: default_probe_backoff(),
            probe_timeout_ms: default_probe_timeout(),
            registry_path: default_registry_path(),
        }
    }
}

impl ClusterConfig {
    pub fn checkin_interval(&self) -> Duration {
        Duration::from_secs(self.checkin_interval_secs)
    }

    /// Window inside which a registry row still looks alive.
    pub fn liveness_window(&self) -> Duration {
        Duration::from_secs(self.checkin_interval_secs + self.liveness_tolerance_secs)
    }

    pub fn probe_backoff(&self) -> Duration {
        Duration::from_millis(self.probe_backoff_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}

/// Job execution settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Upper bound on concurrently executing runs.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    #[serde(default = "default_tick_interval")]
    pub tick_interval_secs: u64,
    /// Selects `settings.<environment>.toml` in each job folder.
    #[serde(default = "default_environment")]
    pub environment: String,
    #[serde(default = "default_jobs_dir")]
    pub jobs_dir: String,
    #[serde(default = "default_history_path")]
    pub history_path: String,
    /// Process-wide parameters, lowest precedence layer for every run.
    #[serde(default)]
    pub global_parameters: HashMap<String, String>,
}

fn default_max_concurrency() -> usize { 10 }
fn default_tick_interval() -> u64 { 1 }
fn default_environment() -> String { "production".into() }
fn default_jobs_dir() -> String { "~/.taskmesh/jobs".into() }
fn default_history_path() -> String { "~/.taskmesh/history.db".into() }

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            tick_interval_secs: default_tick_interval(),
            environment: default_environment(),
            jobs_dir: default_jobs_dir(),
            history_path: default_history_path(),
            global_parameters: HashMap::new(),
        }
    }
}

/// Expand a leading `~` in a configured path.
pub fn expand_path(p: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(p).to_string())
}
