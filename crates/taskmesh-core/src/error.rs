//! Error types for TaskMesh.

use thiserror::Error;

/// Result alias used across the workspace.
pub type Result<T> = std::result::Result<T, TaskMeshError>;

#[derive(Debug, Error)]
pub enum TaskMeshError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Registry error: {0}")]
    Registry(String),

    /// Another live process already holds this node identity.
    #[error("Node {node} is already held by live instance {instance_id}; change the node port before restarting")]
    IdentityConflict { node: String, instance_id: String },

    /// The node refused to start its scheduling loop.
    #[error("Startup gate failed: {0}")]
    StartupGate(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Run was cancelled")]
    Cancelled,

    #[error("Broker protocol error on channel '{channel}': {reason}")]
    Protocol { channel: String, reason: String },

    #[error("Settings error: {0}")]
    Settings(String),

    #[error("{0}")]
    Other(String),
}

impl TaskMeshError {
    /// Build a protocol error for a malformed payload on a known channel.
    pub fn protocol(channel: &str, reason: impl std::fmt::Display) -> Self {
        Self::Protocol {
            channel: channel.to_string(),
            reason: reason.to_string(),
        }
    }
}
