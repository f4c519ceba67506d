//! Node and job identities.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Registry key of a node: one row per (host, port).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeKey {
    pub host: String,
    pub port: u16,
}

impl NodeKey {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// One running scheduler process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeIdentity {
    /// Host name peers use to reach this node.
    pub host: String,
    /// Main API port.
    pub port: u16,
    /// Port of the peer control server.
    pub cluster_port: u16,
    /// Unique per process incarnation.
    pub instance_id: String,
}

impl NodeIdentity {
    pub fn new(host: impl Into<String>, port: u16, cluster_port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            cluster_port,
            instance_id: uuid::Uuid::new_v4().to_string(),
        }
    }

    pub fn with_instance_id(mut self, instance_id: impl Into<String>) -> Self {
        self.instance_id = instance_id.into();
        self
    }

    pub fn key(&self) -> NodeKey {
        NodeKey::new(self.host.clone(), self.port)
    }

    /// Whether `key` addresses this node.
    pub fn is(&self, key: &NodeKey) -> bool {
        self.host == key.host && self.port == key.port
    }
}

impl fmt::Display for NodeIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{} ({})", self.host, self.port, self.instance_id)
    }
}

/// Identity of a scheduled job: (group, name).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobKey {
    pub group: String,
    pub name: String,
}

impl JobKey {
    pub const DEFAULT_GROUP: &'static str = "DEFAULT";

    pub fn new(group: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            name: name.into(),
        }
    }

    /// Key in the default group.
    pub fn named(name: impl Into<String>) -> Self {
        Self::new(Self::DEFAULT_GROUP, name)
    }
}

impl fmt::Display for JobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.group, self.name)
    }
}
