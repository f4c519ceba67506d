//! # TaskMesh Cluster
//!
//! Best-effort membership for a group of scheduler nodes sharing one registry.
//! There is no quorum and no leader: every node probes every peer it knows,
//! and any single observer may evict a peer that fails all probe attempts.
//!
//! ## Architecture
//! ```text
//! ClusterCoordinator (tokio interval)
//!   ├── join: conflict check → upsert own row
//!   ├── health sweep: self = live, peers → HealthProbe (retry + backoff)
//!   │     ├── success → refresh last_health_check
//!   │     └── all attempts failed → delete row
//!   └── fan-out: start/stop scheduler, is-job-running
//!
//! Control server (cluster port, axum)
//!   └── /cluster/health, /cluster/scheduler/{start,stop}, /cluster/jobs/…/running
//! ```

pub mod coordinator;
pub mod probe;
pub mod registry;
pub mod server;
pub mod sqlite;

pub use coordinator::{ClusterCoordinator, HealthReport, spawn_health_sweeper};
pub use probe::{HealthProbe, HttpPeerClient, PeerClient, PeerError};
pub use registry::{ClusterRegistry, MemoryRegistry, NodeRecord};
pub use server::SchedulerControl;
pub use sqlite::SqliteRegistry;
