//! # TaskMesh Scheduler
//!
//! Runs jobs on a bounded pool of blocking workers and gives job code a
//! narrow, string-keyed channel to report back into its run.
//!
//! ## Architecture
//! ```text
//! SchedulerEngine (tokio interval)
//!   ├── due JobDefinition → non-concurrent guard (local + cluster)
//!   ├── resolve properties: global → settings.<env>.toml → job data
//!   └── worker (semaphore-bounded spawn_blocking)
//!         └── JobHostAdapter
//!               ├── ExecutionContext (run id, data, cancel signal, state slot)
//!               ├── StateBroker ← job calls publish(channel, message)
//!               └── finalize → progress = 100 → RunHistory
//! ```

pub mod broker;
pub mod context;
pub mod cron;
pub mod engine;
pub mod history;
pub mod host;
pub mod jobs;
pub mod properties;
pub mod state;

pub use broker::{BrokerRequest, Publish, Reporter, StateBroker};
pub use context::ExecutionContext;
pub use engine::{SchedulerEngine, spawn_scheduler};
pub use history::{RunHistory, SqliteRunHistory};
pub use host::{ExecutionRecord, JobHostAdapter, RunStatus};
pub use jobs::{Job, JobCatalog, JobDefinition, Trigger};
pub use properties::{PropertyKind, PropertySchema, PropertyWarning};
pub use state::{ExceptionInfo, ExecutionState, RunState};
