//! # TaskMesh Core
//!
//! Types shared by every TaskMesh crate: the error enum, the TOML
//! configuration tree, and the identities used to address nodes and jobs.

pub mod config;
pub mod error;
pub mod identity;

pub use config::TaskMeshConfig;
pub use error::{Result, TaskMeshError};
pub use identity::{JobKey, NodeIdentity, NodeKey};
