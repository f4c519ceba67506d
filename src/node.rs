//! What this process exposes on its cluster port.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use taskmesh_cluster::SchedulerControl;
use taskmesh_core::error::Result;
use taskmesh_core::identity::JobKey;
use taskmesh_scheduler::SchedulerEngine;

/// Scheduler engine plus the node's standby flag.
pub struct NodeControl {
    engine: Arc<SchedulerEngine>,
    standby: AtomicBool,
}

impl NodeControl {
    pub fn new(engine: Arc<SchedulerEngine>) -> Self {
        Self {
            engine,
            standby: AtomicBool::new(false),
        }
    }

    /// Stop answering health checks and pause triggering.
    pub fn enter_standby(&self) {
        self.standby.store(true, Ordering::SeqCst);
        self.engine.stop();
    }

    pub fn is_standby(&self) -> bool {
        self.standby.load(Ordering::SeqCst)
    }
}

impl SchedulerControl for NodeControl {
    fn is_healthy(&self) -> bool {
        !self.is_standby()
    }

    fn start(&self) {
        if self.is_standby() {
            tracing::warn!("⚠️ Ignoring scheduler start while in standby");
            return;
        }
        self.engine.start();
    }

    fn stop(&self) {
        self.engine.stop();
    }

    fn is_job_running(&self, job: &JobKey) -> Result<bool> {
        self.engine.is_job_running(job)
    }
}
