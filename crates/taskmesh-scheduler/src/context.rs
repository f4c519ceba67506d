//! Execution context of one run: identity, data layers, cancellation signal
//! and the lazily created state slot.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::watch;
use uuid::Uuid;

use crate::state::RunState;
use taskmesh_core::error::{Result, TaskMeshError};
use taskmesh_core::identity::JobKey;

#[derive(Debug, Default)]
struct RunData {
    job: HashMap<String, String>,
    trigger: HashMap<String, String>,
    /// job ∪ trigger, trigger wins. Rebuilt on every put.
    merged: HashMap<String, String>,
}

impl RunData {
    fn rebuild(&mut self) {
        let mut merged = self.job.clone();
        merged.extend(self.trigger.iter().map(|(k, v)| (k.clone(), v.clone())));
        self.merged = merged;
    }
}

pub struct ExecutionContext {
    run_id: Uuid,
    job: JobKey,
    started_at: DateTime<Utc>,
    data: Mutex<RunData>,
    cancel: watch::Receiver<bool>,
    slot: Mutex<Option<RunState>>,
}

impl ExecutionContext {
    pub fn new(
        job: JobKey,
        job_data: HashMap<String, String>,
        trigger_data: HashMap<String, String>,
        cancel: watch::Receiver<bool>,
    ) -> Self {
        let mut data = RunData {
            job: job_data,
            trigger: trigger_data,
            merged: HashMap::new(),
        };
        data.rebuild();
        Self {
            run_id: Uuid::new_v4(),
            job,
            started_at: Utc::now(),
            data: Mutex::new(data),
            cancel,
            slot: Mutex::new(None),
        }
    }

    /// Context whose cancellation signal never fires.
    pub fn detached(job: JobKey, job_data: HashMap<String, String>) -> Self {
        let (_tx, rx) = watch::channel(false);
        Self::new(job, job_data, HashMap::new(), rx)
    }

    pub fn with_run_id(mut self, run_id: Uuid) -> Self {
        self.run_id = run_id;
        self
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn job(&self) -> &JobKey {
        &self.job
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    /// The run's state, created by whichever thread asks first.
    pub fn state(&self) -> Result<RunState> {
        let mut slot = self.slot()?;
        Ok(slot.get_or_insert_with(RunState::new).clone())
    }

    /// Detach the state from the context. Later `state()` calls start fresh.
    pub fn take_state(&self) -> Result<Option<RunState>> {
        Ok(self.slot()?.take())
    }

    pub fn put_job_data(&self, key: String, value: String) -> Result<()> {
        let mut data = self.data()?;
        data.job.insert(key, value);
        data.rebuild();
        Ok(())
    }

    pub fn put_trigger_data(&self, key: String, value: String) -> Result<()> {
        let mut data = self.data()?;
        data.trigger.insert(key, value);
        data.rebuild();
        Ok(())
    }

    pub fn get_data(&self, key: &str) -> Result<Option<String>> {
        Ok(self.data()?.merged.get(key).cloned())
    }

    pub fn has_data(&self, key: &str) -> Result<bool> {
        Ok(self.data()?.merged.contains_key(key))
    }

    pub fn merged_data(&self) -> Result<HashMap<String, String>> {
        Ok(self.data()?.merged.clone())
    }

    fn slot(&self) -> Result<std::sync::MutexGuard<'_, Option<RunState>>> {
        self.slot
            .lock()
            .map_err(|e| TaskMeshError::Other(format!("State slot lock: {e}")))
    }

    fn data(&self) -> Result<std::sync::MutexGuard<'_, RunData>> {
        self.data
            .lock()
            .map_err(|e| TaskMeshError::Other(format!("Run data lock: {e}")))
    }
}
