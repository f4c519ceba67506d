//! Job host adapter — binds one execution context to its broker and state,
//! and turns the state into a persisted record when the run ends.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::broker::StateBroker;
use crate::context::ExecutionContext;
use crate::history::RunHistory;
use crate::state::{ExceptionInfo, RunState};
use taskmesh_core::error::Result;
use taskmesh_core::identity::JobKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Success,
    Fail,
    Cancelled,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Success => "success",
            RunStatus::Fail => "fail",
            RunStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "success" => RunStatus::Success,
            "cancelled" => RunStatus::Cancelled,
            _ => RunStatus::Fail,
        }
    }
}

/// Final, persisted view of one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub run_id: Uuid,
    pub job: JobKey,
    pub status: RunStatus,
    pub progress: u8,
    pub effected_rows: Option<i64>,
    pub log: String,
    pub exceptions: Vec<ExceptionInfo>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: i64,
}

pub struct JobHostAdapter {
    context: Arc<ExecutionContext>,
    history: Option<Arc<dyn RunHistory>>,
}

impl JobHostAdapter {
    pub fn new(context: Arc<ExecutionContext>, history: Option<Arc<dyn RunHistory>>) -> Self {
        Self { context, history }
    }

    pub fn context(&self) -> &Arc<ExecutionContext> {
        &self.context
    }

    /// Broker handed to job code for this run.
    pub fn broker(&self) -> StateBroker {
        StateBroker::new(self.context.clone())
    }

    pub fn state(&self) -> Result<RunState> {
        self.context.state()
    }

    /// End the run: record `error` (if any), force progress to 100, persist,
    /// and detach the state from the context.
    pub fn finalize(&self, status: RunStatus, error: Option<ExceptionInfo>) -> Result<ExecutionRecord> {
        let state = self.context.state()?;
        let snapshot = state.with(|s| {
            if let Some(error) = error {
                s.add_exception(error);
            }
            s.finalize();
            s.clone()
        })?;
        self.context.take_state()?;

        let finished_at = Utc::now();
        let started_at = self.context.started_at();
        let record = ExecutionRecord {
            run_id: self.context.run_id(),
            job: self.context.job().clone(),
            status,
            progress: snapshot.progress(),
            effected_rows: snapshot.effected_rows(),
            log: snapshot.log().to_string(),
            exceptions: snapshot.exceptions().to_vec(),
            started_at,
            finished_at,
            duration_ms: (finished_at - started_at).num_milliseconds(),
        };

        if let Some(history) = &self.history {
            if let Err(e) = history.record(&record) {
                tracing::warn!(run_id = %record.run_id, "⚠️ Failed to persist run: {e}");
            }
        }

        let icon = match status {
            RunStatus::Success => "✅",
            RunStatus::Fail => "❌",
            RunStatus::Cancelled => "🛑",
        };
        tracing::info!(
            run_id = %record.run_id,
            job = %record.job,
            duration_ms = record.duration_ms,
            effected_rows = ?record.effected_rows,
            "{icon} Run finished: {}",
            status.as_str()
        );
        Ok(record)
    }
}
