//! Per-run execution state.
//!
//! One `ExecutionState` exists per run. Every update goes through the run's
//! own mutex, so concurrent job threads never interleave partial writes and a
//! log append is visible to any later read.

use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

use taskmesh_core::error::{Result, TaskMeshError};

/// An exception reported by job code.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExceptionInfo {
    pub message: String,
    #[serde(default)]
    pub detail: String,
}

impl ExceptionInfo {
    pub fn new(message: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            detail: detail.into(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ExecutionState {
    progress: u8,
    effected_rows: Option<i64>,
    log: String,
    exceptions: Vec<ExceptionInfo>,
    finalized: bool,
}

impl ExecutionState {
    pub fn progress(&self) -> u8 {
        self.progress
    }

    pub fn effected_rows(&self) -> Option<i64> {
        self.effected_rows
    }

    pub fn log(&self) -> &str {
        &self.log
    }

    pub fn exceptions(&self) -> &[ExceptionInfo] {
        &self.exceptions
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// Clamped to 0..=100.
    pub fn set_progress(&mut self, value: i64) {
        if self.frozen("set-progress") {
            return;
        }
        self.progress = value.clamp(0, 100) as u8;
    }

    pub fn set_effected_rows(&mut self, value: i64) {
        if self.frozen("set-effected-rows") {
            return;
        }
        self.effected_rows = Some(value);
    }

    /// Adds `delta` (an unset count starts at 0) and returns the new value.
    pub fn increase_effected_rows(&mut self, delta: i64) -> Option<i64> {
        if !self.frozen("increase-effected-rows") {
            let current = self.effected_rows.unwrap_or(0);
            self.effected_rows = Some(current.saturating_add(delta));
        }
        self.effected_rows
    }

    pub fn append_log(&mut self, line: &str) {
        if self.frozen("append-log") {
            return;
        }
        self.log.push_str(line);
        if !line.ends_with('\n') {
            self.log.push('\n');
        }
    }

    pub fn add_exception(&mut self, exception: ExceptionInfo) {
        if self.frozen("add-exception") {
            return;
        }
        self.exceptions.push(exception);
    }

    /// End of run: progress is forced to 100 and the state stops accepting writes.
    pub fn finalize(&mut self) {
        self.progress = 100;
        self.finalized = true;
    }

    fn frozen(&self, op: &str) -> bool {
        if self.finalized {
            tracing::debug!("🧊 Ignoring {op} on finalized run state");
        }
        self.finalized
    }
}

/// Shared handle to one run's state.
#[derive(Debug, Clone, Default)]
pub struct RunState {
    inner: Arc<Mutex<ExecutionState>>,
}

impl RunState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` with the run lock held.
    pub fn with<R>(&self, f: impl FnOnce(&mut ExecutionState) -> R) -> Result<R> {
        let mut state = self
            .inner
            .lock()
            .map_err(|e| TaskMeshError::Other(format!("Run state lock: {e}")))?;
        Ok(f(&mut state))
    }

    pub fn snapshot(&self) -> Result<ExecutionState> {
        self.with(|s| s.clone())
    }

    /// Whether two handles point at the same state.
    pub fn same_as(&self, other: &RunState) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_is_clamped() {
        let mut state = ExecutionState::default();
        state.set_progress(150);
        assert_eq!(state.progress(), 100);
        state.set_progress(-3);
        assert_eq!(state.progress(), 0);
    }

    #[test]
    fn test_increase_from_unset() {
        let mut state = ExecutionState::default();
        assert_eq!(state.effected_rows(), None);
        assert_eq!(state.increase_effected_rows(5), Some(5));
        assert_eq!(state.increase_effected_rows(-2), Some(3));
    }

    #[test]
    fn test_finalize_forces_100_and_freezes() {
        let mut state = ExecutionState::default();
        state.set_progress(40);
        state.finalize();
        assert_eq!(state.progress(), 100);

        state.set_progress(10);
        state.append_log("late");
        state.set_effected_rows(9);
        assert_eq!(state.progress(), 100);
        assert!(state.log().is_empty());
        assert_eq!(state.effected_rows(), None);
    }

    #[test]
    fn test_concurrent_increments_sum() {
        let run = RunState::new();
        let handles: Vec<_> = (1..=16i64)
            .map(|d| {
                let run = run.clone();
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        run.with(|s| s.increase_effected_rows(d)).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        let expected: i64 = (1..=16i64).map(|d| d * 100).sum();
        assert_eq!(run.snapshot().unwrap().effected_rows(), Some(expected));
    }

    #[test]
    fn test_log_lines_are_newline_terminated() {
        let mut state = ExecutionState::default();
        state.append_log("one");
        state.append_log("two\n");
        assert_eq!(state.log(), "one\ntwo\n");
    }
}
