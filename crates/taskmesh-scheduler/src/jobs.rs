//! Job definitions — the core data model for scheduled work.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use crate::broker::Publish;
use crate::cron;
use crate::properties::PropertySchema;
use taskmesh_core::identity::JobKey;

/// Job body. Implementations only see the broker, never host internals.
pub trait Job: Send + Sync {
    fn execute(&self, broker: &dyn Publish) -> anyhow::Result<()>;

    /// Typed properties this job reads, if it declares any.
    fn schema(&self) -> Option<PropertySchema> {
        None
    }
}

/// Job types available to definitions, by name.
#[derive(Default, Clone)]
pub struct JobCatalog {
    jobs: HashMap<String, Arc<dyn Job>>,
}

impl JobCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, job_type: &str, job: Arc<dyn Job>) {
        self.jobs.insert(job_type.to_string(), job);
    }

    pub fn get(&self, job_type: &str) -> Option<Arc<dyn Job>> {
        self.jobs.get(job_type).cloned()
    }
}

/// How/when the job triggers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Trigger {
    /// Run every N seconds.
    Interval { every_secs: u64 },
    /// Run on a cron schedule (5-field expression).
    Cron { expression: String },
}

/// A scheduled job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobDefinition {
    pub key: JobKey,
    /// Name in the [`JobCatalog`].
    pub job_type: String,
    pub trigger: Trigger,
    /// Whether two runs of this job may overlap anywhere in the cluster.
    pub concurrent: bool,
    /// Folder holding `settings*.toml`, relative to the jobs dir unless absolute.
    pub folder: Option<PathBuf>,
    /// Job-instance overrides, highest precedence layer.
    #[serde(default)]
    pub data: HashMap<String, String>,
    #[serde(default)]
    pub trigger_data: HashMap<String, String>,
    pub enabled: bool,
    pub last_run: Option<DateTime<Utc>>,
    pub next_run: Option<DateTime<Utc>>,
    pub run_count: u32,
}

impl JobDefinition {
    fn new(key: JobKey, job_type: &str, trigger: Trigger) -> Self {
        let mut def = Self {
            key,
            job_type: job_type.to_string(),
            trigger,
            concurrent: true,
            folder: None,
            data: HashMap::new(),
            trigger_data: HashMap::new(),
            enabled: true,
            last_run: None,
            next_run: None,
            run_count: 0,
        };
        def.next_run = def.next_after(Utc::now());
        def
    }

    /// Create a recurring interval job.
    pub fn interval(key: JobKey, job_type: &str, every_secs: u64) -> Self {
        Self::new(key, job_type, Trigger::Interval { every_secs })
    }

    /// Create a cron-scheduled job.
    pub fn cron(key: JobKey, job_type: &str, expression: &str) -> Self {
        Self::new(
            key,
            job_type,
            Trigger::Cron {
                expression: expression.to_string(),
            },
        )
    }

    pub fn non_concurrent(mut self) -> Self {
        self.concurrent = false;
        self
    }

    pub fn with_folder(mut self, folder: impl Into<PathBuf>) -> Self {
        self.folder = Some(folder.into());
        self
    }

    pub fn with_data(mut self, key: &str, value: &str) -> Self {
        self.data.insert(key.to_string(), value.to_string());
        self
    }

    pub fn with_trigger_data(mut self, key: &str, value: &str) -> Self {
        self.trigger_data.insert(key.to_string(), value.to_string());
        self
    }

    /// Check if this job should fire at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.enabled && self.next_run.is_some_and(|next| now >= next)
    }

    /// Mark a fire at `now` and compute the next one.
    pub fn advance(&mut self, now: DateTime<Utc>) {
        self.last_run = Some(now);
        self.run_count += 1;
        self.next_run = self.next_after(now);
    }

    fn next_after(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match &self.trigger {
            Trigger::Interval { every_secs } => {
                let secs = i64::try_from((*every_secs).max(1)).ok()?;
                now.checked_add_signed(chrono::Duration::try_seconds(secs)?)
            }
            Trigger::Cron { expression } => cron::next_run_from_cron(expression, now),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop;

    impl Job for Noop {
        fn execute(&self, _broker: &dyn Publish) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_interval_advance() {
        let mut def = JobDefinition::interval(JobKey::named("j"), "noop", 60);
        let now = Utc::now();
        assert!(!def.is_due(now));
        def.next_run = Some(now - chrono::Duration::seconds(1));
        assert!(def.is_due(now));

        def.advance(now);
        assert_eq!(def.run_count, 1);
        assert_eq!(def.next_run, Some(now + chrono::Duration::seconds(60)));
        assert!(!def.is_due(now));
    }

    #[test]
    fn test_disabled_job_never_due() {
        let mut def = JobDefinition::interval(JobKey::named("j"), "noop", 1);
        def.next_run = Some(Utc::now() - chrono::Duration::seconds(5));
        def.enabled = false;
        assert!(!def.is_due(Utc::now()));
    }

    #[test]
    fn test_invalid_cron_never_schedules() {
        let def = JobDefinition::cron(JobKey::named("j"), "noop", "nope");
        assert!(def.next_run.is_none());
    }

    #[test]
    fn test_oversized_interval_never_schedules() {
        let mut def = JobDefinition::interval(JobKey::named("j"), "noop", u64::MAX);
        assert!(def.next_run.is_none());

        def = JobDefinition::interval(JobKey::named("j"), "noop", i64::MAX as u64);
        assert!(def.next_run.is_none());
        def.advance(Utc::now());
        assert!(def.next_run.is_none());
    }

    #[test]
    fn test_catalog_lookup() {
        let mut catalog = JobCatalog::new();
        catalog.register("noop", Arc::new(Noop));
        assert!(catalog.get("noop").is_some());
        assert!(catalog.get("missing").is_none());
    }
}
