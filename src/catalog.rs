//! Built-in job types and the `jobs.toml` file that schedules them.
//!
//! ```toml
//! [[jobs]]
//! group = "reports"
//! name = "nightly-export"
//! type = "shell"
//! cron = "0 2 * * *"
//! concurrent = false
//! folder = "nightly-export"
//!
//! [jobs.data]
//! command = "./export.sh"
//!
//! [jobs.trigger_data]
//! command = "./export.sh --full"
//! ```

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;

use taskmesh_core::identity::JobKey;
use taskmesh_scheduler::{
    Job, JobCatalog, JobDefinition, PropertyKind, PropertySchema, Publish, Reporter,
};

/// Runs `command` through `sh -c`. Each stdout line goes to the run log and
/// counts as one effected row.
pub struct ShellJob;

impl Job for ShellJob {
    fn execute(&self, broker: &dyn Publish) -> anyhow::Result<()> {
        let reporter = Reporter::new(broker);
        reporter.checkpoint()?;
        let command = reporter.data("command")?;

        let output = Command::new("sh").arg("-c").arg(&command).output()?;
        reporter.progress(90)?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        for line in stdout.lines() {
            reporter.log(line)?;
            reporter.add_rows(1)?;
        }
        if !output.status.success() {
            bail!(
                "'{command}' exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(())
    }

    fn schema(&self) -> Option<PropertySchema> {
        Some(PropertySchema::new().required("command", PropertyKind::String))
    }
}

/// Appends `message` to the run log.
pub struct LogJob;

impl Job for LogJob {
    fn execute(&self, broker: &dyn Publish) -> anyhow::Result<()> {
        let reporter = Reporter::new(broker);
        reporter.log(&reporter.data("message")?)?;
        Ok(())
    }

    fn schema(&self) -> Option<PropertySchema> {
        Some(PropertySchema::new().required("message", PropertyKind::String))
    }
}

pub fn builtin_catalog() -> JobCatalog {
    let mut catalog = JobCatalog::new();
    catalog.register("shell", Arc::new(ShellJob));
    catalog.register("log", Arc::new(LogJob));
    catalog
}

#[derive(Debug, Deserialize)]
struct JobsFile {
    #[serde(default)]
    jobs: Vec<JobEntry>,
}

#[derive(Debug, Deserialize)]
struct JobEntry {
    #[serde(default = "default_group")]
    group: String,
    name: String,
    #[serde(rename = "type")]
    job_type: String,
    every_secs: Option<u64>,
    cron: Option<String>,
    #[serde(default = "default_true")]
    concurrent: bool,
    folder: Option<PathBuf>,
    #[serde(default)]
    data: HashMap<String, String>,
    /// Overrides `data` for the same key inside a run.
    #[serde(default)]
    trigger_data: HashMap<String, String>,
    #[serde(default = "default_true")]
    enabled: bool,
}

fn default_group() -> String { JobKey::DEFAULT_GROUP.into() }
fn default_true() -> bool { true }

impl JobEntry {
    fn into_definition(self) -> Result<JobDefinition> {
        let key = JobKey::new(self.group, self.name);
        let mut def = match (self.every_secs, self.cron) {
            (Some(secs), None) => JobDefinition::interval(key, &self.job_type, secs),
            (None, Some(expr)) => JobDefinition::cron(key, &self.job_type, &expr),
            _ => bail!("job {key} needs exactly one of 'every_secs' or 'cron'"),
        };
        if def.next_run.is_none() {
            bail!("job {} has a trigger that never fires: {:?}", def.key, def.trigger);
        }
        def.concurrent = self.concurrent;
        def.folder = self.folder;
        def.data = self.data;
        for (key, value) in &self.trigger_data {
            def = def.with_trigger_data(key, value);
        }
        def.enabled = self.enabled;
        Ok(def)
    }
}

/// Load job definitions. A missing file means no jobs.
pub fn load_jobs_file(path: &Path) -> Result<Vec<JobDefinition>> {
    if !path.exists() {
        tracing::info!("📂 No jobs file at {}", path.display());
        return Ok(Vec::new());
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    parse_jobs(&content).with_context(|| format!("parsing {}", path.display()))
}

fn parse_jobs(content: &str) -> Result<Vec<JobDefinition>> {
    let file: JobsFile = toml::from_str(content)?;
    file.jobs.into_iter().map(JobEntry::into_definition).collect()
}
