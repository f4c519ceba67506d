//! Scheduler Engine — the main loop that checks and triggers jobs.
//! Uses tokio::interval for ticking; each run executes on a blocking worker
//! thread, bounded by a semaphore.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{Semaphore, watch};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::context::ExecutionContext;
use crate::history::RunHistory;
use crate::host::{ExecutionRecord, JobHostAdapter, RunStatus};
use crate::jobs::{JobCatalog, JobDefinition};
use crate::properties;
use crate::state::ExceptionInfo;
use taskmesh_cluster::ClusterCoordinator;
use taskmesh_core::config::{SchedulerConfig, expand_path};
use taskmesh_core::error::{Result, TaskMeshError};
use taskmesh_core::identity::JobKey;

struct ActiveRun {
    job: JobKey,
    cancel: watch::Sender<bool>,
}

/// Owns job definitions and in-flight runs.
pub struct SchedulerEngine {
    jobs: Mutex<Vec<JobDefinition>>,
    catalog: JobCatalog,
    running: Mutex<HashMap<Uuid, ActiveRun>>,
    paused: AtomicBool,
    permits: Arc<Semaphore>,
    config: SchedulerConfig,
    history: Option<Arc<dyn RunHistory>>,
    cluster: Option<Arc<ClusterCoordinator>>,
}

impl SchedulerEngine {
    pub fn new(config: SchedulerConfig, catalog: JobCatalog) -> Self {
        Self {
            jobs: Mutex::new(Vec::new()),
            catalog,
            running: Mutex::new(HashMap::new()),
            paused: AtomicBool::new(false),
            permits: Arc::new(Semaphore::new(config.max_concurrency.max(1))),
            config,
            history: None,
            cluster: None,
        }
    }

    pub fn with_history(mut self, history: Arc<dyn RunHistory>) -> Self {
        self.history = Some(history);
        self
    }

    /// Consult peers before starting non-concurrent jobs.
    pub fn with_cluster(mut self, cluster: Arc<ClusterCoordinator>) -> Self {
        self.cluster = Some(cluster);
        self
    }

    /// Add a job, replacing any definition with the same key.
    pub fn add_job(&self, def: JobDefinition) -> Result<()> {
        let mut jobs = self.jobs()?;
        tracing::info!("📅 Job added: {} ({})", def.key, def.job_type);
        jobs.retain(|j| j.key != def.key);
        jobs.push(def);
        Ok(())
    }

    /// Stop scheduling `key`. Runs already in flight continue.
    pub fn remove_job(&self, key: &JobKey) -> Result<bool> {
        let mut jobs = self.jobs()?;
        let len = jobs.len();
        jobs.retain(|j| &j.key != key);
        if jobs.len() < len {
            tracing::info!("🗑️ Job removed: {key}");
        }
        Ok(jobs.len() < len)
    }

    pub fn list_jobs(&self) -> Result<Vec<JobDefinition>> {
        Ok(self.jobs()?.clone())
    }

    /// Make a job due on the next tick.
    pub fn trigger_now(&self, key: &JobKey) -> Result<bool> {
        match self.jobs()?.iter_mut().find(|j| &j.key == key) {
            Some(job) => {
                job.next_run = Some(Utc::now());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Resume triggering.
    pub fn start(&self) {
        if self.paused.swap(false, Ordering::SeqCst) {
            tracing::info!("▶️ Scheduler resumed");
        }
    }

    /// Pause triggering. Runs already in flight continue.
    pub fn stop(&self) {
        if !self.paused.swap(true, Ordering::SeqCst) {
            tracing::info!("⏸️ Scheduler paused");
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub fn is_job_running(&self, key: &JobKey) -> Result<bool> {
        Ok(self.running()?.values().any(|r| &r.job == key))
    }

    pub fn running_count(&self) -> Result<usize> {
        Ok(self.running()?.len())
    }

    pub fn running_runs(&self) -> Result<Vec<(Uuid, JobKey)>> {
        Ok(self
            .running()?
            .iter()
            .map(|(id, run)| (*id, run.job.clone()))
            .collect())
    }

    /// Ask a run to stop at its next cooperative checkpoint.
    pub fn cancel(&self, run_id: Uuid) -> Result<bool> {
        match self.running()?.get(&run_id) {
            Some(run) => {
                tracing::info!(%run_id, job = %run.job, "🛑 Cancellation requested");
                Ok(run.cancel.send(true).is_ok())
            }
            None => Ok(false),
        }
    }

    /// Advance every due job and return the definitions to fire.
    fn take_due(&self, now: DateTime<Utc>) -> Result<Vec<JobDefinition>> {
        let mut due = Vec::new();
        for job in self.jobs()?.iter_mut() {
            if job.is_due(now) {
                job.advance(now);
                due.push(job.clone());
            }
        }
        Ok(due)
    }

    async fn is_running_anywhere(&self, key: &JobKey) -> Result<bool> {
        if self.is_job_running(key)? {
            return Ok(true);
        }
        Ok(match &self.cluster {
            Some(cluster) => cluster.is_job_running_in_cluster(key).await,
            None => false,
        })
    }

    /// Fire due jobs. Returns one handle per launched run.
    pub async fn tick(self: &Arc<Self>) -> Result<Vec<JoinHandle<Option<ExecutionRecord>>>> {
        if self.is_paused() {
            return Ok(Vec::new());
        }

        let mut handles = Vec::new();
        for def in self.take_due(Utc::now())? {
            if !def.concurrent && self.is_running_anywhere(&def.key).await? {
                tracing::info!("⏭️ Skipping {}: already running", def.key);
                continue;
            }
            tracing::info!("🔔 Job triggered: {}", def.key);
            handles.push(self.launch(def)?);
        }
        Ok(handles)
    }

    /// Start one run of `def` now. The run counts as running from this call on.
    pub fn launch(self: &Arc<Self>, def: JobDefinition) -> Result<JoinHandle<Option<ExecutionRecord>>> {
        let run_id = Uuid::new_v4();
        let (cancel_tx, cancel_rx) = watch::channel(false);
        self.running()?.insert(
            run_id,
            ActiveRun {
                job: def.key.clone(),
                cancel: cancel_tx,
            },
        );

        let engine = self.clone();
        Ok(tokio::spawn(async move {
            let permit = engine.permits.clone().acquire_owned().await;
            let worker = engine.clone();
            let result = tokio::task::spawn_blocking(move || {
                let _permit = permit;
                worker.execute_run(&def, run_id, cancel_rx)
            })
            .await;

            if let Err(e) = engine.running().map(|mut running| running.remove(&run_id)) {
                tracing::error!(%run_id, "❌ Could not clear finished run: {e}");
            }
            match result {
                Ok(record) => record,
                Err(e) => {
                    tracing::error!(%run_id, "❌ Worker failed: {e}");
                    None
                }
            }
        }))
    }

    fn settings_folder(&self, def: &JobDefinition) -> Option<PathBuf> {
        let folder = def.folder.as_ref()?;
        if folder.is_absolute() {
            Some(folder.clone())
        } else {
            Some(expand_path(&self.config.jobs_dir).join(folder))
        }
    }

    fn execute_run(
        &self,
        def: &JobDefinition,
        run_id: Uuid,
        cancel: watch::Receiver<bool>,
    ) -> Option<ExecutionRecord> {
        let settings = match self.settings_folder(def) {
            Some(folder) => properties::load_job_settings(&folder, &self.config.environment),
            None => Ok(HashMap::new()),
        };
        let (data, settings) = match settings {
            Ok(settings) => (
                properties::resolve(&self.config.global_parameters, &settings, &def.data),
                Ok(settings),
            ),
            Err(e) => (def.data.clone(), Err(e)),
        };

        let context = ExecutionContext::new(def.key.clone(), data, def.trigger_data.clone(), cancel)
            .with_run_id(run_id);
        let host = JobHostAdapter::new(Arc::new(context), self.history.clone());

        let (status, error) = match (settings, self.catalog.get(&def.job_type)) {
            (Err(e), _) => (RunStatus::Fail, Some(ExceptionInfo::new(e.to_string(), ""))),
            (Ok(_), None) => (
                RunStatus::Fail,
                Some(ExceptionInfo::new(format!("Unknown job type '{}'", def.job_type), "")),
            ),
            (Ok(settings), Some(job)) => {
                if let Some(schema) = job.schema() {
                    let resolved = host.context().merged_data().unwrap_or_default();
                    let job_scoped = properties::merge_layers(&[&settings, &def.data]);
                    let bound = schema.bind(&resolved, &job_scoped);
                    if !bound.warnings().is_empty() {
                        let logged = host.state().and_then(|state| {
                            state.with(|s| {
                                for warning in bound.warnings() {
                                    s.append_log(&format!("property warning: {warning}"));
                                }
                            })
                        });
                        if let Err(e) = logged {
                            tracing::warn!(%run_id, "⚠️ Could not log property warnings: {e}");
                        }
                    }
                }

                let broker = host.broker();
                match std::panic::catch_unwind(AssertUnwindSafe(|| job.execute(&broker))) {
                    Ok(Ok(())) => (RunStatus::Success, None),
                    Ok(Err(e))
                        if matches!(e.downcast_ref::<TaskMeshError>(), Some(TaskMeshError::Cancelled)) =>
                    {
                        (RunStatus::Cancelled, None)
                    }
                    Ok(Err(e)) => (
                        RunStatus::Fail,
                        Some(ExceptionInfo::new(e.to_string(), format!("{e:?}"))),
                    ),
                    Err(panic) => (
                        RunStatus::Fail,
                        Some(ExceptionInfo::new(panic_message(panic.as_ref()), "panic")),
                    ),
                }
            }
        };

        match host.finalize(status, error) {
            Ok(record) => Some(record),
            Err(e) => {
                tracing::error!(%run_id, job = %def.key, "❌ Failed to finalize run: {e}");
                None
            }
        }
    }

    fn jobs(&self) -> Result<MutexGuard<'_, Vec<JobDefinition>>> {
        self.jobs
            .lock()
            .map_err(|e| TaskMeshError::Other(format!("Job table lock: {e}")))
    }

    fn running(&self) -> Result<MutexGuard<'_, HashMap<Uuid, ActiveRun>>> {
        self.running
            .lock()
            .map_err(|e| TaskMeshError::Other(format!("Run table lock: {e}")))
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("Job panicked: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("Job panicked: {s}")
    } else {
        "Job panicked".to_string()
    }
}

/// Spawn the scheduler loop. Runs until `shutdown` flips to true.
pub async fn spawn_scheduler(
    engine: Arc<SchedulerEngine>,
    check_interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    tracing::info!("⏰ Scheduler started (check every {}s)", check_interval.as_secs());
    let mut interval = tokio::time::interval(check_interval);

    loop {
        tokio::select! {
            _ = interval.tick() => {},
            _ = shutdown.changed() => { if *shutdown.borrow() { break; } }
        }
        // runs are detached; their records land in history
        if let Err(e) = engine.tick().await {
            tracing::warn!("⚠️ Scheduler tick failed: {e}");
        }
    }

    match engine.running_count() {
        Ok(n) => tracing::info!("⏰ Scheduler stopped ({n} runs still in flight)"),
        Err(e) => tracing::warn!("⏰ Scheduler stopped, run table unavailable: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{Publish, Reporter};
    use crate::jobs::Job;
    use crate::properties::{PropertyKind, PropertySchema};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use taskmesh_cluster::{
        ClusterRegistry, HealthProbe, MemoryRegistry, NodeRecord, PeerClient, PeerError,
    };
    use taskmesh_core::identity::NodeIdentity;

    /// Reports progress and rows, and echoes the `greeting` property into the log.
    struct Reporting;

    impl Job for Reporting {
        fn execute(&self, broker: &dyn Publish) -> anyhow::Result<()> {
            let reporter = Reporter::new(broker);
            reporter.progress(40)?;
            reporter.add_rows(3)?;
            reporter.add_rows(4)?;
            reporter.log(&format!("greeting={}", reporter.data("greeting")?))?;
            Ok(())
        }
    }

    struct Failing;

    impl Job for Failing {
        fn execute(&self, _broker: &dyn Publish) -> anyhow::Result<()> {
            anyhow::bail!("source table missing")
        }
    }

    struct Panicking;

    impl Job for Panicking {
        fn execute(&self, _broker: &dyn Publish) -> anyhow::Result<()> {
            panic!("index out of range")
        }
    }

    /// Spins until cancelled, then leaves through the checkpoint.
    struct WaitForCancel;

    impl Job for WaitForCancel {
        fn execute(&self, broker: &dyn Publish) -> anyhow::Result<()> {
            let reporter = Reporter::new(broker);
            while !reporter.is_cancelled()? {
                std::thread::sleep(Duration::from_millis(5));
            }
            reporter.checkpoint()?;
            Ok(())
        }
    }

    #[derive(Default)]
    struct Counting(AtomicUsize);

    impl Job for Arc<Counting> {
        fn execute(&self, _broker: &dyn Publish) -> anyhow::Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Typed;

    impl Job for Typed {
        fn execute(&self, _broker: &dyn Publish) -> anyhow::Result<()> {
            Ok(())
        }

        fn schema(&self) -> Option<PropertySchema> {
            Some(PropertySchema::new().required("batch_size", PropertyKind::Integer))
        }
    }

    fn config() -> SchedulerConfig {
        let mut config = SchedulerConfig::default();
        config
            .global_parameters
            .insert("greeting".into(), "hello".into());
        config
    }

    fn engine_with(config: SchedulerConfig) -> Arc<SchedulerEngine> {
        let mut catalog = JobCatalog::new();
        catalog.register("reporting", Arc::new(Reporting));
        catalog.register("failing", Arc::new(Failing));
        catalog.register("panicking", Arc::new(Panicking));
        catalog.register("wait", Arc::new(WaitForCancel));
        catalog.register("typed", Arc::new(Typed));
        Arc::new(SchedulerEngine::new(config, catalog))
    }

    fn due(name: &str, job_type: &str) -> JobDefinition {
        let mut def = JobDefinition::interval(JobKey::named(name), job_type, 3600);
        def.next_run = Some(Utc::now() - chrono::Duration::seconds(1));
        def
    }

    async fn run_once(engine: &Arc<SchedulerEngine>, def: JobDefinition) -> ExecutionRecord {
        engine.launch(def).unwrap().await.unwrap().unwrap()
    }

    async fn wait_until(mut check: impl FnMut() -> bool) {
        for _ in 0..400 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn test_successful_run_is_finalized() {
        let engine = engine_with(config());
        let record = run_once(&engine, due("report", "reporting")).await;
        assert_eq!(record.status, RunStatus::Success);
        assert_eq!(record.progress, 100);
        assert_eq!(record.effected_rows, Some(7));
        assert_eq!(record.log, "greeting=hello\n");
        assert_eq!(engine.running_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_job_data_overrides_global_parameters() {
        let engine = engine_with(config());
        let def = due("report", "reporting").with_data("greeting", "hi");
        let record = run_once(&engine, def).await;
        assert_eq!(record.log, "greeting=hi\n");
    }

    #[tokio::test]
    async fn test_failures_and_panics_are_recorded() {
        let engine = engine_with(config());

        let record = run_once(&engine, due("f", "failing")).await;
        assert_eq!(record.status, RunStatus::Fail);
        assert_eq!(record.exceptions[0].message, "source table missing");

        let record = run_once(&engine, due("p", "panicking")).await;
        assert_eq!(record.status, RunStatus::Fail);
        assert!(record.exceptions[0].message.contains("index out of range"));
        assert_eq!(record.progress, 100);
    }

    #[tokio::test]
    async fn test_unknown_job_type_fails_run() {
        let engine = engine_with(config());
        let record = run_once(&engine, due("x", "nope")).await;
        assert_eq!(record.status, RunStatus::Fail);
        assert!(record.exceptions[0].message.contains("nope"));
    }

    #[tokio::test]
    async fn test_bad_settings_fail_only_that_run() {
        let dir = std::env::temp_dir().join(format!("taskmesh-engine-{}", Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("settings.toml"), "greeting = [1, 2]\n").unwrap();

        let engine = engine_with(config());
        let record = run_once(&engine, due("bad", "reporting").with_folder(&dir)).await;
        assert_eq!(record.status, RunStatus::Fail);
        assert_eq!(record.log, "");

        let record = run_once(&engine, due("good", "reporting")).await;
        assert_eq!(record.status, RunStatus::Success);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_environment_settings_layer() {
        let dir = std::env::temp_dir().join(format!("taskmesh-engine-{}", Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("settings.toml"), "greeting = \"shared\"\n").unwrap();
        std::fs::write(dir.join("settings.production.toml"), "greeting = \"prod\"\n").unwrap();

        let engine = engine_with(config());
        let record = run_once(&engine, due("env", "reporting").with_folder(&dir)).await;
        assert_eq!(record.log, "greeting=prod\n");
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_schema_warnings_land_in_run_log() {
        let engine = engine_with(config());
        let def = due("typed", "typed").with_data("batch_size", "lots");
        let record = run_once(&engine, def).await;
        assert_eq!(record.status, RunStatus::Success);
        assert!(record.log.contains("property warning"));
        assert!(record.log.contains("batch_size"));
    }

    #[tokio::test]
    async fn test_cancel_stops_run_cooperatively() {
        let engine = engine_with(config());
        let handle = engine.launch(due("w", "wait")).unwrap();
        let runs = engine.running_runs().unwrap();
        assert_eq!(runs.len(), 1);

        assert!(engine.cancel(runs[0].0).unwrap());
        let record = handle.await.unwrap().unwrap();
        assert_eq!(record.status, RunStatus::Cancelled);
        assert!(!engine.cancel(runs[0].0).unwrap());
    }

    #[tokio::test]
    async fn test_tick_fires_due_jobs_and_advances() {
        let counter = Arc::new(Counting::default());
        let mut catalog = JobCatalog::new();
        catalog.register("count", Arc::new(counter.clone()));
        let engine = Arc::new(SchedulerEngine::new(config(), catalog));
        engine.add_job(due("c", "count")).unwrap();

        for handle in engine.tick().await.unwrap() {
            handle.await.unwrap();
        }
        assert!(engine.tick().await.unwrap().is_empty());
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
        assert_eq!(engine.list_jobs().unwrap()[0].run_count, 1);
    }

    #[tokio::test]
    async fn test_paused_engine_does_not_fire() {
        let engine = engine_with(config());
        engine.add_job(due("r", "reporting")).unwrap();
        engine.stop();
        assert!(engine.is_paused());
        assert!(engine.tick().await.unwrap().is_empty());

        engine.start();
        assert_eq!(engine.tick().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_non_concurrent_job_skips_while_running() {
        let engine = engine_with(config());
        let key = JobKey::named("w");
        engine.add_job(due("w", "wait").non_concurrent()).unwrap();

        let first = engine.tick().await.unwrap();
        assert_eq!(first.len(), 1);
        assert!(engine.is_job_running(&key).unwrap());

        assert!(engine.trigger_now(&key).unwrap());
        assert!(engine.tick().await.unwrap().is_empty());

        for (run_id, _) in engine.running_runs().unwrap() {
            engine.cancel(run_id).unwrap();
        }
        for handle in first {
            handle.await.unwrap();
        }
        wait_until(|| !engine.is_job_running(&key).unwrap()).await;
    }

    #[tokio::test]
    async fn test_concurrent_job_may_overlap() {
        let engine = engine_with(config());
        let key = JobKey::named("w");
        engine.add_job(due("w", "wait")).unwrap();

        let mut handles = engine.tick().await.unwrap();
        engine.trigger_now(&key).unwrap();
        handles.extend(engine.tick().await.unwrap());
        assert_eq!(handles.len(), 2);

        for (run_id, _) in engine.running_runs().unwrap() {
            engine.cancel(run_id).unwrap();
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap().status, RunStatus::Cancelled);
        }
    }

    /// Every peer claims every job is running.
    struct BusyPeers;

    #[async_trait]
    impl PeerClient for BusyPeers {
        async fn health_check(&self, _peer: &NodeRecord) -> std::result::Result<(), PeerError> {
            Ok(())
        }
        async fn start_scheduler(&self, _peer: &NodeRecord) -> std::result::Result<(), PeerError> {
            Ok(())
        }
        async fn stop_scheduler(&self, _peer: &NodeRecord) -> std::result::Result<(), PeerError> {
            Ok(())
        }
        async fn is_job_running(&self, _peer: &NodeRecord, _job: &JobKey) -> std::result::Result<bool, PeerError> {
            Ok(true)
        }
    }

    #[tokio::test]
    async fn test_non_concurrent_job_skips_when_peer_runs_it() {
        let me = NodeIdentity::new("node-a", 2306, 12306);
        let peer = NodeIdentity::new("node-b", 2306, 12306);
        let registry = Arc::new(MemoryRegistry::new());
        registry.upsert_node(&NodeRecord::joining(&me, Utc::now())).unwrap();
        registry.upsert_node(&NodeRecord::joining(&peer, Utc::now())).unwrap();

        let probe = HealthProbe::new(Arc::new(BusyPeers), 1, Duration::ZERO);
        let cluster = Arc::new(ClusterCoordinator::new(me, registry, probe, Duration::from_secs(45)));

        let mut catalog = JobCatalog::new();
        catalog.register("reporting", Arc::new(Reporting));
        let engine = Arc::new(SchedulerEngine::new(config(), catalog).with_cluster(cluster));

        engine.add_job(due("exclusive", "reporting").non_concurrent()).unwrap();
        assert!(engine.tick().await.unwrap().is_empty());

        // concurrent jobs ignore peers
        engine.add_job(due("shared", "reporting")).unwrap();
        assert_eq!(engine.tick().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_scheduler_loop_stops_on_shutdown() {
        let engine = engine_with(config());
        let (tx, rx) = watch::channel(false);
        let task = tokio::spawn(spawn_scheduler(engine, Duration::from_millis(10), rx));
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_removed_job_no_longer_fires() {
        let engine = engine_with(config());
        let key = JobKey::named("r");
        engine.add_job(due("r", "reporting")).unwrap();

        assert!(engine.remove_job(&key).unwrap());
        assert!(!engine.remove_job(&key).unwrap());
        assert!(engine.list_jobs().unwrap().is_empty());
        assert!(engine.tick().await.unwrap().is_empty());
        assert!(!engine.trigger_now(&key).unwrap());
    }

    #[tokio::test]
    async fn test_poisoned_tables_surface_errors() {
        let engine = engine_with(config());
        let poisoner = engine.clone();
        std::thread::spawn(move || {
            let _jobs = poisoner.jobs.lock().unwrap();
            let _running = poisoner.running.lock().unwrap();
            panic!("poison both tables");
        })
        .join()
        .unwrap_err();

        assert!(matches!(engine.add_job(due("r", "reporting")), Err(TaskMeshError::Other(_))));
        assert!(engine.list_jobs().is_err());
        assert!(engine.tick().await.is_err());
        assert!(engine.is_job_running(&JobKey::named("r")).is_err());
        assert!(engine.launch(due("r", "reporting")).is_err());
    }
}
