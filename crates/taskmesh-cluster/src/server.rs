//! Peer control server, bound to the cluster port.

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;

use taskmesh_core::error::{Result, TaskMeshError};
use taskmesh_core::identity::JobKey;

/// Control paths shared by the server and [`crate::HttpPeerClient`].
pub mod routes {
    use taskmesh_core::identity::JobKey;

    pub const HEALTH: &str = "/cluster/health";
    pub const START_SCHEDULER: &str = "/cluster/scheduler/start";
    pub const STOP_SCHEDULER: &str = "/cluster/scheduler/stop";
    pub const JOB_RUNNING: &str = "/cluster/jobs/{group}/{name}/running";

    /// Raw path segments of [`JOB_RUNNING`] for `job`. Callers must
    /// percent-encode them, since group and name may contain `/`, `?` or `#`.
    pub fn job_running_segments(job: &JobKey) -> [&str; 5] {
        ["cluster", "jobs", job.group.as_str(), job.name.as_str(), "running"]
    }
}

/// What a node exposes to its peers.
pub trait SchedulerControl: Send + Sync {
    /// False while the node is in standby.
    fn is_healthy(&self) -> bool;

    fn start(&self);

    fn stop(&self);

    fn is_job_running(&self, job: &JobKey) -> Result<bool>;
}

async fn health(State(control): State<Arc<dyn SchedulerControl>>) -> (StatusCode, Json<serde_json::Value>) {
    if control.is_healthy() {
        (StatusCode::OK, Json(serde_json::json!({"ok": true})))
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({"ok": false, "error": "node is in standby"})),
        )
    }
}

async fn start_scheduler(State(control): State<Arc<dyn SchedulerControl>>) -> Json<serde_json::Value> {
    tracing::info!("▶️ Scheduler start requested by peer");
    control.start();
    Json(serde_json::json!({"ok": true}))
}

async fn stop_scheduler(State(control): State<Arc<dyn SchedulerControl>>) -> Json<serde_json::Value> {
    tracing::info!("⏸️ Scheduler stop requested by peer");
    control.stop();
    Json(serde_json::json!({"ok": true}))
}

async fn job_running(
    State(control): State<Arc<dyn SchedulerControl>>,
    Path((group, name)): Path<(String, String)>,
) -> (StatusCode, Json<serde_json::Value>) {
    let job = JobKey::new(group, name);
    match control.is_job_running(&job) {
        Ok(running) => (StatusCode::OK, Json(serde_json::json!({"running": running}))),
        Err(e) => {
            tracing::warn!("⚠️ is-job-running({job}) failed locally: {e}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({"error": e.to_string()})),
            )
        }
    }
}

/// Build the control router.
pub fn build_router(control: Arc<dyn SchedulerControl>) -> Router {
    Router::new()
        .route(routes::HEALTH, get(health))
        .route(routes::START_SCHEDULER, post(start_scheduler))
        .route(routes::STOP_SCHEDULER, post(stop_scheduler))
        .route(routes::JOB_RUNNING, get(job_running))
        .layer(TraceLayer::new_for_http())
        .with_state(control)
}

/// Serve the control router until `shutdown` flips to true.
pub async fn serve(
    control: Arc<dyn SchedulerControl>,
    addr: SocketAddr,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("🛰️ Cluster control server listening on {addr}");
    axum::serve(listener, build_router(control))
        .with_graceful_shutdown(async move {
            while shutdown.changed().await.is_ok() {
                if *shutdown.borrow() {
                    break;
                }
            }
        })
        .await
        .map_err(|e| TaskMeshError::Other(format!("Control server: {e}")))
}
