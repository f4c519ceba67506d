//! Peer control client and the retrying health probe.
//!
//! Every call is bounded: a per-request timeout, a fixed number of attempts,
//! and a fixed backoff between attempts. Failures are logged with the peer's
//! address and never panic the caller.

use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::registry::NodeRecord;
use crate::server::routes;
use taskmesh_core::identity::JobKey;

/// Why a remote control call failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PeerError {
    /// Connection refused, DNS failure, timeout.
    #[error("unreachable: {0}")]
    Unreachable(String),
    /// The peer answered but refused the call.
    #[error("rejected with HTTP {0}")]
    Rejected(u16),
    #[error("bad response: {0}")]
    BadResponse(String),
}

impl PeerError {
    /// The peer's control server answered, so the process is up.
    pub fn is_reachable(&self) -> bool {
        !matches!(self, PeerError::Unreachable(_))
    }
}

/// One attempt of each remote control operation.
#[async_trait]
pub trait PeerClient: Send + Sync {
    async fn health_check(&self, peer: &NodeRecord) -> Result<(), PeerError>;

    async fn start_scheduler(&self, peer: &NodeRecord) -> Result<(), PeerError>;

    async fn stop_scheduler(&self, peer: &NodeRecord) -> Result<(), PeerError>;

    async fn is_job_running(&self, peer: &NodeRecord, job: &JobKey) -> Result<bool, PeerError>;
}

/// HTTP/JSON client against the peer's control server.
pub struct HttpPeerClient {
    http: reqwest::Client,
}

impl HttpPeerClient {
    pub fn new(timeout: Duration) -> Self {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { http }
    }

    async fn send(&self, req: reqwest::RequestBuilder) -> Result<reqwest::Response, PeerError> {
        let resp = req
            .send()
            .await
            .map_err(|e| PeerError::Unreachable(e.to_string()))?;
        if resp.status().is_success() {
            Ok(resp)
        } else {
            Err(PeerError::Rejected(resp.status().as_u16()))
        }
    }
}

#[async_trait]
impl PeerClient for HttpPeerClient {
    async fn health_check(&self, peer: &NodeRecord) -> Result<(), PeerError> {
        let url = format!("{}{}", peer.control_url(), routes::HEALTH);
        self.send(self.http.get(url)).await.map(|_| ())
    }

    async fn start_scheduler(&self, peer: &NodeRecord) -> Result<(), PeerError> {
        let url = format!("{}{}", peer.control_url(), routes::START_SCHEDULER);
        self.send(self.http.post(url)).await.map(|_| ())
    }

    async fn stop_scheduler(&self, peer: &NodeRecord) -> Result<(), PeerError> {
        let url = format!("{}{}", peer.control_url(), routes::STOP_SCHEDULER);
        self.send(self.http.post(url)).await.map(|_| ())
    }

    async fn is_job_running(&self, peer: &NodeRecord, job: &JobKey) -> Result<bool, PeerError> {
        let url = job_running_url(peer, job)?;
        let resp = self.send(self.http.get(url)).await?;
        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| PeerError::BadResponse(e.to_string()))?;
        body["running"]
            .as_bool()
            .ok_or_else(|| PeerError::BadResponse(format!("missing 'running' in {body}")))
    }
}

fn job_running_url(peer: &NodeRecord, job: &JobKey) -> Result<reqwest::Url, PeerError> {
    let bad_url =
        |reason: String| PeerError::Unreachable(format!("bad control url for {}: {reason}", peer.key()));
    let mut url =
        reqwest::Url::parse(&peer.control_url()).map_err(|e| bad_url(e.to_string()))?;
    url.path_segments_mut()
        .map_err(|_| bad_url("cannot carry a path".into()))?
        .pop_if_empty()
        .extend(routes::job_running_segments(job));
    Ok(url)
}

/// Retrying wrapper over a [`PeerClient`].
#[derive(Clone)]
pub struct HealthProbe {
    client: Arc<dyn PeerClient>,
    attempts: u32,
    backoff: Duration,
}

impl HealthProbe {
    pub fn new(client: Arc<dyn PeerClient>, attempts: u32, backoff: Duration) -> Self {
        Self {
            client,
            attempts: attempts.max(1),
            backoff,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Liveness probe. Ok once any attempt succeeds; the last error otherwise.
    pub async fn health_check(&self, peer: &NodeRecord) -> Result<(), PeerError> {
        self.retry(peer, "health-check", || self.client.health_check(peer))
            .await
    }

    pub async fn start_scheduler(&self, peer: &NodeRecord) -> Result<(), PeerError> {
        self.retry(peer, "start-scheduler", || self.client.start_scheduler(peer))
            .await
    }

    pub async fn stop_scheduler(&self, peer: &NodeRecord) -> Result<(), PeerError> {
        self.retry(peer, "stop-scheduler", || self.client.stop_scheduler(peer))
            .await
    }

    pub async fn is_job_running(&self, peer: &NodeRecord, job: &JobKey) -> Result<bool, PeerError> {
        self.retry(peer, "is-job-running", || self.client.is_job_running(peer, job))
            .await
    }

    async fn retry<T, F, Fut>(&self, peer: &NodeRecord, op: &str, call: F) -> Result<T, PeerError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, PeerError>>,
    {
        let mut attempt = 1;
        loop {
            match call().await {
                Ok(value) => {
                    if attempt > 1 {
                        tracing::debug!(
                            peer = %peer.key(),
                            attempt,
                            "🔁 {op} succeeded after retry"
                        );
                    }
                    return Ok(value);
                }
                Err(e) => {
                    tracing::warn!(
                        peer = %peer.key(),
                        instance_id = %peer.instance_id,
                        attempt,
                        max_attempts = self.attempts,
                        "⚠️ {op} failed: {e}"
                    );
                    if attempt >= self.attempts {
                        return Err(e);
                    }
                    attempt += 1;
                    tokio::time::sleep(self.backoff).await;
                }
            }
        }
    }
}
