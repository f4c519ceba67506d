//! State broker — the only door from job code back into the host.
//!
//! Job code calls `publish(channel, message)` with a channel tag from
//! [`channels`] and a JSON payload; the reply is an optional JSON string.
//! Channels are parsed into a closed [`BrokerRequest`] union. Unknown channels
//! map to [`BrokerRequest::Unknown`] and return `None`, so jobs built against
//! a newer host keep working.

use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;

use crate::context::ExecutionContext;
use crate::state::ExceptionInfo;
use taskmesh_core::error::{Result, TaskMeshError};

/// Channel tags.
pub mod channels {
    pub const PUT_JOB_DATA: &str = "put-job-data";
    pub const PUT_TRIGGER_DATA: &str = "put-trigger-data";
    pub const ADD_EXCEPTION: &str = "add-exception";
    pub const APPEND_LOG: &str = "append-log";
    pub const GET_LOG: &str = "get-log";
    pub const IS_CANCELLED: &str = "is-cancelled";
    pub const FAIL_IF_CANCELLED: &str = "fail-if-cancelled";
    pub const GET_DATA: &str = "get-data";
    pub const HAS_DATA: &str = "has-data";
    pub const GET_EFFECTED_ROWS: &str = "get-effected-rows";
    pub const INCREASE_EFFECTED_ROWS: &str = "increase-effected-rows";
    pub const SET_EFFECTED_ROWS: &str = "set-effected-rows";
    pub const SET_PROGRESS: &str = "set-progress";
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerRequest {
    PutJobData { key: String, value: String },
    PutTriggerData { key: String, value: String },
    AddException(ExceptionInfo),
    AppendLog(String),
    GetLog,
    IsCancelled,
    FailIfCancelled,
    GetData(String),
    HasData(String),
    GetEffectedRows,
    IncreaseEffectedRows(i64),
    SetEffectedRows(i64),
    SetProgress(i64),
    Unknown(String),
}

#[derive(Deserialize)]
struct DataEntry {
    key: String,
    value: serde_json::Value,
}

impl DataEntry {
    /// Strings are stored verbatim, anything else as its JSON text.
    fn into_pair(self) -> (String, String) {
        let value = match self.value {
            serde_json::Value::String(s) => s,
            other => other.to_string(),
        };
        (self.key, value)
    }
}

fn payload<T: DeserializeOwned>(channel: &str, message: &str) -> Result<T> {
    serde_json::from_str(message).map_err(|e| TaskMeshError::protocol(channel, e))
}

impl BrokerRequest {
    /// Decode a (channel, message) pair. Malformed payloads on known channels
    /// are protocol errors.
    pub fn parse(channel: &str, message: &str) -> Result<Self> {
        use channels::*;
        let request = match channel {
            PUT_JOB_DATA => {
                let (key, value) = payload::<DataEntry>(channel, message)?.into_pair();
                Self::PutJobData { key, value }
            }
            PUT_TRIGGER_DATA => {
                let (key, value) = payload::<DataEntry>(channel, message)?.into_pair();
                Self::PutTriggerData { key, value }
            }
            ADD_EXCEPTION => Self::AddException(payload(channel, message)?),
            APPEND_LOG => Self::AppendLog(payload(channel, message)?),
            GET_LOG => Self::GetLog,
            IS_CANCELLED => Self::IsCancelled,
            FAIL_IF_CANCELLED => Self::FailIfCancelled,
            GET_DATA => Self::GetData(payload(channel, message)?),
            HAS_DATA => Self::HasData(payload(channel, message)?),
            GET_EFFECTED_ROWS => Self::GetEffectedRows,
            INCREASE_EFFECTED_ROWS => Self::IncreaseEffectedRows(payload(channel, message)?),
            SET_EFFECTED_ROWS => Self::SetEffectedRows(payload(channel, message)?),
            SET_PROGRESS => Self::SetProgress(payload(channel, message)?),
            other => Self::Unknown(other.to_string()),
        };
        Ok(request)
    }
}

/// The boundary job code is compiled against.
pub trait Publish: Send + Sync {
    fn publish(&self, channel: &str, message: &str) -> Result<Option<String>>;
}

/// Broker bound to exactly one run.
#[derive(Clone)]
pub struct StateBroker {
    context: Arc<ExecutionContext>,
}

impl StateBroker {
    pub fn new(context: Arc<ExecutionContext>) -> Self {
        Self { context }
    }

    pub fn context(&self) -> &Arc<ExecutionContext> {
        &self.context
    }

    pub fn dispatch(&self, request: BrokerRequest) -> Result<Option<String>> {
        let ctx = &self.context;
        let reply = match request {
            BrokerRequest::PutJobData { key, value } => {
                ctx.put_job_data(key, value)?;
                None
            }
            BrokerRequest::PutTriggerData { key, value } => {
                ctx.put_trigger_data(key, value)?;
                None
            }
            BrokerRequest::AddException(exception) => {
                ctx.state()?.with(|s| s.add_exception(exception))?;
                None
            }
            BrokerRequest::AppendLog(line) => {
                ctx.state()?.with(|s| s.append_log(&line))?;
                None
            }
            BrokerRequest::GetLog => {
                let log = ctx.state()?.with(|s| s.log().to_string())?;
                Some(serde_json::to_string(&log)?)
            }
            BrokerRequest::IsCancelled => Some(serde_json::to_string(&ctx.is_cancelled())?),
            BrokerRequest::FailIfCancelled => {
                if ctx.is_cancelled() {
                    return Err(TaskMeshError::Cancelled);
                }
                None
            }
            BrokerRequest::GetData(key) => match ctx.get_data(&key)? {
                Some(value) => Some(serde_json::to_string(&value)?),
                None => return Err(TaskMeshError::NotFound(format!("data key '{key}'"))),
            },
            BrokerRequest::HasData(key) => Some(serde_json::to_string(&ctx.has_data(&key)?)?),
            BrokerRequest::GetEffectedRows => {
                let rows = ctx.state()?.with(|s| s.effected_rows())?;
                Some(serde_json::to_string(&rows)?)
            }
            BrokerRequest::IncreaseEffectedRows(delta) => {
                let rows = ctx.state()?.with(|s| s.increase_effected_rows(delta))?;
                Some(serde_json::to_string(&rows)?)
            }
            BrokerRequest::SetEffectedRows(value) => {
                ctx.state()?.with(|s| s.set_effected_rows(value))?;
                None
            }
            BrokerRequest::SetProgress(value) => {
                ctx.state()?.with(|s| s.set_progress(value))?;
                None
            }
            BrokerRequest::Unknown(channel) => {
                tracing::debug!(run_id = %ctx.run_id(), "❔ Ignoring unknown broker channel '{channel}'");
                None
            }
        };
        Ok(reply)
    }
}

impl Publish for StateBroker {
    fn publish(&self, channel: &str, message: &str) -> Result<Option<String>> {
        self.dispatch(BrokerRequest::parse(channel, message)?)
    }
}

/// Typed convenience over any [`Publish`] implementation, for job authors.
pub struct Reporter<'a> {
    inner: &'a dyn Publish,
}

impl<'a> Reporter<'a> {
    pub fn new(inner: &'a dyn Publish) -> Self {
        Self { inner }
    }

    fn call(&self, channel: &str, message: serde_json::Value) -> Result<Option<String>> {
        self.inner.publish(channel, &message.to_string())
    }

    fn decode<T: DeserializeOwned>(channel: &str, reply: Option<String>) -> Result<T> {
        let reply = reply.ok_or_else(|| TaskMeshError::protocol(channel, "missing reply"))?;
        serde_json::from_str(&reply).map_err(|e| TaskMeshError::protocol(channel, e))
    }

    pub fn log(&self, line: &str) -> Result<()> {
        self.call(channels::APPEND_LOG, line.into()).map(|_| ())
    }

    pub fn progress(&self, value: u8) -> Result<()> {
        self.call(channels::SET_PROGRESS, value.into()).map(|_| ())
    }

    pub fn add_rows(&self, delta: i64) -> Result<Option<i64>> {
        let reply = self.call(channels::INCREASE_EFFECTED_ROWS, delta.into())?;
        Self::decode(channels::INCREASE_EFFECTED_ROWS, reply)
    }

    pub fn exception(&self, message: &str, detail: &str) -> Result<()> {
        let body = serde_json::json!({"message": message, "detail": detail});
        self.call(channels::ADD_EXCEPTION, body).map(|_| ())
    }

    pub fn data(&self, key: &str) -> Result<String> {
        let reply = self.call(channels::GET_DATA, key.into())?;
        Self::decode(channels::GET_DATA, reply)
    }

    pub fn is_cancelled(&self) -> Result<bool> {
        let reply = self.call(channels::IS_CANCELLED, serde_json::Value::Null)?;
        Self::decode(channels::IS_CANCELLED, reply)
    }

    /// Cooperative checkpoint: errors with `Cancelled` once the host asked the run to stop.
    pub fn checkpoint(&self) -> Result<()> {
        self.call(channels::FAIL_IF_CANCELLED, serde_json::Value::Null)
            .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use taskmesh_core::identity::JobKey;
    use tokio::sync::watch;

    fn broker_with(data: &[(&str, &str)]) -> (StateBroker, watch::Sender<bool>) {
        let (tx, rx) = watch::channel(false);
        let data = data.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        let ctx = ExecutionContext::new(JobKey::named("j"), data, HashMap::new(), rx);
        (StateBroker::new(Arc::new(ctx)), tx)
    }

    #[test]
    fn test_parse_known_and_unknown_channels() {
        assert_eq!(
            BrokerRequest::parse("set-progress", "42").unwrap(),
            BrokerRequest::SetProgress(42)
        );
        assert_eq!(
            BrokerRequest::parse("put-job-data", r#"{"key":"k","value":7}"#).unwrap(),
            BrokerRequest::PutJobData { key: "k".into(), value: "7".into() }
        );
        assert_eq!(
            BrokerRequest::parse("teleport", "{}").unwrap(),
            BrokerRequest::Unknown("teleport".into())
        );
    }

    #[test]
    fn test_malformed_payload_is_protocol_error() {
        let err = BrokerRequest::parse("set-progress", "\"lots\"").unwrap_err();
        assert!(matches!(err, TaskMeshError::Protocol { ref channel, .. } if channel == "set-progress"));
    }

    #[test]
    fn test_unknown_channel_returns_none() {
        let (broker, _tx) = broker_with(&[]);
        assert_eq!(broker.publish("future-channel", "whatever").unwrap(), None);
    }

    #[test]
    fn test_get_data_missing_is_not_found_and_has_data_false() {
        let (broker, _tx) = broker_with(&[("present", "1")]);
        let err = broker.publish("get-data", "\"absent\"").unwrap_err();
        assert!(matches!(err, TaskMeshError::NotFound(_)));
        assert_eq!(broker.publish("has-data", "\"absent\"").unwrap().as_deref(), Some("false"));
        assert_eq!(broker.publish("get-data", "\"present\"").unwrap().as_deref(), Some("\"1\""));
    }

    #[test]
    fn test_trigger_data_overrides_job_data() {
        let (broker, _tx) = broker_with(&[("k", "job")]);
        broker.publish("put-trigger-data", r#"{"key":"k","value":"trigger"}"#).unwrap();
        broker.publish("put-job-data", r#"{"key":"k","value":"job2"}"#).unwrap();
        assert_eq!(broker.publish("get-data", "\"k\"").unwrap().as_deref(), Some("\"trigger\""));
    }

    #[test]
    fn test_log_and_rows_round_trip_through_state() {
        let (broker, _tx) = broker_with(&[]);
        assert_eq!(broker.publish("get-effected-rows", "").unwrap().as_deref(), Some("null"));
        broker.publish("append-log", "\"started\"").unwrap();
        broker.publish("set-effected-rows", "10").unwrap();
        assert_eq!(broker.publish("increase-effected-rows", "5").unwrap().as_deref(), Some("15"));
        assert_eq!(
            broker.publish("get-log", "").unwrap().as_deref(),
            Some("\"started\\n\"")
        );
    }

    #[test]
    fn test_cancellation_channels() {
        let (broker, tx) = broker_with(&[]);
        assert_eq!(broker.publish("is-cancelled", "").unwrap().as_deref(), Some("false"));
        assert!(broker.publish("fail-if-cancelled", "").unwrap().is_none());

        tx.send(true).unwrap();
        assert_eq!(broker.publish("is-cancelled", "").unwrap().as_deref(), Some("true"));
        assert!(matches!(
            broker.publish("fail-if-cancelled", "").unwrap_err(),
            TaskMeshError::Cancelled
        ));
    }

    #[test]
    fn test_concurrent_increments_from_job_threads() {
        let (broker, _tx) = broker_with(&[]);
        let deltas: Vec<i64> = (1..=12).collect();
        std::thread::scope(|scope| {
            for d in &deltas {
                let broker = broker.clone();
                scope.spawn(move || {
                    for _ in 0..50 {
                        broker.publish("increase-effected-rows", &d.to_string()).unwrap();
                    }
                });
            }
        });
        let total: i64 = deltas.iter().map(|d| d * 50).sum();
        assert_eq!(
            broker.publish("get-effected-rows", "").unwrap(),
            Some(total.to_string())
        );
    }

    #[test]
    fn test_reporter_helpers() {
        let (broker, _tx) = broker_with(&[("target", "db1")]);
        let reporter = Reporter::new(&broker);
        reporter.log("hello").unwrap();
        reporter.progress(30).unwrap();
        assert_eq!(reporter.add_rows(4).unwrap(), Some(4));
        reporter.exception("boom", "stack").unwrap();
        assert_eq!(reporter.data("target").unwrap(), "db1");
        assert!(!reporter.is_cancelled().unwrap());
        reporter.checkpoint().unwrap();

        let state = broker.context().state().unwrap().snapshot().unwrap();
        assert_eq!(state.progress(), 30);
        assert_eq!(state.exceptions().len(), 1);
        assert_eq!(state.log(), "hello\n");
    }
}
