//! Wire contexts carried between coordinator and participants.
//!
//! All three contexts travel as base64(JSON) request headers. The control
//! context describes the whole transaction, the stage context one outbound
//! call, and the executor context is the durable saga record that also rides
//! along on recovery-injected requests.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Stage context header: coordinator -> participant, one per stage call.
pub const HEADER_STAGE_CONTEXT: &str = "X-Tx-Stage-Context";
/// Optional control context header on the root request.
pub const HEADER_CONTROL_CONTEXT: &str = "X-Tx-Control-Context";
/// Executor context header, present only on recovery-injected requests.
pub const HEADER_EXECUTOR_CONTEXT: &str = "X-Tx-Executor-Context";
/// Opaque correlation id.
pub const HEADER_LOGGER_ID: &str = "X-Tx-Logger-ID";

/// Logger id used when the client did not supply one.
pub const DEFAULT_LOGGER_ID: &str = "default";

#[derive(Debug, thiserror::Error)]
pub enum ContextError {
    #[error("failed to decode tx context: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("failed to decode tx context: {0}")]
    Json(#[from] serde_json::Error),
}

fn encode<T: Serialize>(value: &T) -> String {
    // Serialization of these plain-data structs cannot fail.
    let bytes = serde_json::to_vec(value).unwrap_or_default();
    BASE64.encode(bytes)
}

fn decode<T: for<'de> Deserialize<'de>>(encoded: &str) -> Result<T, ContextError> {
    let bytes = BASE64.decode(encoded)?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Transaction-wide control data, set once by the coordinator.
///
/// `service` names the coordinator (the origin every participant orders by)
/// and `partition` is computed once from the root request's key-set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlContext {
    pub partition: u64,
    pub service: String,
    pub attrs: Vec<String>,
    pub dry_run: bool,
    pub logger_id: String,
}

impl ControlContext {
    pub fn encode(&self) -> String {
        encode(self)
    }

    pub fn decode(encoded: &str) -> Result<Self, ContextError> {
        decode(encoded)
    }
}

/// Per-call envelope telling a participant which (partition, origin service,
/// timestamp) slot this request occupies.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StageContext {
    pub partition: u64,
    pub service: String,
    pub timestamp: u64,
    pub attrs: Vec<String>,
    pub dry_run: bool,
}

impl StageContext {
    pub fn encode(&self) -> String {
        encode(self)
    }

    pub fn decode(encoded: &str) -> Result<Self, ContextError> {
        decode(encoded)
    }
}

/// Executor lifecycle states.
///
/// Aborted and Completed are terminal; everything else is re-driven by
/// recovery. Persisted (and serialized in checkpoints) as the integers
/// 0..=5 in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum ExecStatus {
    Pending = 0,
    Committed = 1,
    Aborted = 2,
    Rollback = 3,
    ForceComplete = 4,
    Completed = 5,
}

impl ExecStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, ExecStatus::Aborted | ExecStatus::Completed)
    }
}

impl From<ExecStatus> for u8 {
    fn from(status: ExecStatus) -> u8 {
        status as u8
    }
}

impl TryFrom<u8> for ExecStatus {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(ExecStatus::Pending),
            1 => Ok(ExecStatus::Committed),
            2 => Ok(ExecStatus::Aborted),
            3 => Ok(ExecStatus::Rollback),
            4 => Ok(ExecStatus::ForceComplete),
            5 => Ok(ExecStatus::Completed),
            other => Err(format!("invalid executor status: {other}")),
        }
    }
}

fn default_status() -> ExecStatus {
    ExecStatus::Pending
}

/// Durable record of an entire saga: its plan (receivers and their
/// pre-allocated timestamps), threaded input, commit result, and progress.
///
/// `receivers[0]` is the commit stage; `timestamps[i]` is the logical
/// timestamp allocated for `receivers[i]` at this partition. `input` and
/// `result` stay type-erased at this boundary; stages and handlers re-parse
/// them into their concrete shapes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorContext {
    pub exec_id: u64,
    pub ctrl_ctx: ControlContext,
    pub receivers: Vec<String>,
    pub timestamps: Vec<u64>,
    pub input: Value,
    pub result: Value,
    #[serde(default = "default_status")]
    pub status: ExecStatus,
    pub curr: usize,
    pub method: String,
    pub endpoint: String,
    pub recovered: bool,
}

impl Default for ExecutorContext {
    fn default() -> Self {
        Self {
            exec_id: 0,
            ctrl_ctx: ControlContext::default(),
            receivers: Vec::new(),
            timestamps: Vec::new(),
            input: Value::Null,
            result: Value::Null,
            status: ExecStatus::Pending,
            curr: 0,
            method: String::new(),
            endpoint: String::new(),
            recovered: false,
        }
    }
}

impl ExecutorContext {
    pub fn encode(&self) -> String {
        encode(self)
    }

    pub fn decode(encoded: &str) -> Result<Self, ContextError> {
        decode(encoded)
    }

    /// Stage context for the `index`-th receiver of this saga.
    pub fn stage_context(&self, index: usize, dry_run: bool) -> StageContext {
        StageContext {
            partition: self.ctrl_ctx.partition,
            service: self.ctrl_ctx.service.clone(),
            timestamp: self.timestamps.get(index).copied().unwrap_or(0),
            attrs: self.ctrl_ctx.attrs.clone(),
            dry_run,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_control_context_round_trip() {
        let ctrl = ControlContext {
            partition: 3,
            service: "user".to_string(),
            attrs: vec!["apple".to_string(), "banana".to_string()],
            dry_run: false,
            logger_id: "42".to_string(),
        };
        let decoded = ControlContext::decode(&ctrl.encode()).expect("decode");
        assert_eq!(decoded, ctrl);
    }

    #[test]
    fn test_stage_context_round_trip() {
        let stage = StageContext {
            partition: 7,
            service: "user".to_string(),
            timestamp: 19,
            attrs: vec!["x".to_string()],
            dry_run: true,
        };
        let decoded = StageContext::decode(&stage.encode()).expect("decode");
        assert_eq!(decoded, stage);
    }

    #[test]
    fn test_executor_context_round_trip() {
        let exec = ExecutorContext {
            exec_id: 11,
            ctrl_ctx: ControlContext {
                partition: 3,
                service: "user".to_string(),
                ..Default::default()
            },
            receivers: vec!["event".to_string(), "event".to_string(), "user".to_string()],
            timestamps: vec![1, 2, 1],
            input: json!({"value": [1, 2]}),
            result: json!({"value": 1}),
            status: ExecStatus::Committed,
            curr: 1,
            method: "POST".to_string(),
            endpoint: "http://127.0.0.1:8080/tx".to_string(),
            recovered: true,
        };
        let decoded = ExecutorContext::decode(&exec.encode()).expect("decode");
        assert_eq!(decoded.exec_id, exec.exec_id);
        assert_eq!(decoded.receivers, exec.receivers);
        assert_eq!(decoded.timestamps, exec.timestamps);
        assert_eq!(decoded.input, exec.input);
        assert_eq!(decoded.result, exec.result);
        assert_eq!(decoded.status, exec.status);
        assert_eq!(decoded.curr, exec.curr);
        assert!(decoded.recovered);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(StageContext::decode("not base64!!").is_err());
        let not_json = BASE64.encode(b"plainly not json");
        assert!(StageContext::decode(&not_json).is_err());
    }

    #[test]
    fn test_status_integer_representation() {
        let encoded = serde_json::to_string(&ExecStatus::ForceComplete).expect("encode");
        assert_eq!(encoded, "4");
        let decoded: ExecStatus = serde_json::from_str("5").expect("decode");
        assert_eq!(decoded, ExecStatus::Completed);
        assert!(serde_json::from_str::<ExecStatus>("9").is_err());
    }

    #[test]
    fn test_terminal_states() {
        assert!(ExecStatus::Aborted.is_terminal());
        assert!(ExecStatus::Completed.is_terminal());
        assert!(!ExecStatus::Pending.is_terminal());
        assert!(!ExecStatus::Committed.is_terminal());
        assert!(!ExecStatus::Rollback.is_terminal());
        assert!(!ExecStatus::ForceComplete.is_terminal());
    }

    #[test]
    fn test_stage_context_from_executor() {
        let exec = ExecutorContext {
            ctrl_ctx: ControlContext {
                partition: 5,
                service: "user".to_string(),
                attrs: vec!["a".to_string()],
                ..Default::default()
            },
            receivers: vec!["event".to_string(), "event-log".to_string()],
            timestamps: vec![4, 9],
            ..Default::default()
        };
        let stage = exec.stage_context(1, true);
        assert_eq!(stage.partition, 5);
        assert_eq!(stage.service, "user");
        assert_eq!(stage.timestamp, 9);
        assert!(stage.dry_run);
    }
}
