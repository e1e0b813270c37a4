//! Pluggable before/after visitors around stage handling.
//!
//! The instrumenter fans a request out to every registered recorder. The
//! bundled [`TraceRecorder`] collects per-partition inputs on the
//! coordinator side and handler results on the participant side; tests use
//! it to assert delivery order.

use std::sync::{Arc, Mutex, PoisonError};

use serde_json::Value;

use super::context::{ExecutorContext, StageContext};
use super::partition::gen_partitions;

/// Result slot shared between a request's middleware and its handler.
///
/// The lifecycle stores the handler's serialized result here so the
/// middleware, dedup hooks, and recorders can observe it after the fact.
#[derive(Debug, Default)]
pub struct TraceContext {
    result: Mutex<Option<Value>>,
}

impl TraceContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_result(&self, value: Value) {
        *self.result.lock().unwrap_or_else(PoisonError::into_inner) = Some(value);
    }

    pub fn result(&self) -> Option<Value> {
        self.result
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Everything a recorder may look at for one request.
pub struct TraceInfo<'a> {
    pub stage_ctx: Option<&'a StageContext>,
    pub exec_ctx: Option<&'a ExecutorContext>,
    pub trace: &'a TraceContext,
}

/// Visitor invoked before and after stage handling.
pub trait TxRecorder: Send + Sync {
    fn visit_before(&self, info: &TraceInfo<'_>);
    fn visit_after(&self, info: &TraceInfo<'_>);
}

/// Fan-out over registered recorders.
#[derive(Default)]
pub struct TxInstrumenter {
    recorders: Mutex<Vec<Arc<dyn TxRecorder>>>,
}

impl TxInstrumenter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn recorder(&self, recorder: Arc<dyn TxRecorder>) {
        self.recorders
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(recorder);
    }

    pub fn visit_before(&self, info: &TraceInfo<'_>) {
        for recorder in self
            .recorders
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
        {
            recorder.visit_before(info);
        }
    }

    pub fn visit_after(&self, info: &TraceInfo<'_>) {
        for recorder in self
            .recorders
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
        {
            recorder.visit_after(info);
        }
    }
}

/// Records the order of saga inputs (coordinator) and handler results
/// (participant) per partition.
pub struct TraceRecorder {
    requests: Mutex<Vec<Vec<Value>>>,
    responses: Mutex<Vec<Vec<Value>>>,
}

impl TraceRecorder {
    pub fn new(partitions: u64) -> Self {
        let partitions = gen_partitions(partitions) as usize;
        Self {
            requests: Mutex::new(vec![Vec::new(); partitions]),
            responses: Mutex::new(vec![Vec::new(); partitions]),
        }
    }

    pub fn requests(&self, partition: u64) -> Vec<Value> {
        let requests = self.requests.lock().unwrap_or_else(PoisonError::into_inner);
        requests
            .get(partition as usize)
            .cloned()
            .unwrap_or_default()
    }

    pub fn responses(&self, partition: u64) -> Vec<Value> {
        let responses = self.responses.lock().unwrap_or_else(PoisonError::into_inner);
        responses
            .get(partition as usize)
            .cloned()
            .unwrap_or_default()
    }
}

impl TxRecorder for TraceRecorder {
    fn visit_before(&self, info: &TraceInfo<'_>) {
        let Some(exec_ctx) = info.exec_ctx else {
            return;
        };
        let partition = exec_ctx.ctrl_ctx.partition as usize;
        let mut requests = self.requests.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(slot) = requests.get_mut(partition) {
            slot.push(exec_ctx.input.clone());
        }
    }

    fn visit_after(&self, info: &TraceInfo<'_>) {
        let Some(stage_ctx) = info.stage_ctx else {
            return;
        };
        let Some(result) = info.trace.result() else {
            return;
        };
        let partition = stage_ctx.partition as usize;
        let mut responses = self.responses.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(slot) = responses.get_mut(partition) {
            slot.push(result);
        }
    }
}
