//! The saga executor: a commit stage plus continuation stages with
//! per-stage rollback and force-complete hooks.
//!
//! The executor owns its durable [`ExecutorContext`] and checkpoints it
//! through an injected persistence function after every state transition, so
//! a crash never loses more than one stage of progress. Once the commit
//! stage has committed at its participant, the saga only ever moves forward:
//! a stage that reports an unrecoverable failure flips the executor into
//! force-complete, which runs each remaining stage's `complete` hook instead
//! of its `do` so the record can still reach Completed.

use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::Value;

use super::context::{ExecStatus, ExecutorContext};

/// Marker carried in error envelopes to flag a stage failure as permanent.
pub const UNRECOVERABLE_SENTINEL: &str = "unrecoverable";

/// Stage-level failures as seen by the executor manager.
#[derive(Debug, thiserror::Error)]
pub enum StageError {
    /// Transient failure; the manager retries the same stage with back-off.
    #[error("stage failed: {0}")]
    Recoverable(String),

    /// Permanent failure; flips the saga into force-complete.
    #[error("unrecoverable stage failure")]
    Unrecoverable,

    /// A stage was driven without the corresponding function installed.
    #[error("empty stage function")]
    Empty,
}

/// Executor-level errors.
#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    #[error("transaction execution aborted: {0}")]
    Aborted(String),

    #[error("unrecoverable transaction execution")]
    Unrecoverable,

    #[error("failed to force complete stage: {0}")]
    ForceComplete(String),

    #[error("execution checkpoint failed: {0}")]
    Checkpoint(String),

    #[error(transparent)]
    Stage(#[from] StageError),
}

impl ExecError {
    /// True when the underlying stage reported the unrecoverable sentinel.
    pub fn is_unrecoverable(&self) -> bool {
        matches!(self, ExecError::Stage(StageError::Unrecoverable))
    }
}

type StageFuture<T> = BoxFuture<'static, Result<T, StageError>>;

/// `do`: consumes the threaded input, returns (user-visible result, next input).
type RunFn = Box<dyn Fn(Value) -> StageFuture<(Value, Value)> + Send + Sync>;
/// `rollback` / `complete`: consume and return the threaded input only.
type HookFn = Box<dyn Fn(Value) -> StageFuture<Value> + Send + Sync>;

/// Persistence function invoked with a snapshot of the executor context.
pub type CheckpointFn = Arc<
    dyn Fn(ExecutorContext) -> BoxFuture<'static, Result<(), Box<dyn std::error::Error + Send + Sync>>>
        + Send
        + Sync,
>;

/// One stage of a saga: `do` plus optional `rollback` and `complete` hooks.
#[derive(Default)]
pub struct TxStage {
    run: Option<RunFn>,
    rollback: Option<HookFn>,
    complete: Option<HookFn>,
}

impl TxStage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn run<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<(Value, Value), StageError>> + Send + 'static,
    {
        self.run = Some(Box::new(move |input| Box::pin(f(input))));
        self
    }

    pub fn rollback<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<Value, StageError>> + Send + 'static,
    {
        self.rollback = Some(Box::new(move |input| Box::pin(f(input))));
        self
    }

    pub fn complete<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<Value, StageError>> + Send + 'static,
    {
        self.complete = Some(Box::new(move |input| Box::pin(f(input))));
        self
    }

    async fn invoke_run(&self, input: Value) -> Result<(Value, Value), StageError> {
        match &self.run {
            Some(f) => f(input).await,
            None => Err(StageError::Empty),
        }
    }

    async fn invoke_rollback(&self, input: Value) -> Result<Value, StageError> {
        match &self.rollback {
            Some(f) => f(input).await,
            None => Err(StageError::Empty),
        }
    }

    async fn invoke_complete(&self, input: Value) -> Result<Value, StageError> {
        match &self.complete {
            Some(f) => f(input).await,
            None => Err(StageError::Empty),
        }
    }
}

/// Saga executor: commit stage + continuation stages + status FSM.
pub struct TxExecutor {
    exec_ctx: ExecutorContext,
    checkpointer: CheckpointFn,
    retry_count: u32,
    commit_stage: Option<TxStage>,
    stages: Vec<TxStage>,
}

impl TxExecutor {
    pub fn new(exec_ctx: ExecutorContext, checkpointer: CheckpointFn) -> Self {
        Self {
            exec_ctx,
            checkpointer,
            retry_count: 0,
            commit_stage: None,
            stages: Vec::new(),
        }
    }

    pub fn commit_stage(mut self, stage: TxStage) -> Self {
        self.commit_stage = Some(stage);
        self
    }

    pub fn stage(mut self, stage: TxStage) -> Self {
        self.stages.push(stage);
        self
    }

    pub fn context(&self) -> &ExecutorContext {
        &self.exec_ctx
    }

    pub fn status(&self) -> ExecStatus {
        self.exec_ctx.status
    }

    pub fn set_status(&mut self, status: ExecStatus) {
        self.exec_ctx.status = status;
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn bump_retry(&mut self) {
        self.retry_count += 1;
    }

    pub fn reset_retry(&mut self) {
        self.retry_count = 0;
    }

    /// Persist the current context through the injected checkpointer.
    pub async fn checkpoint(&self) -> Result<(), ExecError> {
        (self.checkpointer)(self.exec_ctx.clone())
            .await
            .map_err(|e| ExecError::Checkpoint(e.to_string()))
    }

    /// Single idempotent entry point; behavior depends on the current status.
    ///
    /// Pending runs the commit stage; on failure the saga aborts before any
    /// durable write and stays terminal. Committed and Completed return the
    /// recorded result without re-running anything.
    pub async fn run(&mut self) -> Result<Value, ExecError> {
        match self.exec_ctx.status {
            ExecStatus::Aborted => Err(ExecError::Aborted("previously aborted".to_string())),
            ExecStatus::ForceComplete => Err(ExecError::Unrecoverable),
            ExecStatus::Committed | ExecStatus::Completed => Ok(self.exec_ctx.result.clone()),
            ExecStatus::Pending | ExecStatus::Rollback => {
                let stage = match &self.commit_stage {
                    Some(stage) => stage,
                    None => return Err(StageError::Empty.into()),
                };
                match stage.invoke_run(self.exec_ctx.input.clone()).await {
                    Err(err) => {
                        self.exec_ctx.status = ExecStatus::Aborted;
                        Err(ExecError::Aborted(err.to_string()))
                    }
                    Ok((result, output)) => {
                        self.exec_ctx.input = output;
                        self.exec_ctx.result = result.clone();
                        self.exec_ctx.status = ExecStatus::Committed;
                        self.exec_ctx.curr = 0;
                        Ok(result)
                    }
                }
            }
        }
    }

    /// Is there another stage to drive in the current direction?
    pub fn next(&self) -> bool {
        match self.exec_ctx.status {
            ExecStatus::Rollback => self.exec_ctx.curr > 0,
            _ => self.exec_ctx.curr < self.stages.len(),
        }
    }

    /// Advance one continuation stage; on error `curr` stays put so the same
    /// stage is retried.
    pub async fn execute(&mut self) -> Result<(), ExecError> {
        let stage = self
            .stages
            .get(self.exec_ctx.curr)
            .ok_or(StageError::Empty)?;
        let (_, output) = stage.invoke_run(self.exec_ctx.input.clone()).await?;
        self.exec_ctx.curr += 1;
        self.exec_ctx.input = output;
        Ok(())
    }

    /// Undo the most recently executed stage.
    pub async fn rollback(&mut self) -> Result<(), ExecError> {
        if self.exec_ctx.curr == 0 {
            return Err(StageError::Empty.into());
        }
        self.exec_ctx.curr -= 1;
        let stage = self
            .stages
            .get(self.exec_ctx.curr)
            .ok_or(StageError::Empty)?;
        let output = stage.invoke_rollback(self.exec_ctx.input.clone()).await?;
        self.exec_ctx.input = output;
        Ok(())
    }

    /// Run the current stage's `complete` hook and advance past it.
    pub async fn force_complete(&mut self) -> Result<(), ExecError> {
        let stage = self
            .stages
            .get(self.exec_ctx.curr)
            .ok_or(StageError::Empty)?;
        let output = stage
            .invoke_complete(self.exec_ctx.input.clone())
            .await
            .map_err(|e| ExecError::ForceComplete(e.to_string()))?;
        self.exec_ctx.curr += 1;
        self.exec_ctx.input = output;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coord::context::ControlContext;
    use serde_json::json;
    use std::sync::Mutex;

    /// Checkpointer that records every persisted snapshot in memory.
    fn recording_checkpointer() -> (CheckpointFn, Arc<Mutex<Vec<ExecutorContext>>>) {
        let log: Arc<Mutex<Vec<ExecutorContext>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = log.clone();
        let checkpointer: CheckpointFn = Arc::new(move |ctx| {
            let sink = sink.clone();
            Box::pin(async move {
                sink.lock().expect("poisoned").push(ctx);
                Ok(())
            })
        });
        (checkpointer, log)
    }

    fn push_stage(i: i64) -> TxStage {
        TxStage::new()
            .run(move |input| async move {
                let mut values: Vec<i64> =
                    serde_json::from_value(input).map_err(|e| StageError::Recoverable(e.to_string()))?;
                values.push(i);
                Ok((json!({ "value": i }), json!(values)))
            })
            .rollback(|input| async move {
                let mut values: Vec<i64> =
                    serde_json::from_value(input).map_err(|e| StageError::Recoverable(e.to_string()))?;
                values.pop();
                Ok(json!(values))
            })
            .complete(|input| async move {
                let mut values: Vec<i64> =
                    serde_json::from_value(input).map_err(|e| StageError::Recoverable(e.to_string()))?;
                values.push(0);
                Ok(json!(values))
            })
    }

    fn failure_stage() -> TxStage {
        TxStage::new()
            .run(|_| async { Err(StageError::Recoverable("some error".to_string())) })
            .rollback(|input| async move { Ok(input) })
            .complete(|input| async move {
                let mut values: Vec<i64> =
                    serde_json::from_value(input).map_err(|e| StageError::Recoverable(e.to_string()))?;
                values.push(0);
                Ok(json!(values))
            })
    }

    fn test_exec_ctx() -> ExecutorContext {
        ExecutorContext {
            ctrl_ctx: ControlContext {
                partition: 3,
                service: "service-a".to_string(),
                attrs: vec!["apple".to_string(), "banana".to_string()],
                ..Default::default()
            },
            input: json!([]),
            method: "POST".to_string(),
            endpoint: "http://127.0.0.1:8080".to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_successful_execution() {
        let (checkpointer, log) = recording_checkpointer();
        let mut exec = TxExecutor::new(test_exec_ctx(), checkpointer)
            .commit_stage(push_stage(1))
            .stage(push_stage(2))
            .stage(push_stage(3));

        let result = exec.run().await.expect("commit");
        assert_eq!(result, json!({ "value": 1 }));
        assert_eq!(exec.status(), ExecStatus::Committed);
        assert_eq!(exec.context().input, json!([1]));
        exec.checkpoint().await.expect("checkpoint");

        let mut executed = 0;
        while exec.next() {
            executed += 1;
            exec.execute().await.expect("execute");
            exec.checkpoint().await.expect("checkpoint");
        }
        assert_eq!(executed, 2);
        assert_eq!(exec.context().input, json!([1, 2, 3]));

        exec.set_status(ExecStatus::Completed);
        exec.checkpoint().await.expect("checkpoint");

        let snapshots = log.lock().expect("poisoned");
        assert_eq!(snapshots.last().expect("snapshot").status, ExecStatus::Completed);
        assert_eq!(snapshots.last().expect("snapshot").input, json!([1, 2, 3]));
    }

    #[tokio::test]
    async fn test_run_is_idempotent_after_commit() {
        let (checkpointer, _) = recording_checkpointer();
        let mut exec = TxExecutor::new(test_exec_ctx(), checkpointer)
            .commit_stage(push_stage(1))
            .stage(push_stage(2));

        let first = exec.run().await.expect("commit");
        let second = exec.run().await.expect("cached");
        assert_eq!(first, second);
        // the commit stage ran exactly once
        assert_eq!(exec.context().input, json!([1]));
    }

    #[tokio::test]
    async fn test_commit_failure_aborts() {
        let (checkpointer, _) = recording_checkpointer();
        let mut exec = TxExecutor::new(test_exec_ctx(), checkpointer)
            .commit_stage(failure_stage())
            .stage(push_stage(2));

        let err = exec.run().await.expect_err("commit must fail");
        assert!(matches!(err, ExecError::Aborted(_)));
        assert_eq!(exec.status(), ExecStatus::Aborted);

        // terminal: further runs do no work
        let err = exec.run().await.expect_err("aborted stays aborted");
        assert!(matches!(err, ExecError::Aborted(_)));
    }

    #[tokio::test]
    async fn test_rollback_walks_backwards() {
        let (checkpointer, _) = recording_checkpointer();
        let mut exec = TxExecutor::new(test_exec_ctx(), checkpointer)
            .commit_stage(push_stage(1))
            .stage(push_stage(2))
            .stage(failure_stage());

        exec.run().await.expect("commit");
        exec.execute().await.expect("stage 2");
        assert!(exec.execute().await.is_err());
        assert_eq!(exec.context().input, json!([1, 2]));

        exec.set_status(ExecStatus::Rollback);
        let mut rolled_back = 0;
        while exec.next() {
            rolled_back += 1;
            exec.rollback().await.expect("rollback");
        }
        assert_eq!(rolled_back, 1);
        assert_eq!(exec.context().input, json!([1]));
    }

    #[tokio::test]
    async fn test_force_complete_runs_complete_hooks() {
        let (checkpointer, _) = recording_checkpointer();
        let mut exec = TxExecutor::new(test_exec_ctx(), checkpointer)
            .commit_stage(push_stage(1))
            .stage(failure_stage())
            .stage(failure_stage());

        exec.run().await.expect("commit");
        assert!(exec.execute().await.is_err());
        // curr still points at the failed stage
        assert_eq!(exec.context().curr, 0);

        exec.set_status(ExecStatus::ForceComplete);
        let mut completed = 0;
        while exec.next() {
            completed += 1;
            exec.force_complete().await.expect("force complete");
        }
        assert_eq!(completed, 2);
        assert_eq!(exec.context().input, json!([1, 0, 0]));
    }

    #[tokio::test]
    async fn test_run_on_force_complete_is_unrecoverable() {
        let (checkpointer, _) = recording_checkpointer();
        let mut ctx = test_exec_ctx();
        ctx.status = ExecStatus::ForceComplete;
        let mut exec = TxExecutor::new(ctx, checkpointer).commit_stage(push_stage(1));
        let err = exec.run().await.expect_err("no work under force-complete");
        assert!(matches!(err, ExecError::Unrecoverable));
    }

    #[tokio::test]
    async fn test_unrecoverable_stage_error_is_flagged() {
        let (checkpointer, _) = recording_checkpointer();
        let mut exec = TxExecutor::new(test_exec_ctx(), checkpointer)
            .commit_stage(push_stage(1))
            .stage(TxStage::new().run(|_| async { Err(StageError::Unrecoverable) }));

        exec.run().await.expect("commit");
        let err = exec.execute().await.expect_err("unrecoverable");
        assert!(err.is_unrecoverable());
        assert_eq!(exec.context().curr, 0);
    }
}
