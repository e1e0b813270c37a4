//! Handler lifecycle: API-keyed hooks around domain logic.
//!
//! Start/end hooks run regardless of what the handler does; before/after
//! hooks participate in its outcome. The canonical before/after pair is the
//! dedup pair over the result cache: the before hook short-circuits with the
//! cached result when the slot already ran (or skips the body entirely on a
//! dry-run miss), and the after hook records the fresh result so the next
//! visit to the slot is a cache hit.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::coord::context::StageContext;
use crate::coord::instrument::TraceContext;
use crate::storage::{StorageError, TxJournal};

#[derive(Debug, thiserror::Error)]
pub enum LifeCycleError {
    #[error("failed to execute lifecycle start hooks: {0}")]
    StartHooks(String),

    #[error("failed to execute lifecycle before hooks: {0}")]
    BeforeHooks(String),

    #[error("failed to execute lifecycle after hooks: {0}")]
    AfterHooks(String),

    #[error("failed to execute lifecycle end hooks: {0}")]
    EndHooks(String),

    #[error("handler failed: {0}")]
    Handler(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Per-request view the hooks operate on.
pub struct TxHookContext {
    pub stage_ctx: Option<StageContext>,
    pub trace: Arc<TraceContext>,
}

impl TxHookContext {
    pub fn new(stage_ctx: Option<StageContext>, trace: Arc<TraceContext>) -> Arc<Self> {
        Arc::new(Self { stage_ctx, trace })
    }
}

/// Flow control returned by before hooks.
pub enum HookFlow {
    /// Proceed to the handler body.
    Continue,
    /// The slot already executed; surface the cached result instead.
    CachedResult(Value),
    /// Recovered request with no cached result: skip the body, answer no-op.
    DryRun,
}

/// Start/end hook: side effects only.
pub type LifeHook =
    Arc<dyn Fn(Arc<TxHookContext>) -> BoxFuture<'static, Result<(), LifeCycleError>> + Send + Sync>;

/// Before/after hook: may steer the lifecycle.
pub type TxHook = Arc<
    dyn Fn(Arc<TxHookContext>) -> BoxFuture<'static, Result<HookFlow, LifeCycleError>> + Send + Sync,
>;

/// Static hook registry keyed by an API enum.
pub struct TxHookMap<A> {
    start: HashMap<A, Vec<LifeHook>>,
    end: HashMap<A, Vec<LifeHook>>,
    before: HashMap<A, Vec<TxHook>>,
    after: HashMap<A, Vec<TxHook>>,
}

impl<A: Eq + Hash + Copy> Default for TxHookMap<A> {
    fn default() -> Self {
        Self {
            start: HashMap::new(),
            end: HashMap::new(),
            before: HashMap::new(),
            after: HashMap::new(),
        }
    }
}

impl<A: Eq + Hash + Copy> TxHookMap<A> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start_hook(&mut self, api: A, hook: LifeHook) {
        self.start.entry(api).or_default().push(hook);
    }

    pub fn end_hook(&mut self, api: A, hook: LifeHook) {
        self.end.entry(api).or_default().push(hook);
    }

    pub fn before_hook(&mut self, api: A, hook: TxHook) {
        self.before.entry(api).or_default().push(hook);
    }

    pub fn after_hook(&mut self, api: A, hook: TxHook) {
        self.after.entry(api).or_default().push(hook);
    }
}

/// How one lifecycle invocation ended.
pub enum TxOutcome<R> {
    /// The body ran; its result is attached.
    Executed(R),
    /// A before hook surfaced a previously cached result.
    Cached(Value),
    /// Dry-run: the body was skipped and no result exists.
    DryRun,
}

/// Runs handler bodies inside their registered hooks.
pub struct TxLifeCycle<A> {
    hooks: TxHookMap<A>,
}

impl<A: Eq + Hash + Copy> TxLifeCycle<A> {
    pub fn new(hooks: TxHookMap<A>) -> Self {
        Self { hooks }
    }

    /// Drive `body` under the hooks registered for `api`.
    ///
    /// End hooks run on every exit path, including errors; after hooks run
    /// only when the body actually executed and succeeded.
    pub async fn start<R, E, F>(
        &self,
        api: A,
        ctx: Arc<TxHookContext>,
        body: F,
    ) -> Result<TxOutcome<R>, LifeCycleError>
    where
        R: Serialize,
        E: std::error::Error + Send + Sync + 'static,
        F: std::future::Future<Output = Result<R, E>>,
    {
        for hook in self.hooks.start.get(&api).into_iter().flatten() {
            hook(ctx.clone())
                .await
                .map_err(|e| LifeCycleError::StartHooks(e.to_string()))?;
        }

        let outcome = self.run_guarded(api, ctx.clone(), body).await;

        for hook in self.hooks.end.get(&api).into_iter().flatten() {
            hook(ctx.clone())
                .await
                .map_err(|e| LifeCycleError::EndHooks(e.to_string()))?;
        }

        outcome
    }

    async fn run_guarded<R, E, F>(
        &self,
        api: A,
        ctx: Arc<TxHookContext>,
        body: F,
    ) -> Result<TxOutcome<R>, LifeCycleError>
    where
        R: Serialize,
        E: std::error::Error + Send + Sync + 'static,
        F: std::future::Future<Output = Result<R, E>>,
    {
        for hook in self.hooks.before.get(&api).into_iter().flatten() {
            match hook(ctx.clone())
                .await
                .map_err(|e| LifeCycleError::BeforeHooks(e.to_string()))?
            {
                HookFlow::Continue => {}
                HookFlow::CachedResult(value) => {
                    debug!("stage already executed; surfacing cached result");
                    return Ok(TxOutcome::Cached(value));
                }
                HookFlow::DryRun => {
                    debug!("dry run; skipping handler body");
                    return Ok(TxOutcome::DryRun);
                }
            }
        }

        let result = body.await.map_err(|e| LifeCycleError::Handler(Box::new(e)))?;
        ctx.trace.set_result(serde_json::to_value(&result)?);

        for hook in self.hooks.after.get(&api).into_iter().flatten() {
            hook(ctx.clone())
                .await
                .map_err(|e| LifeCycleError::AfterHooks(e.to_string()))?;
        }

        Ok(TxOutcome::Executed(result))
    }
}

/// Before hook reading the result cache for this request's slot.
pub fn dedup_before_hook(journal: Arc<dyn TxJournal>) -> TxHook {
    Arc::new(move |ctx| {
        let journal = journal.clone();
        Box::pin(async move {
            let Some(stage_ctx) = ctx.stage_ctx.clone() else {
                // not a stage request; nothing to dedup
                return Ok(HookFlow::Continue);
            };
            let cached = journal
                .stage_result(stage_ctx.partition, &stage_ctx.service, stage_ctx.timestamp)
                .await?;
            match cached {
                Some(content) => {
                    ctx.trace.set_result(content.clone());
                    Ok(HookFlow::CachedResult(content))
                }
                None if stage_ctx.dry_run => Ok(HookFlow::DryRun),
                None => Ok(HookFlow::Continue),
            }
        })
    })
}

/// After hook recording the body's result for this request's slot.
pub fn dedup_after_hook(journal: Arc<dyn TxJournal>) -> TxHook {
    Arc::new(move |ctx| {
        let journal = journal.clone();
        Box::pin(async move {
            let Some(stage_ctx) = ctx.stage_ctx.clone() else {
                return Ok(HookFlow::Continue);
            };
            let Some(result) = ctx.trace.result() else {
                return Ok(HookFlow::Continue);
            };
            journal
                .record_stage_result(
                    stage_ctx.partition,
                    &stage_ctx.service,
                    stage_ctx.timestamp,
                    &result,
                )
                .await?;
            Ok(HookFlow::Continue)
        })
    })
}
