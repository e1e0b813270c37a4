//! txweave: saga-style distributed transaction coordination for
//! table-owning micro-services.
//!
//! A root request that must touch several services runs as a multi-stage
//! saga with durable per-stage checkpoints, at-most-once semantics per
//! participant, deterministic per-partition replay order, and crash
//! recovery. The coordination substrate lives in [`coord`]; request
//! plumbing (middleware, lifecycle hooks, domain handlers) sits on top.

pub mod api;
pub mod client;
pub mod config;
pub mod coord;
pub mod lifecycle;
pub mod middleware;
pub mod server;
pub mod storage;
pub mod utils;

pub use config::Config;
pub use coord::context::{ControlContext, ExecStatus, ExecutorContext, StageContext};
pub use coord::executor::{StageError, TxExecutor, TxStage};
pub use coord::TxManager;
pub use server::{ServiceState, SharedState};
