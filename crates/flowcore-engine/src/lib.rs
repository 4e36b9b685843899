//! Stage, job, and workflow execution engine for flowcore.
//!
//! [`stage::run_stage`] implements the shared if/resolve/dispatch/on_error/
//! retry contract once and dispatches every [`flowcore_core::stage::StageKind`]
//! variant through it. [`job::run_job`] expands a job's matrix and folds its
//! items' statuses. [`workflow::WorkflowExecutor`] schedules a workflow's job
//! DAG, evaluating each dependent's `trigger_rule` as its dependencies
//! settle, and exposes `execute()` as the public entry point.

pub mod config;
pub mod error;
pub mod job;
pub mod runner;
pub mod stage;
pub mod workflow;

pub use config::EngineConfig;
pub use error::{EngineError, Result};
pub use runner::WorkflowRunner;
pub use stage::StageRunCtx;
pub use workflow::WorkflowExecutor;
