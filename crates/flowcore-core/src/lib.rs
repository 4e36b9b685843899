//! Core domain types for the flowcore workflow engine: the data model, the error taxonomy, and the external dispatch seams
//! that `flowcore-engine` consumes.
//!
//! This crate defines shapes only — no execution lives here. It has no
//! `tokio` runtime dependency beyond the traits in [`registry`], which are
//! `async_trait` so engine code can hold `Arc<dyn Registry>` as a trait
//! object.

pub mod context;
pub mod error;
pub mod id;
pub mod job;
pub mod param;
pub mod registry;
pub mod stage;
pub mod status;
pub mod strategy;
pub mod workflow;

pub use context::{Context, ErrorEntry, RunResult};
pub use error::{CoreError, DefinitionError, JobError, ParamError, Result, StageError, StageErrorKind, WorkflowError};
pub use id::RunId;
pub use job::{Job, RunsOn, TriggerRule};
pub use param::{ParamSpec, ParamType};
pub use registry::{CallRef, CallSignature, CancellationSource, Registry, ScriptRunner};
pub use stage::{CaseArm, CasePattern, OnError, ParallelBranch, Stage, StageKind, StageMeta};
pub use status::Status;
pub use strategy::{expand, MatrixItem, Strategy};
pub use workflow::{EventSpec, Workflow};
