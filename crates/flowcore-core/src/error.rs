//! Error taxonomy for the flowcore engine.
//!
//! Kinds, not one flat type: each layer of the engine gets its own variant
//! set, one `Error` enum per crate, rather than a single catch-all error
//! type shared across the whole workspace.

use thiserror::Error;

/// Raised when coercing a raw value to a declared [`crate::param::ParamType`] fails.
#[derive(Debug, Clone, Error)]
#[error("parameter '{param}': {message}")]
pub struct ParamError {
    pub param: String,
    pub message: String,
}

impl ParamError {
    pub fn new(param: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            param: param.into(),
            message: message.into(),
        }
    }
}

/// Raised at workflow/job/stage construction; prevents execution.
#[derive(Debug, Clone, Error)]
pub enum DefinitionError {
    #[error("cycle detected in job dependency graph: {0}")]
    Cycle(String),

    #[error("duplicate job id: {0}")]
    DuplicateJobId(String),

    #[error("job '{job}' depends on unknown job '{dep}'")]
    UnknownDependency { job: String, dep: String },

    #[error("unknown trigger rule: {0}")]
    UnknownTriggerRule(String),

    #[error("duplicate stage id '{id}' in job '{job}'")]
    DuplicateStageId { job: String, id: String },

    #[error("invalid identifier: {0}")]
    InvalidIdentifier(String),

    #[error("strategy matrix dimension '{0}' has no values")]
    EmptyMatrixDimension(String),
}

/// The kind of failure a stage variant produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageErrorKind {
    CaseNoMatch,
    UntilExhausted,
    RaiseStage,
    ScriptFailed,
    CallFailed,
    TriggerFailed,
    BashFailed,
    Param,
    Template,
    Generic,
}

/// Returned from variant-specific stage execution, wrapped with stage/item identity.
#[derive(Debug, Clone)]
pub struct StageError {
    pub stage_id: String,
    pub item_id: Option<String>,
    pub kind: StageErrorKind,
    pub message: String,
}

impl StageError {
    pub fn new(stage_id: impl Into<String>, kind: StageErrorKind, message: impl Into<String>) -> Self {
        Self {
            stage_id: stage_id.into(),
            item_id: None,
            kind,
            message: message.into(),
        }
    }

    pub fn with_item(mut self, item_id: impl Into<String>) -> Self {
        self.item_id = Some(item_id.into());
        self
    }
}

impl std::fmt::Display for StageErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            StageErrorKind::CaseNoMatch => "CaseNoMatch",
            StageErrorKind::UntilExhausted => "UntilExhausted",
            StageErrorKind::RaiseStage => "RaiseStage",
            StageErrorKind::ScriptFailed => "ScriptFailed",
            StageErrorKind::CallFailed => "CallFailed",
            StageErrorKind::TriggerFailed => "TriggerFailed",
            StageErrorKind::BashFailed => "BashFailed",
            StageErrorKind::Param => "ParamError",
            StageErrorKind::Template => "TemplateError",
            StageErrorKind::Generic => "StageError",
        };
        f.write_str(s)
    }
}

/// Aggregate error for a job (its stages never individually escape `execute`).
#[derive(Debug, Clone, Error)]
#[error("job '{job_id}' failed: {message}")]
pub struct JobError {
    pub job_id: String,
    pub message: String,
}

/// Aggregate error for a whole workflow run.
#[derive(Debug, Clone, Error)]
#[error("workflow failed: {message}")]
pub struct WorkflowError {
    pub message: String,
}

/// Top-level error type threaded through the core and engine crates.
#[derive(Debug, Clone, Error)]
pub enum CoreError {
    #[error(transparent)]
    Param(#[from] ParamError),

    #[error(transparent)]
    Definition(#[from] DefinitionError),

    #[error(transparent)]
    Stage(#[from] StageError),

    #[error(transparent)]
    Job(#[from] JobError),

    #[error(transparent)]
    Workflow(#[from] WorkflowError),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("cancelled")]
    Cancelled,

    #[error("registry error: {0}")]
    Registry(String),
}

pub type Result<T> = std::result::Result<T, CoreError>;

impl std::fmt::Display for StageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.item_id {
            Some(item) => write!(
                f,
                "stage '{}' (item {item}) failed [{}]: {}",
                self.stage_id, self.kind, self.message
            ),
            None => write!(
                f,
                "stage '{}' failed [{}]: {}",
                self.stage_id, self.kind, self.message
            ),
        }
    }
}

impl std::error::Error for StageError {}
