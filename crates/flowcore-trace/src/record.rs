//! `TraceRecord` and `AuditRecord`.

use chrono::{DateTime, Utc};
use flowcore_core::{RunId, Status};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Mirrors `tracing::Level` without pulling a `tracing` dependency into the
/// record's (de)serialized shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TraceLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

/// One structured log line tied to a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceRecord {
    pub run_id: RunId,
    pub parent_run_id: Option<RunId>,
    pub level: TraceLevel,
    pub message: String,
    /// Stable short hash of `run_id`, for correlating log lines.
    pub cut_id: String,
    pub timestamp: DateTime<Utc>,
    pub extras: Option<Value>,
}

impl TraceRecord {
    pub fn new(run_id: RunId, level: TraceLevel, message: impl Into<String>) -> Self {
        Self {
            run_id,
            parent_run_id: None,
            level,
            message: message.into(),
            cut_id: run_id.cut_id(),
            timestamp: Utc::now(),
            extras: None,
        }
    }

    pub fn with_parent(mut self, parent: RunId) -> Self {
        self.parent_run_id = Some(parent);
        self
    }

    pub fn with_extras(mut self, extras: Value) -> Self {
        self.extras = Some(extras);
        self
    }
}

/// An append-only record of a completed release, used for poke dedup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub workflow: String,
    pub release_instant: DateTime<Utc>,
    pub run_id: RunId,
    pub status: Status,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub extras: Option<Value>,
}
