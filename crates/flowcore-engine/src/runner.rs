//! The `trigger` stage dispatch seam.
//!
//! The engine executes one workflow at a time; it has no loader and cannot
//! look a workflow up by name on its own. A `WorkflowRunner` is
//! the caller-supplied callback that closes that loop — typically a thin
//! wrapper the host process builds once it has loaded all named workflows.

use async_trait::async_trait;
use flowcore_core::{CoreError, RunId, RunResult};
use serde_json::Value;

#[async_trait]
pub trait WorkflowRunner: Send + Sync {
    async fn run(&self, name: &str, params: Value, parent_run_id: RunId) -> Result<RunResult, CoreError>;
}
