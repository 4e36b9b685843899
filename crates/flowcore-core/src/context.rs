//! The JSON-shaped run context and the run result.

use crate::id::RunId;
use crate::status::Status;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A structured error entry recorded under `<scope>.errors`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEntry {
    pub name: String,
    pub message: String,
    pub traceback: Option<String>,
}

impl ErrorEntry {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
            traceback: None,
        }
    }
}

/// The accumulated, JSON-shaped execution context:
/// `{ params, jobs: { <job-id>: { stages, matrix?, strategies? } }, errors? }`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Context {
    pub params: Map<String, Value>,
    pub jobs: Map<String, Value>,
    pub errors: Option<Map<String, Value>>,
}

impl Context {
    pub fn new(params: Map<String, Value>) -> Self {
        Self {
            params,
            jobs: Map::new(),
            errors: None,
        }
    }

    /// Merge a job's accumulated sub-context under `jobs.<job_id>`.
    pub fn merge_job(&mut self, job_id: &str, job_context: Value) {
        self.jobs.insert(job_id.to_string(), job_context);
    }

    /// Record a top-level error entry.
    pub fn push_error(&mut self, scope: &str, entry: &ErrorEntry) {
        let errors = self.errors.get_or_insert_with(Map::new);
        errors.insert(
            scope.to_string(),
            serde_json::to_value(entry).unwrap_or(Value::Null),
        );
    }

    /// Render the whole context as a `serde_json::Value`, augmented with
    /// `result` the way the template resolver expects.
    pub fn as_value_with_result(&self, result: &Value) -> Value {
        let mut root = self.as_value();
        if let Value::Object(map) = &mut root {
            map.insert("result".to_string(), result.clone());
        }
        root
    }

    pub fn as_value(&self) -> Value {
        let mut map = Map::new();
        map.insert("params".to_string(), Value::Object(self.params.clone()));
        map.insert("jobs".to_string(), Value::Object(self.jobs.clone()));
        if let Some(errors) = &self.errors {
            map.insert("errors".to_string(), Value::Object(errors.clone()));
        }
        Value::Object(map)
    }

    /// Look up a dotted path (`jobs.j1.stages.s1.outputs.count`) against the
    /// rendered context.
    pub fn get_path(&self, path: &str) -> Option<Value> {
        let root = self.as_value();
        get_path_in(&root, path)
    }
}

pub fn get_path_in(root: &Value, path: &str) -> Option<Value> {
    let mut current = root;
    for segment in path.split('.') {
        match current {
            Value::Object(map) => current = map.get(segment)?,
            Value::Array(arr) => {
                let idx: usize = segment.parse().ok()?;
                current = arr.get(idx)?;
            }
            _ => return None,
        }
    }
    Some(current.clone())
}

/// Carries the terminal status, accumulated context, and bookkeeping for a
/// single `execute()` invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResult {
    pub status: Status,
    pub context: Context,
    pub run_id: RunId,
    pub parent_run_id: Option<RunId>,
    pub start: chrono::DateTime<chrono::Utc>,
    pub end: chrono::DateTime<chrono::Utc>,
    pub errors: Vec<ErrorEntry>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn get_path_traverses_nested_objects() {
        let mut ctx = Context::new(Map::new());
        let mut job_ctx = Map::new();
        let mut stages = Map::new();
        let mut s1 = Map::new();
        s1.insert("outputs".to_string(), json!({"count": 3}));
        stages.insert("s1".to_string(), Value::Object(s1));
        job_ctx.insert("stages".to_string(), Value::Object(stages));
        ctx.merge_job("j1", Value::Object(job_ctx));

        let v = ctx.get_path("jobs.j1.stages.s1.outputs.count");
        assert_eq!(v, Some(json!(3)));
    }

    #[test]
    fn get_path_returns_none_for_missing_segment() {
        let ctx = Context::new(Map::new());
        assert_eq!(ctx.get_path("jobs.missing.stages"), None);
    }
}
