//! The shared stage execution contract: `if` -> resolve ->
//! dispatch -> `on_error` -> retry -> outputs, implemented once as
//! [`run_stage`] and reused by every variant, so the six-step contract
//! cannot be skipped or reordered per variant.

use crate::runner::WorkflowRunner;
use async_recursion::async_recursion;
use flowcore_core::context::{Context, ErrorEntry};
use flowcore_core::error::{StageError, StageErrorKind};
use flowcore_core::param::ParamSpec;
use flowcore_core::registry::{CallRef, Registry, ScriptRunner};
use flowcore_core::stage::{CaseArm, CasePattern, OnError, ParallelBranch, Stage, StageKind};
use flowcore_core::status::Status;
use flowcore_core::RunId;
use flowcore_trace::{write_bounded, TraceLevel, TraceRecord, TraceSink, DEFAULT_WRITE_TIMEOUT};
use rand::Rng;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Everything a stage dispatch needs that isn't the stage definition itself
/// or its surrounding context. Cheap to clone: every field is a reference or
/// an `Arc`-backed handle.
pub struct StageRunCtx<'a> {
    pub registry: Option<&'a dyn Registry>,
    pub script_runner: &'a dyn ScriptRunner,
    pub trigger_runner: Option<&'a dyn WorkflowRunner>,
    pub trace: Option<&'a dyn TraceSink>,
    pub cancel: CancellationToken,
    pub run_id: RunId,
}

impl<'a> Clone for StageRunCtx<'a> {
    fn clone(&self) -> Self {
        Self {
            registry: self.registry,
            script_runner: self.script_runner,
            trigger_runner: self.trigger_runner,
            trace: self.trace,
            cancel: self.cancel.clone(),
            run_id: self.run_id,
        }
    }
}

impl<'a> StageRunCtx<'a> {
    pub(crate) fn with_cancel(&self, cancel: CancellationToken) -> Self {
        Self { cancel, ..self.clone() }
    }
}

/// The outcome of running one stage: its terminal status, its
/// `stages.<id>.outputs` payload, and an optional error entry for
/// `stages.<id>.errors`.
#[derive(Debug, Clone)]
pub struct StageOutcome {
    pub status: Status,
    pub outputs: Value,
    pub error: Option<ErrorEntry>,
}

impl StageOutcome {
    fn success(outputs: Value) -> Self {
        Self { status: Status::Success, outputs, error: None }
    }

    fn skip() -> Self {
        Self { status: Status::Skip, outputs: Value::Object(Map::new()), error: None }
    }

    fn cancel() -> Self {
        Self { status: Status::Cancel, outputs: Value::Object(Map::new()), error: None }
    }

    fn failed(error: ErrorEntry) -> Self {
        Self { status: Status::Failed, outputs: Value::Object(Map::new()), error: Some(error) }
    }

    fn skip_with_error(error: ErrorEntry) -> Self {
        Self { status: Status::Skip, outputs: Value::Object(Map::new()), error: Some(error) }
    }

    fn success_with_error(error: ErrorEntry) -> Self {
        Self { status: Status::Success, outputs: Value::Object(Map::new()), error: Some(error) }
    }

    /// Render as the `{status, outputs, errors?}` entry merged into the
    /// enclosing `stages` map.
    pub fn as_entry(&self) -> Value {
        let mut entry = Map::new();
        entry.insert("status".to_string(), serde_json::to_value(self.status).expect("Status serializes"));
        entry.insert("outputs".to_string(), self.outputs.clone());
        if let Some(error) = &self.error {
            entry.insert("errors".to_string(), serde_json::to_value(error).unwrap_or(Value::Null));
        }
        Value::Object(entry)
    }
}

/// What variant dispatch produced, before `on_error`/retry are applied.
/// `Cancelled` and `Skip` bypass `on_error` and retry entirely, exactly like
/// the `if`-false path (they are not failures to recover from).
enum Dispatched {
    Value(Value),
    Cancelled,
    Skip,
}

/// Run a sequence of stages in strict program order. A FAILED (or
/// cancelled) stage stops the sequence; later stages never run and so never
/// gain an entry. Returns the lattice-aggregated status and the accumulated
/// `stages` map.
#[async_recursion]
pub async fn run_stage_sequence<'a>(
    stages: &'a [Stage],
    matrix: &'a Map<String, Value>,
    workflow_ctx: &'a Context,
    run_ctx: &'a StageRunCtx<'a>,
) -> (Status, Map<String, Value>) {
    let mut local_stages = Map::new();
    let mut statuses = Vec::new();

    for stage in stages {
        let outcome = run_stage(stage, &local_stages, matrix, workflow_ctx, run_ctx).await;
        local_stages.insert(stage.id(), outcome.as_entry());
        let stop = matches!(outcome.status, Status::Failed | Status::Cancel);
        statuses.push(outcome.status);
        if stop {
            break;
        }
    }

    (Status::aggregate(statuses), local_stages)
}

/// Run a single stage through the full if/resolve/dispatch/on_error/retry
/// contract.
#[async_recursion]
pub async fn run_stage<'a>(
    stage: &'a Stage,
    sibling_stages: &'a Map<String, Value>,
    matrix: &'a Map<String, Value>,
    workflow_ctx: &'a Context,
    run_ctx: &'a StageRunCtx<'a>,
) -> StageOutcome {
    let id = stage.id();
    let snapshot = build_snapshot(workflow_ctx, matrix, sibling_stages);

    if run_ctx.cancel.is_cancelled() {
        return StageOutcome::cancel();
    }

    if let Some(if_cond) = &stage.meta.if_cond {
        match resolve_condition(if_cond, &snapshot, run_ctx).await {
            Ok(true) => {}
            Ok(false) => return StageOutcome::skip(),
            Err(e) => return StageOutcome::failed(ErrorEntry::new("TemplateError", e.to_string())),
        }
    }

    let max_attempts = stage.meta.retry + 1;

    for attempt in 0..max_attempts {
        if run_ctx.cancel.is_cancelled() {
            return StageOutcome::cancel();
        }

        let dispatch_fut = dispatch(stage, &id, &snapshot, matrix, workflow_ctx, run_ctx);
        let dispatched = match stage.meta.timeout {
            Some(timeout) => tokio::select! {
                biased;
                _ = run_ctx.cancel.cancelled() => Ok(Dispatched::Cancelled),
                res = tokio::time::timeout(timeout, dispatch_fut) => match res {
                    Ok(inner) => inner,
                    Err(_elapsed) => {
                        run_ctx.cancel.cancel();
                        Ok(Dispatched::Cancelled)
                    }
                },
            },
            None => tokio::select! {
                biased;
                _ = run_ctx.cancel.cancelled() => Ok(Dispatched::Cancelled),
                res = dispatch_fut => res,
            },
        };

        match dispatched {
            Ok(Dispatched::Value(outputs)) => return StageOutcome::success(outputs),
            Ok(Dispatched::Skip) => return StageOutcome::skip(),
            Ok(Dispatched::Cancelled) => return StageOutcome::cancel(),
            Err(err) => {
                let entry = ErrorEntry::new(err.kind.to_string(), err.to_string());
                let absorbed = match stage.meta.on_error {
                    OnError::Raise => None,
                    OnError::Skip => Some(StageOutcome::skip_with_error(entry.clone())),
                    OnError::Ignore => Some(StageOutcome::success_with_error(entry.clone())),
                };
                if let Some(outcome) = absorbed {
                    return outcome;
                }
                if attempt + 1 < max_attempts {
                    backoff_sleep(attempt).await;
                    continue;
                }
                return StageOutcome::failed(entry);
            }
        }
    }

    unreachable!("retry loop always returns before exhausting max_attempts iterations")
}

async fn backoff_sleep(attempt: u32) {
    let exp_ms = 1000u64.saturating_mul(1u64 << attempt.min(16));
    let capped_ms = exp_ms.min(30_000);
    let jitter_ms = rand::thread_rng().gen_range(0..=250u64);
    tokio::time::sleep(Duration::from_millis(capped_ms + jitter_ms)).await;
}

/// Builds the JSON root that template expressions are resolved against:
/// the workflow's accumulated context (`params`, `jobs`, `errors`)
/// augmented with this job item's `matrix` and its own in-progress `stages`
/// map.
pub(crate) fn build_snapshot(workflow_ctx: &Context, matrix: &Map<String, Value>, local_stages: &Map<String, Value>) -> Value {
    let mut root = workflow_ctx.as_value();
    if let Value::Object(map) = &mut root {
        map.insert("matrix".to_string(), Value::Object(matrix.clone()));
        map.insert("stages".to_string(), Value::Object(local_stages.clone()));
    }
    root
}

pub(crate) async fn resolve_condition(expr: &str, snapshot: &Value, run_ctx: &StageRunCtx<'_>) -> Result<bool, flowcore_template::TemplateError> {
    let v = flowcore_template::resolve_str(expr, snapshot, run_ctx.registry, None).await?;
    Ok(is_truthy(&v))
}

pub(crate) fn is_truthy(v: &Value) -> bool {
    match v {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

async fn resolve_to_string(id: &str, raw: &str, snapshot: &Value, run_ctx: &StageRunCtx<'_>) -> Result<String, StageError> {
    let value = flowcore_template::resolve_str(raw, snapshot, run_ctx.registry, None)
        .await
        .map_err(|e| StageError::new(id, StageErrorKind::Template, e.to_string()))?;
    Ok(flowcore_template::filters::display_value(&value))
}

async fn dispatch(
    stage: &Stage,
    id: &str,
    snapshot: &Value,
    matrix: &Map<String, Value>,
    workflow_ctx: &Context,
    run_ctx: &StageRunCtx<'_>,
) -> Result<Dispatched, StageError> {
    match &stage.kind {
        StageKind::Empty { echo, sleep } => dispatch_empty(id, echo, *sleep, snapshot, run_ctx).await,
        StageKind::Bash { bash, env } => dispatch_bash(id, bash, env, snapshot, run_ctx).await,
        StageKind::Py { run } => dispatch_py(id, run, snapshot, run_ctx).await,
        StageKind::Call { uses, with } => dispatch_call(id, uses, with, snapshot, run_ctx).await,
        StageKind::Trigger { trigger, params } => dispatch_trigger(id, trigger, params, snapshot, run_ctx).await,
        StageKind::Parallel { parallel, max_parallel } => {
            dispatch_parallel(parallel, *max_parallel, matrix, workflow_ctx, run_ctx).await
        }
        StageKind::Foreach { foreach, stages, concurrent, use_index_as_key } => {
            dispatch_foreach(id, foreach, stages, *concurrent, *use_index_as_key, snapshot, matrix, workflow_ctx, run_ctx).await
        }
        StageKind::Case { case, match_arms, skip_not_match } => {
            dispatch_case(id, case, match_arms, *skip_not_match, snapshot, matrix, workflow_ctx, run_ctx).await
        }
        StageKind::Until { until, stages, max_loop } => {
            dispatch_until(id, until, stages, *max_loop, matrix, workflow_ctx, run_ctx).await
        }
        StageKind::Raise { raise } => dispatch_raise(id, raise, snapshot, run_ctx).await,
    }
}

async fn dispatch_empty(
    id: &str,
    echo: &Option<String>,
    sleep: Option<f64>,
    snapshot: &Value,
    run_ctx: &StageRunCtx<'_>,
) -> Result<Dispatched, StageError> {
    let mut outputs = Map::new();
    if let Some(echo) = echo {
        let resolved = resolve_to_string(id, echo, snapshot, run_ctx).await?;
        if let Some(sink) = run_ctx.trace {
            let record = TraceRecord::new(run_ctx.run_id, TraceLevel::Info, resolved.clone());
            write_bounded(sink, &record, DEFAULT_WRITE_TIMEOUT).await;
        }
        outputs.insert("echo".to_string(), Value::String(resolved));
    }
    if let Some(secs) = sleep {
        tokio::time::sleep(Duration::from_secs_f64(secs.max(0.0))).await;
    }
    Ok(Dispatched::Value(Value::Object(outputs)))
}

async fn dispatch_bash(
    id: &str,
    bash: &str,
    env: &HashMap<String, String>,
    snapshot: &Value,
    run_ctx: &StageRunCtx<'_>,
) -> Result<Dispatched, StageError> {
    use tokio::io::AsyncReadExt;

    let script = resolve_to_string(id, bash, snapshot, run_ctx).await?;
    let mut resolved_env = HashMap::with_capacity(env.len());
    for (k, v) in env {
        resolved_env.insert(k.clone(), resolve_to_string(id, v, snapshot, run_ctx).await?);
    }

    let mut cmd = tokio::process::Command::new("/bin/sh");
    cmd.arg("-c")
        .arg(&script)
        .envs(&resolved_env)
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped());

    let mut child = cmd
        .spawn()
        .map_err(|e| StageError::new(id, StageErrorKind::BashFailed, format!("failed to spawn: {e}")))?;
    let mut stdout_pipe = child.stdout.take().expect("stdout was piped");
    let mut stderr_pipe = child.stderr.take().expect("stderr was piped");
    let mut stdout_buf = Vec::new();
    let mut stderr_buf = Vec::new();

    let (stdout_res, stderr_res, wait_res) = tokio::join!(
        stdout_pipe.read_to_end(&mut stdout_buf),
        stderr_pipe.read_to_end(&mut stderr_buf),
        child.wait(),
    );
    stdout_res.map_err(|e| StageError::new(id, StageErrorKind::BashFailed, format!("reading stdout: {e}")))?;
    stderr_res.map_err(|e| StageError::new(id, StageErrorKind::BashFailed, format!("reading stderr: {e}")))?;
    let status = wait_res.map_err(|e| StageError::new(id, StageErrorKind::BashFailed, format!("waiting on child: {e}")))?;

    let return_code = status.code().unwrap_or(-1);
    let outputs = json!({
        "return_code": return_code,
        "stdout": String::from_utf8_lossy(&stdout_buf).into_owned(),
        "stderr": String::from_utf8_lossy(&stderr_buf).into_owned(),
    });

    if return_code != 0 {
        Err(StageError::new(id, StageErrorKind::BashFailed, format!("exited with status {return_code}")))
    } else {
        Ok(Dispatched::Value(outputs))
    }
}

async fn dispatch_py(id: &str, run: &str, snapshot: &Value, run_ctx: &StageRunCtx<'_>) -> Result<Dispatched, StageError> {
    let source = resolve_to_string(id, run, snapshot, run_ctx).await?;
    let outputs = run_ctx
        .script_runner
        .run(&source, snapshot.clone())
        .await
        .map_err(|e| StageError::new(id, StageErrorKind::ScriptFailed, e.to_string()))?;
    Ok(Dispatched::Value(outputs))
}

async fn dispatch_call(
    id: &str,
    uses: &str,
    with: &HashMap<String, Value>,
    snapshot: &Value,
    run_ctx: &StageRunCtx<'_>,
) -> Result<Dispatched, StageError> {
    let registry = run_ctx
        .registry
        .ok_or_else(|| StageError::new(id, StageErrorKind::CallFailed, "no registry configured"))?;
    let call_ref = CallRef::parse(uses).map_err(|e| StageError::new(id, StageErrorKind::CallFailed, e.to_string()))?;
    let sig = registry
        .resolve(&call_ref)
        .await
        .map_err(|e| StageError::new(id, StageErrorKind::CallFailed, e.to_string()))?;

    let mut coerced = HashMap::with_capacity(with.len());
    for (name, raw) in with {
        let resolved = flowcore_template::resolve_value(raw, snapshot, Some(registry), None)
            .await
            .map_err(|e| StageError::new(id, StageErrorKind::Template, e.to_string()))?;
        let value = match sig.arg(name) {
            Some(arg) => flowcore_template::coerce(name, &resolved, &ParamSpec::new(arg.ty.clone()))
                .map_err(|e| StageError::new(id, StageErrorKind::Param, e.to_string()))?,
            None => resolved,
        };
        coerced.insert(name.clone(), value);
    }

    let outputs = registry
        .call(&sig, coerced)
        .await
        .map_err(|e| StageError::new(id, StageErrorKind::CallFailed, e.to_string()))?;
    Ok(Dispatched::Value(outputs))
}

async fn dispatch_trigger(
    id: &str,
    trigger: &str,
    params: &HashMap<String, Value>,
    snapshot: &Value,
    run_ctx: &StageRunCtx<'_>,
) -> Result<Dispatched, StageError> {
    let runner = run_ctx
        .trigger_runner
        .ok_or_else(|| StageError::new(id, StageErrorKind::TriggerFailed, "no workflow runner configured"))?;

    let mut resolved_params = Map::with_capacity(params.len());
    for (k, raw) in params {
        let resolved = flowcore_template::resolve_value(raw, snapshot, run_ctx.registry, None)
            .await
            .map_err(|e| StageError::new(id, StageErrorKind::Template, e.to_string()))?;
        resolved_params.insert(k.clone(), resolved);
    }

    let result = runner
        .run(trigger, Value::Object(resolved_params), run_ctx.run_id)
        .await
        .map_err(|e| StageError::new(id, StageErrorKind::TriggerFailed, e.to_string()))?;

    if result.status == Status::Failed {
        return Err(StageError::new(
            id,
            StageErrorKind::TriggerFailed,
            format!("triggered workflow '{trigger}' finished FAILED"),
        ));
    }

    Ok(Dispatched::Value(json!({
        "status": result.status,
        "run_id": result.run_id,
        "context": result.context.as_value(),
    })))
}

async fn dispatch_parallel(
    branches: &[ParallelBranch],
    max_parallel: Option<usize>,
    matrix: &Map<String, Value>,
    workflow_ctx: &Context,
    run_ctx: &StageRunCtx<'_>,
) -> Result<Dispatched, StageError> {
    let local_cancel = run_ctx.cancel.child_token();
    let branch_ctx = run_ctx.with_cancel(local_cancel.clone());
    let permits = max_parallel.unwrap_or(branches.len().max(1));
    let semaphore = tokio::sync::Semaphore::new(permits);

    let runs = branches.iter().map(|branch| {
        let branch_ctx = branch_ctx.clone();
        let cancel_siblings = local_cancel.clone();
        let semaphore = &semaphore;
        async move {
            let _permit = semaphore.acquire().await.expect("semaphore not closed");
            let (status, stages) = run_stage_sequence(&branch.stages, matrix, workflow_ctx, &branch_ctx).await;
            if status == Status::Failed {
                cancel_siblings.cancel();
            }
            (branch.name.clone(), status, stages)
        }
    });

    let results = futures::future::join_all(runs).await;
    let mut out = Map::with_capacity(results.len());
    let mut statuses = Vec::with_capacity(results.len());
    for (name, status, stages) in results {
        out.insert(name, json!({"status": status, "stages": Value::Object(stages)}));
        statuses.push(status);
    }

    match Status::aggregate(statuses) {
        Status::Cancel => Ok(Dispatched::Cancelled),
        Status::Failed => Err(StageError::new("parallel", StageErrorKind::Generic, "one or more parallel branches failed")),
        _ => Ok(Dispatched::Value(Value::Object(out))),
    }
}

#[allow(clippy::too_many_arguments)]
async fn dispatch_foreach(
    id: &str,
    foreach: &str,
    stages: &[Stage],
    concurrent: usize,
    use_index_as_key: bool,
    snapshot: &Value,
    matrix: &Map<String, Value>,
    workflow_ctx: &Context,
    run_ctx: &StageRunCtx<'_>,
) -> Result<Dispatched, StageError> {
    let sequence = flowcore_template::resolve_str(foreach, snapshot, run_ctx.registry, None)
        .await
        .map_err(|e| StageError::new(id, StageErrorKind::Template, e.to_string()))?;
    let items = match sequence {
        Value::Array(items) => items,
        other => return Err(StageError::new(id, StageErrorKind::Generic, format!("foreach expression did not resolve to a sequence: {other}"))),
    };

    let local_cancel = run_ctx.cancel.child_token();
    let item_ctx = run_ctx.with_cancel(local_cancel.clone());
    let semaphore = tokio::sync::Semaphore::new(concurrent.max(1));

    let runs = items.iter().enumerate().map(|(index, item)| {
        let mut item_matrix = matrix.clone();
        item_matrix.insert("item".to_string(), item.clone());
        if use_index_as_key {
            item_matrix.insert("index".to_string(), json!(index));
        }
        let item_ctx = item_ctx.clone();
        let cancel_siblings = local_cancel.clone();
        let semaphore = &semaphore;
        async move {
            let _permit = semaphore.acquire().await.expect("semaphore not closed");
            let (status, item_stages) = run_stage_sequence(stages, &item_matrix, workflow_ctx, &item_ctx).await;
            if status == Status::Failed {
                cancel_siblings.cancel();
            }
            (index.to_string(), status, item_stages)
        }
    });

    let results = futures::future::join_all(runs).await;
    let mut out = Map::with_capacity(results.len());
    let mut statuses = Vec::with_capacity(results.len());
    for (key, status, item_stages) in results {
        out.insert(key, json!({"status": status, "stages": Value::Object(item_stages)}));
        statuses.push(status);
    }

    match Status::aggregate(statuses) {
        Status::Cancel => Ok(Dispatched::Cancelled),
        Status::Failed => Err(StageError::new(id, StageErrorKind::Generic, "one or more foreach items failed")),
        _ => Ok(Dispatched::Value(Value::Object(out))),
    }
}

#[allow(clippy::too_many_arguments)]
async fn dispatch_case(
    id: &str,
    case: &str,
    match_arms: &[CaseArm],
    skip_not_match: bool,
    snapshot: &Value,
    matrix: &Map<String, Value>,
    workflow_ctx: &Context,
    run_ctx: &StageRunCtx<'_>,
) -> Result<Dispatched, StageError> {
    let value = flowcore_template::resolve_str(case, snapshot, run_ctx.registry, None)
        .await
        .map_err(|e| StageError::new(id, StageErrorKind::Template, e.to_string()))?;

    let mut chosen: Option<&CaseArm> = None;
    let mut default_arm: Option<&CaseArm> = None;
    for arm in match_arms {
        match &arm.pattern {
            CasePattern::Value(v) if *v == value => {
                chosen = Some(arm);
                break;
            }
            CasePattern::Default => default_arm = Some(arm),
            _ => {}
        }
    }
    let arm = chosen.or(default_arm);

    let Some(arm) = arm else {
        return if skip_not_match {
            Ok(Dispatched::Skip)
        } else {
            Err(StageError::new(id, StageErrorKind::CaseNoMatch, format!("no arm matched value {value}")))
        };
    };

    let (status, stages) = run_stage_sequence(&arm.stages, matrix, workflow_ctx, run_ctx).await;
    let outputs = json!({"stages": Value::Object(stages)});
    match status {
        Status::Cancel => Ok(Dispatched::Cancelled),
        Status::Failed => Err(StageError::new(id, StageErrorKind::Generic, "the matched case arm failed")),
        _ => Ok(Dispatched::Value(outputs)),
    }
}

async fn dispatch_until(
    id: &str,
    until: &str,
    stages: &[Stage],
    max_loop: u32,
    matrix: &Map<String, Value>,
    workflow_ctx: &Context,
    run_ctx: &StageRunCtx<'_>,
) -> Result<Dispatched, StageError> {
    let mut accumulated: Map<String, Value> = Map::new();

    for pass in 0..max_loop.max(1) {
        if run_ctx.cancel.is_cancelled() {
            return Ok(Dispatched::Cancelled);
        }

        let (pass_status, pass_stages) = run_stage_sequence_with_seed(stages, matrix, workflow_ctx, run_ctx, &accumulated).await;
        accumulated = pass_stages;

        if pass_status == Status::Cancel {
            return Ok(Dispatched::Cancelled);
        }
        if pass_status == Status::Failed {
            return Err(StageError::new(id, StageErrorKind::Generic, "a stage in the until loop body failed"));
        }

        let snapshot = build_snapshot(workflow_ctx, matrix, &accumulated);
        let condition = resolve_condition(until, &snapshot, run_ctx)
            .await
            .map_err(|e| StageError::new(id, StageErrorKind::Template, e.to_string()))?;
        if condition {
            return Ok(Dispatched::Value(json!({"stages": Value::Object(accumulated), "loops": pass + 1})));
        }
    }

    Err(StageError::new(id, StageErrorKind::UntilExhausted, format!("condition still false after {max_loop} loop(s)")))
}

/// Like [`run_stage_sequence`], but starts from a pre-existing `stages` map
/// instead of an empty one, so an `until` loop body's bindings (e.g. a
/// running counter) persist and accumulate across passes.
#[async_recursion]
async fn run_stage_sequence_with_seed<'a>(
    stages: &'a [Stage],
    matrix: &'a Map<String, Value>,
    workflow_ctx: &'a Context,
    run_ctx: &'a StageRunCtx<'a>,
    seed: &'a Map<String, Value>,
) -> (Status, Map<String, Value>) {
    let mut local_stages = seed.clone();
    let mut statuses = Vec::new();

    for stage in stages {
        let outcome = run_stage(stage, &local_stages, matrix, workflow_ctx, run_ctx).await;
        local_stages.insert(stage.id(), outcome.as_entry());
        let stop = matches!(outcome.status, Status::Failed | Status::Cancel);
        statuses.push(outcome.status);
        if stop {
            break;
        }
    }

    (Status::aggregate(statuses), local_stages)
}

async fn dispatch_raise(id: &str, raise: &str, snapshot: &Value, run_ctx: &StageRunCtx<'_>) -> Result<Dispatched, StageError> {
    let message = resolve_to_string(id, raise, snapshot, run_ctx).await?;
    Err(StageError::new(id, StageErrorKind::RaiseStage, message))
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowcore_core::registry::NoopScriptRunner;
    use flowcore_core::stage::StageMeta;
    use serde_json::Map as JMap;

    fn ctx() -> StageRunCtx<'static> {
        StageRunCtx {
            registry: None,
            script_runner: Box::leak(Box::new(NoopScriptRunner)),
            trigger_runner: None,
            trace: None,
            cancel: CancellationToken::new(),
            run_id: RunId::new(),
        }
    }

    fn empty_stage(name: &str, echo: Option<&str>) -> Stage {
        Stage::new(
            StageMeta::new(name),
            StageKind::Empty { echo: echo.map(String::from), sleep: None },
        )
    }

    #[tokio::test]
    async fn if_false_skips_without_running_dispatch() {
        let mut meta = StageMeta::new("maybe");
        meta.if_cond = Some("${{ false }}".to_string());
        let stage = Stage::new(meta, StageKind::Raise { raise: "should not run".to_string() });
        let outcome = run_stage(&stage, &JMap::new(), &JMap::new(), &Context::new(JMap::new()), &ctx()).await;
        assert_eq!(outcome.status, Status::Skip);
    }

    #[tokio::test]
    async fn raise_stage_fails_with_resolved_message() {
        let stage = Stage::new(StageMeta::new("boom"), StageKind::Raise { raise: "kaboom".to_string() });
        let outcome = run_stage(&stage, &JMap::new(), &JMap::new(), &Context::new(JMap::new()), &ctx()).await;
        assert_eq!(outcome.status, Status::Failed);
        assert_eq!(outcome.error.unwrap().message, "kaboom");
    }

    #[tokio::test]
    async fn on_error_ignore_absorbs_a_failure_as_success() {
        let mut meta = StageMeta::new("boom");
        meta.on_error = OnError::Ignore;
        let stage = Stage::new(meta, StageKind::Raise { raise: "kaboom".to_string() });
        let outcome = run_stage(&stage, &JMap::new(), &JMap::new(), &Context::new(JMap::new()), &ctx()).await;
        assert_eq!(outcome.status, Status::Success);
        assert!(outcome.error.is_some());
    }

    #[tokio::test]
    async fn empty_stage_records_echo_in_outputs() {
        let stage = empty_stage("hi", Some("hello"));
        let outcome = run_stage(&stage, &JMap::new(), &JMap::new(), &Context::new(JMap::new()), &ctx()).await;
        assert_eq!(outcome.status, Status::Success);
        assert_eq!(outcome.outputs["echo"], json!("hello"));
    }

    #[tokio::test]
    async fn sequence_stops_after_a_failure_and_aggregates_failed() {
        let stages = vec![
            empty_stage("ok", None),
            Stage::new(StageMeta::new("boom"), StageKind::Raise { raise: "no".to_string() }),
            empty_stage("never", None),
        ];
        let (status, local) = run_stage_sequence(&stages, &JMap::new(), &Context::new(JMap::new()), &ctx()).await;
        assert_eq!(status, Status::Failed);
        assert!(local.contains_key("ok"));
        assert!(local.contains_key("boom"));
        assert!(!local.contains_key("never"));
    }

    #[tokio::test]
    async fn case_with_no_match_and_skip_not_match_skips() {
        let stage = Stage::new(
            StageMeta::new("route"),
            StageKind::Case {
                case: "${{ 'z' }}".to_string(),
                match_arms: vec![CaseArm { pattern: CasePattern::Value(json!("a")), stages: vec![] }],
                skip_not_match: true,
            },
        );
        let outcome = run_stage(&stage, &JMap::new(), &JMap::new(), &Context::new(JMap::new()), &ctx()).await;
        assert_eq!(outcome.status, Status::Skip);
    }

    #[tokio::test]
    async fn until_exhausts_after_max_loop() {
        let stage = Stage::new(
            StageMeta::new("wait"),
            StageKind::Until {
                until: "${{ false }}".to_string(),
                stages: vec![empty_stage("tick", None)],
                max_loop: 2,
            },
        );
        let outcome = run_stage(&stage, &JMap::new(), &JMap::new(), &Context::new(JMap::new()), &ctx()).await;
        assert_eq!(outcome.status, Status::Failed);
        assert_eq!(outcome.error.unwrap().name, "UntilExhausted");
    }
}
