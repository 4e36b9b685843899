//! Workflow executor: topological scheduling over the job DAG,
//! trigger-rule gating, overall timeout, and final status aggregation.
//! Exposes `execute(params, *, event?, timeout?, parent_run_id?)` as the
//! public entry point.

use crate::job::run_job;
use crate::runner::WorkflowRunner;
use crate::stage::StageRunCtx;
use flowcore_core::context::{Context, ErrorEntry, RunResult};
use flowcore_core::job::TriggerRule;
use flowcore_core::param::ParamSpec;
use flowcore_core::registry::{Registry, ScriptRunner};
use flowcore_core::status::Status;
use flowcore_core::workflow::Workflow;
use flowcore_core::{ParamError, RunId};
use flowcore_trace::{write_bounded, TraceLevel, TraceRecord, TraceSink, DEFAULT_WRITE_TIMEOUT};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Everything the engine needs to run one workflow that isn't the workflow
/// definition or the per-call params/event/timeout. Borrowed, not owned,
/// like [`StageRunCtx`] — a caller typically builds one of these once per
/// process and reuses it across `execute` calls.
pub struct WorkflowExecutor<'a> {
    pub registry: Option<&'a dyn Registry>,
    pub script_runner: &'a dyn ScriptRunner,
    pub trigger_runner: Option<&'a dyn WorkflowRunner>,
    pub trace: Option<&'a dyn TraceSink>,
    /// Cap on concurrently-ready jobs, and the default cap handed to each
    /// job's matrix.
    pub max_job_parallel: usize,
}

impl<'a> WorkflowExecutor<'a> {
    /// Run `workflow` to completion. Never panics and never lets an error
    /// escape: every failure mode becomes part of the returned
    /// [`RunResult`].
    pub async fn execute(
        &self,
        workflow: &Workflow,
        raw_params: Map<String, Value>,
        event: Option<CancellationToken>,
        timeout: Option<Duration>,
        parent_run_id: Option<RunId>,
    ) -> RunResult {
        let run_id = RunId::new();
        let start = chrono::Utc::now();
        let cancel = event.unwrap_or_default();

        self.emit_trace(&cancel, run_id, parent_run_id, TraceLevel::Info, format!("workflow '{}' started", workflow.name))
            .await;

        let params = match coerce_params(&workflow.params, raw_params) {
            Ok(params) => params,
            Err(e) => {
                let end = chrono::Utc::now();
                self.emit_trace(&cancel, run_id, parent_run_id, TraceLevel::Error, format!("parameter coercion failed: {e}"))
                    .await;
                return RunResult {
                    status: Status::Failed,
                    context: Context::new(Map::new()),
                    run_id,
                    parent_run_id,
                    start,
                    end,
                    errors: vec![ErrorEntry::new("ParamError", e.to_string())],
                };
            }
        };

        let mut context = Context::new(params);

        if let Some(timeout) = timeout {
            let timeout_cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = tokio::time::sleep(timeout) => timeout_cancel.cancel(),
                    _ = timeout_cancel.cancelled() => {}
                }
            });
        }

        let run_ctx = StageRunCtx {
            registry: self.registry,
            script_runner: self.script_runner,
            trigger_runner: self.trigger_runner,
            trace: self.trace,
            cancel: cancel.clone(),
            run_id,
        };

        let job_count = workflow.jobs().len();
        let mut statuses: Vec<Option<Status>> = vec![None; job_count];
        let mut errors = Vec::new();
        let semaphore = tokio::sync::Semaphore::new(self.max_job_parallel.max(1));

        while statuses.iter().any(Option::is_none) {
            let ready: Vec<usize> = (0..job_count)
                .filter(|&i| statuses[i].is_none())
                .filter(|&i| workflow.dependencies_of(i).all(|d| statuses[d].is_some()))
                .collect();

            // The graph is acyclic (enforced at `Workflow::new`), so every
            // remaining job becomes ready eventually; an empty ready set
            // with unresolved jobs left can't happen.
            debug_assert!(!ready.is_empty());

            let runs = ready.iter().map(|&idx| {
                let job = &workflow.jobs()[idx];
                let dep_statuses: Vec<Status> = workflow.dependencies_of(idx).map(|d| statuses[d].expect("dependency settled")).collect();
                let satisfied = evaluate_trigger_rule(job.trigger_rule, &dep_statuses);
                let context_ref = &context;
                let run_ctx_ref = &run_ctx;
                let semaphore_ref = &semaphore;
                let max_job_parallel = self.max_job_parallel;
                async move {
                    if !satisfied {
                        return (idx, Status::Skip, json!({"status": Status::Skip}));
                    }
                    let _permit = semaphore_ref.acquire().await.expect("semaphore not closed");
                    let outcome = run_job(job, context_ref, run_ctx_ref, max_job_parallel).await;
                    (idx, outcome.status, outcome.context_entry)
                }
            });

            let results = futures::future::join_all(runs).await;
            for (idx, status, context_entry) in results {
                if status == Status::Failed {
                    errors.push(ErrorEntry::new("JobError", format!("job '{}' failed", workflow.jobs()[idx].id)));
                }
                context.merge_job(&workflow.jobs()[idx].id, context_entry);
                statuses[idx] = Some(status);
            }
        }

        let final_status = Status::aggregate(statuses.into_iter().map(|s| s.expect("all jobs settled")));
        for error in &errors {
            context.push_error(&error.name, error);
        }
        let end = chrono::Utc::now();

        self.emit_trace(
            &cancel,
            run_id,
            parent_run_id,
            TraceLevel::Info,
            format!("workflow '{}' finished with status {:?}", workflow.name, final_status),
        )
        .await;

        RunResult {
            status: final_status,
            context,
            run_id,
            parent_run_id,
            start,
            end,
            errors,
        }
    }

    async fn emit_trace(&self, cancel: &CancellationToken, run_id: RunId, parent_run_id: Option<RunId>, level: TraceLevel, message: String) {
        let Some(sink) = self.trace else { return };
        if cancel.is_cancelled() {
            return;
        }
        let mut record = TraceRecord::new(run_id, level, message);
        if let Some(parent) = parent_run_id {
            record = record.with_parent(parent);
        }
        write_bounded(sink, &record, DEFAULT_WRITE_TIMEOUT).await;
    }
}

/// Predicate over dependency statuses controlling whether a dependent job
/// runs. A job with no
/// dependencies is always ready.
fn evaluate_trigger_rule(rule: TriggerRule, dep_statuses: &[Status]) -> bool {
    if dep_statuses.is_empty() {
        return true;
    }
    match rule {
        TriggerRule::AllSuccess => dep_statuses.iter().all(|s| *s == Status::Success),
        TriggerRule::AllFailed => dep_statuses.iter().all(|s| *s == Status::Failed),
        TriggerRule::AllDone => true,
        TriggerRule::AnySuccess => dep_statuses.iter().any(|s| *s == Status::Success),
        TriggerRule::AnyFailed => dep_statuses.iter().any(|s| *s == Status::Failed),
        TriggerRule::NoneFailed => dep_statuses.iter().all(|s| *s != Status::Failed),
        TriggerRule::NoneSkipped => dep_statuses.iter().all(|s| *s != Status::Skip),
    }
}

/// Coerce raw intake values against declared param types, falling back to
/// each param's default when the caller didn't supply a value. Values for undeclared names pass through
/// unchanged, since the workflow's `params` map isn't required to be closed.
fn coerce_params(declared: &HashMap<String, ParamSpec>, mut raw: Map<String, Value>) -> Result<Map<String, Value>, ParamError> {
    let mut out = Map::with_capacity(declared.len());
    for (name, spec) in declared {
        let value = raw.remove(name).or_else(|| spec.default.clone());
        if let Some(value) = value {
            out.insert(name.clone(), flowcore_template::coerce(name, &value, spec)?);
        }
    }
    out.extend(raw);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowcore_core::job::Job;
    use flowcore_core::param::ParamType;
    use flowcore_core::registry::NoopScriptRunner;
    use flowcore_core::stage::{Stage, StageKind, StageMeta};

    fn noop_runner() -> &'static NoopScriptRunner {
        Box::leak(Box::new(NoopScriptRunner))
    }

    fn executor() -> WorkflowExecutor<'static> {
        WorkflowExecutor {
            registry: None,
            script_runner: noop_runner(),
            trigger_runner: None,
            trace: None,
            max_job_parallel: 4,
        }
    }

    fn echo_job(id: &str) -> Job {
        Job::new(
            id,
            vec![Stage::new(StageMeta::new("s"), StageKind::Empty { echo: Some("hi".to_string()), sleep: None })],
        )
    }

    fn raise_job(id: &str) -> Job {
        Job::new(id, vec![Stage::new(StageMeta::new("boom"), StageKind::Raise { raise: "no".to_string() })])
    }

    #[tokio::test]
    async fn independent_jobs_all_run_and_aggregate_success() {
        let workflow = Workflow::new("wf", None, HashMap::new(), vec![], vec![echo_job("a"), echo_job("b")]).unwrap();
        let result = executor().execute(&workflow, Map::new(), None, None, None).await;
        assert_eq!(result.status, Status::Success);
        assert!(result.end >= result.start);
        assert!(result.context.get_path("jobs.a.outputs.echo").is_some());
        assert!(result.context.get_path("jobs.b.outputs.echo").is_some());
    }

    #[tokio::test]
    async fn none_failed_lets_a_dependent_run_after_an_upstream_skip() {
        // a: SUCCESS, b: SKIP (false `if`), c (none_failed, needs a & b): should run.
        let mut b = echo_job("b");
        b.if_cond = Some("${{ false }}".to_string());
        let mut c = echo_job("c");
        c.needs = vec!["a".to_string(), "b".to_string()];
        c.trigger_rule = TriggerRule::NoneFailed;

        let workflow = Workflow::new("wf", None, HashMap::new(), vec![], vec![echo_job("a"), b, c]).unwrap();
        let result = executor().execute(&workflow, Map::new(), None, None, None).await;
        assert_eq!(result.context.get_path("jobs.b.status"), Some(json!("SKIP")));
        assert_eq!(result.context.get_path("jobs.c.status"), Some(json!("SUCCESS")));
        assert_eq!(result.status, Status::Success);
    }

    #[tokio::test]
    async fn upstream_failure_skips_an_all_success_dependent() {
        let mut b = echo_job("b");
        b.needs = vec!["a".to_string()];

        let workflow = Workflow::new("wf", None, HashMap::new(), vec![], vec![raise_job("a"), b]).unwrap();
        let result = executor().execute(&workflow, Map::new(), None, None, None).await;
        assert_eq!(result.context.get_path("jobs.a.status"), Some(json!("FAILED")));
        assert_eq!(result.context.get_path("jobs.b.status"), Some(json!("SKIP")));
        assert_eq!(result.status, Status::Failed);
    }

    #[tokio::test]
    async fn default_parameter_is_coerced_and_exposed_in_context() {
        let mut params = HashMap::new();
        params.insert("run_date".to_string(), ParamSpec::new(ParamType::Date).with_default(json!("2024-01-01")));
        let workflow = Workflow::new("wf", None, params, vec![], vec![echo_job("a")]).unwrap();
        let result = executor().execute(&workflow, Map::new(), None, None, None).await;
        assert_eq!(result.context.params.get("run_date"), Some(&json!("2024-01-01")));
    }

    #[tokio::test]
    async fn invalid_parameter_fails_the_whole_run() {
        let mut params = HashMap::new();
        params.insert("run_date".to_string(), ParamSpec::new(ParamType::Date));
        let workflow = Workflow::new("wf", None, params, vec![], vec![echo_job("a")]).unwrap();
        let mut raw = Map::new();
        raw.insert("run_date".to_string(), json!("not-a-date"));
        let result = executor().execute(&workflow, raw, None, None, None).await;
        assert_eq!(result.status, Status::Failed);
        assert!(result.errors.iter().any(|e| e.name == "ParamError"));
    }

    #[tokio::test(start_paused = true)]
    async fn workflow_timeout_cancels_remaining_work() {
        let mut slow = Job::new("slow", vec![Stage::new(StageMeta::new("s"), StageKind::Empty { echo: None, sleep: Some(60.0) })]);
        slow.needs = vec![];
        let workflow = Workflow::new("wf", None, HashMap::new(), vec![], vec![slow]).unwrap();

        let exec = executor();
        let fut = exec.execute(&workflow, Map::new(), None, Some(Duration::from_millis(10)), None);
        let handle = tokio::spawn(fut);
        tokio::time::advance(Duration::from_secs(1)).await;
        let result = handle.await.unwrap();
        assert_eq!(result.status, Status::Cancel);
    }
}
