//! Job executor: evaluate `if`, expand the matrix, run each
//! item's stage sequence, fold item statuses, and shape the `jobs.<id>`
//! context entry.

use crate::stage::{build_snapshot, resolve_condition, run_stage_sequence, StageRunCtx};
use flowcore_core::context::Context;
use flowcore_core::job::Job;
use flowcore_core::stage::Stage;
use flowcore_core::status::Status;
use flowcore_core::strategy::{expand, Strategy};
use serde_json::{json, Map, Value};

/// The outcome of running one job: its folded status and the context entry
/// to merge under `jobs.<id>`.
pub struct JobOutcome {
    pub status: Status,
    pub context_entry: Value,
}

/// Run one job to completion.
///
/// `default_max_parallel` is the engine-wide cap (`EngineConfig::max_job_parallel`)
/// used when the job's own [`Strategy::max_parallel`] is unset.
pub async fn run_job(
    job: &Job,
    workflow_ctx: &Context,
    run_ctx: &StageRunCtx<'_>,
    default_max_parallel: usize,
) -> JobOutcome {
    let empty_matrix = Map::new();
    let empty_stages = Map::new();
    let snapshot = build_snapshot(workflow_ctx, &empty_matrix, &empty_stages);

    if let Some(if_cond) = &job.if_cond {
        match resolve_condition(if_cond, &snapshot, run_ctx).await {
            Ok(true) => {}
            Ok(false) => {
                return JobOutcome {
                    status: Status::Skip,
                    context_entry: json!({"status": Status::Skip}),
                };
            }
            Err(e) => {
                return JobOutcome {
                    status: Status::Failed,
                    context_entry: json!({
                        "status": Status::Failed,
                        "errors": {"name": "TemplateError", "message": e.to_string()},
                    }),
                };
            }
        }
    }

    if run_ctx.cancel.is_cancelled() {
        return JobOutcome {
            status: Status::Cancel,
            context_entry: json!({"status": Status::Cancel}),
        };
    }

    let strategy = job.strategy.clone().unwrap_or_default();
    let items = expand(&strategy);
    let max_parallel = strategy.max_parallel.unwrap_or(default_max_parallel).max(1);

    let local_cancel = run_ctx.cancel.child_token();
    let item_run_ctx = run_ctx.with_cancel(local_cancel.clone());
    let semaphore = tokio::sync::Semaphore::new(max_parallel);

    let runs = items.iter().map(|item| {
        let item_ctx = item_run_ctx.clone();
        let cancel_siblings = local_cancel.clone();
        let semaphore = &semaphore;
        let fail_fast = strategy.fail_fast;
        async move {
            let _permit = semaphore.acquire().await.expect("semaphore not closed");
            let (status, stages) = run_stage_sequence(&job.stages, &item.values, workflow_ctx, &item_ctx).await;
            if fail_fast && status == Status::Failed {
                cancel_siblings.cancel();
            }
            (item.item_id.clone(), item.values.clone(), status, stages)
        }
    });

    let results = futures::future::join_all(runs).await;
    let statuses: Vec<Status> = results.iter().map(|(_, _, status, _)| *status).collect();
    let job_status = Status::aggregate(statuses.iter().copied());

    let single_default_item = items.len() == 1 && items[0].values.is_empty();

    let context_entry = if single_default_item {
        let (_, _, status, stages) = results.into_iter().next().expect("single item");
        let outputs = last_stage_outputs(&job.stages, &stages);
        json!({
            "status": status,
            "stages": Value::Object(stages),
            "outputs": outputs,
        })
    } else {
        let mut strategies = Map::new();
        let mut outputs_by_item = Map::new();
        for (item_id, values, status, stages) in results {
            let outputs = last_stage_outputs(&job.stages, &stages);
            outputs_by_item.insert(item_id.clone(), outputs);
            strategies.insert(
                item_id,
                json!({
                    "status": status,
                    "matrix": Value::Object(values),
                    "stages": Value::Object(stages),
                }),
            );
        }
        json!({
            "status": job_status,
            "strategies": Value::Object(strategies),
            "outputs": Value::Object(outputs_by_item),
        })
    };

    JobOutcome { status: job_status, context_entry }
}

/// The last stage's `outputs`, or an empty object for a stageless job.
fn last_stage_outputs(stages: &[Stage], local_stages: &Map<String, Value>) -> Value {
    stages
        .last()
        .and_then(|s| local_stages.get(&s.id()))
        .and_then(|entry| entry.get("outputs"))
        .cloned()
        .unwrap_or_else(|| Value::Object(Map::new()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowcore_core::registry::NoopScriptRunner;
    use flowcore_core::stage::{Stage, StageKind, StageMeta};
    use flowcore_core::strategy::Strategy;
    use flowcore_core::RunId;
    use tokio_util::sync::CancellationToken;

    fn noop_runner() -> &'static NoopScriptRunner {
        Box::leak(Box::new(NoopScriptRunner))
    }

    fn base_ctx() -> StageRunCtx<'static> {
        StageRunCtx {
            registry: None,
            script_runner: noop_runner(),
            trigger_runner: None,
            trace: None,
            cancel: CancellationToken::new(),
            run_id: RunId::new(),
        }
    }

    fn echo_stage(name: &str) -> Stage {
        Stage::new(StageMeta::new(name), StageKind::Empty { echo: Some("hi".to_string()), sleep: None })
    }

    #[tokio::test]
    async fn job_without_strategy_runs_once_and_exposes_last_stage_outputs() {
        let job = Job::new("build", vec![echo_stage("a"), echo_stage("b")]);
        let ctx = Context::new(Map::new());
        let run_ctx = base_ctx();
        let outcome = run_job(&job, &ctx, &run_ctx, 4).await;
        assert_eq!(outcome.status, Status::Success);
        assert!(outcome.context_entry.get("strategies").is_none());
        assert_eq!(outcome.context_entry["outputs"]["echo"], json!("hi"));
    }

    #[tokio::test]
    async fn job_with_matrix_expands_per_item_strategies() {
        let mut job = Job::new("build", vec![echo_stage("a")]);
        job.strategy = Some(Strategy {
            matrix: vec![("n".to_string(), vec![json!(1), json!(2)])],
            ..Default::default()
        });
        let ctx = Context::new(Map::new());
        let run_ctx = base_ctx();
        let outcome = run_job(&job, &ctx, &run_ctx, 4).await;
        assert_eq!(outcome.status, Status::Success);
        let strategies = outcome.context_entry["strategies"].as_object().unwrap();
        assert_eq!(strategies.len(), 2);
        assert!(strategies.contains_key("n=1"));
        assert!(strategies.contains_key("n=2"));
    }

    #[tokio::test]
    async fn false_if_skips_without_expanding_matrix() {
        let mut job = Job::new("build", vec![echo_stage("a")]);
        job.if_cond = Some("${{ params.run_it }}".to_string());
        let mut params = Map::new();
        params.insert("run_it".to_string(), json!(false));
        let ctx = Context::new(params);
        let run_ctx = base_ctx();
        let outcome = run_job(&job, &ctx, &run_ctx, 4).await;
        assert_eq!(outcome.status, Status::Skip);
        assert_eq!(outcome.context_entry["status"], json!("SKIP"));
    }
}
