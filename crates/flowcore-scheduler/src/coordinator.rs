//! `ReleaseCoordinator`: the release/queue coordinator. Ticks
//! are driver-controlled ([`ReleaseCoordinator::poke`]); [`ReleaseCoordinator::run`]
//! is an optional convenience loop for a process that wants to drive itself
//! on a fixed interval until a shutdown signal fires.

use crate::queue::{HeapEntry, ReleaseHeap};
use crate::release::{Release, ReleaseType, ScheduledWorkflow};
use chrono::{DateTime, Utc};
use flowcore_core::{RunId, RunResult, Status};
use flowcore_engine::WorkflowExecutor;
use flowcore_trace::{AuditRecord, AuditStore};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// What became of one popped [`Release`] during a [`ReleaseCoordinator::poke`] call.
#[derive(Debug)]
pub enum ReleaseOutcome {
    Ran { release: Release, run_id: RunId, status: Status },
    /// The audit store already has a record for this `(workflow, instant)`.
    Deduped(Release),
    /// The workflow name was in the caller's `excluded` list.
    Excluded(Release),
    /// The worker pool's bounded queue was full this tick; dropped as the
    /// oldest extra release under backpressure.
    Dropped(Release),
}

/// Coordinates concurrent pokes of zero or more cron-scheduled workflows in
/// one process. Not a distributed scheduler: there is no leader
/// election and no cross-process coordination beyond the shared
/// [`AuditStore`].
pub struct ReleaseCoordinator<'a> {
    scheduled: Vec<ScheduledWorkflow>,
    heap: Mutex<ReleaseHeap>,
    audit: Arc<dyn AuditStore>,
    executor: WorkflowExecutor<'a>,
    worker_permits: Semaphore,
    /// Bound on how many due releases a single [`poke`](Self::poke) call
    /// will hand to the worker pool; extras are dropped.
    queue_capacity: usize,
}

impl<'a> ReleaseCoordinator<'a> {
    /// Build a coordinator and seed the heap with each schedule's first
    /// fire at-or-after `now`.
    pub fn new(
        scheduled: Vec<ScheduledWorkflow>,
        audit: Arc<dyn AuditStore>,
        executor: WorkflowExecutor<'a>,
        pool_capacity: usize,
        queue_capacity: usize,
    ) -> crate::error::Result<Self> {
        let now = Utc::now();
        let mut heap = ReleaseHeap::new();
        for (idx, sw) in scheduled.iter().enumerate() {
            heap.push(HeapEntry { fire_instant: sw.next_after(now)?, schedule_idx: idx });
        }
        Ok(Self {
            scheduled,
            heap: Mutex::new(heap),
            audit,
            executor,
            worker_permits: Semaphore::new(pool_capacity.max(1)),
            queue_capacity: queue_capacity.max(1),
        })
    }

    /// Pop every release due at or before `now`, dedup against the audit
    /// store, apply backpressure, and run the survivors. All
    /// runs for this tick complete before `poke` returns, matching the
    /// "all complete before the next tick's pops are processed" ordering
    /// guarantee.
    pub async fn poke(&self, now: DateTime<Utc>, end_instant: Option<DateTime<Utc>>, force_run: bool, excluded: &[String]) -> Vec<ReleaseOutcome> {
        let bound = end_instant.map(|e| e.min(now)).unwrap_or(now);

        let due = {
            let mut heap = self.heap.lock().await;
            let due = heap.pop_due(bound);
            for entry in &due {
                match self.scheduled[entry.schedule_idx].next_after(entry.fire_instant) {
                    Ok(next) => heap.push(HeapEntry { fire_instant: next, schedule_idx: entry.schedule_idx }),
                    Err(e) => warn!(workflow = %self.scheduled[entry.schedule_idx].name(), error = %e, "could not compute next fire; schedule dropped from queue"),
                }
            }
            due
        };

        let mut outcomes = Vec::new();
        let mut candidates: Vec<(usize, Release)> = Vec::with_capacity(due.len());
        for entry in due {
            let sw = &self.scheduled[entry.schedule_idx];
            let release = Release {
                workflow: sw.name().to_string(),
                fire_instant: entry.fire_instant,
                release_type: if force_run { ReleaseType::Force } else { ReleaseType::Poke },
            };
            if excluded.iter().any(|name| name == &release.workflow) {
                outcomes.push(ReleaseOutcome::Excluded(release));
                continue;
            }
            candidates.push((entry.schedule_idx, release));
        }

        // Oldest-first backpressure: keep the newest `queue_capacity` fires.
        candidates.sort_by_key(|(_, release)| release.fire_instant);
        if candidates.len() > self.queue_capacity {
            let overflow = candidates.len() - self.queue_capacity;
            for (_, release) in candidates.drain(0..overflow) {
                self.save_skipped_audit(&release).await;
                outcomes.push(ReleaseOutcome::Dropped(release));
            }
        }

        let mut runnable = Vec::with_capacity(candidates.len());
        for (schedule_idx, release) in candidates {
            if !force_run {
                match self.audit.is_pointed(&release.workflow, release.fire_instant).await {
                    Ok(true) => {
                        outcomes.push(ReleaseOutcome::Deduped(release));
                        continue;
                    }
                    Ok(false) => {}
                    Err(e) => warn!(workflow = %release.workflow, error = %e, "audit lookup failed; running anyway"),
                }
            }
            runnable.push((schedule_idx, release));
        }

        let ran = futures::future::join_all(runnable.into_iter().map(|(schedule_idx, release)| async move {
            let _permit = self.worker_permits.acquire().await.expect("semaphore not closed");
            let sw = &self.scheduled[schedule_idx];
            let params = release_params(&release);
            let result = self.executor.execute(&sw.workflow, params, Some(CancellationToken::new()), None, None).await;
            self.save_audit(&release, &result).await;
            ReleaseOutcome::Ran { release, run_id: result.run_id, status: result.status }
        }))
        .await;
        outcomes.extend(ran);
        outcomes
    }

    /// Drive `poke` on a fixed interval until `shutdown` fires.
    pub async fn run(&self, tick: Duration, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(tick);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("release coordinator shutting down");
                    break;
                }
                _ = interval.tick() => {
                    for outcome in self.poke(Utc::now(), None, false, &[]).await {
                        if let ReleaseOutcome::Ran { release, status, .. } = outcome {
                            info!(workflow = %release.workflow, fire_instant = %release.fire_instant, ?status, "release finished");
                        }
                    }
                }
            }
        }
    }

    async fn save_audit(&self, release: &Release, result: &RunResult) {
        let record = AuditRecord {
            workflow: release.workflow.clone(),
            release_instant: release.fire_instant,
            run_id: result.run_id,
            status: result.status,
            start: result.start,
            end: result.end,
            extras: None,
        };
        if let Err(e) = self.audit.save(record).await {
            warn!(workflow = %release.workflow, error = %e, "failed to save audit record");
        }
    }

    async fn save_skipped_audit(&self, release: &Release) {
        let now = Utc::now();
        let record = AuditRecord {
            workflow: release.workflow.clone(),
            release_instant: release.fire_instant,
            run_id: RunId::new(),
            status: Status::Skip,
            start: now,
            end: now,
            extras: Some(json!({"reason": "release queue backpressure: dropped as oldest extra"})),
        };
        if let Err(e) = self.audit.save(record).await {
            warn!(workflow = %release.workflow, error = %e, "failed to save skipped-audit record");
        }
    }
}

/// `params={"release": {...}}` injected into a scheduled fire, exposing
/// `release.logical_date` and `release.type`.
fn release_params(release: &Release) -> Map<String, Value> {
    let mut params = Map::new();
    params.insert(
        "release".to_string(),
        json!({
            "logical_date": release.fire_instant.to_rfc3339(),
            "type": release.release_type,
        }),
    );
    params
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowcore_core::registry::NoopScriptRunner;
    use flowcore_core::stage::{Stage, StageKind, StageMeta};
    use flowcore_core::workflow::{EventSpec, Workflow};
    use flowcore_core::job::Job;
    use flowcore_trace::InMemoryAuditStore;
    use std::collections::HashMap;

    fn noop_runner() -> &'static NoopScriptRunner {
        Box::leak(Box::new(NoopScriptRunner))
    }

    fn echo_workflow(name: &str, cron: &str) -> Workflow {
        let stage = Stage::new(StageMeta::new("s"), StageKind::Empty { echo: Some("hi".to_string()), sleep: None });
        Workflow::new(
            name,
            None,
            HashMap::new(),
            vec![EventSpec { cron: cron.to_string(), timezone: "UTC".to_string() }],
            vec![Job::new("j", vec![stage])],
        )
        .unwrap()
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

    #[tokio::test]
    async fn poke_runs_a_due_release_exactly_once() {
        let scheduled = ScheduledWorkflow::expand(echo_workflow("every-minute", "* * * * *")).unwrap();
        let audit = Arc::new(InMemoryAuditStore::new());
        let coordinator = ReleaseCoordinator::new(scheduled, audit.clone(), executor(), 4, 100).unwrap();

        let now = Utc::now();
        // Force the heap's only entry due by poking far enough in the future.
        let far_future = now + chrono::Duration::days(2);
        let outcomes = coordinator.poke(far_future, None, false, &[]).await;
        let ran: Vec<_> = outcomes.iter().filter(|o| matches!(o, ReleaseOutcome::Ran { .. })).collect();
        assert_eq!(ran.len(), 1);

        // Poking again at the same instant must dedup via the audit store.
        let outcomes2 = coordinator.poke(far_future, None, false, &[]).await;
        assert!(outcomes2.iter().all(|o| !matches!(o, ReleaseOutcome::Ran { .. })));
    }

    #[tokio::test]
    async fn excluded_workflow_is_skipped() {
        let scheduled = ScheduledWorkflow::expand(echo_workflow("excluded-wf", "* * * * *")).unwrap();
        let audit = Arc::new(InMemoryAuditStore::new());
        let coordinator = ReleaseCoordinator::new(scheduled, audit, executor(), 4, 100).unwrap();

        let far_future = Utc::now() + chrono::Duration::days(2);
        let outcomes = coordinator.poke(far_future, None, false, &["excluded-wf".to_string()]).await;
        assert!(matches!(outcomes.as_slice(), [ReleaseOutcome::Excluded(_)]));
    }

    #[tokio::test]
    async fn backpressure_drops_oldest_extra_when_queue_is_full() {
        let a = ScheduledWorkflow::expand(echo_workflow("a", "* * * * *")).unwrap();
        let b = ScheduledWorkflow::expand(echo_workflow("b", "* * * * *")).unwrap();
        let mut scheduled = a;
        scheduled.extend(b);
        let audit = Arc::new(InMemoryAuditStore::new());
        let coordinator = ReleaseCoordinator::new(scheduled, audit, executor(), 4, 1).unwrap();

        let far_future = Utc::now() + chrono::Duration::days(2);
        let outcomes = coordinator.poke(far_future, None, false, &[]).await;
        let dropped = outcomes.iter().filter(|o| matches!(o, ReleaseOutcome::Dropped(_))).count();
        let ran = outcomes.iter().filter(|o| matches!(o, ReleaseOutcome::Ran { .. })).count();
        assert_eq!(dropped, 1);
        assert_eq!(ran, 1);
    }

    #[tokio::test]
    async fn force_run_is_tagged_and_still_recorded_to_audit() {
        let scheduled = ScheduledWorkflow::expand(echo_workflow("forced", "* * * * *")).unwrap();
        let audit = Arc::new(InMemoryAuditStore::new());
        let coordinator = ReleaseCoordinator::new(scheduled, audit.clone(), executor(), 4, 100).unwrap();

        let far_future = Utc::now() + chrono::Duration::days(2);
        let outcomes = coordinator.poke(far_future, None, true, &[]).await;
        let fire_instant = match outcomes.as_slice() {
            [ReleaseOutcome::Ran { release, .. }] => {
                assert_eq!(release.release_type, ReleaseType::Force);
                release.fire_instant
            }
            other => panic!("expected exactly one Ran outcome, got {other:?}"),
        };
        assert!(audit.is_pointed("forced", fire_instant).await.unwrap());
    }
}
