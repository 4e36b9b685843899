//! `Release`: a scheduled fire of a workflow at a specific
//! instant, and the [`ScheduledWorkflow`] entry the coordinator's min-heap
//! is built from.

use crate::error::{Result, SchedulerError};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use flowcore_core::workflow::Workflow;
use flowcore_cron::CronSchedule;
use serde::{Deserialize, Serialize};

/// How a release was initiated. Two releases with the same `(workflow,
/// fire_instant)` are equivalent for audit dedup regardless of type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReleaseType {
    Poke,
    Force,
    Manual,
}

/// A single scheduled fire of a workflow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Release {
    pub workflow: String,
    pub fire_instant: DateTime<Utc>,
    pub release_type: ReleaseType,
}

/// A workflow paired with one of its `on:` cron schedules, owning the
/// parsed [`CronSchedule`] so the coordinator never re-parses the
/// expression on each tick.
pub struct ScheduledWorkflow {
    pub workflow: Workflow,
    schedule: CronSchedule,
    tz: Tz,
}

impl ScheduledWorkflow {
    /// Expand a workflow's `on:` list into one [`ScheduledWorkflow`] per
    /// cron schedule. A workflow with no schedules yields no entries (it
    /// can still be triggered manually or via a `trigger` stage; it just
    /// never appears in the release queue).
    pub fn expand(workflow: Workflow) -> Result<Vec<Self>> {
        let mut out = Vec::with_capacity(workflow.on.len());
        for event in &workflow.on {
            let schedule = CronSchedule::parse(&event.cron)?;
            let tz: Tz = event
                .timezone
                .parse()
                .map_err(|_| SchedulerError::InvalidTimezone(event.timezone.clone()))?;
            out.push(Self {
                workflow: workflow.clone(),
                schedule,
                tz,
            });
        }
        Ok(out)
    }

    pub fn name(&self) -> &str {
        &self.workflow.name
    }

    /// The smallest firing instant strictly after `after`, in UTC.
    pub fn next_after(&self, after: DateTime<Utc>) -> Result<DateTime<Utc>> {
        let local = after.with_timezone(&self.tz);
        let next = self.schedule.next(self.tz, local)?;
        Ok(next.with_timezone(&Utc))
    }
}
