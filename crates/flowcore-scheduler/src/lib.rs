//! Cron-driven release queue that pokes scheduled flowcore workflows. [`release::ScheduledWorkflow`] pairs a [`flowcore_core::Workflow`]
//! with one parsed `on:` cron schedule; [`queue::ReleaseHeap`] is the
//! min-heap of next firing instants; [`coordinator::ReleaseCoordinator`]
//! pops due releases on each driver-controlled tick, dedups against an
//! [`flowcore_trace::AuditStore`], and runs survivors through a
//! [`flowcore_engine::WorkflowExecutor`].

pub mod coordinator;
pub mod error;
pub mod queue;
pub mod release;

pub use coordinator::{ReleaseCoordinator, ReleaseOutcome};
pub use error::{Result, SchedulerError};
pub use queue::{HeapEntry, ReleaseHeap};
pub use release::{Release, ReleaseType, ScheduledWorkflow};
