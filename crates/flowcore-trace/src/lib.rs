//! Trace and audit persistence.
//!
//! [`record::TraceRecord`] is a single structured log line tied to a run;
//! [`sink::TraceSink`] writes it somewhere, bounded by a timeout so a slow
//! sink never blocks a run. [`record::AuditRecord`] is the durable,
//! once-per-release receipt the scheduler consults to avoid double-firing a
//! release instant; [`audit::AuditStore`] persists it.

pub mod audit;
pub mod error;
pub mod record;
pub mod sink;

pub use audit::{AuditStore, FileAuditStore, InMemoryAuditStore};
pub use error::{Result, TraceError};
pub use record::{AuditRecord, TraceLevel, TraceRecord};
pub use sink::{write_bounded, FileSink, StdoutSink, TraceSink, DEFAULT_WRITE_TIMEOUT};
