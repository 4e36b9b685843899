//! Cron expression parsing and firing-time iteration.
//!
//! `CronSchedule::parse` turns a 5- or 6-field expression (or an `@macro`)
//! into a value type; `next`/`prev` walk it against a `chrono_tz::Tz` to
//! produce the smallest/largest firing instant relative to a starting point,
//! handling DST gaps and overlaps explicitly.

mod error;
mod field;
mod macros;
mod schedule;

pub use error::{CronError, Result};
pub use schedule::{CronIter, CronSchedule};
