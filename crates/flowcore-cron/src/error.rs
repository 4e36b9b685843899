//! Error taxonomy for the cron engine.

use thiserror::Error;

/// Raised at [`crate::schedule::CronSchedule::parse`] time for a malformed
/// expression.
#[derive(Debug, Clone, Error)]
pub enum CronError {
    #[error("invalid cron expression '{expr}': {reason}")]
    Parse { expr: String, reason: String },

    /// Raised by `next`/`prev` when no matching instant is found within the
    /// bounded lookahead window.
    #[error("no matching fire time within the lookahead bound")]
    NoMatch,
}

pub type Result<T> = std::result::Result<T, CronError>;
