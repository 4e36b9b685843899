use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error(transparent)]
    Cron(#[from] flowcore_cron::CronError),

    #[error("invalid timezone '{0}'")]
    InvalidTimezone(String),

    #[error(transparent)]
    Trace(#[from] flowcore_trace::TraceError),
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
