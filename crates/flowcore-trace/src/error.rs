use thiserror::Error;

#[derive(Debug, Error)]
pub enum TraceError {
    #[error("trace/audit io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to (de)serialize audit record: {0}")]
    Serde(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, TraceError>;
