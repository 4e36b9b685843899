//! Error taxonomy for the template & parameter resolver.

use flowcore_core::ParamError;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum TemplateError {
    #[error("malformed template expression '{expr}': {reason}")]
    Parse { expr: String, reason: String },

    /// An `${{ expr }}` referenced a path that does not resolve against the
    /// context, and the expression did not carry the `?` optional suffix.
    #[error("unresolved variable '{path}'")]
    Unresolved { path: String },

    #[error("unknown filter '{0}'")]
    UnknownFilter(String),

    #[error("filter '{filter}' received the wrong arguments: {reason}")]
    BadFilterArgs { filter: String, reason: String },

    #[error("'@{tag}' requires a registry but none was supplied")]
    NoRegistry { tag: String },

    #[error(transparent)]
    Param(#[from] ParamError),

    #[error(transparent)]
    Core(#[from] flowcore_core::CoreError),
}

pub type Result<T> = std::result::Result<T, TemplateError>;
