//! Process-wide engine configuration, read once from the environment at
//! driver construction.

use crate::error::{EngineError, Result};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub timezone: chrono_tz::Tz,
    pub max_job_parallel: usize,
    pub max_job_exec_timeout: Option<Duration>,
    pub stage_default_id: bool,
    pub registry_paths: Vec<PathBuf>,
    pub audit_path: PathBuf,
    pub trace_path: PathBuf,
}

impl EngineConfig {
    /// Read `CORE_*` environment variables, falling back to their defaults
    /// when unset.
    pub fn from_env() -> Result<Self> {
        let timezone = match std::env::var("CORE_TIMEZONE") {
            Ok(tz) => tz.parse().map_err(|_| EngineError::Config {
                name: "CORE_TIMEZONE",
                message: format!("'{tz}' is not a recognized IANA timezone"),
            })?,
            Err(_) => chrono_tz::UTC,
        };

        let max_job_parallel = match std::env::var("CORE_MAX_JOB_PARALLEL") {
            Ok(raw) => raw.parse::<usize>().ok().filter(|n| *n > 0).ok_or_else(|| EngineError::Config {
                name: "CORE_MAX_JOB_PARALLEL",
                message: format!("'{raw}' is not a positive integer"),
            })?,
            Err(_) => std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4),
        };

        let max_job_exec_timeout = match std::env::var("CORE_MAX_JOB_EXEC_TIMEOUT") {
            Ok(raw) => Some(Duration::from_secs(raw.parse::<u64>().map_err(|_| EngineError::Config {
                name: "CORE_MAX_JOB_EXEC_TIMEOUT",
                message: format!("'{raw}' is not a number of seconds"),
            })?)),
            Err(_) => None,
        };

        let stage_default_id = match std::env::var("CORE_STAGE_DEFAULT_ID") {
            Ok(raw) => parse_bool(&raw).ok_or_else(|| EngineError::Config {
                name: "CORE_STAGE_DEFAULT_ID",
                message: format!("'{raw}' is not a boolean"),
            })?,
            Err(_) => true,
        };

        let registry_paths = std::env::var("CORE_REGISTRY")
            .map(|raw| raw.split(',').map(PathBuf::from).collect())
            .unwrap_or_default();

        let audit_path = std::env::var("CORE_AUDIT_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./.flowcore/audit"));
        let trace_path = std::env::var("CORE_TRACE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./.flowcore/trace"));

        Ok(Self {
            timezone,
            max_job_parallel,
            max_job_exec_timeout,
            stage_default_id,
            registry_paths,
            audit_path,
            trace_path,
        })
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            timezone: chrono_tz::UTC,
            max_job_parallel: std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4),
            max_job_exec_timeout: None,
            stage_default_id: true,
            registry_paths: Vec::new(),
            audit_path: PathBuf::from("./.flowcore/audit"),
            trace_path: PathBuf::from("./.flowcore/trace"),
        }
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_uses_utc_and_cpu_count() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.timezone, chrono_tz::UTC);
        assert!(cfg.max_job_parallel >= 1);
        assert!(cfg.stage_default_id);
    }

    #[test]
    fn parse_bool_accepts_common_synonyms() {
        assert_eq!(parse_bool("YES"), Some(true));
        assert_eq!(parse_bool("off"), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }
}
