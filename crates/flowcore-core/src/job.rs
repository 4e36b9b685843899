//! Job definitions.

use crate::stage::Stage;
use crate::strategy::Strategy;
use serde::{Deserialize, Serialize};

/// Predicate over dependency statuses controlling whether a dependent job
/// runs or is skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerRule {
    #[default]
    AllSuccess,
    AllFailed,
    AllDone,
    AnySuccess,
    AnyFailed,
    NoneFailed,
    NoneSkipped,
}

impl TriggerRule {
    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "all_success" => Self::AllSuccess,
            "all_failed" => Self::AllFailed,
            "all_done" => Self::AllDone,
            "any_success" => Self::AnySuccess,
            "any_failed" => Self::AnyFailed,
            "none_failed" => Self::NoneFailed,
            "none_skipped" => Self::NoneSkipped,
            _ => return None,
        })
    }
}

/// Opaque dispatch target for a job; concrete backends (container, cloud
/// batch) are external collaborators.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RunsOn {
    #[default]
    Local,
    Container {
        image: String,
    },
    CloudBatch {
        backend: String,
    },
}

/// A node in the workflow's job DAG.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub desc: Option<String>,
    #[serde(default)]
    pub needs: Vec<String>,
    pub strategy: Option<Strategy>,
    pub stages: Vec<Stage>,
    #[serde(default)]
    pub trigger_rule: TriggerRule,
    pub if_cond: Option<String>,
    #[serde(default)]
    pub runs_on: RunsOn,
}

impl Job {
    pub fn new(id: impl Into<String>, stages: Vec<Stage>) -> Self {
        Self {
            id: id.into(),
            desc: None,
            needs: Vec::new(),
            strategy: None,
            stages,
            trigger_rule: TriggerRule::default(),
            if_cond: None,
            runs_on: RunsOn::default(),
        }
    }
}
