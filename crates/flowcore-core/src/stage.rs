//! Stage definitions: the tagged `StageKind` variants and the shared
//! `StageMeta` fields every variant carries (`id`, `name`, `if`, `retry`,
//! `timeout`, `on_error`).

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

/// What a stage does when its variant-specific execution raises an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OnError {
    /// Propagate: the stage (and, absent trigger-rule/skip absorption, the job) is FAILED.
    #[default]
    Raise,
    /// Record the error but return SKIP.
    Skip,
    /// Record the error but return SUCCESS with empty outputs.
    Ignore,
}

/// Fields shared by every stage variant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageMeta {
    pub name: String,
    /// Auto-derived from `name` when absent (`CORE_STAGE_DEFAULT_ID`); must be
    /// unique within the containing job. Literal, never templated.
    pub id: Option<String>,
    /// Skip-when-false condition, templated at dispatch time.
    pub if_cond: Option<String>,
    #[serde(default)]
    pub retry: u32,
    pub timeout: Option<Duration>,
    #[serde(default)]
    pub on_error: OnError,
}

impl StageMeta {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id: None,
            if_cond: None,
            retry: 0,
            timeout: None,
            on_error: OnError::default(),
        }
    }

    /// Resolve the effective stage id: explicit `id`, else a slug derived
    /// from `name` (lowercased, non-alphanumerics collapsed to `_`).
    pub fn effective_id(&self) -> String {
        match &self.id {
            Some(id) => id.clone(),
            None => slugify(&self.name),
        }
    }
}

fn slugify(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut last_was_sep = false;
    for ch in name.chars() {
        if ch.is_ascii_alphanumeric() {
            out.push(ch.to_ascii_lowercase());
            last_was_sep = false;
        } else if !last_was_sep {
            out.push('_');
            last_was_sep = true;
        }
    }
    out.trim_matches('_').to_string()
}

/// One arm of a `case` stage: either a literal value to match, or the
/// default (`_`) arm.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseArm {
    pub pattern: CasePattern,
    pub stages: Vec<Stage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum CasePattern {
    Value(Value),
    Default,
}

/// A branch of a `parallel` stage: a name plus its own stage sequence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParallelBranch {
    pub name: String,
    pub stages: Vec<Stage>,
}

/// The variant-specific payload of a stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum StageKind {
    Empty {
        echo: Option<String>,
        sleep: Option<f64>,
    },
    Bash {
        bash: String,
        #[serde(default)]
        env: HashMap<String, String>,
    },
    Py {
        run: String,
    },
    Call {
        /// `<namespace>/<name>@<tag>`
        uses: String,
        #[serde(default)]
        with: HashMap<String, Value>,
    },
    Trigger {
        trigger: String,
        #[serde(default)]
        params: HashMap<String, Value>,
    },
    Parallel {
        parallel: Vec<ParallelBranch>,
        max_parallel: Option<usize>,
    },
    Foreach {
        foreach: String,
        stages: Vec<Stage>,
        #[serde(default = "default_concurrent")]
        concurrent: usize,
        #[serde(default)]
        use_index_as_key: bool,
    },
    Case {
        case: String,
        #[serde(rename = "match")]
        match_arms: Vec<CaseArm>,
        #[serde(default)]
        skip_not_match: bool,
    },
    Until {
        until: String,
        stages: Vec<Stage>,
        #[serde(default = "default_max_loop")]
        max_loop: u32,
    },
    Raise {
        raise: String,
    },
}

fn default_concurrent() -> usize {
    1
}

fn default_max_loop() -> u32 {
    10
}

/// A single stage: shared metadata plus a tagged variant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stage {
    pub meta: StageMeta,
    pub kind: StageKind,
}

impl Stage {
    pub fn new(meta: StageMeta, kind: StageKind) -> Self {
        Self { meta, kind }
    }

    pub fn id(&self) -> String {
        self.meta.effective_id()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slug_derived_from_name_when_id_absent() {
        let meta = StageMeta::new("Build & Test!");
        assert_eq!(meta.effective_id(), "build_test");
    }

    #[test]
    fn explicit_id_wins_over_derived_slug() {
        let mut meta = StageMeta::new("Build & Test!");
        meta.id = Some("bt".to_string());
        assert_eq!(meta.effective_id(), "bt");
    }
}
