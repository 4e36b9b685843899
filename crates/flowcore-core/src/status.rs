//! The terminal-status lattice shared by stages, jobs, and workflows.

use serde::{Deserialize, Serialize};

/// Terminal (and initial `Wait`) status of a stage, job, or workflow run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Status {
    /// Initial state; never observed on a value returned from `execute`.
    Wait,
    Success,
    Failed,
    Cancel,
    Skip,
}

impl Status {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Status::Wait)
    }

    pub fn is_positive(self) -> bool {
        matches!(self, Status::Success | Status::Skip)
    }

    /// Fold child statuses into a parent status: any FAILED -> FAILED; else
    /// any CANCEL -> CANCEL; else all SKIP -> SKIP; else SUCCESS. An empty
    /// iterator aggregates to SUCCESS (the empty strategy/empty stage
    /// sequence case).
    pub fn aggregate(children: impl IntoIterator<Item = Status>) -> Status {
        let mut any_failed = false;
        let mut any_cancel = false;
        let mut any_non_skip = false;

        for child in children {
            match child {
                Status::Failed => any_failed = true,
                Status::Cancel => any_cancel = true,
                Status::Skip => {}
                Status::Success | Status::Wait => any_non_skip = true,
            }
        }

        if any_failed {
            Status::Failed
        } else if any_cancel {
            Status::Cancel
        } else if !any_non_skip {
            Status::Skip
        } else {
            Status::Success
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_aggregates_to_skip() {
        assert_eq!(Status::aggregate(vec![]), Status::Skip);
    }

    #[test]
    fn any_failed_wins() {
        assert_eq!(
            Status::aggregate(vec![Status::Success, Status::Failed, Status::Cancel]),
            Status::Failed
        );
    }

    #[test]
    fn any_cancel_without_failure_wins() {
        assert_eq!(
            Status::aggregate(vec![Status::Success, Status::Cancel, Status::Skip]),
            Status::Cancel
        );
    }

    #[test]
    fn all_skip_is_skip() {
        assert_eq!(
            Status::aggregate(vec![Status::Skip, Status::Skip]),
            Status::Skip
        );
    }

    #[test]
    fn mixed_success_and_skip_is_success() {
        assert_eq!(
            Status::aggregate(vec![Status::Skip, Status::Success]),
            Status::Success
        );
    }
}
