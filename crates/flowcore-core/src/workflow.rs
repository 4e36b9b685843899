//! Workflow definitions and the job dependency graph.

use crate::error::DefinitionError;
use crate::job::Job;
use crate::param::ParamSpec;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A schedule or webhook that can start a workflow. The core only needs the
/// raw cron text + timezone name; parsing is `flowcore-cron`'s job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventSpec {
    pub cron: String,
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

fn default_timezone() -> String {
    "UTC".to_string()
}

/// A validated, immutable workflow definition.
///
/// Jobs are stored in a contiguous array and referenced by stable integer
/// index internally,
/// with a name -> index map built once at construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub name: String,
    pub description: Option<String>,
    #[serde(default)]
    pub params: HashMap<String, ParamSpec>,
    #[serde(default)]
    pub on: Vec<EventSpec>,
    jobs: Vec<Job>,
    #[serde(skip)]
    job_index: HashMap<String, usize>,
}

impl Workflow {
    /// Construct and validate a workflow. Rejects unknown identifiers,
    /// duplicate job ids, unknown dependencies, and dependency cycles.
    pub fn new(
        name: impl Into<String>,
        description: Option<String>,
        params: HashMap<String, ParamSpec>,
        on: Vec<EventSpec>,
        jobs: Vec<Job>,
    ) -> Result<Self, DefinitionError> {
        let name = name.into();
        validate_identifier(&name)?;

        let mut job_index = HashMap::with_capacity(jobs.len());
        for (idx, job) in jobs.iter().enumerate() {
            validate_identifier(&job.id)?;
            if job_index.insert(job.id.clone(), idx).is_some() {
                return Err(DefinitionError::DuplicateJobId(job.id.clone()));
            }
            validate_unique_stage_ids(job)?;
            for (dim, _) in job.strategy.iter().flat_map(|s| s.matrix.iter()) {
                validate_identifier(dim)?;
            }
            job.strategy.as_ref().map(|s| s.validate()).transpose()?;
        }

        for job in &jobs {
            for dep in &job.needs {
                if !job_index.contains_key(dep) {
                    return Err(DefinitionError::UnknownDependency {
                        job: job.id.clone(),
                        dep: dep.clone(),
                    });
                }
            }
        }

        let workflow = Self {
            name,
            description,
            params,
            on,
            jobs,
            job_index,
        };
        workflow.detect_cycle()?;
        Ok(workflow)
    }

    pub fn jobs(&self) -> &[Job] {
        &self.jobs
    }

    pub fn job(&self, id: &str) -> Option<&Job> {
        self.job_index.get(id).map(|&idx| &self.jobs[idx])
    }

    pub fn job_index(&self, id: &str) -> Option<usize> {
        self.job_index.get(id).copied()
    }

    /// Dependency indices for the job at `idx`.
    pub fn dependencies_of(&self, idx: usize) -> impl Iterator<Item = usize> + '_ {
        self.jobs[idx]
            .needs
            .iter()
            .map(move |dep| self.job_index[dep])
    }

    /// DFS with three-color marks (white/gray/black) to detect a cycle in
    /// the `needs` graph.
    fn detect_cycle(&self) -> Result<(), DefinitionError> {
        #[derive(Clone, Copy, PartialEq)]
        enum Color {
            White,
            Gray,
            Black,
        }

        let mut colors = vec![Color::White; self.jobs.len()];

        fn visit(
            wf: &Workflow,
            idx: usize,
            colors: &mut Vec<Color>,
        ) -> Result<(), DefinitionError> {
            colors[idx] = Color::Gray;
            for dep_idx in wf.dependencies_of(idx) {
                match colors[dep_idx] {
                    Color::Gray => {
                        return Err(DefinitionError::Cycle(format!(
                            "{} -> {}",
                            wf.jobs[idx].id, wf.jobs[dep_idx].id
                        )));
                    }
                    Color::White => visit(wf, dep_idx, colors)?,
                    Color::Black => {}
                }
            }
            colors[idx] = Color::Black;
            Ok(())
        }

        for idx in 0..self.jobs.len() {
            if colors[idx] == Color::White {
                visit(self, idx, &mut colors)?;
            }
        }
        Ok(())
    }
}

fn validate_unique_stage_ids(job: &Job) -> Result<(), DefinitionError> {
    let mut seen = std::collections::HashSet::new();
    for stage in &job.stages {
        let id = stage.id();
        if !seen.insert(id.clone()) {
            return Err(DefinitionError::DuplicateStageId {
                job: job.id.clone(),
                id,
            });
        }
    }
    Ok(())
}

fn validate_identifier(s: &str) -> Result<(), DefinitionError> {
    let valid = !s.is_empty()
        && s.chars().next().is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(DefinitionError::InvalidIdentifier(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::{Stage, StageKind, StageMeta};

    fn stage(name: &str) -> Stage {
        Stage::new(
            StageMeta::new(name),
            StageKind::Empty {
                echo: None,
                sleep: None,
            },
        )
    }

    #[test]
    fn rejects_duplicate_job_ids() {
        let jobs = vec![Job::new("a", vec![stage("s")]), Job::new("a", vec![stage("s")])];
        let err = Workflow::new("wf", None, HashMap::new(), vec![], jobs).unwrap_err();
        assert!(matches!(err, DefinitionError::DuplicateJobId(_)));
    }

    #[test]
    fn rejects_unknown_dependency() {
        let mut b = Job::new("b", vec![stage("s")]);
        b.needs = vec!["missing".to_string()];
        let err = Workflow::new("wf", None, HashMap::new(), vec![], vec![b]).unwrap_err();
        assert!(matches!(err, DefinitionError::UnknownDependency { .. }));
    }

    #[test]
    fn rejects_cycle() {
        let mut a = Job::new("a", vec![stage("s")]);
        a.needs = vec!["b".to_string()];
        let mut b = Job::new("b", vec![stage("s")]);
        b.needs = vec!["a".to_string()];
        let err = Workflow::new("wf", None, HashMap::new(), vec![], vec![a, b]).unwrap_err();
        assert!(matches!(err, DefinitionError::Cycle(_)));
    }

    #[test]
    fn accepts_valid_dag() {
        let mut c = Job::new("c", vec![stage("s")]);
        c.needs = vec!["a".to_string(), "b".to_string()];
        let a = Job::new("a", vec![stage("s")]);
        let b = Job::new("b", vec![stage("s")]);
        let wf = Workflow::new("wf", None, HashMap::new(), vec![], vec![a, b, c]).unwrap();
        assert_eq!(wf.jobs().len(), 3);
    }

    #[test]
    fn rejects_duplicate_stage_ids_within_a_job() {
        let job = Job::new("a", vec![stage("build"), stage("build")]);
        let err = Workflow::new("wf", None, HashMap::new(), vec![], vec![job]).unwrap_err();
        assert!(matches!(err, DefinitionError::DuplicateStageId { .. }));
    }
}
