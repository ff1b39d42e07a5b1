//! Job and pipeline specification types.
//!
//! These are the fully materialized shapes the engine schedules from:
//! templates resolved, conditions compiled, globs validated. The raw YAML
//! shapes live in `cinder-config`.

use crate::error::FailureClass;
use crate::glob::PathGlob;
use crate::rules::RuleClause;
use chrono::Duration;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// A materialized pipeline: ordered stages plus the full job set.
#[derive(Debug, Clone)]
pub struct PipelineSpec {
    pub stages: Vec<String>,
    pub jobs: Vec<JobSpec>,
    /// Pipeline-level variables, already folded into each job's map with
    /// job-local values winning.
    pub variables: BTreeMap<String, String>,
}

impl PipelineSpec {
    pub fn stage_index(&self, stage: &str) -> Option<usize> {
        self.stages.iter().position(|s| s == stage)
    }

    pub fn job(&self, name: &str) -> Option<&JobSpec> {
        self.jobs.iter().find(|j| j.name == name)
    }
}

/// One fully materialized job definition.
#[derive(Debug, Clone)]
pub struct JobSpec {
    pub name: String,
    pub stage: String,
    /// Opaque executable unit handed to the execution adapter.
    pub script: String,
    pub rules: Vec<RuleClause>,
    pub needs: Vec<NeedRef>,
    pub variables: BTreeMap<String, String>,
    pub retry: RetryPolicy,
    pub artifacts: Option<ArtifactPolicy>,
    pub allow_failure: bool,
    pub interruptible: bool,
}

/// Dependency on another job, possibly in another pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NeedRef {
    pub job: String,
    pub project: Option<String>,
    pub git_ref: Option<String>,
    /// Whether the dependent consumes the needed job's artifacts. An
    /// excluded local need with this set is a fatal configuration error
    /// rather than a vacuously satisfied edge.
    pub artifacts: bool,
}

impl NeedRef {
    pub fn local(job: impl Into<String>) -> Self {
        Self {
            job: job.into(),
            project: None,
            git_ref: None,
            artifacts: true,
        }
    }

    /// A `project` designates a dependency outside the current pipeline,
    /// resolved by polling rather than by a local DAG edge.
    pub fn is_cross_pipeline(&self) -> bool {
        self.project.is_some()
    }
}

/// Automatic retry policy for failed attempts.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of retries after the first attempt.
    pub max: u32,
    /// Failure classes eligible for automatic retry.
    pub on: HashSet<FailureClass>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max: 0,
            on: HashSet::from([FailureClass::Transient]),
        }
    }
}

impl RetryPolicy {
    pub fn new(max: u32, on: impl IntoIterator<Item = FailureClass>) -> Self {
        Self {
            max,
            on: on.into_iter().collect(),
        }
    }

    /// Whether a failure of `class` on attempt number `attempt` (1-based)
    /// should loop the job back to pending.
    pub fn should_retry(&self, class: FailureClass, attempt: u32) -> bool {
        attempt <= self.max && self.on.contains(&class)
    }
}

/// When a job's artifacts are published to the store.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum EmitWhen {
    #[default]
    OnSuccess,
    OnFailure,
    Always,
}

/// What a job publishes to the artifact store, and for how long.
#[derive(Debug, Clone)]
pub struct ArtifactPolicy {
    pub retention: Duration,
    pub paths: Vec<PathGlob>,
    pub emit_when: EmitWhen,
}

impl ArtifactPolicy {
    pub fn should_emit(&self, succeeded: bool) -> bool {
        match self.emit_when {
            EmitWhen::OnSuccess => succeeded,
            EmitWhen::OnFailure => !succeeded,
            EmitWhen::Always => true,
        }
    }

    /// Filter produced files down to the declared artifact paths.
    pub fn select(
        &self,
        files: &BTreeMap<String, Vec<u8>>,
    ) -> BTreeMap<String, Vec<u8>> {
        files
            .iter()
            .filter(|(path, _)| self.paths.iter().any(|g| g.matches(path)))
            .map(|(path, contents)| (path.clone(), contents.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_policy_defaults() {
        let policy = RetryPolicy::default();
        assert!(!policy.should_retry(FailureClass::Transient, 1));

        let policy = RetryPolicy::new(2, [FailureClass::Transient]);
        assert!(policy.should_retry(FailureClass::Transient, 1));
        assert!(policy.should_retry(FailureClass::Transient, 2));
        assert!(!policy.should_retry(FailureClass::Transient, 3));
        assert!(!policy.should_retry(FailureClass::Script, 1));
    }

    #[test]
    fn test_emit_when() {
        let policy = ArtifactPolicy {
            retention: Duration::hours(1),
            paths: vec![],
            emit_when: EmitWhen::OnFailure,
        };
        assert!(!policy.should_emit(true));
        assert!(policy.should_emit(false));
    }

    #[test]
    fn test_artifact_path_selection() {
        let policy = ArtifactPolicy {
            retention: Duration::hours(1),
            paths: vec![PathGlob::compile("target/**").unwrap()],
            emit_when: EmitWhen::OnSuccess,
        };
        let files: BTreeMap<String, Vec<u8>> = [
            ("target/release/app".to_string(), b"elf".to_vec()),
            ("notes.txt".to_string(), vec![]),
        ]
        .into_iter()
        .collect();
        let selected = policy.select(&files);
        assert_eq!(selected.len(), 1);
        assert!(selected.contains_key("target/release/app"));
    }

    #[test]
    fn test_cross_pipeline_need() {
        let local = NeedRef::local("build");
        assert!(!local.is_cross_pipeline());

        let cross = NeedRef {
            job: "publish".to_string(),
            project: Some("infra/base-images".to_string()),
            git_ref: Some("master".to_string()),
            artifacts: true,
        };
        assert!(cross.is_cross_pipeline());
    }
}
