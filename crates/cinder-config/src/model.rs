//! Raw declarative configuration shapes.
//!
//! These mirror the YAML the user writes. Jobs are parsed as free-form
//! YAML values first so the template resolver can deep-merge `extends`
//! fragments; only the merged result is deserialized into [`RawJob`].

use cinder_core::error::FailureClass;
use cinder_core::job::EmitWhen;
use cinder_core::rules::When;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use std::collections::BTreeMap;

/// Top-level configuration document.
#[derive(Debug, Clone, Deserialize)]
pub struct RawPipeline {
    /// Ordered stage list; the total order every job slots into.
    pub stages: Vec<String>,
    /// Reusable fragments referenced by jobs via `extends`.
    #[serde(default)]
    pub templates: BTreeMap<String, Value>,
    /// Pipeline-level variables, overridable per job.
    #[serde(default)]
    pub variables: BTreeMap<String, String>,
    #[serde(default)]
    pub jobs: BTreeMap<String, Value>,
}

/// One job definition after template resolution.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct RawJob {
    pub stage: String,
    /// Opaque executable unit passed to the execution adapter.
    #[serde(default)]
    pub script: String,
    /// Template chain, applied in declared order before job-local keys.
    /// Consumed during resolution; retained here so the merged value
    /// still deserializes.
    #[serde(default)]
    pub extends: Vec<String>,
    /// Ordered rule clauses. An absent list means the job always runs
    /// (an implicit always-matching `on_success` clause).
    #[serde(default)]
    pub rules: Vec<RawRule>,
    #[serde(default)]
    pub needs: Vec<RawNeed>,
    #[serde(default)]
    pub variables: BTreeMap<String, String>,
    #[serde(default)]
    pub retry: Option<RawRetry>,
    #[serde(default)]
    pub artifacts: Option<RawArtifacts>,
    #[serde(default)]
    pub allow_failure: bool,
    #[serde(default)]
    pub interruptible: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct RawRule {
    /// Condition string, compiled into a typed predicate. Absent means
    /// the clause matches unconditionally.
    #[serde(rename = "if", default)]
    pub condition: Option<String>,
    #[serde(default)]
    pub changes: Option<Vec<String>>,
    #[serde(default)]
    pub when: When,
}

/// A `needs` entry: bare job name, or the detailed form for artifact
/// opt-out and cross-pipeline references.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum RawNeed {
    Job(String),
    Detailed {
        job: String,
        #[serde(default)]
        project: Option<String>,
        #[serde(rename = "ref", default)]
        git_ref: Option<String>,
        #[serde(default = "default_true")]
        artifacts: bool,
    },
}

/// Retry shorthand (`retry: 2`) or the full policy form.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum RawRetry {
    Max(u32),
    Policy {
        max: u32,
        /// Failure classes to retry on; empty means transient-only.
        #[serde(default)]
        on: Vec<FailureClass>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct RawArtifacts {
    pub paths: Vec<String>,
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
    #[serde(default)]
    pub when: EmitWhen,
}

fn default_true() -> bool {
    true
}

fn default_retention_days() -> u32 {
    30
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_need_forms() {
        let short: RawNeed = serde_yaml::from_str("build").unwrap();
        assert!(matches!(short, RawNeed::Job(ref j) if j == "build"));

        let detailed: RawNeed = serde_yaml::from_str(
            "{ job: publish, project: infra/base, ref: master, artifacts: true }",
        )
        .unwrap();
        match detailed {
            RawNeed::Detailed {
                job,
                project,
                git_ref,
                artifacts,
            } => {
                assert_eq!(job, "publish");
                assert_eq!(project.as_deref(), Some("infra/base"));
                assert_eq!(git_ref.as_deref(), Some("master"));
                assert!(artifacts);
            }
            other => panic!("unexpected form: {:?}", other),
        }
    }

    #[test]
    fn test_retry_forms() {
        let short: RawRetry = serde_yaml::from_str("2").unwrap();
        assert!(matches!(short, RawRetry::Max(2)));

        let full: RawRetry =
            serde_yaml::from_str("{ max: 1, on: [script] }").unwrap();
        match full {
            RawRetry::Policy { max, on } => {
                assert_eq!(max, 1);
                assert_eq!(on, vec![FailureClass::Script]);
            }
            other => panic!("unexpected form: {:?}", other),
        }
    }

    #[test]
    fn test_unknown_job_field_rejected() {
        let err = serde_yaml::from_str::<RawJob>(
            "stage: test\nscript: make\nartifcats: {paths: [out]}\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("artifcats"));
    }
}
