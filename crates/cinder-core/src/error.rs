//! Error types for the Cinder engine.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Fatal configuration problems.
///
/// All of these are detected before any job starts: a pipeline run that
/// hits one reports it immediately and executes nothing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("malformed configuration: {0}")]
    Parse(String),

    #[error("pipeline declares no stages")]
    NoStages,

    #[error("duplicate stage name: {0}")]
    DuplicateStage(String),

    #[error("duplicate job name: {0}")]
    DuplicateJob(String),

    #[error("job `{job}` references unknown stage `{stage}`")]
    UnknownStage { job: String, stage: String },

    #[error("job `{job}` extends unknown template `{template}`")]
    UnknownTemplate { job: String, template: String },

    #[error("job `{job}` needs `{need}`, which is not defined")]
    UnknownNeed { job: String, need: String },

    #[error(
        "job `{job}` needs artifacts from `{need}`, which is excluded from this run"
    )]
    MissingNeed { job: String, need: String },

    #[error(
        "job `{job}` in stage `{stage}` needs `{need}` from later stage `{need_stage}`"
    )]
    StageOrderViolation {
        job: String,
        stage: String,
        need: String,
        need_stage: String,
    },

    #[error("dependency cycle involving job `{0}`")]
    DependencyCycle(String),

    #[error("invalid glob pattern `{pattern}`: {reason}")]
    BadGlob { pattern: String, reason: String },

    #[error("invalid rule condition `{condition}`: {reason}")]
    BadCondition { condition: String, reason: String },
}

/// Classification of a failed job attempt.
///
/// Drives the retry policy: `Transient` is auto-retried by default,
/// `Script` only when a job opts in, `ExternalTimeout` never.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    /// Worker crash, network blip, or other infrastructure fault.
    Transient,
    /// Nonzero exit status reported by the execution adapter.
    Script,
    /// A cross-pipeline dependency poll exceeded its deadline.
    ExternalTimeout,
}

#[derive(Debug, Error)]
pub enum Error {
    // Configuration errors
    #[error(transparent)]
    Config(#[from] ConfigError),

    // Run errors
    #[error("run not found: {0}")]
    RunNotFound(String),

    #[error("job not found: {0}")]
    JobNotFound(String),

    #[error("run already completed")]
    RunAlreadyCompleted,

    // Artifact errors
    #[error("artifact already stored for key {0}")]
    ArtifactAlreadyStored(String),

    #[error("artifact not found: {0}")]
    ArtifactNotFound(String),

    // Boundary errors
    #[error("execution adapter failure: {0}")]
    Adapter(String),

    #[error("external pipeline query failed: {0}")]
    External(String),

    // Infrastructure
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}
