//! Engine event payloads.
//!
//! The scheduler emits these over a channel for observers: the CLI
//! renders them as progress lines, tests assert on them. They are
//! serializable so an embedding service can forward them as-is.

use crate::error::FailureClass;
use crate::ids::RunId;
use crate::run::{JobState, PipelineStatus};
use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineEvent {
    RunStarted(RunStartedPayload),
    JobStateChanged(JobStateChangedPayload),
    JobRetrying(JobRetryingPayload),
    ArtifactStored(ArtifactStoredPayload),
    RunCompleted(RunCompletedPayload),
}

#[derive(Debug, Clone, Serialize)]
pub struct RunStartedPayload {
    pub run_id: RunId,
    pub total_jobs: usize,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobStateChangedPayload {
    pub run_id: RunId,
    pub job: String,
    pub from: JobState,
    pub to: JobState,
    pub attempt: u32,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobRetryingPayload {
    pub run_id: RunId,
    pub job: String,
    /// The attempt that just failed.
    pub failed_attempt: u32,
    pub class: FailureClass,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ArtifactStoredPayload {
    pub run_id: RunId,
    pub job: String,
    pub key: String,
    pub size_bytes: u64,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunCompletedPayload {
    pub run_id: RunId,
    pub status: PipelineStatus,
    pub at: DateTime<Utc>,
}
