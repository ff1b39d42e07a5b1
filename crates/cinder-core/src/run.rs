//! Runtime job and pipeline state.

use crate::error::FailureClass;
use crate::ids::{JobRunId, RunId};
use crate::job::JobSpec;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Scheduler state machine states for a single job run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Pending,
    Ready,
    Running,
    Succeeded,
    Failed,
    Skipped,
    Cancelled,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Succeeded
                | JobState::Failed
                | JobState::Skipped
                | JobState::Cancelled
        )
    }
}

/// Output recorded for a finished attempt.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct JobOutput {
    pub exit_code: i32,
    pub duration_ms: u64,
}

/// Runtime entity for one job in one pipeline run.
///
/// Created when the graph builder materializes the active set; archived
/// into the [`PipelineReport`] once the run is reported.
#[derive(Debug, Clone)]
pub struct JobRun {
    pub id: JobRunId,
    pub spec: JobSpec,
    pub state: JobState,
    /// 1-based attempt counter; pre-emption does not increment it.
    pub attempt: u32,
    /// Manual-gated jobs hold in `Pending` until released.
    pub manual: bool,
    pub released: bool,
    pub result: Option<Result<JobOutput, FailureClass>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl JobRun {
    pub fn new(spec: JobSpec, manual: bool) -> Self {
        Self {
            id: JobRunId::new(),
            spec,
            state: JobState::Pending,
            attempt: 0,
            manual,
            released: false,
            result: None,
            started_at: None,
            completed_at: None,
        }
    }

    /// Whether this job is a manual gate still waiting for release.
    pub fn held(&self) -> bool {
        self.manual && !self.released && !self.state.is_terminal()
    }

    pub fn failure_class(&self) -> Option<FailureClass> {
        match self.result {
            Some(Err(class)) => Some(class),
            _ => None,
        }
    }

    /// Whether a plain (non-artifact) dependency edge on this job is
    /// satisfied: it succeeded, or it terminated and is allowed to fail.
    pub fn satisfies_dependents(&self) -> bool {
        match self.state {
            JobState::Succeeded => true,
            JobState::Failed | JobState::Skipped | JobState::Cancelled => {
                self.spec.allow_failure
            }
            _ => false,
        }
    }
}

/// Terminal status of a whole pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStatus {
    Succeeded,
    Failed,
    Cancelled,
}

impl PipelineStatus {
    /// Derive the aggregate status from job terminal states.
    ///
    /// A run succeeds iff no strictly-required (non-allow-failure) job
    /// failed or was cancelled. Skips are neutral: they are propagated
    /// consequences, and the upstream cause already decided the status.
    /// An external cancellation overrides everything.
    pub fn from_jobs<'a>(
        jobs: impl Iterator<Item = &'a JobRun>,
        cancelled: bool,
    ) -> Self {
        if cancelled {
            return PipelineStatus::Cancelled;
        }
        for job in jobs {
            if job.spec.allow_failure {
                continue;
            }
            if matches!(job.state, JobState::Failed | JobState::Cancelled) {
                return PipelineStatus::Failed;
            }
        }
        PipelineStatus::Succeeded
    }
}

/// Per-job entry in the final report.
#[derive(Debug, Clone, Serialize)]
pub struct JobReport {
    pub name: String,
    pub stage: String,
    pub state: JobState,
    pub attempts: u32,
    pub failure: Option<FailureClass>,
    pub exit_code: Option<i32>,
    pub duration_ms: Option<u64>,
    pub allow_failure: bool,
    /// Manual gate that was never released during this run.
    pub manual_held: bool,
    /// Store key of the artifact this job published, if any.
    pub artifact: Option<String>,
}

/// The publish-boundary payload: terminal status plus per-job results and
/// artifact references.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineReport {
    pub run_id: RunId,
    pub status: PipelineStatus,
    pub jobs: Vec<JobReport>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl PipelineReport {
    pub fn job(&self, name: &str) -> Option<&JobReport> {
        self.jobs.iter().find(|j| j.name == name)
    }
}
