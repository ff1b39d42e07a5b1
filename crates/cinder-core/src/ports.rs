//! Port traits (hexagonal architecture).
//!
//! These traits define the seams between the engine core and its external
//! collaborators: the sandboxed runner, other pipeline instances, and the
//! artifact store backend.

use crate::artifact::{ArtifactKey, StoredArtifact};
use crate::error::Result;
use crate::glob::PathGlob;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Everything the execution adapter needs to run one attempt.
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    pub job: String,
    /// 1-based attempt number, used to address cancellation.
    pub attempt: u32,
    /// Opaque executable unit; the engine never interprets it.
    pub script: String,
    pub env: BTreeMap<String, String>,
    /// Read-only views of the artifacts this job consumes.
    pub input_artifacts: Vec<Arc<StoredArtifact>>,
    /// Declared artifact paths; the adapter collects matching files it
    /// produced under the job workspace.
    pub output_paths: Vec<PathGlob>,
}

/// Terminal status of one attempt.
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    pub exit_code: i32,
    pub duration_ms: u64,
    /// Relative path -> contents for every produced file matching the
    /// request's `output_paths`.
    pub output_files: BTreeMap<String, Vec<u8>>,
}

impl ExecutionOutcome {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// The opaque sandboxed runner boundary.
///
/// An `Err` from `run` is classified as transient infrastructure failure;
/// a nonzero `exit_code` in an `Ok` outcome is a script failure. `cancel`
/// is cooperative: after it is called, the matching `run` future must
/// resolve within the scheduler's grace period or the job is force-marked
/// cancelled.
#[async_trait]
pub trait ExecutionAdapter: Send + Sync {
    async fn run(&self, request: ExecutionRequest) -> Result<ExecutionOutcome>;

    async fn cancel(&self, job: &str, attempt: u32) -> Result<()>;
}

/// Status reported by another pipeline instance for a polled job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExternalJobStatus {
    /// No finished run of the job is known yet.
    Pending,
    Succeeded { artifacts_available: bool },
    Failed,
}

/// Cross-pipeline query boundary: another instance of this engine (or a
/// compatible one), polled rather than pushed.
#[async_trait]
pub trait ExternalPipelineClient: Send + Sync {
    async fn poll_job(
        &self,
        project: &str,
        git_ref: &str,
        job: &str,
    ) -> Result<ExternalJobStatus>;

    /// Latest artifact of a succeeded external job, if one exists.
    async fn fetch_artifact(
        &self,
        project: &str,
        git_ref: &str,
        job: &str,
    ) -> Result<Option<Arc<StoredArtifact>>>;
}

/// Artifact & cache store boundary.
///
/// Keys are write-once; deletion is atomic per key and safe to run
/// concurrently with readers. Cross-project consumers reach a store
/// through [`ExternalPipelineClient`], which routes on `project`, so the
/// store itself resolves within a single project.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Store a completed job's file set under `key`. Fails with
    /// [`crate::Error::ArtifactAlreadyStored`] if the key exists.
    async fn put(
        &self,
        key: ArtifactKey,
        files: BTreeMap<String, Vec<u8>>,
        expires_at: DateTime<Utc>,
    ) -> Result<Arc<StoredArtifact>>;

    /// Exact-key lookup. Expired entries are never returned, swept or not.
    async fn get(&self, key: &ArtifactKey) -> Result<Option<Arc<StoredArtifact>>>;

    /// Latest non-expired artifact for a `(ref, job)` pair. With several
    /// commits on a floating ref, the most recent `created_at` wins.
    async fn resolve_latest(
        &self,
        git_ref: &str,
        job: &str,
    ) -> Result<Option<Arc<StoredArtifact>>>;

    /// Remove every entry whose expiry is at or before `now`; returns the
    /// number removed.
    async fn expire(&self, now: DateTime<Utc>) -> Result<usize>;
}
