//! Artifact types.
//!
//! Artifacts are immutable, expiring, key-addressed file sets. Ownership
//! transfers to the store at job completion; consumers only ever see
//! shared read-only views.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Key addressing one stored artifact: producing job, ref, and commit.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArtifactKey {
    pub job: String,
    pub git_ref: String,
    pub commit_sha: String,
}

impl ArtifactKey {
    pub fn new(
        job: impl Into<String>,
        git_ref: impl Into<String>,
        commit_sha: impl Into<String>,
    ) -> Self {
        Self {
            job: job.into(),
            git_ref: git_ref.into(),
            commit_sha: commit_sha.into(),
        }
    }
}

impl fmt::Display for ArtifactKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}@{}", self.job, self.git_ref, self.commit_sha)
    }
}

/// One immutable, expiring file set produced by a job run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredArtifact {
    pub key: ArtifactKey,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// Relative path -> file contents.
    pub files: BTreeMap<String, Vec<u8>>,
    pub checksum_sha256: String,
}

impl StoredArtifact {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn size_bytes(&self) -> u64 {
        self.files.values().map(|f| f.len() as u64).sum()
    }
}
