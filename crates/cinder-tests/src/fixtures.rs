//! Test fixtures: scripted boundary collaborators and context builders.

use async_trait::async_trait;
use chrono::Utc;
use cinder_artifacts::MemoryArtifactStore;
use cinder_core::artifact::{ArtifactKey, StoredArtifact};
use cinder_core::context::{Context, PipelineSource, TriggerEvent};
use cinder_core::job::PipelineSpec;
use cinder_core::ports::{
    ExecutionAdapter, ExecutionOutcome, ExecutionRequest, ExternalJobStatus,
    ExternalPipelineClient,
};
use cinder_core::{Error, Result};
use cinder_scheduler::{Scheduler, SchedulerConfig, WorkerPool};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

/// Scripted behavior for one attempt of one job.
pub enum Behavior {
    Succeed(BTreeMap<String, Vec<u8>>),
    ExitCode(i32),
    Transient,
    /// Block until the adapter receives a cancel signal.
    Hang,
}

/// Execution adapter scripted per job.
///
/// Each attempt consumes the next queued behavior for its job; a job with
/// nothing queued succeeds with no output. Every run is logged, so tests
/// can assert execution order and input-artifact counts.
#[derive(Default)]
pub struct MockAdapter {
    behaviors: Mutex<HashMap<String, VecDeque<Behavior>>>,
    executed: Mutex<Vec<String>>,
    inputs_seen: Mutex<HashMap<String, usize>>,
    hang_gate: Notify,
}

impl MockAdapter {
    pub fn script(&self, job: &str, behavior: Behavior) {
        self.behaviors
            .lock()
            .unwrap()
            .entry(job.to_string())
            .or_default()
            .push_back(behavior);
    }

    /// Job names in the order attempts reached the adapter.
    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().unwrap().clone()
    }

    /// Input-artifact count seen by the latest attempt of a job.
    pub fn inputs_seen(&self, job: &str) -> usize {
        self.inputs_seen
            .lock()
            .unwrap()
            .get(job)
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl ExecutionAdapter for MockAdapter {
    async fn run(&self, request: ExecutionRequest) -> Result<ExecutionOutcome> {
        self.executed.lock().unwrap().push(request.job.clone());
        self.inputs_seen
            .lock()
            .unwrap()
            .insert(request.job.clone(), request.input_artifacts.len());
        let behavior = self
            .behaviors
            .lock()
            .unwrap()
            .get_mut(&request.job)
            .and_then(VecDeque::pop_front);
        match behavior {
            None => Ok(outcome(0, BTreeMap::new())),
            Some(Behavior::Succeed(files)) => Ok(outcome(0, files)),
            Some(Behavior::ExitCode(code)) => Ok(outcome(code, BTreeMap::new())),
            Some(Behavior::Transient) => {
                Err(Error::Adapter("worker lost".to_string()))
            }
            Some(Behavior::Hang) => {
                self.hang_gate.notified().await;
                Ok(outcome(130, BTreeMap::new()))
            }
        }
    }

    async fn cancel(&self, _job: &str, _attempt: u32) -> Result<()> {
        self.hang_gate.notify_waiters();
        Ok(())
    }
}

fn outcome(exit_code: i32, output_files: BTreeMap<String, Vec<u8>>) -> ExecutionOutcome {
    ExecutionOutcome {
        exit_code,
        duration_ms: 1,
        output_files,
    }
}

/// External engine with a scripted status sequence per target.
///
/// The last status in a sequence repeats forever, so "pending, pending,
/// succeeded" models a pipeline finishing two polls in.
#[derive(Default)]
pub struct MockExternal {
    statuses: Mutex<HashMap<(String, String, String), VecDeque<ExternalJobStatus>>>,
    artifacts: Mutex<HashMap<(String, String, String), Arc<StoredArtifact>>>,
}

impl MockExternal {
    pub fn script(
        &self,
        project: &str,
        git_ref: &str,
        job: &str,
        statuses: Vec<ExternalJobStatus>,
    ) {
        self.statuses.lock().unwrap().insert(
            (project.to_string(), git_ref.to_string(), job.to_string()),
            statuses.into(),
        );
    }

    pub fn publish(
        &self,
        project: &str,
        git_ref: &str,
        job: &str,
        files: BTreeMap<String, Vec<u8>>,
    ) {
        let key = ArtifactKey::new(job, git_ref, "external");
        let artifact = Arc::new(StoredArtifact {
            key,
            created_at: Utc::now(),
            expires_at: Utc::now() + chrono::Duration::hours(1),
            files,
            checksum_sha256: String::new(),
        });
        self.artifacts.lock().unwrap().insert(
            (project.to_string(), git_ref.to_string(), job.to_string()),
            artifact,
        );
    }
}

#[async_trait]
impl ExternalPipelineClient for MockExternal {
    async fn poll_job(
        &self,
        project: &str,
        git_ref: &str,
        job: &str,
    ) -> Result<ExternalJobStatus> {
        let key = (project.to_string(), git_ref.to_string(), job.to_string());
        let mut statuses = self.statuses.lock().unwrap();
        let Some(sequence) = statuses.get_mut(&key) else {
            return Ok(ExternalJobStatus::Pending);
        };
        Ok(if sequence.len() > 1 {
            sequence.pop_front().unwrap_or(ExternalJobStatus::Pending)
        } else {
            sequence.front().copied().unwrap_or(ExternalJobStatus::Pending)
        })
    }

    async fn fetch_artifact(
        &self,
        project: &str,
        git_ref: &str,
        job: &str,
    ) -> Result<Option<Arc<StoredArtifact>>> {
        let key = (project.to_string(), git_ref.to_string(), job.to_string());
        Ok(self.artifacts.lock().unwrap().get(&key).cloned())
    }
}

/// Parse a configuration document, panicking on errors: fixture configs
/// are supposed to be valid.
pub fn spec(yaml: &str) -> PipelineSpec {
    cinder_config::from_yaml(yaml).expect("fixture config must materialize")
}

pub fn push_context(git_ref: &str, changed: &[&str]) -> Context {
    Context::from_event(TriggerEvent {
        git_ref: git_ref.to_string(),
        commit_sha: "c0ffee".to_string(),
        is_tag: false,
        source: PipelineSource::Push,
        commit_message: String::new(),
        changed_paths: changed.iter().map(|s| s.to_string()).collect(),
    })
}

/// A scheduler wired to the given mocks with a fresh in-memory store.
pub fn scheduler(
    adapter: Arc<MockAdapter>,
    external: Arc<MockExternal>,
    config: SchedulerConfig,
) -> (Scheduler, Arc<MemoryArtifactStore>) {
    let store = Arc::new(MemoryArtifactStore::new());
    let sched = Scheduler::new(
        WorkerPool::new(4),
        adapter,
        external,
        store.clone(),
        config,
    );
    (sched, store)
}
