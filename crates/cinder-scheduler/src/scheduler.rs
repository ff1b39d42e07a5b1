//! Pipeline run orchestration.
//!
//! Each run is driven by a single task that owns every `JobRun` and
//! applies the state machine transitions; attempts execute on spawned
//! tasks that report back over a channel. Per-job state is therefore
//! mutated under exclusive access while distinct jobs still run
//! concurrently. Runs started from the same `Scheduler` share its worker
//! pool and nothing else: jobs communicate only through the artifact
//! store.

use crate::active_set::ActiveJobSet;
use crate::dag::{Dependency, ExternalKey, JobGraph};
use crate::poll::{self, PollOutcome, PollSettings};
use crate::pool::WorkerPool;
use chrono::{DateTime, Utc};
use cinder_core::artifact::ArtifactKey;
use cinder_core::context::Context;
use cinder_core::error::FailureClass;
use cinder_core::events::{
    ArtifactStoredPayload, JobRetryingPayload, JobStateChangedPayload,
    PipelineEvent, RunCompletedPayload, RunStartedPayload,
};
use cinder_core::ids::RunId;
use cinder_core::job::PipelineSpec;
use cinder_core::ports::{
    ArtifactStore, ExecutionAdapter, ExecutionOutcome, ExecutionRequest,
    ExternalPipelineClient,
};
use cinder_core::rules::When;
use cinder_core::run::{
    JobOutput, JobReport, JobRun, JobState, PipelineReport, PipelineStatus,
};
use cinder_core::{Error, Result};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Tunables for one scheduler instance.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub poll: PollSettings,
    /// How long a cancelled running job may take to report a terminal
    /// status before it is force-marked cancelled.
    pub cancel_grace: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll: PollSettings::default(),
            cancel_grace: Duration::from_secs(10),
        }
    }
}

/// The scheduler service: a worker pool plus the boundary collaborators.
pub struct Scheduler {
    pool: WorkerPool,
    adapter: Arc<dyn ExecutionAdapter>,
    external: Arc<dyn ExternalPipelineClient>,
    artifacts: Arc<dyn ArtifactStore>,
    config: SchedulerConfig,
}

impl Scheduler {
    pub fn new(
        pool: WorkerPool,
        adapter: Arc<dyn ExecutionAdapter>,
        external: Arc<dyn ExternalPipelineClient>,
        artifacts: Arc<dyn ArtifactStore>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            pool,
            adapter,
            external,
            artifacts,
            config,
        }
    }

    /// Start a pipeline run.
    ///
    /// Rule evaluation and graph construction happen here, synchronously:
    /// a configuration error is returned before any job is spawned, and no
    /// job ever observes a half-built DAG.
    pub fn start(
        &self,
        spec: &PipelineSpec,
        ctx: Context,
    ) -> Result<RunningPipeline> {
        let active = ActiveJobSet::build(spec, &ctx);
        let graph = JobGraph::build(&spec.stages, &active, ctx.git_ref())?;

        let runs: HashMap<String, JobRun> = active
            .iter()
            .map(|aj| {
                (
                    aj.spec.name.clone(),
                    JobRun::new(aj.spec.clone(), aj.gate == When::Manual),
                )
            })
            .collect();
        let externals = graph
            .externals()
            .map(|(key, _)| (key.clone(), ExternalState::Pending))
            .collect();

        let run_id = RunId::new();
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (loop_tx, loop_rx) = mpsc::unbounded_channel();

        let driver = RunDriver {
            run_id,
            ctx,
            graph,
            runs,
            externals,
            epochs: HashMap::new(),
            tasks: HashMap::new(),
            outputs: HashMap::new(),
            artifact_keys: HashMap::new(),
            pool: self.pool.clone(),
            adapter: self.adapter.clone(),
            external_client: self.external.clone(),
            artifacts: self.artifacts.clone(),
            config: self.config.clone(),
            events: event_tx,
            loop_tx,
            cancelled: false,
            started_at: Utc::now(),
        };

        let done = tokio::spawn(driver.drive(control_rx, loop_rx));

        Ok(RunningPipeline {
            handle: RunHandle {
                run_id,
                control: control_tx,
            },
            events: event_rx,
            done,
        })
    }

    /// Start a run and wait for its report.
    pub async fn run(
        &self,
        spec: &PipelineSpec,
        ctx: Context,
    ) -> Result<PipelineReport> {
        self.start(spec, ctx)?.wait().await
    }
}

/// A run accepted by the scheduler.
#[derive(Debug)]
pub struct RunningPipeline {
    pub handle: RunHandle,
    pub events: mpsc::UnboundedReceiver<PipelineEvent>,
    pub done: JoinHandle<PipelineReport>,
}

impl RunningPipeline {
    pub async fn wait(self) -> Result<PipelineReport> {
        self.done
            .await
            .map_err(|e| Error::Internal(format!("run driver panicked: {}", e)))
    }
}

/// Control surface for a run in flight.
#[derive(Clone, Debug)]
pub struct RunHandle {
    run_id: RunId,
    control: mpsc::UnboundedSender<Control>,
}

impl RunHandle {
    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    /// Cooperatively cancel every non-terminal job.
    pub fn cancel(&self) {
        self.control.send(Control::Cancel).ok();
    }

    /// A newer run for the same ref supersedes this one: pre-empt
    /// interruptible running jobs back to pending without consuming an
    /// attempt. Their re-queued slot requests line up behind the newer
    /// run's.
    pub fn supersede(&self) {
        self.control.send(Control::Supersede).ok();
    }

    /// Release a manual-gated job into the ready computation.
    pub fn release(&self, job: &str) {
        self.control.send(Control::Release(job.to_string())).ok();
    }
}

enum Control {
    Cancel,
    Supersede,
    Release(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExternalState {
    Pending,
    Satisfied,
    TimedOut,
}

enum LoopEvent {
    AttemptStarted {
        job: String,
        epoch: u64,
    },
    AttemptFinished {
        job: String,
        epoch: u64,
        result: Result<ExecutionOutcome>,
    },
    ExternalResolved {
        key: ExternalKey,
        outcome: PollOutcome,
    },
    GraceExpired {
        job: String,
        epoch: u64,
    },
}

enum DepStatus {
    Satisfied,
    Blocked,
    Unsatisfiable,
    ExternalTimedOut,
}

/// The single-owner state for one run.
struct RunDriver {
    run_id: RunId,
    ctx: Context,
    graph: JobGraph,
    runs: HashMap<String, JobRun>,
    externals: HashMap<ExternalKey, ExternalState>,
    /// Attempt-task generation per job; stale task events are dropped
    /// after pre-emption or a forced cancel.
    epochs: HashMap<String, u64>,
    tasks: HashMap<String, JoinHandle<()>>,
    outputs: HashMap<String, JobOutput>,
    artifact_keys: HashMap<String, ArtifactKey>,
    pool: WorkerPool,
    adapter: Arc<dyn ExecutionAdapter>,
    external_client: Arc<dyn ExternalPipelineClient>,
    artifacts: Arc<dyn ArtifactStore>,
    config: SchedulerConfig,
    events: mpsc::UnboundedSender<PipelineEvent>,
    loop_tx: mpsc::UnboundedSender<LoopEvent>,
    cancelled: bool,
    started_at: DateTime<Utc>,
}

impl RunDriver {
    async fn drive(
        mut self,
        mut control: mpsc::UnboundedReceiver<Control>,
        mut loop_rx: mpsc::UnboundedReceiver<LoopEvent>,
    ) -> PipelineReport {
        self.started_at = Utc::now();
        info!(
            run_id = %self.run_id,
            jobs = self.runs.len(),
            git_ref = %self.ctx.git_ref(),
            "pipeline run started"
        );
        self.emit(PipelineEvent::RunStarted(RunStartedPayload {
            run_id: self.run_id,
            total_jobs: self.runs.len(),
            at: self.started_at,
        }));

        // Poll nodes are never scheduled locally: each gets a polling
        // task whose verdict lands back on the loop channel.
        let mut pollers = Vec::new();
        for (key, need) in self.graph.externals() {
            let client = self.external_client.clone();
            let key = key.clone();
            let artifacts_required = need.artifacts;
            let settings = self.config.poll.clone();
            let tx = self.loop_tx.clone();
            pollers.push(tokio::spawn(async move {
                let outcome = poll::poll_external(
                    client.as_ref(),
                    &key,
                    artifacts_required,
                    &settings,
                )
                .await;
                let _ = tx.send(LoopEvent::ExternalResolved { key, outcome });
            }));
        }

        loop {
            self.schedule_ready();
            if self.finished() {
                // Drain anything already queued (a release racing the
                // stall, a late verdict) before declaring the run over.
                let mut progressed = false;
                while let Ok(msg) = control.try_recv() {
                    self.handle_control(msg).await;
                    progressed = true;
                }
                while let Ok(event) = loop_rx.try_recv() {
                    self.handle_event(event).await;
                    progressed = true;
                }
                if !progressed {
                    break;
                }
                continue;
            }
            tokio::select! {
                Some(msg) = control.recv() => self.handle_control(msg).await,
                Some(event) = loop_rx.recv() => self.handle_event(event).await,
                else => break,
            }
        }

        self.finalize(pollers)
    }

    /// One dependency-order sweep: move every unblocked pending job to
    /// ready, and cascade skips. Dependencies precede dependents in the
    /// order, so a verdict set early in the sweep is visible to every
    /// downstream job in the same pass.
    fn schedule_ready(&mut self) {
        let order: Vec<String> = self.graph.order().to_vec();
        for name in order {
            let Some(job) = self.runs.get(&name) else {
                continue;
            };
            if job.state != JobState::Pending || job.held() {
                continue;
            }
            match self.dependency_status(&name) {
                DepStatus::Blocked => {}
                DepStatus::Satisfied => {
                    self.set_state(&name, JobState::Ready);
                    self.spawn_attempt(&name);
                }
                DepStatus::Unsatisfiable => {
                    self.set_state(&name, JobState::Skipped);
                }
                DepStatus::ExternalTimedOut => {
                    if let Some(job) = self.runs.get_mut(&name) {
                        job.result = Some(Err(FailureClass::ExternalTimeout));
                    }
                    self.set_state(&name, JobState::Failed);
                }
            }
        }
    }

    fn dependency_status(&self, name: &str) -> DepStatus {
        let mut blocked = false;
        for dep in self.graph.deps(name) {
            match dep {
                Dependency::Job {
                    name: upstream,
                    artifacts,
                } => {
                    let Some(upstream) = self.runs.get(upstream) else {
                        continue;
                    };
                    match upstream.state {
                        JobState::Succeeded => {}
                        JobState::Failed
                        | JobState::Skipped
                        | JobState::Cancelled => {
                            // An allowed failure satisfies plain edges but
                            // can never satisfy an artifact requirement.
                            if !upstream.spec.allow_failure || *artifacts {
                                return DepStatus::Unsatisfiable;
                            }
                        }
                        _ => blocked = true,
                    }
                }
                Dependency::External(key) => {
                    match self.externals.get(key) {
                        Some(ExternalState::Satisfied) => {}
                        Some(ExternalState::TimedOut) => {
                            return DepStatus::ExternalTimedOut;
                        }
                        _ => blocked = true,
                    }
                }
            }
        }
        if blocked {
            DepStatus::Blocked
        } else {
            DepStatus::Satisfied
        }
    }

    /// Spawn the next attempt for a ready job. The task waits for a pool
    /// slot, gathers input artifacts, and runs the adapter; each step
    /// reports back over the loop channel under the job's current epoch.
    fn spawn_attempt(&mut self, name: &str) {
        let epoch = self.current_epoch(name);
        let Some(job) = self.runs.get_mut(name) else {
            return;
        };
        job.attempt += 1;
        let attempt = job.attempt;
        let spec = job.spec.clone();

        let pool = self.pool.clone();
        let adapter = self.adapter.clone();
        let store = self.artifacts.clone();
        let external = self.external_client.clone();
        let tx = self.loop_tx.clone();
        let git_ref = self.ctx.git_ref().to_string();
        let commit_sha = self.ctx.commit_sha().to_string();
        let source = self.ctx.source();
        let job_name = name.to_string();

        let handle = tokio::spawn(async move {
            let _slot = match pool.acquire().await {
                Ok(slot) => slot,
                Err(e) => {
                    let _ = tx.send(LoopEvent::AttemptFinished {
                        job: job_name,
                        epoch,
                        result: Err(e),
                    });
                    return;
                }
            };
            let _ = tx.send(LoopEvent::AttemptStarted {
                job: job_name.clone(),
                epoch,
            });

            let mut inputs = Vec::new();
            for need in &spec.needs {
                if !need.artifacts {
                    continue;
                }
                let fetched = if need.is_cross_pipeline() {
                    let project = need.project.as_deref().unwrap_or_default();
                    let target_ref =
                        need.git_ref.as_deref().unwrap_or(&git_ref);
                    external
                        .fetch_artifact(project, target_ref, &need.job)
                        .await
                } else {
                    store
                        .get(&ArtifactKey::new(
                            need.job.clone(),
                            git_ref.clone(),
                            commit_sha.clone(),
                        ))
                        .await
                };
                match fetched {
                    Ok(Some(artifact)) => inputs.push(artifact),
                    Ok(None) => {}
                    Err(e) => debug!(
                        job = %job_name,
                        need = %need.job,
                        error = %e,
                        "input artifact unavailable"
                    ),
                }
            }

            let mut env = spec.variables.clone();
            env.insert("CI_COMMIT_REF".to_string(), git_ref.clone());
            env.insert("CI_COMMIT_SHA".to_string(), commit_sha.clone());
            env.insert("CI_PIPELINE_SOURCE".to_string(), source.to_string());
            env.insert("CI_JOB_NAME".to_string(), spec.name.clone());

            let request = ExecutionRequest {
                job: spec.name.clone(),
                attempt,
                script: spec.script.clone(),
                env,
                input_artifacts: inputs,
                output_paths: spec
                    .artifacts
                    .as_ref()
                    .map(|a| a.paths.clone())
                    .unwrap_or_default(),
            };
            let result = adapter.run(request).await;
            let _ = tx.send(LoopEvent::AttemptFinished {
                job: job_name,
                epoch,
                result,
            });
        });
        self.tasks.insert(name.to_string(), handle);
    }

    async fn handle_event(&mut self, event: LoopEvent) {
        match event {
            LoopEvent::AttemptStarted { job, epoch } => {
                if self.current_epoch(&job) != epoch {
                    return;
                }
                if self.runs.get(&job).map(|j| j.state)
                    == Some(JobState::Ready)
                {
                    self.set_state(&job, JobState::Running);
                }
            }
            LoopEvent::AttemptFinished { job, epoch, result } => {
                self.attempt_finished(job, epoch, result).await;
            }
            LoopEvent::ExternalResolved { key, outcome } => {
                info!(external = %key, ?outcome, "external dependency resolved");
                let state = match outcome {
                    PollOutcome::Satisfied => ExternalState::Satisfied,
                    PollOutcome::TimedOut => ExternalState::TimedOut,
                };
                self.externals.insert(key, state);
            }
            LoopEvent::GraceExpired { job, epoch } => {
                if self.current_epoch(&job) != epoch {
                    return;
                }
                if self.runs.get(&job).map(|j| j.state)
                    == Some(JobState::Running)
                {
                    warn!(
                        job = %job,
                        "grace period expired; force-marking cancelled"
                    );
                    self.bump_epoch(&job);
                    if let Some(handle) = self.tasks.remove(&job) {
                        handle.abort();
                    }
                    self.set_state(&job, JobState::Cancelled);
                }
            }
        }
    }

    async fn attempt_finished(
        &mut self,
        name: String,
        epoch: u64,
        result: Result<ExecutionOutcome>,
    ) {
        if self.current_epoch(&name) != epoch {
            // Pre-empted or force-cancelled; the verdict no longer counts.
            return;
        }
        self.tasks.remove(&name);

        let Some(job) = self.runs.get(&name) else {
            return;
        };
        if job.state.is_terminal() {
            return;
        }
        let attempt = job.attempt;

        if self.cancelled {
            // The attempt wound down after the cancellation request.
            self.set_state(&name, JobState::Cancelled);
            return;
        }

        match result {
            Ok(outcome) => {
                let output = JobOutput {
                    exit_code: outcome.exit_code,
                    duration_ms: outcome.duration_ms,
                };
                self.outputs.insert(name.clone(), output);
                if outcome.success() {
                    if let Some(job) = self.runs.get_mut(&name) {
                        job.result = Some(Ok(output));
                    }
                    // Artifacts land in the store before the success is
                    // visible, so a dependent never runs ahead of them.
                    self.store_artifacts(&name, &outcome, true).await;
                    self.set_state(&name, JobState::Succeeded);
                } else {
                    self.fail_attempt(
                        &name,
                        attempt,
                        FailureClass::Script,
                        Some(&outcome),
                    )
                    .await;
                }
            }
            Err(e) => {
                warn!(job = %name, attempt, error = %e, "infrastructure failure");
                self.fail_attempt(&name, attempt, FailureClass::Transient, None)
                    .await;
            }
        }
    }

    async fn fail_attempt(
        &mut self,
        name: &str,
        attempt: u32,
        class: FailureClass,
        outcome: Option<&ExecutionOutcome>,
    ) {
        let retry = self
            .runs
            .get(name)
            .map(|j| j.spec.retry.should_retry(class, attempt))
            .unwrap_or(false);
        if retry {
            self.emit(PipelineEvent::JobRetrying(JobRetryingPayload {
                run_id: self.run_id,
                job: name.to_string(),
                failed_attempt: attempt,
                class,
                at: Utc::now(),
            }));
            // Back to pending; the next sweep spawns the next attempt, so
            // attempts of one job never overlap.
            self.set_state(name, JobState::Pending);
        } else {
            if let Some(job) = self.runs.get_mut(name) {
                job.result = Some(Err(class));
            }
            if let Some(outcome) = outcome {
                self.store_artifacts(name, outcome, false).await;
            }
            self.set_state(name, JobState::Failed);
        }
    }

    async fn store_artifacts(
        &mut self,
        name: &str,
        outcome: &ExecutionOutcome,
        succeeded: bool,
    ) {
        let Some(policy) =
            self.runs.get(name).and_then(|j| j.spec.artifacts.clone())
        else {
            return;
        };
        if !policy.should_emit(succeeded) {
            return;
        }

        let files = policy.select(&outcome.output_files);
        if files.is_empty() {
            debug!(job = name, "no files matched the artifact paths");
            return;
        }

        let key = ArtifactKey::new(
            name,
            self.ctx.git_ref(),
            self.ctx.commit_sha(),
        );
        let expires_at = Utc::now() + policy.retention;
        match self.artifacts.put(key.clone(), files, expires_at).await {
            Ok(artifact) => {
                self.emit(PipelineEvent::ArtifactStored(ArtifactStoredPayload {
                    run_id: self.run_id,
                    job: name.to_string(),
                    key: key.to_string(),
                    size_bytes: artifact.size_bytes(),
                    at: Utc::now(),
                }));
                self.artifact_keys.insert(name.to_string(), key);
            }
            Err(e) => {
                warn!(job = name, error = %e, "artifact store rejected output");
            }
        }
    }

    async fn handle_control(&mut self, msg: Control) {
        match msg {
            Control::Cancel => self.cancel_all().await,
            Control::Supersede => self.preempt_interruptible().await,
            Control::Release(job) => {
                if let Some(run) = self.runs.get_mut(&job) {
                    if run.manual && !run.released {
                        info!(job = %job, "manual gate released");
                        run.released = true;
                    }
                }
            }
        }
    }

    async fn cancel_all(&mut self) {
        if self.cancelled
            || self.runs.values().all(|j| j.state.is_terminal())
        {
            // Nothing left to cancel; don't let a late signal rewrite a
            // finished run's status.
            return;
        }
        self.cancelled = true;
        info!(run_id = %self.run_id, "cancellation requested");

        let names: Vec<String> = self.runs.keys().cloned().collect();
        for name in names {
            match self.runs[&name].state {
                JobState::Pending | JobState::Ready => {
                    self.bump_epoch(&name);
                    if let Some(handle) = self.tasks.remove(&name) {
                        handle.abort();
                    }
                    self.set_state(&name, JobState::Cancelled);
                }
                JobState::Running => {
                    let attempt = self.runs[&name].attempt;
                    if let Err(e) = self.adapter.cancel(&name, attempt).await {
                        warn!(job = %name, error = %e, "cancel signal failed");
                    }
                    let epoch = self.current_epoch(&name);
                    let tx = self.loop_tx.clone();
                    let grace = self.config.cancel_grace;
                    let job = name.clone();
                    tokio::spawn(async move {
                        tokio::time::sleep(grace).await;
                        let _ = tx.send(LoopEvent::GraceExpired { job, epoch });
                    });
                }
                _ => {}
            }
        }
    }

    async fn preempt_interruptible(&mut self) {
        let names: Vec<String> = self
            .runs
            .iter()
            .filter(|(_, j)| {
                j.state == JobState::Running && j.spec.interruptible
            })
            .map(|(name, _)| name.clone())
            .collect();
        for name in names {
            info!(job = %name, "pre-empted by a newer run for this ref");
            let attempt = self.runs[&name].attempt;
            self.adapter.cancel(&name, attempt).await.ok();
            self.bump_epoch(&name);
            if let Some(handle) = self.tasks.remove(&name) {
                handle.abort();
            }
            if let Some(job) = self.runs.get_mut(&name) {
                // Pre-emption does not consume an attempt.
                job.attempt = job.attempt.saturating_sub(1);
            }
            self.set_state(&name, JobState::Pending);
        }
    }

    /// The run is over when nothing is in flight and nothing pending can
    /// still flip on its own. A held manual gate (and anything queued
    /// behind it) does not keep the run alive.
    fn finished(&self) -> bool {
        let mut all_terminal = true;
        for job in self.runs.values() {
            match job.state {
                JobState::Ready | JobState::Running => return false,
                JobState::Pending => all_terminal = false,
                _ => {}
            }
        }
        if all_terminal {
            return true;
        }
        for job in self.runs.values() {
            if job.state != JobState::Pending || job.held() {
                continue;
            }
            let waits_on_external =
                self.graph.deps(&job.spec.name).iter().any(|dep| {
                    matches!(dep, Dependency::External(key)
                        if self.externals.get(key)
                            == Some(&ExternalState::Pending))
                });
            if waits_on_external {
                return false;
            }
        }
        true
    }

    fn finalize(mut self, pollers: Vec<JoinHandle<()>>) -> PipelineReport {
        for poller in pollers {
            poller.abort();
        }
        for (_, handle) in self.tasks.drain() {
            handle.abort();
        }

        // Leftover pending jobs sit behind an unreleased manual gate.
        // The gates stay pending and are reported held; the jobs queued
        // behind them were never runnable this run.
        let names: Vec<String> = self.runs.keys().cloned().collect();
        for name in names {
            let job = &self.runs[&name];
            if job.state.is_terminal() || job.held() {
                continue;
            }
            self.set_state(&name, JobState::Skipped);
        }

        let status =
            PipelineStatus::from_jobs(self.runs.values(), self.cancelled);
        let completed_at = Utc::now();
        info!(run_id = %self.run_id, ?status, "pipeline run completed");
        self.emit(PipelineEvent::RunCompleted(RunCompletedPayload {
            run_id: self.run_id,
            status,
            at: completed_at,
        }));

        let jobs = self
            .graph
            .order()
            .iter()
            .map(|name| {
                let job = &self.runs[name];
                let output = self.outputs.get(name);
                JobReport {
                    name: name.clone(),
                    stage: job.spec.stage.clone(),
                    state: job.state,
                    attempts: job.attempt,
                    failure: job.failure_class(),
                    exit_code: output.map(|o| o.exit_code),
                    duration_ms: output.map(|o| o.duration_ms),
                    allow_failure: job.spec.allow_failure,
                    manual_held: job.held(),
                    artifact: self
                        .artifact_keys
                        .get(name)
                        .map(|k| k.to_string()),
                }
            })
            .collect();

        PipelineReport {
            run_id: self.run_id,
            status,
            jobs,
            started_at: self.started_at,
            completed_at,
            duration_ms: (completed_at - self.started_at)
                .num_milliseconds()
                .max(0) as u64,
        }
    }

    fn set_state(&mut self, name: &str, to: JobState) {
        let Some(job) = self.runs.get_mut(name) else {
            return;
        };
        if job.state == to {
            return;
        }
        let from = job.state;
        job.state = to;
        let now = Utc::now();
        match to {
            JobState::Running => {
                job.started_at.get_or_insert(now);
            }
            state if state.is_terminal() => {
                job.completed_at = Some(now);
            }
            _ => {}
        }
        let attempt = job.attempt;
        debug!(job = name, ?from, ?to, "state transition");
        self.emit(PipelineEvent::JobStateChanged(JobStateChangedPayload {
            run_id: self.run_id,
            job: name.to_string(),
            from,
            to,
            attempt,
            at: now,
        }));
    }

    fn current_epoch(&self, name: &str) -> u64 {
        self.epochs.get(name).copied().unwrap_or(0)
    }

    fn bump_epoch(&mut self, name: &str) {
        *self.epochs.entry(name.to_string()).or_insert(0) += 1;
    }

    fn emit(&self, event: PipelineEvent) {
        self.events.send(event).ok();
    }
}
