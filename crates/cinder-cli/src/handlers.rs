//! Command handlers.

use crate::commands::RunArgs;
use anyhow::Context as _;
use cinder_artifacts::MemoryArtifactStore;
use cinder_core::context::{Context, PipelineSource, TriggerEvent};
use cinder_core::events::PipelineEvent;
use cinder_core::run::PipelineStatus;
use cinder_runner::ShellAdapter;
use cinder_scheduler::{
    ActiveJobSet, JobGraph, NoExternalPipelines, RunningPipeline, Scheduler,
    SchedulerConfig, WorkerPool,
};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

pub fn validate(config: &Path) -> anyhow::Result<()> {
    let source = std::fs::read_to_string(config)
        .with_context(|| format!("reading {}", config.display()))?;
    let spec = cinder_config::from_yaml(&source)?;

    // Build the graph for a plain push so cycles and impossible needs
    // surface here rather than on the first real trigger.
    let ctx = synthetic_context();
    let active = ActiveJobSet::build(&spec, &ctx);
    JobGraph::build(&spec.stages, &active, ctx.git_ref())?;

    println!(
        "OK: {} stages, {} jobs ({} active for a push to main)",
        spec.stages.len(),
        spec.jobs.len(),
        active.len()
    );
    Ok(())
}

pub async fn run(args: RunArgs) -> anyhow::Result<()> {
    let source = std::fs::read_to_string(&args.config)
        .with_context(|| format!("reading {}", args.config.display()))?;
    let spec = cinder_config::from_yaml(&source)?;

    let ctx = Context::from_event(TriggerEvent {
        git_ref: args.git_ref,
        commit_sha: args.sha,
        is_tag: args.tag,
        source: args.source,
        commit_message: args.message,
        changed_paths: args.changed.into_iter().collect(),
    });

    let workspace =
        std::env::temp_dir().join(format!("cinder-{}", std::process::id()));
    let store = Arc::new(MemoryArtifactStore::new());
    let _sweeper = store.spawn_sweeper(Duration::from_secs(60));

    let scheduler = Scheduler::new(
        WorkerPool::new(args.workers),
        Arc::new(ShellAdapter::new(workspace)),
        Arc::new(NoExternalPipelines),
        store,
        SchedulerConfig::default(),
    );

    let RunningPipeline {
        handle,
        mut events,
        done,
    } = scheduler.start(&spec, ctx)?;
    for job in &args.release {
        handle.release(job);
    }

    let printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            print_event(&event);
        }
    });

    let report = done
        .await
        .map_err(|e| anyhow::anyhow!("run driver panicked: {}", e))?;
    printer.await.ok();

    println!();
    println!(
        "{:<24} {:<10} {:>10} {:>8}  {}",
        "JOB", "STAGE", "STATE", "ATTEMPTS", "ARTIFACT"
    );
    for job in &report.jobs {
        let state = if job.manual_held {
            "held".to_string()
        } else {
            format!("{:?}", job.state).to_lowercase()
        };
        println!(
            "{:<24} {:<10} {:>10} {:>8}  {}",
            job.name,
            job.stage,
            state,
            job.attempts,
            job.artifact.as_deref().unwrap_or("-")
        );
    }
    println!(
        "\npipeline {:?} in {} ms",
        report.status, report.duration_ms
    );

    match report.status {
        PipelineStatus::Succeeded => Ok(()),
        status => anyhow::bail!("pipeline {:?}", status),
    }
}

fn print_event(event: &PipelineEvent) {
    match event {
        PipelineEvent::RunStarted(p) => {
            println!("run {} started ({} jobs)", p.run_id, p.total_jobs);
        }
        PipelineEvent::JobStateChanged(p) => {
            println!("  {:<24} {:?} -> {:?}", p.job, p.from, p.to);
        }
        PipelineEvent::JobRetrying(p) => {
            println!(
                "  {:<24} attempt {} failed ({:?}), retrying",
                p.job, p.failed_attempt, p.class
            );
        }
        PipelineEvent::ArtifactStored(p) => {
            println!(
                "  {:<24} stored {} ({} bytes)",
                p.job, p.key, p.size_bytes
            );
        }
        PipelineEvent::RunCompleted(p) => {
            println!("run {} completed: {:?}", p.run_id, p.status);
        }
    }
}

fn synthetic_context() -> Context {
    Context::from_event(TriggerEvent {
        git_ref: "main".to_string(),
        commit_sha: "0".repeat(40),
        is_tag: false,
        source: PipelineSource::Push,
        commit_message: String::new(),
        changed_paths: Default::default(),
    })
}
