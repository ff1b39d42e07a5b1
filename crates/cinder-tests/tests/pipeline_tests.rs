//! End-to-end engine scenarios: configuration in, report out.

use cinder_core::error::{ConfigError, Error, FailureClass};
use cinder_core::events::PipelineEvent;
use cinder_core::ports::{ArtifactStore, ExternalJobStatus};
use cinder_core::run::{JobState, PipelineStatus};
use cinder_scheduler::{PollSettings, SchedulerConfig};
use cinder_tests::fixtures::{
    Behavior, MockAdapter, MockExternal, push_context, scheduler, spec,
};
use cinder_tests::helpers::wait_for;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

fn default_setup() -> (Arc<MockAdapter>, Arc<MockExternal>, cinder_scheduler::Scheduler) {
    let adapter = Arc::new(MockAdapter::default());
    let external = Arc::new(MockExternal::default());
    let (sched, _) =
        scheduler(adapter.clone(), external.clone(), SchedulerConfig::default());
    (adapter, external, sched)
}

#[tokio::test]
async fn excluded_need_is_vacuous_and_empty_stage_is_bypassed() {
    // `unit` only exists on release refs; on main the `test` stage is
    // empty and `package`'s need on it is vacuously satisfied, so
    // `package` gates directly on `check`.
    let spec = spec(
        r#"
stages: [check, test, build]
jobs:
  lint:
    stage: check
    script: cargo clippy
  unit:
    stage: test
    script: cargo test
    rules:
      - if: 'ref == "release"'
  package:
    stage: build
    script: cargo build
    needs:
      - job: unit
        artifacts: false
"#,
    );
    let (adapter, _, sched) = default_setup();

    let report = sched.run(&spec, push_context("main", &[])).await.unwrap();

    assert_eq!(report.status, PipelineStatus::Succeeded);
    assert!(report.job("unit").is_none(), "excluded jobs never materialize");
    assert_eq!(adapter.executed(), vec!["lint", "package"]);
}

#[tokio::test]
async fn configuration_cycle_runs_nothing() {
    let spec = spec(
        r#"
stages: [test]
jobs:
  a:
    stage: test
    script: echo a
    needs: [b]
  b:
    stage: test
    script: echo b
    needs: [a]
"#,
    );
    let (adapter, _, sched) = default_setup();

    let err = sched.start(&spec, push_context("main", &[])).unwrap_err();
    assert!(matches!(
        err,
        Error::Config(ConfigError::DependencyCycle(_))
    ));
    assert!(adapter.executed().is_empty(), "no partial execution");
}

#[tokio::test]
async fn changes_filter_falls_through_to_manual_clause() {
    let spec = spec(
        r#"
stages: [deploy]
jobs:
  publish-docs:
    stage: deploy
    script: ./publish.sh
    rules:
      - changes: ["docs/**"]
      - when: manual
"#,
    );
    let (adapter, _, sched) = default_setup();

    // No docs changed: the first clause misses, the manual clause wins.
    let report = sched
        .run(&spec, push_context("main", &["src/lib.rs"]))
        .await
        .unwrap();

    assert_eq!(report.status, PipelineStatus::Succeeded);
    let job = report.job("publish-docs").unwrap();
    assert!(job.manual_held);
    assert!(adapter.executed().is_empty());

    // Docs changed: the first clause matches and the job runs.
    let report = sched
        .run(&spec, push_context("main", &["docs/intro.md"]))
        .await
        .unwrap();
    assert_eq!(
        report.job("publish-docs").unwrap().state,
        JobState::Succeeded
    );
    assert_eq!(adapter.executed(), vec!["publish-docs"]);
}

#[tokio::test]
async fn transient_failures_retry_until_success() {
    let spec = spec(
        r#"
stages: [test]
jobs:
  flaky:
    stage: test
    script: cargo test
    retry: 2
"#,
    );
    let (adapter, _, sched) = default_setup();
    adapter.script("flaky", Behavior::Transient);
    adapter.script("flaky", Behavior::Transient);

    let report = sched.run(&spec, push_context("main", &[])).await.unwrap();

    let job = report.job("flaky").unwrap();
    assert_eq!(job.state, JobState::Succeeded);
    assert_eq!(job.attempts, 3);
    assert_eq!(adapter.executed().len(), 3);
}

#[tokio::test]
async fn artifacts_flow_from_producer_to_consumer() {
    let spec = spec(
        r#"
stages: [build, deploy]
jobs:
  build:
    stage: build
    script: make dist
    artifacts:
      paths: ["dist/**"]
      retention_days: 1
  deploy:
    stage: deploy
    script: ./deploy.sh
    needs: [build]
"#,
    );
    let adapter = Arc::new(MockAdapter::default());
    let external = Arc::new(MockExternal::default());
    let (sched, store) =
        scheduler(adapter.clone(), external, SchedulerConfig::default());

    let mut files = BTreeMap::new();
    files.insert("dist/app".to_string(), b"binary".to_vec());
    files.insert("build.log".to_string(), b"noise".to_vec());
    adapter.script("build", Behavior::Succeed(files));

    let report = sched.run(&spec, push_context("main", &[])).await.unwrap();

    assert_eq!(report.status, PipelineStatus::Succeeded);
    assert_eq!(
        report.job("build").unwrap().artifact.as_deref(),
        Some("build@main@c0ffee")
    );
    assert_eq!(adapter.inputs_seen("deploy"), 1);

    // Only the declared paths were published.
    let stored = store
        .resolve_latest("main", "build")
        .await
        .unwrap()
        .expect("artifact stored");
    assert!(stored.files.contains_key("dist/app"));
    assert!(!stored.files.contains_key("build.log"));
}

#[tokio::test(start_paused = true)]
async fn cross_pipeline_need_resolves_after_polling() {
    let spec = spec(
        r#"
stages: [build]
jobs:
  package:
    stage: build
    script: make package
    needs:
      - job: bake
        project: infra/images
        ref: master
"#,
    );
    let adapter = Arc::new(MockAdapter::default());
    let external = Arc::new(MockExternal::default());
    external.script(
        "infra/images",
        "master",
        "bake",
        vec![
            ExternalJobStatus::Pending,
            ExternalJobStatus::Pending,
            ExternalJobStatus::Succeeded {
                artifacts_available: true,
            },
        ],
    );
    external.publish(
        "infra/images",
        "master",
        "bake",
        [("image.txt".to_string(), b"sha256:feed".to_vec())]
            .into_iter()
            .collect(),
    );
    let (sched, _) = scheduler(
        adapter.clone(),
        external,
        SchedulerConfig {
            poll: PollSettings {
                interval: Duration::from_millis(100),
                timeout: Duration::from_secs(30),
            },
            ..SchedulerConfig::default()
        },
    );

    let report = sched.run(&spec, push_context("main", &[])).await.unwrap();

    assert_eq!(report.status, PipelineStatus::Succeeded);
    assert_eq!(report.job("package").unwrap().state, JobState::Succeeded);
    assert_eq!(adapter.inputs_seen("package"), 1);
}

#[tokio::test(start_paused = true)]
async fn cross_pipeline_poll_timeout_fails_the_dependent() {
    let spec = spec(
        r#"
stages: [build]
jobs:
  package:
    stage: build
    script: make package
    needs:
      - job: bake
        project: infra/images
        ref: master
"#,
    );
    let adapter = Arc::new(MockAdapter::default());
    // Nothing scripted: the external project never reports success.
    let external = Arc::new(MockExternal::default());
    let (sched, _) = scheduler(
        adapter.clone(),
        external,
        SchedulerConfig {
            poll: PollSettings {
                interval: Duration::from_millis(100),
                timeout: Duration::from_secs(2),
            },
            ..SchedulerConfig::default()
        },
    );

    let report = sched.run(&spec, push_context("main", &[])).await.unwrap();

    assert_eq!(report.status, PipelineStatus::Failed);
    let job = report.job("package").unwrap();
    assert_eq!(job.state, JobState::Failed);
    assert_eq!(job.failure, Some(FailureClass::ExternalTimeout));
    assert!(adapter.executed().is_empty());
}

#[tokio::test]
async fn supersede_preempts_interruptible_jobs_without_burning_attempts() {
    let spec = spec(
        r#"
stages: [test]
jobs:
  soak:
    stage: test
    script: ./soak.sh
    interruptible: true
"#,
    );
    let (adapter, _, sched) = default_setup();
    adapter.script("soak", Behavior::Hang);

    let mut running = sched
        .start(&spec, push_context("main", &[]))
        .unwrap();

    let started = {
        let adapter = adapter.clone();
        wait_for(move || adapter.executed().len() == 1, Duration::from_secs(5))
            .await
    };
    assert!(started, "job never reached the adapter");
    // Pre-emption only touches Running jobs; wait for the transition.
    loop {
        let event = running.events.recv().await.expect("run ended early");
        if let PipelineEvent::JobStateChanged(p) = &event {
            if p.to == JobState::Running {
                break;
            }
        }
    }

    running.handle.supersede();
    let report = running.wait().await.unwrap();

    let job = report.job("soak").unwrap();
    assert_eq!(job.state, JobState::Succeeded);
    // Two executions, one recorded attempt: pre-emption is free.
    assert_eq!(adapter.executed().len(), 2);
    assert_eq!(job.attempts, 1);
}

#[tokio::test]
async fn release_pipeline_with_templates_end_to_end() {
    let spec = spec(
        r#"
stages: [check, test, build, deploy]

variables:
  CARGO_TERM_COLOR: always

templates:
  rust-job:
    variables:
      RUSTFLAGS: "-D warnings"
    retry:
      max: 1

jobs:
  lint:
    stage: check
    script: cargo clippy
    extends: rust-job

  unit:
    stage: test
    script: cargo test --lib
    extends: rust-job

  integration:
    stage: test
    script: cargo test --test '*'
    extends: rust-job

  package:
    stage: build
    script: cargo build --release
    artifacts:
      paths: ["target/release/cinder*"]
      retention_days: 7

  publish:
    stage: deploy
    script: ./publish.sh
    needs: [package]
    rules:
      - if: 'ref == "main" && source == "push"'
      - when: never
"#,
    );
    let (adapter, _, sched) = default_setup();
    adapter.script(
        "package",
        Behavior::Succeed(
            [("target/release/cinder".to_string(), b"elf".to_vec())]
                .into_iter()
                .collect(),
        ),
    );

    let report = sched.run(&spec, push_context("main", &[])).await.unwrap();
    assert_eq!(report.status, PipelineStatus::Succeeded);
    for name in ["lint", "unit", "integration", "package", "publish"] {
        assert_eq!(
            report.job(name).unwrap().state,
            JobState::Succeeded,
            "{name}"
        );
    }

    let executed = adapter.executed();
    let pos = |n: &str| executed.iter().position(|j| j == n).unwrap();
    assert!(pos("lint") < pos("unit"));
    assert!(pos("lint") < pos("integration"));
    assert!(pos("unit") < pos("package"));
    assert!(pos("integration") < pos("package"));
    assert!(pos("package") < pos("publish"));
    assert_eq!(adapter.inputs_seen("publish"), 1);
}
