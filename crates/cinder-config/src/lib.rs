//! Declarative pipeline configuration for the Cinder engine.
//!
//! A configuration document is parsed and materialized exactly once, at
//! pipeline-trigger time. Any malformed input (unknown template, bad
//! glob, unknown stage, needs pointing forward in the stage order)
//! fails the whole run here, before a single job starts.

pub mod condition;
pub mod model;
pub mod templates;

use cinder_core::error::{ConfigError, FailureClass};
use cinder_core::glob::PathGlob;
use cinder_core::job::{
    ArtifactPolicy, JobSpec, NeedRef, PipelineSpec, RetryPolicy,
};
use cinder_core::rules::{Predicate, RuleClause, When};
use chrono::Duration;
use model::{RawArtifacts, RawJob, RawNeed, RawPipeline, RawRetry, RawRule};
use std::collections::{BTreeMap, HashMap, HashSet};
use templates::TemplateMap;

/// Parse and materialize a configuration document.
pub fn from_yaml(source: &str) -> Result<PipelineSpec, ConfigError> {
    let raw: RawPipeline = serde_yaml::from_str(source)
        .map_err(|e| ConfigError::Parse(e.to_string()))?;
    materialize(raw)
}

/// Materialize a parsed document: resolve templates, compile rules and
/// globs, and validate the result.
pub fn materialize(raw: RawPipeline) -> Result<PipelineSpec, ConfigError> {
    if raw.stages.is_empty() {
        return Err(ConfigError::NoStages);
    }
    let mut seen_stages = HashSet::new();
    for stage in &raw.stages {
        if !seen_stages.insert(stage.as_str()) {
            return Err(ConfigError::DuplicateStage(stage.clone()));
        }
    }

    let templates = TemplateMap::new(raw.templates);

    let mut jobs = Vec::with_capacity(raw.jobs.len());
    for (name, value) in &raw.jobs {
        let merged = templates::resolve_job(name, value, &templates)?;
        let raw_job: RawJob = serde_yaml::from_value(merged)
            .map_err(|e| ConfigError::Parse(format!("job `{}`: {}", name, e)))?;
        jobs.push(build_job(name, raw_job, &raw.variables, &raw.stages)?);
    }

    validate_needs(&jobs, &raw.stages)?;

    Ok(PipelineSpec {
        stages: raw.stages,
        jobs,
        variables: raw.variables,
    })
}

fn build_job(
    name: &str,
    raw: RawJob,
    pipeline_variables: &BTreeMap<String, String>,
    stages: &[String],
) -> Result<JobSpec, ConfigError> {
    if !stages.contains(&raw.stage) {
        return Err(ConfigError::UnknownStage {
            job: name.to_string(),
            stage: raw.stage.clone(),
        });
    }

    let rules = if raw.rules.is_empty() {
        // No rules means the job always participates.
        vec![RuleClause {
            predicate: Predicate::Always,
            changes: None,
            when: When::OnSuccess,
        }]
    } else {
        raw.rules
            .into_iter()
            .map(build_rule)
            .collect::<Result<Vec<_>, _>>()?
    };

    let needs = raw.needs.into_iter().map(build_need).collect();

    let mut variables = pipeline_variables.clone();
    variables.extend(raw.variables);

    Ok(JobSpec {
        name: name.to_string(),
        stage: raw.stage,
        script: raw.script,
        rules,
        needs,
        variables,
        retry: build_retry(raw.retry),
        artifacts: raw.artifacts.map(build_artifacts).transpose()?,
        allow_failure: raw.allow_failure,
        interruptible: raw.interruptible,
    })
}

fn build_rule(raw: RawRule) -> Result<RuleClause, ConfigError> {
    let predicate = match raw.condition {
        Some(expr) => condition::compile(&expr)?,
        None => Predicate::Always,
    };
    let changes = raw
        .changes
        .map(|globs| {
            globs
                .iter()
                .map(|g| PathGlob::compile(g))
                .collect::<Result<Vec<_>, _>>()
        })
        .transpose()?;
    Ok(RuleClause {
        predicate,
        changes,
        when: raw.when,
    })
}

fn build_need(raw: RawNeed) -> NeedRef {
    match raw {
        RawNeed::Job(job) => NeedRef {
            job,
            project: None,
            git_ref: None,
            artifacts: true,
        },
        RawNeed::Detailed {
            job,
            project,
            git_ref,
            artifacts,
        } => NeedRef {
            job,
            project,
            git_ref,
            artifacts,
        },
    }
}

fn build_retry(raw: Option<RawRetry>) -> RetryPolicy {
    match raw {
        None => RetryPolicy::default(),
        Some(RawRetry::Max(max)) => RetryPolicy {
            max,
            ..RetryPolicy::default()
        },
        Some(RawRetry::Policy { max, on }) => {
            let on: HashSet<FailureClass> = if on.is_empty() {
                HashSet::from([FailureClass::Transient])
            } else {
                on.into_iter().collect()
            };
            RetryPolicy { max, on }
        }
    }
}

fn build_artifacts(raw: RawArtifacts) -> Result<ArtifactPolicy, ConfigError> {
    let paths = raw
        .paths
        .iter()
        .map(|g| PathGlob::compile(g))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ArtifactPolicy {
        retention: Duration::days(i64::from(raw.retention_days)),
        paths,
        emit_when: raw.when,
    })
}

/// Static `needs` validation: every local need must name a defined job in
/// the same or an earlier stage. Whether an excluded need is acceptable
/// is decided per run, by the graph builder.
fn validate_needs(jobs: &[JobSpec], stages: &[String]) -> Result<(), ConfigError> {
    let stage_index = |stage: &str| stages.iter().position(|s| s == stage);

    let mut by_name: HashMap<&str, &JobSpec> = HashMap::new();
    for job in jobs {
        if by_name.insert(job.name.as_str(), job).is_some() {
            return Err(ConfigError::DuplicateJob(job.name.clone()));
        }
    }

    for job in jobs {
        for need in &job.needs {
            if need.is_cross_pipeline() {
                continue;
            }
            let Some(target) = by_name.get(need.job.as_str()) else {
                return Err(ConfigError::UnknownNeed {
                    job: job.name.clone(),
                    need: need.job.clone(),
                });
            };
            // Both indices exist; build_job already checked membership.
            let job_idx = stage_index(&job.stage).unwrap_or(usize::MAX);
            let need_idx = stage_index(&target.stage).unwrap_or(usize::MAX);
            if need_idx > job_idx {
                return Err(ConfigError::StageOrderViolation {
                    job: job.name.clone(),
                    stage: job.stage.clone(),
                    need: need.job.clone(),
                    need_stage: target.stage.clone(),
                });
            }
        }
    }
    Ok(())
}
