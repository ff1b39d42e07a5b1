//! Job graph construction for one pipeline run.
//!
//! Default edges come from stage ordering: a job waits for every active
//! job of the nearest earlier non-empty stage. A job with explicit
//! `needs` switches to DAG mode and waits only on the named needs.
//! Cross-pipeline needs become poll nodes that are checked against an
//! external engine instead of being scheduled locally.

use crate::active_set::ActiveJobSet;
use cinder_core::error::ConfigError;
use cinder_core::job::NeedRef;
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::HashMap;
use std::fmt;

/// Target of one external poll node.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExternalKey {
    pub project: String,
    pub git_ref: String,
    pub job: String,
}

impl fmt::Display for ExternalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}/{}", self.project, self.git_ref, self.job)
    }
}

/// One inbound dependency of a job.
#[derive(Debug, Clone)]
pub enum Dependency {
    /// Local DAG edge. `artifacts` mirrors the need's artifact
    /// requirement; stage-barrier edges never require artifacts, which
    /// makes them satisfiable by an allow-failure upstream.
    Job { name: String, artifacts: bool },
    /// Readiness predicate polled against another pipeline instance.
    External(ExternalKey),
}

/// Immutable dependency graph over one run's active job set.
///
/// Built once, synchronously, before any job is scheduled. Cycles and
/// artifact-requiring needs on excluded jobs are rejected here, so a
/// configuration error never leaves partial execution behind.
#[derive(Debug)]
pub struct JobGraph {
    deps: HashMap<String, Vec<Dependency>>,
    dependents: HashMap<String, Vec<String>>,
    externals: HashMap<ExternalKey, NeedRef>,
    /// Topological order over the local jobs; dependency sweeps follow it
    /// so upstream verdicts land before dependents are inspected.
    order: Vec<String>,
}

impl JobGraph {
    /// Build the graph for `active` under the pipeline's stage order.
    ///
    /// `default_git_ref` resolves cross-pipeline needs that name a
    /// project but no explicit ref.
    pub fn build(
        stages: &[String],
        active: &ActiveJobSet,
        default_git_ref: &str,
    ) -> Result<Self, ConfigError> {
        // Active jobs per stage, for barrier edges. Membership is
        // validated here so hand-built specs fail like parsed ones.
        let mut stage_jobs: Vec<Vec<&str>> = vec![Vec::new(); stages.len()];
        let mut stage_of: HashMap<&str, usize> = HashMap::new();
        for job in active.iter() {
            let idx = stages
                .iter()
                .position(|s| s == &job.spec.stage)
                .ok_or_else(|| ConfigError::UnknownStage {
                    job: job.spec.name.clone(),
                    stage: job.spec.stage.clone(),
                })?;
            stage_jobs[idx].push(&job.spec.name);
            stage_of.insert(&job.spec.name, idx);
        }

        // The barrier attaches to the nearest earlier stage that still
        // has active jobs; empty stages collapse out of the order.
        let barrier_deps = |idx: usize| -> Vec<Dependency> {
            stage_jobs[..idx]
                .iter()
                .rev()
                .find(|jobs| !jobs.is_empty())
                .map(|jobs| {
                    jobs.iter()
                        .map(|name| Dependency::Job {
                            name: name.to_string(),
                            artifacts: false,
                        })
                        .collect()
                })
                .unwrap_or_default()
        };

        let mut deps: HashMap<String, Vec<Dependency>> = HashMap::new();
        let mut externals: HashMap<ExternalKey, NeedRef> = HashMap::new();

        for job in active.iter() {
            let name = &job.spec.name;
            let stage_idx = stage_of[name.as_str()];
            let job_deps = if job.spec.needs.is_empty() {
                barrier_deps(stage_idx)
            } else {
                let mut resolved = Vec::new();
                for need in &job.spec.needs {
                    if need.is_cross_pipeline() {
                        let key = ExternalKey {
                            // is_cross_pipeline guarantees the project.
                            project: need.project.clone().unwrap_or_default(),
                            git_ref: need
                                .git_ref
                                .clone()
                                .unwrap_or_else(|| default_git_ref.to_string()),
                            job: need.job.clone(),
                        };
                        externals.entry(key.clone()).or_insert_with(|| need.clone());
                        resolved.push(Dependency::External(key));
                    } else if active.contains(&need.job) {
                        resolved.push(Dependency::Job {
                            name: need.job.clone(),
                            artifacts: need.artifacts,
                        });
                    } else if need.artifacts {
                        // Excluded this run, but the dependent consumes
                        // its artifacts: nothing could ever provide them.
                        return Err(ConfigError::MissingNeed {
                            job: name.clone(),
                            need: need.job.clone(),
                        });
                    }
                    // Otherwise the need is vacuously satisfied.
                }
                if resolved.is_empty() {
                    // Every need elided; fall back to the stage barrier.
                    barrier_deps(stage_idx)
                } else {
                    resolved
                }
            };
            deps.insert(name.clone(), job_deps);
        }

        let order = toposort_names(active, &deps)?;

        let mut dependents: HashMap<String, Vec<String>> = HashMap::new();
        for (name, job_deps) in &deps {
            for dep in job_deps {
                if let Dependency::Job { name: upstream, .. } = dep {
                    dependents
                        .entry(upstream.clone())
                        .or_default()
                        .push(name.clone());
                }
            }
        }

        Ok(Self {
            deps,
            dependents,
            externals,
            order,
        })
    }

    pub fn deps(&self, job: &str) -> &[Dependency] {
        self.deps.get(job).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn dependents(&self, job: &str) -> &[String] {
        self.dependents
            .get(job)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn externals(&self) -> impl Iterator<Item = (&ExternalKey, &NeedRef)> {
        self.externals.iter()
    }

    /// Job names in dependency order.
    pub fn order(&self) -> &[String] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// Cycle check over the local edges, yielding a topological order.
fn toposort_names(
    active: &ActiveJobSet,
    deps: &HashMap<String, Vec<Dependency>>,
) -> Result<Vec<String>, ConfigError> {
    let mut graph: DiGraph<String, ()> = DiGraph::new();
    let mut indices: HashMap<&str, NodeIndex> = HashMap::new();

    for job in active.iter() {
        let idx = graph.add_node(job.spec.name.clone());
        indices.insert(&job.spec.name, idx);
    }
    for (name, job_deps) in deps {
        for dep in job_deps {
            if let Dependency::Job { name: upstream, .. } = dep {
                graph.add_edge(indices[upstream.as_str()], indices[name.as_str()], ());
            }
        }
    }

    match toposort(&graph, None) {
        Ok(sorted) => Ok(sorted.into_iter().map(|i| graph[i].clone()).collect()),
        Err(cycle) => Err(ConfigError::DependencyCycle(
            graph[cycle.node_id()].clone(),
        )),
    }
}
