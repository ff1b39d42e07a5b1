//! Active job set construction.

use cinder_core::context::Context;
use cinder_core::job::{JobSpec, PipelineSpec};
use cinder_core::rules::{self, Decision, When};
use std::collections::HashMap;
use tracing::debug;

/// One job admitted into a run, with the gate its matching rule chose.
#[derive(Debug, Clone)]
pub struct ActiveJob {
    pub spec: JobSpec,
    pub gate: When,
}

/// The jobs participating in one pipeline run.
///
/// Produced once, before any scheduling; immutable afterwards. There is
/// no shared registry: every consumer receives this value.
#[derive(Debug, Clone)]
pub struct ActiveJobSet {
    jobs: Vec<ActiveJob>,
    index: HashMap<String, usize>,
}

impl ActiveJobSet {
    /// Evaluate every job's rule list against the run context. Excluded
    /// jobs are dropped here and never materialize as runtime entities.
    pub fn build(spec: &PipelineSpec, ctx: &Context) -> Self {
        let mut jobs = Vec::new();
        let mut index = HashMap::new();

        for job in &spec.jobs {
            match rules::evaluate(&job.rules, ctx) {
                Decision::Include(gate) => {
                    index.insert(job.name.clone(), jobs.len());
                    jobs.push(ActiveJob {
                        spec: job.clone(),
                        gate,
                    });
                }
                Decision::Exclude => {
                    debug!(job = %job.name, "excluded by rules");
                }
            }
        }

        Self { jobs, index }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&ActiveJob> {
        self.index.get(name).map(|&i| &self.jobs[i])
    }

    pub fn iter(&self) -> impl Iterator<Item = &ActiveJob> {
        self.jobs.iter()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}
