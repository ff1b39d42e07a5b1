//! Pipeline scheduling and orchestration for the Cinder engine.
//!
//! The active set and the job graph are built once, synchronously, per
//! run; the scheduler then drives the per-job state machine over a
//! bounded worker pool shared across all concurrently active runs.

pub mod active_set;
pub mod dag;
pub mod poll;
pub mod pool;
pub mod scheduler;

pub use active_set::{ActiveJob, ActiveJobSet};
pub use dag::{Dependency, ExternalKey, JobGraph};
pub use poll::{NoExternalPipelines, PollSettings};
pub use pool::WorkerPool;
pub use scheduler::{RunHandle, RunningPipeline, Scheduler, SchedulerConfig};
