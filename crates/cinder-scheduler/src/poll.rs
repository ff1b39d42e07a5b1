//! Cross-pipeline dependency polling.

use crate::dag::ExternalKey;
use async_trait::async_trait;
use cinder_core::artifact::StoredArtifact;
use cinder_core::ports::{ExternalJobStatus, ExternalPipelineClient};
use cinder_core::Result;
use std::cmp;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Bounds on one external dependency poll.
#[derive(Debug, Clone)]
pub struct PollSettings {
    pub interval: Duration,
    /// Overall deadline; past it the dependent job fails with an
    /// external-timeout classification.
    pub timeout: Duration,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            timeout: Duration::from_secs(300),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    Satisfied,
    TimedOut,
}

/// Poll one external job until its readiness predicate holds or the
/// deadline passes.
///
/// The predicate: the external pipeline reports the job succeeded, with
/// artifacts present when the need consumes them. Query errors and
/// `Failed` reports both count as not-yet-satisfied, since a newer run
/// on the polled ref may still succeed inside the window.
pub async fn poll_external(
    client: &dyn ExternalPipelineClient,
    key: &ExternalKey,
    artifacts_required: bool,
    settings: &PollSettings,
) -> PollOutcome {
    let deadline = Instant::now() + settings.timeout;
    loop {
        match client.poll_job(&key.project, &key.git_ref, &key.job).await {
            Ok(ExternalJobStatus::Succeeded {
                artifacts_available,
            }) => {
                if !artifacts_required || artifacts_available {
                    return PollOutcome::Satisfied;
                }
            }
            Ok(status) => {
                debug!(external = %key, ?status, "external job not ready");
            }
            Err(e) => {
                debug!(external = %key, error = %e, "external poll error");
            }
        }

        let now = Instant::now();
        if now >= deadline {
            return PollOutcome::TimedOut;
        }
        tokio::time::sleep_until(cmp::min(now + settings.interval, deadline))
            .await;
    }
}

/// Client for deployments with no other pipeline instances: every poll
/// reports pending, so cross-pipeline needs run into their timeout.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoExternalPipelines;

#[async_trait]
impl ExternalPipelineClient for NoExternalPipelines {
    async fn poll_job(
        &self,
        _project: &str,
        _git_ref: &str,
        _job: &str,
    ) -> Result<ExternalJobStatus> {
        Ok(ExternalJobStatus::Pending)
    }

    async fn fetch_artifact(
        &self,
        _project: &str,
        _git_ref: &str,
        _job: &str,
    ) -> Result<Option<Arc<StoredArtifact>>> {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct ScriptedClient {
        responses: Mutex<Vec<ExternalJobStatus>>,
    }

    #[async_trait]
    impl ExternalPipelineClient for ScriptedClient {
        async fn poll_job(
            &self,
            _project: &str,
            _git_ref: &str,
            _job: &str,
        ) -> Result<ExternalJobStatus> {
            let mut responses = self.responses.lock().unwrap();
            Ok(if responses.len() > 1 {
                responses.remove(0)
            } else {
                responses[0]
            })
        }

        async fn fetch_artifact(
            &self,
            _project: &str,
            _git_ref: &str,
            _job: &str,
        ) -> Result<Option<Arc<StoredArtifact>>> {
            Ok(None)
        }
    }

    fn key() -> ExternalKey {
        ExternalKey {
            project: "infra/images".to_string(),
            git_ref: "master".to_string(),
            job: "bake".to_string(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_satisfied_after_pending() {
        let client = ScriptedClient {
            responses: Mutex::new(vec![
                ExternalJobStatus::Pending,
                ExternalJobStatus::Pending,
                ExternalJobStatus::Succeeded {
                    artifacts_available: true,
                },
            ]),
        };
        let outcome = poll_external(
            &client,
            &key(),
            true,
            &PollSettings::default(),
        )
        .await;
        assert_eq!(outcome, PollOutcome::Satisfied);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_without_artifacts_waits() {
        // The need consumes artifacts, the external job has none: the
        // predicate never holds and the poll runs out.
        let client = ScriptedClient {
            responses: Mutex::new(vec![ExternalJobStatus::Succeeded {
                artifacts_available: false,
            }]),
        };
        let outcome = poll_external(
            &client,
            &key(),
            true,
            &PollSettings::default(),
        )
        .await;
        assert_eq!(outcome, PollOutcome::TimedOut);
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_succeeding_times_out() {
        let outcome = poll_external(
            &NoExternalPipelines,
            &key(),
            true,
            &PollSettings {
                interval: Duration::from_millis(100),
                timeout: Duration::from_secs(2),
            },
        )
        .await;
        assert_eq!(outcome, PollOutcome::TimedOut);
    }
}
