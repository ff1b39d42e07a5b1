//! Pipeline trigger context.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// What kind of event started a pipeline run.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum PipelineSource {
    Web,
    Schedule,
    Push,
    Pipeline,
    Api,
    Trigger,
}

impl PipelineSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineSource::Web => "web",
            PipelineSource::Schedule => "schedule",
            PipelineSource::Push => "push",
            PipelineSource::Pipeline => "pipeline",
            PipelineSource::Api => "api",
            PipelineSource::Trigger => "trigger",
        }
    }
}

impl fmt::Display for PipelineSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PipelineSource {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "web" => Ok(PipelineSource::Web),
            "schedule" => Ok(PipelineSource::Schedule),
            "push" => Ok(PipelineSource::Push),
            "pipeline" => Ok(PipelineSource::Pipeline),
            "api" => Ok(PipelineSource::Api),
            "trigger" => Ok(PipelineSource::Trigger),
            other => Err(format!("unknown pipeline source: {}", other)),
        }
    }
}

/// Event record produced by the VCS webhook collaborator.
///
/// The engine only consumes these; it never synthesizes them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerEvent {
    pub git_ref: String,
    pub commit_sha: String,
    #[serde(default)]
    pub is_tag: bool,
    pub source: PipelineSource,
    #[serde(default)]
    pub commit_message: String,
    #[serde(default)]
    pub changed_paths: BTreeSet<String>,
}

/// The immutable per-run facts rule predicates evaluate against.
///
/// Constructed once from the trigger event; read-only afterwards.
#[derive(Debug, Clone)]
pub struct Context {
    git_ref: String,
    commit_sha: String,
    is_tag: bool,
    source: PipelineSource,
    changed_paths: BTreeSet<String>,
    commit_message: String,
}

impl Context {
    pub fn from_event(event: TriggerEvent) -> Self {
        Self {
            git_ref: event.git_ref,
            commit_sha: event.commit_sha,
            is_tag: event.is_tag,
            source: event.source,
            changed_paths: event.changed_paths,
            commit_message: event.commit_message,
        }
    }

    pub fn git_ref(&self) -> &str {
        &self.git_ref
    }

    pub fn commit_sha(&self) -> &str {
        &self.commit_sha
    }

    pub fn is_tag(&self) -> bool {
        self.is_tag
    }

    pub fn source(&self) -> PipelineSource {
        self.source
    }

    pub fn changed_paths(&self) -> &BTreeSet<String> {
        &self.changed_paths
    }

    pub fn commit_message(&self) -> &str {
        &self.commit_message
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_from_event() {
        let ctx = Context::from_event(TriggerEvent {
            git_ref: "main".to_string(),
            commit_sha: "abc123".to_string(),
            is_tag: false,
            source: PipelineSource::Push,
            commit_message: "fix scheduler".to_string(),
            changed_paths: ["src/lib.rs".to_string()].into_iter().collect(),
        });

        assert_eq!(ctx.git_ref(), "main");
        assert_eq!(ctx.source(), PipelineSource::Push);
        assert!(ctx.changed_paths().contains("src/lib.rs"));
    }

    #[test]
    fn test_source_round_trip() {
        for src in ["web", "schedule", "push", "pipeline", "api", "trigger"] {
            let parsed: PipelineSource = src.parse().unwrap();
            assert_eq!(parsed.as_str(), src);
        }
        assert!("mailbox".parse::<PipelineSource>().is_err());
    }
}
