//! CLI command definitions.

use cinder_core::context::PipelineSource;
use clap::{Args, Subcommand};
use std::path::PathBuf;

#[derive(Subcommand)]
pub enum Commands {
    /// Validate a configuration without executing anything.
    Validate {
        #[arg(long, default_value = "cinder.yml")]
        config: PathBuf,
    },
    /// Execute a pipeline for a synthesized trigger event.
    Run(RunArgs),
}

#[derive(Args)]
pub struct RunArgs {
    #[arg(long, default_value = "cinder.yml")]
    pub config: PathBuf,

    /// Branch or tag name the run is for.
    #[arg(long = "ref", default_value = "main")]
    pub git_ref: String,

    #[arg(long, default_value = "0000000000000000000000000000000000000000")]
    pub sha: String,

    /// Trigger kind: web, schedule, push, pipeline, api, or trigger.
    #[arg(long, default_value = "push")]
    pub source: PipelineSource,

    /// Treat the ref as a tag.
    #[arg(long)]
    pub tag: bool,

    #[arg(long, default_value = "")]
    pub message: String,

    /// Changed path, repeatable; feeds rule `changes:` filters.
    #[arg(long = "changed")]
    pub changed: Vec<String>,

    /// Worker pool size.
    #[arg(long, default_value_t = 4)]
    pub workers: usize,

    /// Manual job to release immediately, repeatable.
    #[arg(long = "release")]
    pub release: Vec<String>,
}
