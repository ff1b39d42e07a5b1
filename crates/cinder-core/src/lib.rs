//! Cinder Core
//!
//! Core domain types, traits, and error handling for the Cinder pipeline
//! engine. This crate has minimal dependencies and defines the shared
//! vocabulary used across all other crates.

pub mod artifact;
pub mod context;
pub mod error;
pub mod events;
pub mod glob;
pub mod ids;
pub mod job;
pub mod ports;
pub mod rules;
pub mod run;

pub use error::{ConfigError, Error, FailureClass, Result};
pub use ids::*;
