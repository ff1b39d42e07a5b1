//! Execution adapters.
//!
//! The engine treats job scripts as opaque; this crate supplies the one
//! adapter shipped with the CLI, which runs them on the host shell.

pub mod shell;

pub use shell::ShellAdapter;
