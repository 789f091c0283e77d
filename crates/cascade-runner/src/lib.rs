//! External command execution for Cascade.
//!
//! Every package-manager, packaging and publication command the orchestrator
//! issues goes through a [`CommandRunner`]. The orchestrator only cares about
//! exit status and, for discovery and enumeration, captured stdout.

pub mod process;
pub mod runner;

pub use process::ProcessRunner;
pub use runner::{CommandOutcome, CommandRunner, Invocation, OutputLine, OutputStream, RunnerConfig};
