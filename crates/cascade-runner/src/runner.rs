//! Core runner trait and types.

use async_trait::async_trait;
use cascade_core::Result;
use cascade_core::interpolation::CommandLine;
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::sync::mpsc;

/// Output line from a running command.
#[derive(Debug, Clone)]
pub struct OutputLine {
    pub stream: OutputStream,
    pub content: String,
    pub line_number: u32,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Output stream type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// A command to run and where to run it.
#[derive(Debug, Clone)]
pub struct Invocation {
    /// Stage or step name, used for logging.
    pub label: String,
    pub command: CommandLine,
    pub workdir: PathBuf,
    pub env: HashMap<String, String>,
}

impl Invocation {
    pub fn new(label: impl Into<String>, command: CommandLine, workdir: impl Into<PathBuf>) -> Self {
        Self {
            label: label.into(),
            command,
            workdir: workdir.into(),
            env: HashMap::new(),
        }
    }
}

/// Result of running a command to completion. A non-zero exit is a
/// successful run of the runner with `success == false`.
#[derive(Debug, Clone, Default)]
pub struct CommandOutcome {
    pub exit_code: i32,
    pub success: bool,
    pub duration_ms: u64,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutcome {
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            exit_code: 0,
            success: true,
            stdout: stdout.into(),
            ..Default::default()
        }
    }

    pub fn failure(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            exit_code,
            success: false,
            stderr: stderr.into(),
            ..Default::default()
        }
    }
}

/// Trait for external command execution.
///
/// Dropping the returned future must stop the command.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run a command to completion, streaming output to the provided channel.
    async fn execute(
        &self,
        invocation: &Invocation,
        output_tx: mpsc::Sender<OutputLine>,
    ) -> Result<CommandOutcome>;
}

/// Configuration for command execution.
#[derive(Debug, Clone, Default)]
pub struct RunnerConfig {
    /// Variables added to every command's environment.
    pub env: HashMap<String, String>,
}
