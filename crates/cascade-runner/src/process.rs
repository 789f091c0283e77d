//! Host process execution.

use crate::runner::{
    CommandOutcome, CommandRunner, Invocation, OutputLine, OutputStream, RunnerConfig,
};
use async_trait::async_trait;
use cascade_core::{Error, Result};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Runs commands as child processes of the orchestrator.
pub struct ProcessRunner {
    config: RunnerConfig,
}

impl ProcessRunner {
    pub fn new(config: RunnerConfig) -> Self {
        Self { config }
    }
}

impl Default for ProcessRunner {
    fn default() -> Self {
        Self::new(RunnerConfig::default())
    }
}

fn pump<R>(
    reader: R,
    stream: OutputStream,
    output_tx: mpsc::Sender<OutputLine>,
) -> JoinHandle<String>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        let mut captured = String::new();
        let mut line_num = 0u32;

        while let Ok(Some(line)) = lines.next_line().await {
            line_num += 1;
            captured.push_str(&line);
            captured.push('\n');
            // A closed receiver only means nobody is watching.
            let _ = output_tx
                .send(OutputLine {
                    stream,
                    content: line,
                    line_number: line_num,
                    timestamp: chrono::Utc::now(),
                })
                .await;
        }

        captured
    })
}

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn execute(
        &self,
        invocation: &Invocation,
        output_tx: mpsc::Sender<OutputLine>,
    ) -> Result<CommandOutcome> {
        let start = std::time::Instant::now();
        let program = &invocation.command.program;

        info!(
            label = %invocation.label,
            command = %invocation.command,
            workdir = %invocation.workdir.display(),
            "Executing command"
        );

        let spawn_error = |message: String| Error::CommandSpawn {
            program: program.clone(),
            message,
        };

        let mut child = Command::new(program)
            .args(&invocation.command.args)
            .current_dir(&invocation.workdir)
            .envs(&self.config.env)
            .envs(&invocation.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| spawn_error(e.to_string()))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| spawn_error("stdout not captured".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| spawn_error("stderr not captured".to_string()))?;

        let stdout_handle = pump(stdout, OutputStream::Stdout, output_tx.clone());
        let stderr_handle = pump(stderr, OutputStream::Stderr, output_tx);

        let status = child
            .wait()
            .await
            .map_err(|e| Error::Internal(format!("Failed to wait for {}: {}", program, e)))?;

        let stdout = stdout_handle.await.unwrap_or_default();
        let stderr = stderr_handle.await.unwrap_or_default();

        // Killed by a signal: report as -1.
        let exit_code = status.code().unwrap_or(-1);
        let duration_ms = start.elapsed().as_millis() as u64;

        debug!(label = %invocation.label, exit_code, duration_ms, "Command completed");

        Ok(CommandOutcome {
            exit_code,
            success: status.success(),
            duration_ms,
            stdout,
            stderr,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cascade_core::interpolation::CommandLine;

    fn invocation(program: &str, args: &[&str]) -> Invocation {
        Invocation::new("test", CommandLine::new(program, args), std::env::temp_dir())
    }

    #[tokio::test]
    async fn test_process_runner_success() {
        let runner = ProcessRunner::default();
        let (tx, mut rx) = mpsc::channel(100);

        let outcome = runner
            .execute(&invocation("echo", &["hello"]), tx)
            .await
            .unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.exit_code, 0);
        assert_eq!(outcome.stdout, "hello\n");

        let line = rx.recv().await.unwrap();
        assert_eq!(line.content, "hello");
        assert_eq!(line.stream, OutputStream::Stdout);
    }

    #[tokio::test]
    async fn test_process_runner_failure_is_not_an_error() {
        let runner = ProcessRunner::default();
        let (tx, _rx) = mpsc::channel(100);

        let outcome = runner
            .execute(&invocation("sh", &["-c", "echo oops >&2; exit 3"]), tx)
            .await
            .unwrap();
        assert!(!outcome.success);
        assert_eq!(outcome.exit_code, 3);
        assert_eq!(outcome.stderr, "oops\n");
    }

    #[tokio::test]
    async fn test_process_runner_spawn_failure() {
        let runner = ProcessRunner::default();
        let (tx, _rx) = mpsc::channel(100);

        let err = runner
            .execute(&invocation("/nonexistent/cascade-test-binary", &[]), tx)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::CommandSpawn { .. }));
    }

    #[tokio::test]
    async fn test_process_runner_workdir_and_env() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = RunnerConfig::default();
        config
            .env
            .insert("CASCADE_TEST_VAR".to_string(), "from-config".to_string());
        let runner = ProcessRunner::new(config);
        let (tx, _rx) = mpsc::channel(100);

        let mut inv = Invocation::new(
            "pwd",
            CommandLine::new("sh", &["-c", "pwd; echo $CASCADE_TEST_VAR"]),
            dir.path(),
        );
        inv.env.insert("UNUSED".to_string(), "x".to_string());

        let outcome = runner.execute(&inv, tx).await.unwrap();
        let mut lines = outcome.stdout.lines();
        let reported = std::fs::canonicalize(lines.next().unwrap()).unwrap();
        assert_eq!(reported, std::fs::canonicalize(dir.path()).unwrap());
        assert_eq!(lines.next(), Some("from-config"));
    }
}
