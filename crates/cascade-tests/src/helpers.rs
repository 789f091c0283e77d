//! Scripted command runner.

use crate::fixtures::{colcon_list, deb_name};
use async_trait::async_trait;
use cascade_core::Result;
use cascade_core::interpolation::CommandLine;
use cascade_runner::{CommandOutcome, CommandRunner, Invocation, OutputLine};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

/// One command the orchestrator issued.
#[derive(Debug, Clone)]
pub struct Call {
    pub label: String,
    pub command: CommandLine,
    pub workdir: PathBuf,
    pub started: Instant,
    pub finished: Instant,
}

impl Call {
    pub fn overlaps(&self, other: &Call) -> bool {
        self.started < other.finished && other.started < self.finished
    }
}

/// Fakes the packaging toolchain on disk.
///
/// `checkout` remembers which repository a build directory holds, `discover`
/// answers with that repository's packages, `relocate-*` drops a package file
/// into the build directory and `enumerate-artifacts` lists what is there.
/// Everything else succeeds silently.
#[derive(Default)]
pub struct ScriptedRunner {
    packages: HashMap<String, Vec<String>>,
    artifact_names: HashMap<String, String>,
    failures: Vec<(String, i32)>,
    delays: Vec<(String, Duration)>,
    checkouts: Mutex<HashMap<PathBuf, String>>,
    calls: Mutex<Vec<Call>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Packages `repository` contains, in discovery order.
    pub fn with_packages(mut self, repository: &str, packages: &[&str]) -> Self {
        self.packages.insert(
            repository.to_string(),
            packages.iter().map(|p| p.to_string()).collect(),
        );
        self
    }

    /// Name the file built for `package` instead of the usual `.deb` name.
    pub fn with_artifact_name(mut self, package: &str, file_name: &str) -> Self {
        self.artifact_names
            .insert(package.to_string(), file_name.to_string());
        self
    }

    /// Exit with `exit_code` from every command whose label starts with `prefix`.
    pub fn fail_on(mut self, prefix: &str, exit_code: i32) -> Self {
        self.failures.push((prefix.to_string(), exit_code));
        self
    }

    /// Take `delay` for every command whose label starts with `prefix`.
    pub fn delay_on(mut self, prefix: &str, delay: Duration) -> Self {
        self.delays.push((prefix.to_string(), delay));
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn labels(&self) -> Vec<String> {
        self.calls().into_iter().map(|c| c.label).collect()
    }

    pub fn calls_matching(&self, prefix: &str) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| c.label.starts_with(prefix))
            .collect()
    }

    fn delay_for(&self, label: &str) -> Option<Duration> {
        self.delays
            .iter()
            .find(|(prefix, _)| label.starts_with(prefix.as_str()))
            .map(|(_, delay)| *delay)
    }

    fn failure_for(&self, label: &str) -> Option<i32> {
        self.failures
            .iter()
            .find(|(prefix, _)| label.starts_with(prefix.as_str()))
            .map(|(_, code)| *code)
    }

    fn respond(&self, invocation: &Invocation) -> Result<CommandOutcome> {
        let label = invocation.label.as_str();
        let args = &invocation.command.args;

        if let Some(code) = self.failure_for(label) {
            return Ok(CommandOutcome::failure(code, format!("{label} failed")));
        }

        match label {
            "checkout" => {
                let repository = args
                    .iter()
                    .find_map(|arg| arg.strip_suffix(".git"))
                    .and_then(|url| url.rsplit('/').next())
                    .unwrap_or_default()
                    .to_string();
                self.checkouts
                    .lock()
                    .unwrap()
                    .insert(invocation.workdir.clone(), repository);
                Ok(CommandOutcome::success(""))
            }
            "discover" => {
                let checkouts = self.checkouts.lock().unwrap();
                let packages = checkouts
                    .get(&invocation.workdir)
                    .and_then(|repo| self.packages.get(repo))
                    .map(|names| names.iter().map(String::as_str).collect::<Vec<_>>())
                    .unwrap_or_default();
                Ok(CommandOutcome::success(colcon_list(&packages)))
            }
            "enumerate-artifacts" => Ok(CommandOutcome::success(list_debs(&invocation.workdir)?)),
            _ if label.starts_with("relocate-") => {
                let package = &args[0];
                // Build directories sit under `{slug}-deb-{arch}`.
                let architecture = invocation
                    .workdir
                    .parent()
                    .and_then(Path::file_name)
                    .and_then(|builder| builder.to_str())
                    .and_then(|builder| builder.rsplit('-').next())
                    .unwrap_or_default();
                let file_name = self
                    .artifact_names
                    .get(package)
                    .cloned()
                    .unwrap_or_else(|| deb_name(package, architecture));
                std::fs::write(invocation.workdir.join(file_name), b"!<arch>\n")?;
                Ok(CommandOutcome::success(""))
            }
            _ => Ok(CommandOutcome::success("")),
        }
    }
}

fn list_debs(dir: &Path) -> Result<String> {
    let mut names = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let name = entry?.file_name().to_string_lossy().into_owned();
        if name.ends_with(".deb") {
            names.push(name);
        }
    }
    names.sort();
    Ok(names.iter().map(|n| format!("./{n}\n")).collect())
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn execute(
        &self,
        invocation: &Invocation,
        _output_tx: mpsc::Sender<OutputLine>,
    ) -> Result<CommandOutcome> {
        let started = Instant::now();
        if let Some(delay) = self.delay_for(&invocation.label) {
            tokio::time::sleep(delay).await;
        }
        let outcome = self.respond(invocation)?;

        self.calls.lock().unwrap().push(Call {
            label: invocation.label.clone(),
            command: invocation.command.clone(),
            workdir: invocation.workdir.clone(),
            started,
            finished: Instant::now(),
        });
        Ok(outcome)
    }
}

/// Poll `condition` every 10ms for up to two seconds.
pub async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
