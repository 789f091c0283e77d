//! Stage group execution.
//!
//! Groups run strictly in order and the first failing stage ends the run.
//! Each stage may consume the output of the stage before it in the same
//! group; the executor hands that value forward explicitly.

use crate::gate::PublicationGate;
use cascade_core::artifact::{BuildArtifact, PublicationTarget};
use cascade_core::events::{
    ArtifactPublishedPayload, Event, StageCompletedPayload, StageStartedPayload,
};
use cascade_core::interpolation::{CommandLine, CommandTemplate, InterpolationContext, vars};
use cascade_core::pipeline::{Stage, StageAction, StageGroup, StageOutput};
use cascade_core::ports::EventBus;
use cascade_core::run::BuilderId;
use cascade_core::{Error, Result, RunId};
use cascade_runner::{CommandOutcome, CommandRunner, Invocation, OutputLine};
use std::collections::HashSet;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, trace, warn};

/// Channel whose lines are logged at trace level under the given label.
pub(crate) fn log_output(label: &str) -> mpsc::Sender<OutputLine> {
    let (tx, mut rx) = mpsc::channel::<OutputLine>(256);
    let label = label.to_string();
    tokio::spawn(async move {
        while let Some(line) = rx.recv().await {
            trace!(target: "cascade::output", stage = %label, stream = ?line.stream, "{}", line.content);
        }
    });
    tx
}

/// Everything a stage needs to know about the run it belongs to.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub run_id: RunId,
    pub builder: BuilderId,
    /// Root of the checked-out tree; stage working directories are relative to it.
    pub build_dir: PathBuf,
    pub variables: InterpolationContext,
    pub cancel: watch::Receiver<bool>,
}

impl RunContext {
    fn stage_dir(&self, stage: &Stage) -> PathBuf {
        match &stage.workdir {
            Some(dir) => self.build_dir.join(dir),
            None => self.build_dir.clone(),
        }
    }

    fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }
}

/// Counters carried across the successive `execute` calls of one run.
#[derive(Debug, Clone, Default)]
pub struct RunProgress {
    pub next_index: u32,
    pub stages_passed: u32,
    /// Targets inserted into the shared repository, in insertion order.
    pub published: Vec<PublicationTarget>,
}

/// Runs stage groups against a command runner.
#[derive(Clone)]
pub struct PipelineExecutor {
    runner: Arc<dyn CommandRunner>,
    gate: PublicationGate,
    event_bus: Arc<dyn EventBus>,
    publish_dir: PathBuf,
}

impl PipelineExecutor {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        gate: PublicationGate,
        event_bus: Arc<dyn EventBus>,
        publish_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            runner,
            gate,
            event_bus,
            publish_dir: publish_dir.into(),
        }
    }

    pub fn gate(&self) -> &PublicationGate {
        &self.gate
    }

    /// Recreate `build_dir` empty.
    pub async fn prepare_workspace(&self, build_dir: &Path) -> Result<()> {
        if tokio::fs::try_exists(build_dir).await? {
            tokio::fs::remove_dir_all(build_dir).await?;
        }
        tokio::fs::create_dir_all(build_dir).await?;
        debug!(path = %build_dir.display(), "Workspace prepared");
        Ok(())
    }

    /// Execute groups in order, stopping at the first failure.
    pub async fn execute(
        &self,
        ctx: &RunContext,
        groups: &[StageGroup],
        progress: &mut RunProgress,
    ) -> Result<()> {
        for group in groups {
            debug!(
                run_id = %ctx.run_id,
                group = %group.name,
                stages = group.stages.len(),
                "Entering stage group"
            );

            let mut previous = StageOutput::None;
            for stage in &group.stages {
                let input = std::mem::take(&mut previous);
                previous = self.run_stage(ctx, group, stage, input, progress).await?;
            }
        }
        Ok(())
    }

    async fn run_stage(
        &self,
        ctx: &RunContext,
        group: &StageGroup,
        stage: &Stage,
        input: StageOutput,
        progress: &mut RunProgress,
    ) -> Result<StageOutput> {
        if ctx.is_cancelled() {
            return Err(Error::Cancelled {
                stage: stage.name().to_string(),
            });
        }

        let stage_index = progress.next_index;
        progress.next_index += 1;

        self.event_bus
            .publish(Event::StageStarted(StageStartedPayload {
                run_id: ctx.run_id,
                group: group.name.clone(),
                stage_name: stage.name().to_string(),
                stage_index,
                started_at: chrono::Utc::now(),
            }))
            .await?;

        let started = Instant::now();
        let result = cancellable(
            &ctx.cancel,
            stage.name(),
            self.perform(ctx, stage, input, &mut progress.published),
        )
        .await;
        let duration_ms = started.elapsed().as_millis() as u64;

        let exit_code = match &result {
            Ok(_) if stage.command().is_some() => Some(0),
            Err(Error::StageFailed { exit_code, .. }) => Some(*exit_code),
            _ => None,
        };

        self.event_bus
            .publish(Event::StageCompleted(StageCompletedPayload {
                run_id: ctx.run_id,
                group: group.name.clone(),
                stage_name: stage.name().to_string(),
                stage_index,
                success: result.is_ok(),
                exit_code,
                duration_ms,
                completed_at: chrono::Utc::now(),
            }))
            .await?;

        match &result {
            Ok(_) => {
                progress.stages_passed += 1;
                if stage.quiet {
                    debug!(run_id = %ctx.run_id, stage = %stage.name(), duration_ms, "Stage succeeded");
                } else {
                    info!(run_id = %ctx.run_id, stage = %stage.name(), duration_ms, "Stage succeeded");
                }
            }
            Err(e) => {
                warn!(run_id = %ctx.run_id, stage = %stage.name(), duration_ms, error = %e, "Stage failed");
            }
        }

        result
    }

    async fn perform(
        &self,
        ctx: &RunContext,
        stage: &Stage,
        input: StageOutput,
        published: &mut Vec<PublicationTarget>,
    ) -> Result<StageOutput> {
        if stage.exclusive {
            self.gate
                .with_lock(self.perform_action(ctx, stage, input, published))
                .await
        } else {
            self.perform_action(ctx, stage, input, published).await
        }
    }

    async fn perform_action(
        &self,
        ctx: &RunContext,
        stage: &Stage,
        input: StageOutput,
        published: &mut Vec<PublicationTarget>,
    ) -> Result<StageOutput> {
        let workdir = ctx.stage_dir(stage);

        match &stage.action {
            StageAction::Run { command } => {
                self.run_command(stage.name(), stage.name(), command, &workdir)
                    .await?;
                Ok(StageOutput::None)
            }
            StageAction::Enumerate { command } => {
                let outcome = self
                    .run_command(stage.name(), stage.name(), command, &workdir)
                    .await?;
                let paths = outcome
                    .stdout
                    .lines()
                    .map(str::trim)
                    .filter(|line| !line.is_empty())
                    .map(|line| workdir.join(line.strip_prefix("./").unwrap_or(line)))
                    .collect::<Vec<_>>();
                debug!(run_id = %ctx.run_id, count = paths.len(), "Artifacts enumerated");
                Ok(StageOutput::ArtifactPaths(paths))
            }
            StageAction::Provision { sources } => {
                provision(sources, &ctx.build_dir).await?;
                Ok(StageOutput::None)
            }
            StageAction::Transfer { destination } => {
                let StageOutput::ArtifactPaths(paths) = input else {
                    return Err(Error::Internal(format!(
                        "stage {} expects enumerated artifact paths",
                        stage.name()
                    )));
                };
                let artifacts = transfer(paths, destination).await?;
                info!(
                    run_id = %ctx.run_id,
                    count = artifacts.len(),
                    destination = %destination.display(),
                    "Artifacts transferred"
                );
                Ok(StageOutput::Artifacts(artifacts))
            }
            StageAction::Publish { template } => {
                let StageOutput::Artifacts(artifacts) = input else {
                    return Err(Error::Internal(format!(
                        "stage {} expects transferred artifacts",
                        stage.name()
                    )));
                };
                let targets = self
                    .publish(ctx, stage, template, artifacts, published)
                    .await?;
                Ok(StageOutput::Published(targets))
            }
        }
    }

    /// Route every artifact first; only if all of them parse does any
    /// insertion run. Each insertion holds the publication lock on its own.
    async fn publish(
        &self,
        ctx: &RunContext,
        stage: &Stage,
        template: &CommandTemplate,
        artifacts: Vec<BuildArtifact>,
        published: &mut Vec<PublicationTarget>,
    ) -> Result<Vec<PublicationTarget>> {
        let routed = artifacts
            .into_iter()
            .map(|artifact| artifact.target().map(|target| (artifact, target)))
            .collect::<Result<Vec<_>>>()?;

        let mut targets = Vec::with_capacity(routed.len());
        for (artifact, target) in routed {
            let variables = ctx
                .variables
                .clone()
                .with(vars::ARTIFACT_PACKAGE, &target.package_identifier)
                .with(vars::ARTIFACT_PATH, artifact.absolute_path.display().to_string())
                .with(vars::ARTIFACT_FILE_NAME, &artifact.file_name)
                .with(vars::ARTIFACT_DISTRIBUTION, &target.distribution_code)
                .with(vars::ARTIFACT_ARCHITECTURE, &target.architecture);
            let command = template.render(&variables);
            let label = format!("includedeb-{}", artifact.file_name);

            self.gate
                .with_lock(self.run_command(stage.name(), &label, &command, &self.publish_dir))
                .await?;

            info!(
                run_id = %ctx.run_id,
                package = %target.package_identifier,
                distribution = %target.distribution_code,
                arch = %target.architecture,
                "Artifact published"
            );
            self.event_bus
                .publish(Event::ArtifactPublished(ArtifactPublishedPayload {
                    run_id: ctx.run_id,
                    file_name: artifact.file_name.clone(),
                    target: target.clone(),
                    published_at: chrono::Utc::now(),
                }))
                .await?;

            published.push(target.clone());
            targets.push(target);
        }

        Ok(targets)
    }

    async fn run_command(
        &self,
        stage: &str,
        label: &str,
        command: &CommandLine,
        workdir: &Path,
    ) -> Result<CommandOutcome> {
        let invocation = Invocation::new(label, command.clone(), workdir);
        let outcome = self
            .runner
            .execute(&invocation, log_output(label))
            .await?;

        if !outcome.success {
            let stderr = outcome.stderr.trim();
            if !stderr.is_empty() {
                warn!(stage = %label, exit_code = outcome.exit_code, "{}", stderr);
            }
            return Err(Error::StageFailed {
                stage: stage.to_string(),
                exit_code: outcome.exit_code,
            });
        }

        Ok(outcome)
    }
}

/// Run `work` unless the run is cancelled first; cancellation drops `work`.
pub async fn cancellable<T, F>(cancel: &watch::Receiver<bool>, stage: &str, work: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::select! {
        biased;
        _ = cancelled(cancel.clone()) => Err(Error::Cancelled {
            stage: stage.to_string(),
        }),
        result = work => result,
    }
}

/// Resolves once the run is cancelled. Never resolves if the sender is gone.
async fn cancelled(mut rx: watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

async fn provision(sources: &[PathBuf], build_dir: &Path) -> Result<()> {
    for source in sources {
        let file_name = source.file_name().ok_or_else(|| {
            Error::Config(format!("helper script {} has no file name", source.display()))
        })?;
        let dest = build_dir.join(file_name);
        tokio::fs::copy(source, &dest).await?;
        set_executable(&dest).await?;
    }
    Ok(())
}

#[cfg(unix)]
async fn set_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).await?;
    Ok(())
}

#[cfg(not(unix))]
async fn set_executable(_path: &Path) -> Result<()> {
    Ok(())
}

async fn transfer(paths: Vec<PathBuf>, destination: &Path) -> Result<Vec<BuildArtifact>> {
    // The store is flat; two artifacts with one basename would overwrite each other.
    let mut names = HashSet::with_capacity(paths.len());
    for path in &paths {
        let file_name = path
            .file_name()
            .ok_or_else(|| Error::UnrecognizedArtifactName(path.display().to_string()))?;
        if !names.insert(file_name) {
            return Err(Error::UnrecognizedArtifactName(format!(
                "duplicate artifact {}",
                file_name.to_string_lossy()
            )));
        }
    }

    tokio::fs::create_dir_all(destination).await?;

    let mut artifacts = Vec::with_capacity(paths.len());
    for path in &paths {
        let file_name = path
            .file_name()
            .ok_or_else(|| Error::UnrecognizedArtifactName(path.display().to_string()))?;
        let dest = std::path::absolute(destination.join(file_name))?;
        tokio::fs::copy(path, &dest).await?;

        let artifact = BuildArtifact::from_path(&dest)
            .ok_or_else(|| Error::UnrecognizedArtifactName(dest.display().to_string()))?;
        artifacts.push(artifact);
    }
    Ok(artifacts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::InMemoryEventBus;
    use crate::config::CommandSet;
    use crate::expander::{PipelineExpander, run_context};
    use async_trait::async_trait;
    use cascade_core::package::DiscoveredPackage;
    use cascade_core::repository::{Architecture, Repository};
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Records `(label, lock held)` per call; fails the labels it is told to.
    struct Recorder {
        gate: PublicationGate,
        calls: Mutex<Vec<(String, bool)>>,
        stdout: HashMap<String, String>,
        fail: Option<String>,
        block: Option<String>,
    }

    impl Recorder {
        fn new(gate: PublicationGate) -> Self {
            Self {
                gate,
                calls: Mutex::new(Vec::new()),
                stdout: HashMap::new(),
                fail: None,
                block: None,
            }
        }

        fn labels(&self) -> Vec<String> {
            self.calls.lock().unwrap().iter().map(|(l, _)| l.clone()).collect()
        }
    }

    #[async_trait]
    impl CommandRunner for Recorder {
        async fn execute(
            &self,
            invocation: &Invocation,
            _output_tx: mpsc::Sender<OutputLine>,
        ) -> Result<CommandOutcome> {
            let label = invocation.label.clone();
            self.calls
                .lock()
                .unwrap()
                .push((label.clone(), self.gate.is_locked()));

            if self.block.as_deref() == Some(label.as_str()) {
                std::future::pending::<()>().await;
            }
            if self.fail.as_deref() == Some(label.as_str()) {
                return Ok(CommandOutcome::failure(2, "boom"));
            }
            Ok(CommandOutcome::success(
                self.stdout.get(&label).cloned().unwrap_or_default(),
            ))
        }
    }

    struct Harness {
        _dir: tempfile::TempDir,
        build_dir: PathBuf,
        store: PathBuf,
        cancel_tx: watch::Sender<bool>,
        ctx: RunContext,
    }

    fn harness() -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let build_dir = dir.path().join("build");
        let store = dir.path().join("store");
        std::fs::create_dir_all(&build_dir).unwrap();

        let repo = Repository {
            name: "a".to_string(),
            url: "file:///a.git".to_string(),
            dependents: vec![],
        };
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let ctx = RunContext {
            run_id: RunId::new(),
            builder: BuilderId::release("a", Architecture::Amd64),
            build_dir: build_dir.clone(),
            variables: run_context(&repo, "1.0.0", Architecture::Amd64),
            cancel: cancel_rx,
        };

        Harness {
            _dir: dir,
            build_dir,
            store,
            cancel_tx,
            ctx,
        }
    }

    fn executor(runner: Arc<Recorder>, gate: PublicationGate) -> PipelineExecutor {
        PipelineExecutor::new(runner, gate, Arc::new(InMemoryEventBus::new()), ".")
    }

    fn packages() -> Vec<DiscoveredPackage> {
        vec![
            DiscoveredPackage::new("a", "p/a"),
            DiscoveredPackage::new("b", "p/b"),
        ]
    }

    fn write_debs(build_dir: &Path, names: &[&str]) -> String {
        names
            .iter()
            .map(|name| {
                std::fs::write(build_dir.join(name), b"deb").unwrap();
                format!("./{name}\n")
            })
            .collect()
    }

    #[tokio::test]
    async fn test_fail_fast_skips_publication() {
        let h = harness();
        let gate = PublicationGate::new("reprepro");
        let mut runner = Recorder::new(gate.clone());
        runner.fail = Some("compile-a".to_string());
        let runner = Arc::new(runner);
        let exec = executor(Arc::clone(&runner), gate);

        let groups = PipelineExpander::new(CommandSet::default(), &h.store)
            .expand(&packages(), &h.ctx.variables);
        let mut progress = RunProgress::default();
        let err = exec.execute(&h.ctx, &groups, &mut progress).await.unwrap_err();

        assert!(matches!(err, Error::StageFailed { ref stage, exit_code: 2 } if stage == "compile-a"));
        assert_eq!(
            runner.labels(),
            vec!["install-deps-a", "generate-metadata-a", "compile-a"]
        );
        assert_eq!(progress.stages_passed, 2);
        assert!(progress.published.is_empty());
    }

    #[tokio::test]
    async fn test_publishes_every_artifact_under_lock() {
        let h = harness();
        let gate = PublicationGate::new("reprepro");
        let mut runner = Recorder::new(gate.clone());
        let listing = write_debs(
            &h.build_dir,
            &[
                "ros-jazzy-a_1.0.0-0noble_amd64.deb",
                "ros-jazzy-b_1.0.0-0noble_amd64.deb",
            ],
        );
        runner.stdout.insert("enumerate-artifacts".to_string(), listing);
        let runner = Arc::new(runner);
        let exec = executor(Arc::clone(&runner), gate.clone());

        let groups = PipelineExpander::new(CommandSet::default(), &h.store)
            .expand(&packages(), &h.ctx.variables);
        let mut progress = RunProgress::default();
        exec.execute(&h.ctx, &groups, &mut progress).await.unwrap();

        assert_eq!(progress.published.len(), 2);
        assert_eq!(progress.published[0].package_identifier, "ros-jazzy-a");
        assert_eq!(progress.published[0].distribution_code, "noble");
        assert!(h.store.join("ros-jazzy-b_1.0.0-0noble_amd64.deb").exists());

        let calls = runner.calls.lock().unwrap().clone();
        let inserts: Vec<_> = calls
            .iter()
            .filter(|(label, _)| label.starts_with("includedeb-"))
            .collect();
        assert_eq!(inserts.len(), 2);
        assert!(inserts.iter().all(|(_, locked)| *locked));
        assert!(
            calls
                .iter()
                .filter(|(label, _)| label.starts_with("compile-"))
                .all(|(_, locked)| !*locked)
        );
        assert!(!gate.is_locked());
    }

    #[tokio::test]
    async fn test_unrecognized_artifact_publishes_nothing() {
        let h = harness();
        let gate = PublicationGate::new("reprepro");
        let mut runner = Recorder::new(gate.clone());
        let listing = write_debs(
            &h.build_dir,
            &["ros-jazzy-a_1.0.0-0noble_amd64.deb", "bad.deb"],
        );
        runner.stdout.insert("enumerate-artifacts".to_string(), listing);
        let runner = Arc::new(runner);
        let exec = executor(Arc::clone(&runner), gate);

        let groups = PipelineExpander::new(CommandSet::default(), &h.store)
            .expand(&packages(), &h.ctx.variables);
        let mut progress = RunProgress::default();
        let err = exec.execute(&h.ctx, &groups, &mut progress).await.unwrap_err();

        assert!(matches!(err, Error::UnrecognizedArtifactName(ref name) if name == "bad.deb"));
        assert!(progress.published.is_empty());
        assert!(
            runner
                .labels()
                .iter()
                .all(|label| !label.starts_with("includedeb-"))
        );
    }

    #[tokio::test]
    async fn test_exclusive_stages_hold_the_lock() {
        let h = harness();
        let gate = PublicationGate::new("reprepro");
        let runner = Arc::new(Recorder::new(gate.clone()));
        let exec = executor(Arc::clone(&runner), gate);

        let prelude = PipelineExpander::new(CommandSet::default(), &h.store)
            .release_prelude(&h.ctx.variables);
        let mut progress = RunProgress::default();
        exec.execute(&h.ctx, &[prelude], &mut progress).await.unwrap();

        let calls = runner.calls.lock().unwrap().clone();
        assert_eq!(
            calls,
            vec![
                ("refresh-index".to_string(), true),
                ("refresh-dependencies".to_string(), true),
                ("checkout".to_string(), false),
            ]
        );
    }

    #[tokio::test]
    async fn test_cancellation_releases_lock() {
        let h = harness();
        let gate = PublicationGate::new("reprepro");
        let mut runner = Recorder::new(gate.clone());
        runner.block = Some("refresh-index".to_string());
        let runner = Arc::new(runner);
        let exec = executor(Arc::clone(&runner), gate.clone());

        let prelude = PipelineExpander::new(CommandSet::default(), &h.store)
            .release_prelude(&h.ctx.variables);
        let ctx = h.ctx.clone();
        let handle = tokio::spawn(async move {
            let mut progress = RunProgress::default();
            exec.execute(&ctx, &[prelude], &mut progress).await
        });

        while !gate.is_locked() {
            tokio::task::yield_now().await;
        }
        h.cancel_tx.send(true).unwrap();

        let err = handle.await.unwrap().unwrap_err();
        assert!(matches!(err, Error::Cancelled { ref stage } if stage == "refresh-index"));
        assert!(!gate.is_locked());
        assert_eq!(runner.labels(), vec!["refresh-index"]);
    }

    #[tokio::test]
    async fn test_prepare_workspace_empties_directory() {
        let h = harness();
        std::fs::write(h.build_dir.join("stale.deb"), b"old").unwrap();
        let gate = PublicationGate::new("reprepro");
        let exec = executor(Arc::new(Recorder::new(gate.clone())), gate);

        exec.prepare_workspace(&h.build_dir).await.unwrap();

        assert!(h.build_dir.exists());
        assert_eq!(std::fs::read_dir(&h.build_dir).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_transfer_rejects_duplicate_basenames() {
        let h = harness();
        let deb = "ros-jazzy-a_1.0.0-0noble_amd64.deb";
        let mut paths = Vec::new();
        for sub in ["one", "two"] {
            let dir = h.build_dir.join(sub);
            std::fs::create_dir_all(&dir).unwrap();
            std::fs::write(dir.join(deb), sub).unwrap();
            paths.push(dir.join(deb));
        }

        let err = transfer(paths, &h.store).await.unwrap_err();

        assert!(matches!(err, Error::UnrecognizedArtifactName(ref m) if m.contains(deb)));
        assert!(!h.store.join(deb).exists());
    }
}
