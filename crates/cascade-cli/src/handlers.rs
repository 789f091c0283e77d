//! Command handlers.

use crate::config;
use anyhow::{Context, Result, bail};
use cascade_core::artifact::PublicationTarget;
use cascade_core::interpolation::{CommandLine, InterpolationContext};
use cascade_core::pipeline::{PipelineKind, StageAction, StageGroup};
use cascade_core::repository::{Architecture, Repository};
use cascade_core::run::RunStatus;
use cascade_core::version::{Classification, classify};
use cascade_runner::{CommandRunner, Invocation, ProcessRunner};
use cascade_scheduler::config::{CommandSet, DEFAULT_ARTIFACT_STORE};
use cascade_scheduler::discovery::PackageDiscoverer;
use cascade_scheduler::expander::run_context;
use cascade_scheduler::schedule::ScheduleBook;
use cascade_scheduler::{
    FleetConfig, InMemoryEventBus, Orchestrator, PipelineExpander, RunSummary, TriggerEvent,
};
use console::style;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::info;

fn orchestrator(fleet: &FleetConfig) -> Arc<Orchestrator> {
    let runner: Arc<dyn CommandRunner> = Arc::new(ProcessRunner::default());
    Arc::new(Orchestrator::new(
        fleet,
        runner,
        Arc::new(InMemoryEventBus::new()),
    ))
}

fn print_summaries(summaries: &[RunSummary]) -> usize {
    let mut failed = 0;
    for summary in summaries {
        let mark = match summary.status {
            RunStatus::Success => style("✓").green(),
            RunStatus::Cancelled => style("!").yellow(),
            _ => {
                failed += 1;
                style("✗").red()
            }
        };
        println!(
            "{} {} {} ({} stages, {}ms)",
            mark,
            style(&summary.builder).bold(),
            style(summary.run_id.to_string()).dim(),
            summary.stages_passed,
            summary.duration_ms
        );
        for target in &summary.published {
            println!(
                "    published {} to {} ({})",
                target.package_identifier, target.distribution_code, target.architecture
            );
        }
        if let Some(error) = &summary.error {
            println!("    {}", style(error).red());
        }
    }
    failed
}

async fn run_to_completion(orchestrator: &Orchestrator) -> Result<()> {
    let summaries = orchestrator.wait_idle().await;
    if summaries.is_empty() {
        println!("{} Nothing to build", style("!").yellow());
        return Ok(());
    }
    let failed = print_summaries(&summaries);
    if failed > 0 {
        bail!("{} of {} runs failed", failed, summaries.len());
    }
    Ok(())
}

/// Validate the fleet file and print the build matrix.
pub fn validate(explicit: Option<&Path>) -> Result<()> {
    let (path, fleet) = config::load_fleet(explicit)?;
    let repositories = fleet.repositories();

    println!(
        "{} Fleet file {} is valid",
        style("✓").green(),
        style(path.display()).dim()
    );
    println!(
        "  Architectures: {}",
        fleet
            .architectures()
            .iter()
            .map(Architecture::as_str)
            .collect::<Vec<_>>()
            .join(", ")
    );
    println!("  Cascade order:");
    for repo in &repositories {
        match repo.dependents.first() {
            Some(next) => println!("    - {} -> {}", repo.name, next),
            None => println!("    - {}", repo.name),
        }
    }
    if !fleet.schedules.is_empty() {
        println!("  Schedules:");
        for schedule in &fleet.schedules {
            println!(
                "    - {} ({}): {}",
                schedule.name, schedule.architecture, schedule.cron
            );
        }
    }
    Ok(())
}

/// List every builder with its workers.
pub fn builders(explicit: Option<&Path>) -> Result<()> {
    let (_, fleet) = config::load_fleet(explicit)?;
    let matrix = cascade_scheduler::BuildMatrix::from_config(&fleet);

    for spec in matrix.builders() {
        let kind = match spec.id.kind {
            PipelineKind::Verification => style("verify").cyan(),
            PipelineKind::Release => style("release").magenta(),
        };
        println!(
            "{:<40} {:<8} {}",
            style(spec.name()).bold(),
            kind,
            style(spec.workers.join(",")).dim()
        );
        if let Some(triggerable) = spec.triggerable() {
            println!("    triggerable: {}", triggerable);
        }
    }
    Ok(())
}

/// Report whether a branch name is a release tag.
pub fn classify_branch(branch: &str) -> Result<()> {
    match classify(branch) {
        Classification::Release(version) => {
            println!("{} {} is release {}", style("✓").green(), branch, version)
        }
        Classification::NotARelease => {
            println!("{} {} is not a release", style("-").dim(), branch)
        }
    }
    Ok(())
}

/// Parse an artifact file name into its publication target.
pub fn artifact(file_name: &str) -> Result<()> {
    let target = PublicationTarget::parse(file_name)?;
    println!("{} {}", style("✓").green(), style(file_name).bold());
    println!("  Package:      {}", target.package_identifier);
    println!(
        "  Distribution: {} ({})",
        target.distribution_code,
        target.distribution_family()
    );
    println!("  Architecture: {}", target.architecture);
    Ok(())
}

fn discoverer(fleet: Option<&FleetConfig>) -> PackageDiscoverer {
    let command = fleet
        .map(|f| f.commands.discover.clone())
        .unwrap_or_else(|| CommandSet::default().discover);
    PackageDiscoverer::new(Arc::new(ProcessRunner::default()), command)
}

/// Discover the packages of a checkout.
pub async fn discover(explicit: Option<&Path>, dir: &Path) -> Result<()> {
    let fleet = config::load_fleet_if_present(explicit)?;
    let packages = discoverer(fleet.as_ref())
        .discover(dir, &InterpolationContext::new())
        .await
        .with_context(|| format!("Discovery failed in {}", dir.display()))?;

    println!(
        "{} {} packages in {}",
        style("✓").green(),
        packages.len(),
        style(dir.display()).dim()
    );
    for package in &packages {
        println!("    - {} ({})", style(&package.name).bold(), package.path);
    }
    Ok(())
}

fn describe(action: &StageAction) -> String {
    match action {
        StageAction::Run { command } => command.to_string(),
        StageAction::Enumerate { command } => format!("{} (lists artifacts)", command),
        StageAction::Provision { sources } => sources
            .iter()
            .map(|s| s.display().to_string())
            .collect::<Vec<_>>()
            .join(", "),
        StageAction::Transfer { destination } => format!("copy to {}", destination.display()),
        StageAction::Publish { template } => {
            let line = CommandLine {
                program: template.program.clone(),
                args: template.args.clone(),
            };
            format!("{} (per artifact)", line)
        }
    }
}

fn print_group(group: &StageGroup) {
    println!("{} {}", style("▶").cyan(), style(&group.name).bold());
    for stage in &group.stages {
        let mut flags = Vec::new();
        if stage.exclusive {
            flags.push("locked");
        }
        if stage.quiet {
            flags.push("quiet");
        }
        let flags = if flags.is_empty() {
            String::new()
        } else {
            format!(" [{}]", flags.join(","))
        };
        println!(
            "    {}{}: {}",
            stage.name(),
            style(flags).dim(),
            describe(&stage.action)
        );
        if let Some(workdir) = &stage.workdir {
            println!("        in {}", style(workdir).dim());
        }
    }
}

/// Discover packages in a checkout and print the release run it would get.
pub async fn plan(
    explicit: Option<&Path>,
    dir: &Path,
    repository: Option<String>,
    source_ref: Option<String>,
    arch: &str,
) -> Result<()> {
    let fleet = config::load_fleet_if_present(explicit)?;
    let architecture: Architecture = arch.parse()?;

    let name = match repository {
        Some(name) => name,
        None => std::path::absolute(dir)?
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .context("Cannot infer repository name; pass --repository")?,
    };
    let repo = fleet
        .as_ref()
        .and_then(|f| f.repositories().into_iter().find(|r| r.name == name))
        .unwrap_or_else(|| Repository {
            name: name.clone(),
            url: String::new(),
            dependents: vec![],
        });
    let source_ref = source_ref.unwrap_or_else(|| {
        fleet
            .as_ref()
            .map(|f| f.main_branch.clone())
            .unwrap_or_else(|| "main".to_string())
    });

    let expander = match &fleet {
        Some(fleet) => PipelineExpander::from_config(fleet),
        None => PipelineExpander::new(CommandSet::default(), DEFAULT_ARTIFACT_STORE),
    };
    let ctx = run_context(&repo, &source_ref, architecture);

    let packages = discoverer(fleet.as_ref())
        .discover(dir, &ctx)
        .await
        .with_context(|| format!("Discovery failed in {}", dir.display()))?;

    println!(
        "Release of {} at {} on {}: {} packages",
        style(&repo.name).bold(),
        style(&source_ref).dim(),
        architecture,
        packages.len()
    );
    print_group(&expander.release_prelude(&ctx));
    for group in expander.expand(&packages, &ctx) {
        print_group(&group);
    }
    Ok(())
}

/// Report a change on a branch and wait for every resulting run.
pub async fn push(explicit: Option<&Path>, repository: String, branch: String) -> Result<()> {
    let (_, fleet) = config::load_fleet(explicit)?;
    let orchestrator = orchestrator(&fleet);

    println!(
        "{} Change on {} {}",
        style("▶").cyan(),
        style(&repository).bold(),
        style(&branch).dim()
    );
    let runs = orchestrator
        .handle_trigger(TriggerEvent::Push { repository, branch })
        .await?;
    info!(runs = runs.len(), "Runs dispatched");

    run_to_completion(&orchestrator).await
}

/// Force one builder and wait for it and anything it cascades into.
pub async fn force(
    explicit: Option<&Path>,
    builder: String,
    source_ref: Option<String>,
    full_build: bool,
) -> Result<()> {
    let (_, fleet) = config::load_fleet(explicit)?;
    let orchestrator = orchestrator(&fleet);

    println!(
        "{} Forcing {}{}",
        style("▶").cyan(),
        style(&builder).bold(),
        if full_build { " (full build)" } else { "" }
    );
    orchestrator
        .handle_trigger(TriggerEvent::Manual {
            builder,
            source_ref,
            full_build,
        })
        .await?;

    run_to_completion(&orchestrator).await
}

/// Fire the configured schedules until interrupted.
pub async fn serve(explicit: Option<&Path>) -> Result<()> {
    let (path, fleet) = config::load_fleet(explicit)?;
    let book = ScheduleBook::from_config(&fleet.schedules)?;
    let orchestrator = orchestrator(&fleet);

    if book.is_empty() {
        println!(
            "{} No schedules in {}",
            style("!").yellow(),
            style(path.display()).dim()
        );
        return Ok(());
    }
    for entry in book.entries() {
        let next = entry
            .next_after(chrono::Utc::now())
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "never".to_string());
        println!(
            "{} {} on {} next at {}",
            style("⏱").cyan(),
            style(&entry.name).bold(),
            entry.architecture,
            next
        );
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, shutting down");
        }
        shutdown_tx.send_replace(true);
    });

    orchestrator.run_schedules(&book, shutdown_rx).await?;

    for run_id in orchestrator.active_runs().await {
        orchestrator.cancel(run_id).await;
    }
    let summaries = orchestrator.wait_idle().await;
    print_summaries(&summaries);
    Ok(())
}

/// Print the architecture of this host.
pub async fn detect_arch() -> Result<()> {
    let runner = ProcessRunner::default();
    let (tx, _rx) = mpsc::channel(16);
    let invocation = Invocation::new(
        "detect-arch",
        CommandLine::new("uname", &["-m"]),
        std::env::temp_dir(),
    );

    let outcome = runner.execute(&invocation, tx).await?;
    if !outcome.success {
        bail!("uname -m exited with {}", outcome.exit_code);
    }
    println!("{}", Architecture::from_uname(&outcome.stdout)?);
    Ok(())
}
