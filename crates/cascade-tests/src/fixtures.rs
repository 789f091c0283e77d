//! Temporary fleets for end-to-end runs.

use crate::helpers::ScriptedRunner;
use cascade_runner::CommandRunner;
use cascade_scheduler::{FleetConfig, InMemoryEventBus, Orchestrator};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

/// Helper scripts every fixture provisions into release build directories.
pub const HELPER_SCRIPTS: [&str; 2] = ["install_deb", "move_deb_to_builddir"];

/// Builder for a fleet rooted in a temporary directory.
pub struct FleetBuilder {
    repositories: Vec<String>,
    architectures: Vec<String>,
    workers_per_architecture: usize,
    schedules: Vec<(String, String, String)>,
    release_after_verification: bool,
}

impl FleetBuilder {
    pub fn architectures(mut self, architectures: &[&str]) -> Self {
        self.architectures = architectures.iter().map(|a| a.to_string()).collect();
        self
    }

    pub fn workers(mut self, count: usize) -> Self {
        self.workers_per_architecture = count;
        self
    }

    pub fn schedule(mut self, name: &str, architecture: &str, cron: &str) -> Self {
        self.schedules
            .push((name.to_string(), architecture.to_string(), cron.to_string()));
        self
    }

    pub fn release_after_verification(mut self) -> Self {
        self.release_after_verification = true;
        self
    }

    /// Write the fleet file and load it back.
    pub fn build(self) -> FleetFixture {
        let dir = tempfile::tempdir().expect("Failed to create fleet directory");
        let root = dir.path();

        let scripts = root.join("scripts");
        std::fs::create_dir_all(&scripts).expect("Failed to create scripts directory");
        for script in HELPER_SCRIPTS {
            std::fs::write(scripts.join(script), "#!/bin/sh\nexit 0\n")
                .expect("Failed to write helper script");
        }

        let mut yaml = format!(
            "source_base_url: https://git.example.org/fleet\n\
             workspace_root: {root}/workers\n\
             artifact_store: {root}/store\n\
             publish_dir: {root}\n\
             helper_scripts:\n",
            root = root.display()
        );
        for script in HELPER_SCRIPTS {
            yaml.push_str(&format!("  - {}\n", scripts.join(script).display()));
        }

        yaml.push_str("architectures:\n");
        for arch in &self.architectures {
            let workers: Vec<String> = (1..=self.workers_per_architecture)
                .map(|n| format!("{arch}-{n}"))
                .collect();
            yaml.push_str(&format!("  {arch}: {{ workers: [{}] }}\n", workers.join(", ")));
        }

        yaml.push_str("repositories:\n");
        for repo in &self.repositories {
            yaml.push_str(&format!("  - name: {repo}\n"));
        }

        if !self.schedules.is_empty() {
            yaml.push_str("schedules:\n");
            for (name, arch, cron) in &self.schedules {
                yaml.push_str(&format!(
                    "  - {{ name: {name}, architecture: {arch}, cron: \"{cron}\" }}\n"
                ));
            }
        }
        if self.release_after_verification {
            yaml.push_str("release_after_verification: true\n");
        }

        let path = root.join("fleet.yaml");
        std::fs::write(&path, yaml).expect("Failed to write fleet file");
        let config = FleetConfig::from_file(&path).expect("Fixture fleet is invalid");

        FleetFixture { dir, path, config }
    }
}

/// A loaded fleet plus the directory that backs it.
pub struct FleetFixture {
    dir: TempDir,
    pub path: PathBuf,
    pub config: FleetConfig,
}

impl FleetFixture {
    /// Repositories in cascade order on a single amd64 worker.
    pub fn chain(repositories: &[&str]) -> FleetBuilder {
        FleetBuilder {
            repositories: repositories.iter().map(|r| r.to_string()).collect(),
            architectures: vec!["amd64".to_string()],
            workers_per_architecture: 1,
            schedules: Vec::new(),
            release_after_verification: false,
        }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn store(&self) -> PathBuf {
        self.root().join("store")
    }

    /// Build directory of a builder on a given worker.
    pub fn build_dir(&self, worker: &str, builder: &str) -> PathBuf {
        self.root()
            .join("workers")
            .join(worker)
            .join(builder)
            .join("build")
    }

    /// An orchestrator over this fleet, driving `runner`.
    pub fn orchestrator(
        &self,
        runner: Arc<ScriptedRunner>,
    ) -> (Arc<Orchestrator>, Arc<InMemoryEventBus>) {
        let bus = Arc::new(InMemoryEventBus::new());
        let runner: Arc<dyn CommandRunner> = runner;
        let orchestrator = Arc::new(Orchestrator::new(&self.config, runner, bus.clone()));
        (orchestrator, bus)
    }
}

/// Discovery output in `colcon list -t` format; every package lives in a
/// directory named after it.
pub fn colcon_list(packages: &[&str]) -> String {
    packages
        .iter()
        .map(|name| format!("{name}\t{name}\t(ros.ament_cmake)\n"))
        .collect()
}

/// File name the scripted runner gives a package built on `architecture`.
pub fn deb_name(package: &str, architecture: &str) -> String {
    format!(
        "ros-jazzy-{}_1.0.0-0noble_{}.deb",
        package.replace('_', "-"),
        architecture
    )
}
