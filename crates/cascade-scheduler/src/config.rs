//! Fleet configuration.
//!
//! Loaded once at start-up from YAML and never mutated afterwards.

use cascade_core::interpolation::{CommandTemplate, vars};
use cascade_core::repository::{Architecture, Repository, slugify};
use cascade_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Top-level fleet configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FleetConfig {
    /// Base URL repositories are cloned from: `{base}/{name}.git`.
    #[serde(default = "default_source_base_url")]
    pub source_base_url: String,
    /// Branch whose changes drive verification builds.
    #[serde(default = "default_main_branch")]
    pub main_branch: String,
    /// Root of per-worker build directories.
    #[serde(default = "default_workspace_root")]
    pub workspace_root: PathBuf,
    /// Where produced packages are collected before publication.
    #[serde(default = "default_artifact_store")]
    pub artifact_store: PathBuf,
    /// Directory publication commands run in.
    #[serde(default = "default_publish_dir")]
    pub publish_dir: PathBuf,
    /// Name of the single lock guarding the shared package repository.
    #[serde(default = "default_publication_lock")]
    pub publication_lock: String,
    /// Scripts copied into every release build directory before packaging.
    #[serde(default = "default_helper_scripts")]
    pub helper_scripts: Vec<PathBuf>,
    pub architectures: BTreeMap<Architecture, ArchitectureConfig>,
    /// Configuration order is cascade order.
    pub repositories: Vec<RepositoryConfig>,
    #[serde(default)]
    pub schedules: Vec<ScheduleConfig>,
    /// Start a repository's release builders once every verification run of
    /// a main-branch change has succeeded.
    #[serde(default)]
    pub release_after_verification: bool,
    #[serde(default)]
    pub commands: CommandSet,
}

fn default_source_base_url() -> String {
    "https://github.com/HippoCampusRobotics".to_string()
}

fn default_main_branch() -> String {
    "main".to_string()
}

fn default_workspace_root() -> PathBuf {
    PathBuf::from("/var/lib/cascade/workers")
}

/// Artifact store used when the fleet file names none.
pub const DEFAULT_ARTIFACT_STORE: &str = "/var/lib/cascade/binarydebs";

fn default_artifact_store() -> PathBuf {
    PathBuf::from(DEFAULT_ARTIFACT_STORE)
}

fn default_publish_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_publication_lock() -> String {
    "reprepro".to_string()
}

fn default_helper_scripts() -> Vec<PathBuf> {
    vec![
        PathBuf::from("scripts/install_deb"),
        PathBuf::from("scripts/move_deb_to_builddir"),
    ]
}

/// Worker pool of one architecture.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchitectureConfig {
    pub workers: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryConfig {
    pub name: String,
    /// Overrides `{source_base_url}/{name}.git`.
    #[serde(default)]
    pub url: Option<String>,
}

/// A time-of-day full build for one architecture.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    pub name: String,
    pub architecture: Architecture,
    /// Six-field cron expression (`sec min hour day month weekday`).
    pub cron: String,
}

/// Templates for every external command the orchestrator issues.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandSet {
    pub refresh_index: CommandTemplate,
    pub refresh_dependencies: CommandTemplate,
    pub checkout: CommandTemplate,
    pub discover: CommandTemplate,
    pub install_dependencies: CommandTemplate,
    pub generate_metadata: CommandTemplate,
    pub compile: CommandTemplate,
    /// Installs a freshly built package on the worker so later siblings can
    /// build against it. Disabled when absent.
    pub install_locally: Option<CommandTemplate>,
    pub relocate_artifact: CommandTemplate,
    pub enumerate_artifacts: CommandTemplate,
    pub publish: CommandTemplate,
    pub verify_install_dependencies: CommandTemplate,
    pub verify_build: CommandTemplate,
}

impl Default for CommandSet {
    fn default() -> Self {
        Self {
            refresh_index: CommandTemplate::new("sudo", &["apt-get", "update"]),
            refresh_dependencies: CommandTemplate::new("rosdep", &["update"]),
            checkout: CommandTemplate::new(
                "git",
                &[
                    "clone",
                    "--recurse-submodules",
                    "--branch",
                    "${{ source.ref }}",
                    "${{ repository.url }}",
                    ".",
                ],
            ),
            discover: CommandTemplate::new("colcon", &["list", "-t"]),
            install_dependencies: CommandTemplate::new(
                "rosdep",
                &[
                    "install",
                    "--from-paths",
                    ".",
                    "-y",
                    "--skip-keys=${{ package.skip_keys }}",
                ],
            ),
            generate_metadata: CommandTemplate::new("bloom-generate", &["rosdebian"]),
            compile: CommandTemplate::new("fakeroot", &["debian/rules", "binary"]),
            install_locally: Some(CommandTemplate::new(
                "./install_deb",
                &["${{ package.name }}", "${{ package.path }}"],
            )),
            relocate_artifact: CommandTemplate::new(
                "./move_deb_to_builddir",
                &["${{ package.name }}", "${{ package.path }}"],
            ),
            enumerate_artifacts: CommandTemplate::new("find", &[".", "-name", "*.deb"]),
            publish: CommandTemplate::new(
                "./scripts/reprepro-includedeb",
                &[
                    "${{ artifact.package }}",
                    "${{ artifact.path }}",
                    "${{ artifact.distribution }}",
                    "${{ artifact.architecture }}",
                ],
            ),
            verify_install_dependencies: CommandTemplate::new(
                "rosdep",
                &["install", "--from-paths", ".", "-y"],
            ),
            verify_build: CommandTemplate::new(
                "sh",
                &[
                    "-c",
                    ". /opt/ros/$(ls /opt/ros | head -n 1)/setup.sh \
                     && colcon build --symlink-install --cmake-args --no-warn-unused-cli",
                ],
            ),
        }
    }
}

const RUN_KEYS: &[&str] = &[
    vars::REPOSITORY_NAME,
    vars::REPOSITORY_URL,
    vars::SOURCE_REF,
    vars::ARCHITECTURE,
];

const PACKAGE_KEYS: &[&str] = &[
    vars::PACKAGE_NAME,
    vars::PACKAGE_PATH,
    vars::PACKAGE_SKIP_KEYS,
];

const ARTIFACT_KEYS: &[&str] = &[
    vars::ARTIFACT_PACKAGE,
    vars::ARTIFACT_PATH,
    vars::ARTIFACT_FILE_NAME,
    vars::ARTIFACT_DISTRIBUTION,
    vars::ARTIFACT_ARCHITECTURE,
];

impl CommandSet {
    fn validate(&self) -> Result<()> {
        let run_scoped = [
            ("refresh_index", &self.refresh_index),
            ("refresh_dependencies", &self.refresh_dependencies),
            ("checkout", &self.checkout),
            ("discover", &self.discover),
            ("enumerate_artifacts", &self.enumerate_artifacts),
            ("verify_install_dependencies", &self.verify_install_dependencies),
            ("verify_build", &self.verify_build),
        ];
        for (name, template) in run_scoped {
            check_placeholders(name, template, &[RUN_KEYS])?;
        }

        let package_scoped = [
            ("install_dependencies", Some(&self.install_dependencies)),
            ("generate_metadata", Some(&self.generate_metadata)),
            ("compile", Some(&self.compile)),
            ("install_locally", self.install_locally.as_ref()),
            ("relocate_artifact", Some(&self.relocate_artifact)),
        ];
        for (name, template) in package_scoped {
            if let Some(template) = template {
                check_placeholders(name, template, &[RUN_KEYS, PACKAGE_KEYS])?;
            }
        }

        check_placeholders("publish", &self.publish, &[RUN_KEYS, ARTIFACT_KEYS])
    }
}

fn check_placeholders(name: &str, template: &CommandTemplate, allowed: &[&[&str]]) -> Result<()> {
    for key in template.placeholders() {
        if !allowed.iter().any(|keys| keys.contains(&key.as_str())) {
            return Err(Error::Config(format!(
                "command {name} references unknown placeholder {key:?}"
            )));
        }
    }
    Ok(())
}

impl FleetConfig {
    /// Load and validate configuration from a YAML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {}", path.display(), e)))?;
        Self::from_yaml(&contents)
    }

    /// Parse and validate configuration from YAML text.
    pub fn from_yaml(contents: &str) -> Result<Self> {
        let config: FleetConfig =
            serde_yaml::from_str(contents).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.repositories.is_empty() {
            return Err(Error::Config("no repositories configured".to_string()));
        }
        if self.architectures.is_empty() {
            return Err(Error::Config("no architectures configured".to_string()));
        }

        // Builders and triggerables are addressed by slug, so `a_b` and `a-b`
        // would share them.
        let mut slugs: HashMap<String, &str> = HashMap::new();
        for repo in &self.repositories {
            if let Some(previous) = slugs.insert(slugify(&repo.name), &repo.name) {
                return Err(Error::Config(if previous == repo.name {
                    format!("repository {} configured twice", repo.name)
                } else {
                    format!(
                        "repositories {} and {} map to the same builder names",
                        previous, repo.name
                    )
                }));
            }
        }

        for (arch, pool) in &self.architectures {
            if pool.workers.is_empty() {
                return Err(Error::Config(format!("architecture {arch} has no workers")));
            }
        }

        for schedule in &self.schedules {
            if !self.architectures.contains_key(&schedule.architecture) {
                return Err(Error::Config(format!(
                    "schedule {} targets unconfigured architecture {}",
                    schedule.name, schedule.architecture
                )));
            }
            cron::Schedule::from_str(&schedule.cron).map_err(|e| {
                Error::Config(format!("schedule {} has invalid cron: {}", schedule.name, e))
            })?;
        }

        self.commands.validate()
    }

    /// Repositories in cascade order. Each repository's only dependent is the
    /// next one in configuration order; fan-out is not expressible.
    pub fn repositories(&self) -> Vec<Repository> {
        self.repositories
            .iter()
            .enumerate()
            .map(|(idx, repo)| Repository {
                name: repo.name.clone(),
                url: repo.url.clone().unwrap_or_else(|| {
                    format!(
                        "{}/{}.git",
                        self.source_base_url.trim_end_matches('/'),
                        repo.name
                    )
                }),
                dependents: self
                    .repositories
                    .get(idx + 1)
                    .map(|next| vec![next.name.clone()])
                    .unwrap_or_default(),
            })
            .collect()
    }

    pub fn architectures(&self) -> Vec<Architecture> {
        self.architectures.keys().copied().collect()
    }
}
