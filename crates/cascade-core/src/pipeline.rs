//! Pipelines as data.
//!
//! A run is an ordered list of [`StageGroup`]s, each an ordered list of
//! [`Stage`]s. The shape is computed by a pure expansion function once the
//! repository's packages are known, then handed to an executor. Stages that
//! need the result of an earlier stage say so through [`StageAction`]; the
//! executor passes the concrete [`StageOutput`] forward.

use crate::artifact::{BuildArtifact, PublicationTarget};
use crate::ids::{RunId, StageId};
use crate::interpolation::{CommandLine, CommandTemplate};
use crate::package::DiscoveredPackage;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Which of a repository's two pipelines a builder runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineKind {
    Verification,
    Release,
}

impl fmt::Display for PipelineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineKind::Verification => f.write_str("verification"),
            PipelineKind::Release => f.write_str("release"),
        }
    }
}

/// What a stage is for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StageKind {
    RefreshIndex,
    RefreshDependencies,
    Checkout,
    ProvisionHelpers,
    InstallDependencies { skip_keys: Vec<String> },
    GenerateMetadata,
    Compile,
    InstallLocally,
    RelocateArtifact,
    EnumerateArtifacts,
    TransferArtifacts,
    PublishArtifacts,
    Build,
}

/// How a stage is carried out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum StageAction {
    /// Run an external command; a non-zero exit fails the stage.
    Run { command: CommandLine },
    /// Run an external command and read one artifact path per stdout line,
    /// relative to the stage's working directory.
    Enumerate { command: CommandLine },
    /// Copy helper scripts into the build directory, marked executable.
    Provision { sources: Vec<PathBuf> },
    /// Copy the artifacts listed by the preceding `Enumerate` stage into the
    /// artifact store.
    Transfer { destination: PathBuf },
    /// Route every artifact from the preceding `Transfer` stage and run one
    /// insertion command per artifact under the publication lock.
    Publish { template: CommandTemplate },
}

impl StageAction {
    /// Whether this action reads the output of the stage before it.
    pub fn consumes_previous(&self) -> bool {
        matches!(
            self,
            StageAction::Transfer { .. } | StageAction::Publish { .. }
        )
    }
}

/// A single step of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stage {
    pub id: StageId,
    pub kind: StageKind,
    pub action: StageAction,
    /// Working directory relative to the build directory.
    #[serde(default)]
    pub workdir: Option<String>,
    /// Hold the publication lock while this stage runs.
    #[serde(default)]
    pub exclusive: bool,
    /// Log success at debug level.
    #[serde(default)]
    pub quiet: bool,
}

impl Stage {
    pub fn new(name: impl Into<String>, kind: StageKind, action: StageAction) -> Self {
        Self {
            id: StageId::new(name),
            kind,
            action,
            workdir: None,
            exclusive: false,
            quiet: false,
        }
    }

    pub fn run(name: impl Into<String>, kind: StageKind, command: CommandLine) -> Self {
        Self::new(name, kind, StageAction::Run { command })
    }

    pub fn in_dir(mut self, workdir: impl Into<String>) -> Self {
        self.workdir = Some(workdir.into());
        self
    }

    pub fn exclusive(mut self) -> Self {
        self.exclusive = true;
        self
    }

    pub fn quiet(mut self) -> Self {
        self.quiet = true;
        self
    }

    pub fn name(&self) -> &str {
        self.id.as_str()
    }

    /// The external command this stage runs directly, if any.
    pub fn command(&self) -> Option<&CommandLine> {
        match &self.action {
            StageAction::Run { command } | StageAction::Enumerate { command } => Some(command),
            _ => None,
        }
    }
}

/// Role of a group within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupRole {
    /// Index refresh and checkout, before anything is known about the tree.
    Prelude,
    /// Build steps for one discovered package.
    Package,
    /// Trailing enumerate, transfer and publish group.
    Collection,
    /// The verification build.
    Verification,
}

/// An ordered cluster of stages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageGroup {
    pub name: String,
    pub role: GroupRole,
    #[serde(default)]
    pub package: Option<DiscoveredPackage>,
    pub stages: Vec<Stage>,
}

impl StageGroup {
    pub fn new(name: impl Into<String>, role: GroupRole, stages: Vec<Stage>) -> Self {
        Self {
            name: name.into(),
            role,
            package: None,
            stages,
        }
    }

    pub fn for_package(package: DiscoveredPackage, stages: Vec<Stage>) -> Self {
        Self {
            name: package.name.clone(),
            role: GroupRole::Package,
            package: Some(package),
            stages,
        }
    }

    pub fn stage(&self, kind: &StageKind) -> Option<&Stage> {
        self.stages.iter().find(|s| &s.kind == kind)
    }
}

/// The stage groups of one build, in execution order. Lives only as long as
/// the build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineRun {
    pub id: RunId,
    pub builder: String,
    pub kind: PipelineKind,
    pub groups: Vec<StageGroup>,
}

impl PipelineRun {
    pub fn new(id: RunId, builder: impl Into<String>, kind: PipelineKind) -> Self {
        Self {
            id,
            builder: builder.into(),
            kind,
            groups: Vec::new(),
        }
    }

    pub fn stage_count(&self) -> usize {
        self.groups.iter().map(|g| g.stages.len()).sum()
    }

    pub fn package_groups(&self) -> impl Iterator<Item = &StageGroup> {
        self.groups.iter().filter(|g| g.role == GroupRole::Package)
    }
}

/// Concrete value produced by a stage and handed to the next one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum StageOutput {
    #[default]
    None,
    ArtifactPaths(Vec<PathBuf>),
    Artifacts(Vec<BuildArtifact>),
    Published(Vec<PublicationTarget>),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_builders() {
        let stage = Stage::run(
            "apt-update",
            StageKind::RefreshIndex,
            CommandLine::new("apt-get", &["update"]),
        )
        .exclusive()
        .quiet();

        assert!(stage.exclusive);
        assert!(stage.quiet);
        assert_eq!(stage.name(), "apt-update");
        assert_eq!(stage.command().unwrap().program, "apt-get");
    }

    #[test]
    fn test_consumes_previous() {
        assert!(
            StageAction::Transfer {
                destination: PathBuf::from("/srv")
            }
            .consumes_previous()
        );
        assert!(
            !StageAction::Run {
                command: CommandLine::new("true", &[])
            }
            .consumes_previous()
        );
    }
}
