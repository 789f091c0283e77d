//! Builders, their state machine, and run status.

use crate::pipeline::PipelineKind;
use crate::repository::{Architecture, slugify};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One (repository × architecture × pipeline kind) unit of work.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BuilderId {
    pub repository: String,
    pub architecture: Architecture,
    pub kind: PipelineKind,
}

impl BuilderId {
    pub fn new(repository: impl Into<String>, architecture: Architecture, kind: PipelineKind) -> Self {
        Self {
            repository: repository.into(),
            architecture,
            kind,
        }
    }

    pub fn release(repository: impl Into<String>, architecture: Architecture) -> Self {
        Self::new(repository, architecture, PipelineKind::Release)
    }

    pub fn verification(repository: impl Into<String>, architecture: Architecture) -> Self {
        Self::new(repository, architecture, PipelineKind::Verification)
    }

    /// `{repo}-deb-{arch}` for release builders, `{repo}-colcon-{arch}` for
    /// verification builders.
    pub fn name(&self) -> String {
        let flavour = match self.kind {
            PipelineKind::Release => "deb",
            PipelineKind::Verification => "colcon",
        };
        format!(
            "{}-{}-{}",
            slugify(&self.repository),
            flavour,
            self.architecture
        )
    }

    /// Endpoint other repositories' cascades address: `{repo}-triggerable-{arch}`.
    pub fn triggerable_name(&self) -> String {
        format!(
            "{}-triggerable-{}",
            slugify(&self.repository),
            self.architecture
        )
    }
}

impl fmt::Display for BuilderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Queued,
    Running,
    Success,
    Failure,
    Cancelled,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Success | RunStatus::Failure | RunStatus::Cancelled
        )
    }

    pub fn is_success(&self) -> bool {
        matches!(self, RunStatus::Success)
    }
}

/// Lifecycle of a builder. Verification builders move between `Idle`,
/// `Verifying` and `VerifyDone`; release builders between `Idle`,
/// `Releasing`, `ReleaseDone` and `ReleaseFailed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuilderState {
    #[default]
    Idle,
    Verifying,
    VerifyDone,
    Releasing,
    ReleaseDone,
    ReleaseFailed,
}

/// Inputs to the builder state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuilderEvent {
    Started,
    Succeeded,
    Failed,
}

impl BuilderState {
    pub fn is_busy(&self) -> bool {
        matches!(self, BuilderState::Verifying | BuilderState::Releasing)
    }

    /// Apply an event for a builder of the given kind.
    pub fn apply(self, kind: PipelineKind, event: BuilderEvent) -> Result<Self> {
        use BuilderEvent::*;
        use BuilderState::*;

        let next = match (kind, self, event) {
            (PipelineKind::Verification, Idle | VerifyDone, Started) => Verifying,
            (PipelineKind::Verification, Verifying, Succeeded | Failed) => VerifyDone,
            (PipelineKind::Release, Idle | ReleaseDone | ReleaseFailed, Started) => Releasing,
            (PipelineKind::Release, Releasing, Succeeded) => ReleaseDone,
            (PipelineKind::Release, Releasing, Failed) => ReleaseFailed,
            _ => {
                return Err(Error::InvalidTransition {
                    from: format!("{self:?}"),
                    event: format!("{kind}/{event:?}"),
                });
            }
        };
        Ok(next)
    }
}
