//! Entry points and their routing onto builders.

use crate::matrix::BuildMatrix;
use cascade_core::events::{Origin, TriggerType};
use cascade_core::pipeline::PipelineKind;
use cascade_core::repository::Architecture;
use cascade_core::run::BuilderId;
use cascade_core::version::{BranchKind, classify};
use cascade_core::{Error, Result};
use tracing::debug;

/// Something that may start builds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerEvent {
    /// A change landed on a branch of a repository.
    Push { repository: String, branch: String },
    /// An operator forced a builder by name.
    Manual {
        builder: String,
        source_ref: Option<String>,
        full_build: bool,
    },
    /// A named time-of-day schedule fired.
    Scheduled {
        schedule: String,
        architecture: Architecture,
    },
    /// An upstream release addressed a triggerable.
    Cascade {
        triggerable: String,
        full_build: bool,
        origin: Origin,
    },
}

impl TriggerEvent {
    pub fn trigger_type(&self) -> TriggerType {
        match self {
            TriggerEvent::Push { branch, .. } if classify(branch).is_release() => TriggerType::Tag,
            TriggerEvent::Push { .. } => TriggerType::Push,
            TriggerEvent::Manual { .. } => TriggerType::Manual,
            TriggerEvent::Scheduled { .. } => TriggerType::Schedule,
            TriggerEvent::Cascade { .. } => TriggerType::Cascade,
        }
    }
}

/// A request for one builder to run once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildRequest {
    pub builder: BuilderId,
    pub source_ref: String,
    /// Continue the cascade to dependents on success.
    pub full_build: bool,
    pub trigger: TriggerType,
    pub origin: Option<Origin>,
}

/// Maps trigger events to build requests.
#[derive(Debug, Clone)]
pub struct TriggerRouter {
    main_branch: String,
}

impl TriggerRouter {
    pub fn new(main_branch: impl Into<String>) -> Self {
        Self {
            main_branch: main_branch.into(),
        }
    }

    pub fn route(&self, matrix: &BuildMatrix, event: &TriggerEvent) -> Result<Vec<BuildRequest>> {
        let trigger = event.trigger_type();

        let requests = match event {
            TriggerEvent::Push { repository, branch } => {
                let repository = matrix.repository(repository)?;
                let (kind, version, full_build) = match BranchKind::of(branch, &self.main_branch) {
                    BranchKind::Main => (PipelineKind::Verification, None, false),
                    BranchKind::Release(version) => (PipelineKind::Release, Some(version), true),
                    BranchKind::Other => {
                        debug!(repository = %repository.name, branch = %branch, "Branch drives no builds");
                        return Ok(Vec::new());
                    }
                };
                let origin = Origin {
                    repository: repository.name.clone(),
                    source_ref: branch.clone(),
                    version,
                };
                matrix
                    .architectures()
                    .iter()
                    .map(|arch| BuildRequest {
                        builder: BuilderId::new(&repository.name, *arch, kind),
                        source_ref: branch.clone(),
                        full_build,
                        trigger,
                        origin: Some(origin.clone()),
                    })
                    .collect()
            }
            TriggerEvent::Manual {
                builder,
                source_ref,
                full_build,
            } => {
                let spec = matrix.find_by_name(builder)?;
                let source_ref = source_ref.clone().unwrap_or_else(|| self.main_branch.clone());
                vec![BuildRequest {
                    builder: spec.id.clone(),
                    origin: Some(Origin {
                        repository: spec.repository.name.clone(),
                        source_ref: source_ref.clone(),
                        version: classify(&source_ref).version(),
                    }),
                    source_ref,
                    full_build: *full_build,
                    trigger,
                }]
            }
            TriggerEvent::Scheduled { architecture, .. } => {
                let Some(head) = matrix.chain_head() else {
                    return Ok(Vec::new());
                };
                vec![BuildRequest {
                    builder: BuilderId::release(&head.name, *architecture),
                    source_ref: self.main_branch.clone(),
                    full_build: true,
                    trigger,
                    origin: Some(Origin {
                        repository: head.name.clone(),
                        source_ref: self.main_branch.clone(),
                        version: None,
                    }),
                }]
            }
            TriggerEvent::Cascade {
                triggerable,
                full_build,
                origin,
            } => {
                let spec = matrix
                    .find_by_triggerable(triggerable)
                    .ok_or_else(|| Error::BuilderNotFound(triggerable.clone()))?;
                vec![BuildRequest {
                    builder: spec.id.clone(),
                    source_ref: self.main_branch.clone(),
                    full_build: *full_build,
                    trigger,
                    origin: Some(origin.clone()),
                }]
            }
        };

        Ok(requests)
    }

    /// Release requests that follow a successful verification of the same
    /// change. They are not full builds, so they never cascade.
    pub fn releases_following(verified: &[BuildRequest]) -> Vec<BuildRequest> {
        verified
            .iter()
            .map(|request| BuildRequest {
                builder: BuilderId::release(
                    &request.builder.repository,
                    request.builder.architecture,
                ),
                source_ref: request.source_ref.clone(),
                full_build: false,
                trigger: request.trigger,
                origin: request.origin.clone(),
            })
            .collect()
    }
}
