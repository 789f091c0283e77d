//! Events emitted by the orchestrator.

use crate::artifact::PublicationTarget;
use crate::ids::*;
use crate::package::DiscoveredPackage;
use crate::run::{BuilderEvent, BuilderId, BuilderState, RunStatus};
use crate::version::ReleaseVersion;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which entry point started a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    /// A change on the main branch.
    Push,
    /// A branch matching the release pattern.
    Tag,
    /// An operator forcing a builder.
    Manual,
    /// A time-of-day schedule.
    Schedule,
    /// An upstream repository's successful release.
    Cascade,
}

/// The change or release a run ultimately descends from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Origin {
    pub repository: String,
    pub source_ref: String,
    #[serde(default)]
    pub version: Option<ReleaseVersion>,
}

/// All events in the Cascade system.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    RunQueued(RunQueuedPayload),
    RunStarted(RunStartedPayload),
    RunCompleted(RunCompletedPayload),
    StageStarted(StageStartedPayload),
    StageCompleted(StageCompletedPayload),
    PackagesDiscovered(PackagesDiscoveredPayload),
    ArtifactPublished(ArtifactPublishedPayload),
    TriggerEmitted(TriggerEmittedPayload),
    BuilderStateChanged(BuilderStateChangedPayload),
}

impl Event {
    /// Dotted subject for routing and filtering.
    pub fn subject(&self) -> String {
        match self {
            Event::RunQueued(p) => format!("run.queued.{}", p.builder.name()),
            Event::RunStarted(p) => format!("run.started.{}.{}", p.builder.name(), p.run_id),
            Event::RunCompleted(p) => format!("run.completed.{}.{}", p.builder.name(), p.run_id),
            Event::StageStarted(p) => format!("run.{}.stage.{}.started", p.run_id, p.stage_name),
            Event::StageCompleted(p) => {
                format!("run.{}.stage.{}.completed", p.run_id, p.stage_name)
            }
            Event::PackagesDiscovered(p) => format!("run.{}.packages", p.run_id),
            Event::ArtifactPublished(p) => {
                format!("publish.{}.{}", p.target.architecture, p.target.package_identifier)
            }
            Event::TriggerEmitted(p) => format!("trigger.{}", p.target.triggerable_name()),
            Event::BuilderStateChanged(p) => format!("builder.{}.state", p.builder.name()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunQueuedPayload {
    pub run_id: RunId,
    pub builder: BuilderId,
    pub trigger: TriggerType,
    pub source_ref: String,
    pub full_build: bool,
    pub origin: Option<Origin>,
    pub queued_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunStartedPayload {
    pub run_id: RunId,
    pub builder: BuilderId,
    pub worker: String,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunCompletedPayload {
    pub run_id: RunId,
    pub builder: BuilderId,
    pub status: RunStatus,
    pub duration_ms: u64,
    pub stages_passed: u32,
    pub error: Option<String>,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageStartedPayload {
    pub run_id: RunId,
    pub group: String,
    pub stage_name: String,
    pub stage_index: u32,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageCompletedPayload {
    pub run_id: RunId,
    pub group: String,
    pub stage_name: String,
    pub stage_index: u32,
    pub success: bool,
    pub exit_code: Option<i32>,
    pub duration_ms: u64,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackagesDiscoveredPayload {
    pub run_id: RunId,
    pub builder: BuilderId,
    pub packages: Vec<DiscoveredPackage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactPublishedPayload {
    pub run_id: RunId,
    pub file_name: String,
    pub target: PublicationTarget,
    pub published_at: DateTime<Utc>,
}

/// A request for another builder to run, emitted when a release with
/// downstream dependents succeeds as part of a full build.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerEmittedPayload {
    pub trigger_id: TriggerId,
    pub source_run: RunId,
    pub source: BuilderId,
    pub target: BuilderId,
    pub full_build: bool,
    pub origin: Origin,
    pub emitted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuilderStateChangedPayload {
    pub builder: BuilderId,
    pub run_id: RunId,
    pub event: BuilderEvent,
    pub from: BuilderState,
    pub to: BuilderState,
}
