//! Error types for Cascade.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    // Classification errors
    #[error("Invalid version format: {0:?}")]
    InvalidVersionFormat(String),

    // Discovery errors
    #[error("Package discovery failed with exit code {exit_code:?}: {stderr}")]
    DiscoveryFailed {
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("Malformed discovery output at line {line_number}: {line:?}")]
    MalformedDiscoveryOutput { line_number: usize, line: String },

    // Publication errors
    #[error("Unrecognized artifact name: {0:?}")]
    UnrecognizedArtifactName(String),

    #[error("Unknown host architecture: {0:?}")]
    UnknownArchitecture(String),

    // Stage errors
    #[error("Stage {stage} failed with exit code {exit_code}")]
    StageFailed { stage: String, exit_code: i32 },

    #[error("Run cancelled during stage {stage}")]
    Cancelled { stage: String },

    // Orchestration errors
    #[error("Repository not found: {0}")]
    RepositoryNotFound(String),

    #[error("Builder not found: {0}")]
    BuilderNotFound(String),

    #[error("Invalid builder transition from {from} on {event}")]
    InvalidTransition { from: String, event: String },

    // Infrastructure errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to spawn {program}: {message}")]
    CommandSpawn { program: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Event bus error: {0}")]
    EventBus(String),

    // Generic
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether this error aborted a run because an external command misbehaved,
    /// as opposed to an orchestrator-side inconsistency.
    pub fn is_stage_failure(&self) -> bool {
        matches!(
            self,
            Error::StageFailed { .. } | Error::DiscoveryFailed { .. } | Error::CommandSpawn { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}
