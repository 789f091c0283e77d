//! Repositories and target architectures.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A source repository in the fleet. Immutable once the orchestrator starts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repository {
    pub name: String,
    pub url: String,
    /// Repositories released after this one, in order.
    #[serde(default)]
    pub dependents: Vec<String>,
}

impl Repository {
    /// Name used in builder identifiers: underscores become hyphens.
    pub fn slug(&self) -> String {
        slugify(&self.name)
    }
}

pub fn slugify(name: &str) -> String {
    name.replace('_', "-")
}

/// Supported CPU architectures, each served by its own worker pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Architecture {
    Amd64,
    Arm64,
}

impl Architecture {
    pub const ALL: [Architecture; 2] = [Architecture::Amd64, Architecture::Arm64];

    pub fn as_str(&self) -> &'static str {
        match self {
            Architecture::Amd64 => "amd64",
            Architecture::Arm64 => "arm64",
        }
    }

    /// Map `uname -m` output to a package architecture.
    pub fn from_uname(machine: &str) -> Result<Self> {
        if machine.contains("x86_64") {
            Ok(Architecture::Amd64)
        } else if machine.contains("aarch64") {
            Ok(Architecture::Arm64)
        } else {
            Err(Error::UnknownArchitecture(machine.trim().to_string()))
        }
    }
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Architecture {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "amd64" => Ok(Architecture::Amd64),
            "arm64" => Ok(Architecture::Arm64),
            other => Err(Error::UnknownArchitecture(other.to_string())),
        }
    }
}
