//! Branch and release-tag classification.
//!
//! Routing between the verification and release pipelines hinges on one
//! question: is this branch name a release tag of the form
//! `major.minor.patch`? [`classify`] answers it for any string without ever
//! failing. [`ReleaseVersion::from_str`] is the strict counterpart for values
//! already known to be release tags.

use crate::{Error, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

static RELEASE_TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([0-9]+)\.([0-9]+)\.([0-9]+)$").expect("release tag pattern is valid")
});

/// Numeric components of a release tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ReleaseVersion {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
}

impl ReleaseVersion {
    pub fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    fn from_match(input: &str) -> Option<Self> {
        let caps = RELEASE_TAG.captures(input)?;
        // Components that overflow u64 are not release tags.
        Some(Self {
            major: caps[1].parse().ok()?,
            minor: caps[2].parse().ok()?,
            patch: caps[3].parse().ok()?,
        })
    }
}

impl fmt::Display for ReleaseVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl FromStr for ReleaseVersion {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_match(s).ok_or_else(|| Error::InvalidVersionFormat(s.to_string()))
    }
}

/// Outcome of classifying a branch name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Release(ReleaseVersion),
    NotARelease,
}

impl Classification {
    pub fn is_release(&self) -> bool {
        matches!(self, Classification::Release(_))
    }

    pub fn version(&self) -> Option<ReleaseVersion> {
        match self {
            Classification::Release(v) => Some(*v),
            Classification::NotARelease => None,
        }
    }
}

/// Classify a branch name. Total: any string that is not exactly
/// `N.N.N` is simply not a release.
pub fn classify(branch: &str) -> Classification {
    match ReleaseVersion::from_match(branch) {
        Some(version) => Classification::Release(version),
        None => Classification::NotARelease,
    }
}

/// Which pipeline a branch drives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BranchKind {
    /// The configured main branch; drives verification builds.
    Main,
    /// A release tag; drives release builds.
    Release(ReleaseVersion),
    /// Anything else; drives nothing.
    Other,
}

impl BranchKind {
    pub fn of(branch: &str, main_branch: &str) -> Self {
        if branch == main_branch {
            return BranchKind::Main;
        }
        match classify(branch) {
            Classification::Release(version) => BranchKind::Release(version),
            Classification::NotARelease => BranchKind::Other,
        }
    }
}
