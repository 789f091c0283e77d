//! Produced binary packages and their routing into the shared repository.
//!
//! The packaging toolchain names its output
//! `{package}_{version}{distribution}_{architecture}.{ext}`, with no separator
//! between the version and the distribution code (`1.2.3noble`). The parser
//! takes the first alphabetic run of the middle field as the code.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// A produced package file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildArtifact {
    pub file_name: String,
    pub absolute_path: PathBuf,
}

impl BuildArtifact {
    /// Build from a path; `None` when the path has no UTF-8 file name.
    pub fn from_path(path: impl Into<PathBuf>) -> Option<Self> {
        let absolute_path = path.into();
        let file_name = absolute_path.file_name()?.to_str()?.to_string();
        Some(Self {
            file_name,
            absolute_path,
        })
    }

    pub fn target(&self) -> Result<PublicationTarget> {
        PublicationTarget::parse(&self.file_name)
    }
}

/// Where an artifact lands in the shared package repository.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PublicationTarget {
    pub package_identifier: String,
    pub distribution_code: String,
    pub architecture: String,
}

impl PublicationTarget {
    /// Parse an artifact file name.
    pub fn parse(file_name: &str) -> Result<Self> {
        let unrecognized = || Error::UnrecognizedArtifactName(file_name.to_string());

        let stem = Path::new(file_name)
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(unrecognized)?;

        let fields: Vec<&str> = stem.split('_').collect();
        let [package, version_and_code, architecture] = fields.as_slice() else {
            return Err(unrecognized());
        };

        if !package.contains('-') || architecture.is_empty() {
            return Err(unrecognized());
        }

        let distribution_code = first_alphabetic_run(version_and_code).ok_or_else(unrecognized)?;

        Ok(Self {
            package_identifier: package.to_string(),
            distribution_code: distribution_code.to_string(),
            architecture: architecture.to_string(),
        })
    }

    /// Second hyphen field of the package identifier: the distribution family
    /// the package was built for.
    pub fn distribution_family(&self) -> &str {
        self.package_identifier.split('-').nth(1).unwrap_or_default()
    }
}

fn first_alphabetic_run(s: &str) -> Option<&str> {
    let start = s.find(|c: char| c.is_ascii_alphabetic())?;
    let rest = &s[start..];
    let len = rest
        .find(|c: char| !c.is_ascii_alphabetic())
        .unwrap_or(rest.len());
    Some(&rest[..len])
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_reference_name() {
        let target = PublicationTarget::parse("my-pkg-noble_1.2.3noble_amd64.deb").unwrap();
        assert_eq!(
            target,
            PublicationTarget {
                package_identifier: "my-pkg-noble".to_string(),
                distribution_code: "noble".to_string(),
                architecture: "amd64".to_string(),
            }
        );
        assert_eq!(target.distribution_family(), "pkg");
    }

    #[test]
    fn test_parse_debian_revision() {
        let target =
            PublicationTarget::parse("ros-jazzy-hippo-msgs_0.1.0-0jammy_arm64.deb").unwrap();
        assert_eq!(target.package_identifier, "ros-jazzy-hippo-msgs");
        assert_eq!(target.distribution_code, "jammy");
        assert_eq!(target.architecture, "arm64");
        assert_eq!(target.distribution_family(), "jazzy");
    }

    #[test]
    fn test_parse_rejects_bad_names() {
        for name in [
            "bad.deb",
            "nohyphen_1.0.0noble_amd64.deb",
            "a-b_1.0.0_amd64.deb",
            "a-b_1.0.0noble.deb",
            "a-b_1.0.0noble_amd64_extra.deb",
            "a-b_1.0.0noble_.deb",
        ] {
            assert!(
                matches!(
                    PublicationTarget::parse(name),
                    Err(Error::UnrecognizedArtifactName(n)) if n == name
                ),
                "{name}"
            );
        }
    }

    #[test]
    fn test_artifact_from_path() {
        let artifact = BuildArtifact::from_path("/srv/debs/a-b_1noble_amd64.deb").unwrap();
        assert_eq!(artifact.file_name, "a-b_1noble_amd64.deb");
        assert_eq!(artifact.target().unwrap().distribution_code, "noble");
    }
}
