//! Packages discovered inside a checked-out repository.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// One sub-package of a repository, as reported by the discovery command.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DiscoveredPackage {
    pub name: String,
    /// Path relative to the repository root.
    pub path: String,
}

impl DiscoveredPackage {
    pub fn new(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
        }
    }
}

/// Parse the output of the package listing command.
///
/// Each non-blank line is `name\tpath\t<type>`; the third field is ignored.
/// A line with fewer than three fields fails the whole parse, so callers never
/// see a partial package list.
pub fn parse_discovery_output(stdout: &str) -> Result<Vec<DiscoveredPackage>> {
    let mut packages = Vec::new();

    for (idx, line) in stdout.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }

        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() < 3 || fields[0].is_empty() {
            return Err(Error::MalformedDiscoveryOutput {
                line_number: idx + 1,
                line: line.to_string(),
            });
        }

        packages.push(DiscoveredPackage::new(fields[0], fields[1]));
    }

    Ok(packages)
}

/// Dependency keys to skip when resolving external dependencies: every
/// sibling package of the repository, in discovery order.
pub fn skip_keys(packages: &[DiscoveredPackage]) -> Vec<String> {
    packages.iter().map(|p| p.name.clone()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_preserves_order() {
        let out = "hippo_msgs\tmsgs\t(ros.ament_cmake)\nhippo_common\tcommon\t(ros.ament_python)\n";
        let packages = parse_discovery_output(out).unwrap();
        assert_eq!(
            packages,
            vec![
                DiscoveredPackage::new("hippo_msgs", "msgs"),
                DiscoveredPackage::new("hippo_common", "common"),
            ]
        );
    }

    #[test]
    fn test_parse_tolerates_extra_fields_and_blank_lines() {
        let out = "a\tp/a\tcmake\textra\n\n   \nb\tp/b\tcmake";
        let packages = parse_discovery_output(out).unwrap();
        assert_eq!(packages.len(), 2);
        assert_eq!(packages[1].path, "p/b");
    }

    #[test]
    fn test_parse_rejects_short_line() {
        let out = "a\tp/a\tcmake\nb\tp/b\n";
        let err = parse_discovery_output(out).unwrap_err();
        match err {
            Error::MalformedDiscoveryOutput { line_number, line } => {
                assert_eq!(line_number, 2);
                assert_eq!(line, "b\tp/b");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_parse_empty_output() {
        assert!(parse_discovery_output("").unwrap().is_empty());
    }

    #[test]
    fn test_skip_keys_cover_all_siblings() {
        let packages = vec![
            DiscoveredPackage::new("a", "p/a"),
            DiscoveredPackage::new("b", "p/b"),
        ];
        assert_eq!(skip_keys(&packages), vec!["a", "b"]);
    }
}
