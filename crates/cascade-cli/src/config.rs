//! Fleet file lookup.

use anyhow::{Context, Result};
use cascade_scheduler::FleetConfig;
use std::path::{Path, PathBuf};

/// Environment variable naming the fleet file.
pub const CONFIG_ENV: &str = "CASCADE_CONFIG";

const FLEET_FILE: &str = "fleet.yaml";

/// Pick the fleet file: an explicit path wins, then the environment, then
/// the per-user config directory.
fn resolve(
    explicit: Option<&Path>,
    from_env: Option<PathBuf>,
    config_dir: Option<PathBuf>,
) -> Option<PathBuf> {
    explicit
        .map(Path::to_path_buf)
        .or(from_env)
        .or_else(|| config_dir.map(|dir| dir.join(FLEET_FILE)))
}

fn user_config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("org", "cascade", "cascade")
        .map(|dirs| dirs.config_dir().to_path_buf())
}

/// Path of the fleet file in effect.
pub fn fleet_path(explicit: Option<&Path>) -> Result<PathBuf> {
    let from_env = std::env::var_os(CONFIG_ENV)
        .filter(|value| !value.is_empty())
        .map(PathBuf::from);
    resolve(explicit, from_env, user_config_dir())
        .context("Could not determine config directory; pass --config")
}

/// Load and validate the fleet file.
pub fn load_fleet(explicit: Option<&Path>) -> Result<(PathBuf, FleetConfig)> {
    let path = fleet_path(explicit)?;
    let fleet = FleetConfig::from_file(&path)
        .with_context(|| format!("Failed to load fleet file {}", path.display()))?;
    Ok((path, fleet))
}

/// Load the fleet file when one exists. Commands that only need the command
/// set fall back to the built-in defaults.
pub fn load_fleet_if_present(explicit: Option<&Path>) -> Result<Option<FleetConfig>> {
    if explicit.is_some() {
        return load_fleet(explicit).map(|(_, fleet)| Some(fleet));
    }
    match fleet_path(None) {
        Ok(path) if path.exists() => load_fleet(Some(&path)).map(|(_, fleet)| Some(fleet)),
        _ => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_path_wins() {
        let resolved = resolve(
            Some(Path::new("/etc/cascade/fleet.yaml")),
            Some(PathBuf::from("/from/env.yaml")),
            Some(PathBuf::from("/home/ci/.config/cascade")),
        );
        assert_eq!(resolved, Some(PathBuf::from("/etc/cascade/fleet.yaml")));
    }

    #[test]
    fn test_env_before_config_dir() {
        let resolved = resolve(
            None,
            Some(PathBuf::from("/from/env.yaml")),
            Some(PathBuf::from("/home/ci/.config/cascade")),
        );
        assert_eq!(resolved, Some(PathBuf::from("/from/env.yaml")));
    }

    #[test]
    fn test_config_dir_fallback() {
        let resolved = resolve(None, None, Some(PathBuf::from("/home/ci/.config/cascade")));
        assert_eq!(
            resolved,
            Some(PathBuf::from("/home/ci/.config/cascade/fleet.yaml"))
        );
        assert_eq!(resolve(None, None, None), None);
    }

    #[test]
    fn test_load_fleet_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fleet.yaml");
        std::fs::write(&path, "repositories: []\narchitectures: {}\n").unwrap();

        let err = load_fleet(Some(&path)).unwrap_err();
        let message = format!("{:#}", err);
        assert!(message.contains("Failed to load fleet file"));
        assert!(message.contains("no repositories configured"));
    }

    #[test]
    fn test_load_fleet_valid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fleet.yaml");
        std::fs::write(
            &path,
            "repositories:\n  - name: hippo-common\narchitectures:\n  amd64:\n    workers: [w1]\n",
        )
        .unwrap();

        let (loaded, fleet) = load_fleet(Some(&path)).unwrap();
        assert_eq!(loaded, path);
        assert_eq!(fleet.repositories.len(), 1);
    }
}
