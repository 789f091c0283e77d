//! Package discovery in a checked-out tree.

use crate::executor::log_output;
use cascade_core::interpolation::{CommandTemplate, InterpolationContext};
use cascade_core::package::{DiscoveredPackage, parse_discovery_output};
use cascade_core::{Error, Result};
use cascade_runner::{CommandRunner, Invocation};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

/// Runs the listing command and parses its output.
#[derive(Clone)]
pub struct PackageDiscoverer {
    runner: Arc<dyn CommandRunner>,
    command: CommandTemplate,
}

impl PackageDiscoverer {
    pub fn new(runner: Arc<dyn CommandRunner>, command: CommandTemplate) -> Self {
        Self { runner, command }
    }

    /// List the packages under `workdir`, in the order the listing reports.
    ///
    /// Fails with `DiscoveryFailed` when the command cannot be started or exits
    /// non-zero, and with `MalformedDiscoveryOutput` on any short line.
    pub async fn discover(
        &self,
        workdir: &Path,
        ctx: &InterpolationContext,
    ) -> Result<Vec<DiscoveredPackage>> {
        let invocation = Invocation::new("discover", self.command.render(ctx), workdir);
        debug!(command = %invocation.command, dir = %workdir.display(), "Discovering packages");

        let outcome = match self.runner.execute(&invocation, log_output("discover")).await {
            Ok(outcome) => outcome,
            Err(Error::CommandSpawn { message, .. }) => {
                return Err(Error::DiscoveryFailed {
                    exit_code: None,
                    stderr: message,
                });
            }
            Err(e) => return Err(e),
        };

        if !outcome.success {
            warn!(exit_code = outcome.exit_code, "Package discovery failed");
            return Err(Error::DiscoveryFailed {
                exit_code: Some(outcome.exit_code),
                stderr: outcome.stderr,
            });
        }

        let packages = parse_discovery_output(&outcome.stdout)?;
        debug!(count = packages.len(), "Packages discovered");
        Ok(packages)
    }
}
