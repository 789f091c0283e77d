//! CLI command definitions.

use clap::Subcommand;
use std::path::PathBuf;

#[derive(Subcommand)]
pub enum Commands {
    /// Validate the fleet configuration and print the build matrix
    Validate,

    /// List builders, their workers and triggerables
    Builders,

    /// Classify a branch name
    Classify {
        /// Branch or tag name
        branch: String,
    },

    /// Parse an artifact file name into its publication target
    Artifact {
        /// Artifact file name, e.g. ros-jazzy-foo_1.0.0-0noble_amd64.deb
        file_name: String,
    },

    /// Discover the packages of a checked-out repository
    Discover {
        /// Repository checkout
        #[arg(default_value = ".")]
        dir: PathBuf,
    },

    /// Discover packages and print the release pipeline without running it
    Plan {
        /// Repository checkout
        #[arg(default_value = ".")]
        dir: PathBuf,

        /// Repository name (defaults to the directory name)
        #[arg(short, long)]
        repository: Option<String>,

        /// Source ref to build
        #[arg(long = "ref")]
        source_ref: Option<String>,

        /// Target architecture
        #[arg(short, long, default_value = "amd64")]
        arch: String,
    },

    /// Report a change on a branch and run every resulting build
    Push {
        /// Repository name
        repository: String,

        /// Branch or tag the change landed on
        branch: String,
    },

    /// Force a builder to run
    Force {
        /// Builder name, e.g. hippo-common-deb-amd64
        builder: String,

        /// Source ref to build
        #[arg(long = "ref")]
        source_ref: Option<String>,

        /// Cascade to dependent repositories on success
        #[arg(long)]
        full_build: bool,
    },

    /// Run the configured schedules until interrupted
    Serve,

    /// Print the host architecture
    DetectArch,
}
