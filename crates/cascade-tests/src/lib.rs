//! End-to-end test infrastructure for Cascade.
//!
//! Runs the real orchestrator against a temporary fleet and a scripted
//! command runner that fakes checkouts, discovery and package builds on disk.
//!
//! # Usage
//!
//! ```ignore
//! use cascade_tests::{FleetFixture, ScriptedRunner};
//!
//! #[tokio::test]
//! async fn test_something() {
//!     let fleet = FleetFixture::chain(&["a", "b"]).build();
//!     let runner = ScriptedRunner::new().with_packages("a", &["a_msgs"]);
//!     let (orchestrator, bus) = fleet.orchestrator(runner);
//! }
//! ```

pub mod fixtures;
pub mod helpers;

pub use fixtures::*;
pub use helpers::*;

/// Initialize test logging (call once per test binary).
pub fn init_test_logging() {
    use tracing_subscriber::{EnvFilter, fmt};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("warn,cascade_scheduler=debug")),
        )
        .with_test_writer()
        .try_init();
}
