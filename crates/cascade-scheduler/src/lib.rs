//! Build orchestration for Cascade.
//!
//! Turns trigger events into builder runs: discovers a repository's packages,
//! expands the release pipeline from them, executes it, publishes the results
//! under the publication gate and cascades successful releases down the
//! repository chain.

pub mod bus;
pub mod config;
pub mod discovery;
pub mod executor;
pub mod expander;
pub mod gate;
pub mod matrix;
pub mod pool;
pub mod schedule;
pub mod scheduler;
pub mod triggers;

pub use bus::InMemoryEventBus;
pub use config::FleetConfig;
pub use executor::{PipelineExecutor, RunContext, RunProgress};
pub use expander::PipelineExpander;
pub use gate::PublicationGate;
pub use matrix::BuildMatrix;
pub use scheduler::{Orchestrator, RunSummary};
pub use triggers::{BuildRequest, TriggerEvent, TriggerRouter};
