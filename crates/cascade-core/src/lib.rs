//! Cascade Core
//!
//! Core domain types, traits, and error handling for Cascade.
//! This crate has minimal dependencies and defines the shared vocabulary
//! used across all other crates: branch classification, discovered
//! packages, artifact routing, pipelines-as-data and the builder state
//! machine.

pub mod artifact;
pub mod error;
pub mod events;
pub mod ids;
pub mod interpolation;
pub mod package;
pub mod pipeline;
pub mod ports;
pub mod repository;
pub mod run;
pub mod version;

pub use error::{Error, Result};
pub use ids::*;
