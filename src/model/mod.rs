// src/model/mod.rs

//! Records shared between the orchestrator and its collaborators.
//!
//! - [`run`] holds the immutable [`TestRun`] record.
//! - [`edge`] holds the dependency-graph edge and its metadata.

pub mod edge;
pub mod run;

pub use edge::{DependencyEdge, EdgeMetadata, VersionConstraint};
pub use run::{NOT_EXECUTED, TestRun, UNKNOWN, format_test_run};
