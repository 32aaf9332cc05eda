// src/engine/mod.rs

//! Test orchestration engine.
//!
//! This module ties together:
//! - the per-run lifecycle state machine ([`state`])
//! - the pure result builder that classifies outcomes into records
//!   ([`result`])
//! - the batch aggregate returned to callers ([`batch`])
//! - the concurrent orchestrator that provisions, runs and records every
//!   dependent of an upstream release ([`orchestrator`])

use std::time::Duration;

pub mod batch;
pub mod orchestrator;
pub mod result;
pub mod state;

pub use batch::{BatchEntry, BatchResult, BatchSummary};
pub use orchestrator::Orchestrator;
pub use result::{RunOutcome, RunSpec, TIMEOUT_EXIT_CODE};
pub use state::{RunPhase, RunTracker};

/// Default number of dependents tested at the same time.
pub const DEFAULT_CONCURRENCY: usize = 3;

/// Default wall-clock budget for a single run.
pub const DEFAULT_RUN_TIMEOUT: Duration = Duration::from_secs(600);

/// Command used for dependents that did not register one.
pub const DEFAULT_TEST_COMMAND: &str = "pytest";

/// Knobs for the orchestrator, passed in explicitly at construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestratorOptions {
    /// Maximum number of runs in flight at once (values below 1 act as 1).
    pub concurrency: usize,
    /// Budget applied separately to provisioning and to the test command
    /// of each run. Does not bound the batch as a whole.
    pub run_timeout: Duration,
    pub default_test_command: String,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            run_timeout: DEFAULT_RUN_TIMEOUT,
            default_test_command: DEFAULT_TEST_COMMAND.to_string(),
        }
    }
}
