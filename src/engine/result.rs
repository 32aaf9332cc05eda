// src/engine/result.rs

//! Turns provisioning / execution outcomes into immutable [`TestRun`]s.
//!
//! Pure apart from reading the clock for `finished_at`.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::exec::{ProcessOutcome, ProvisionError};
use crate::model::{NOT_EXECUTED, TestRun, UNKNOWN};
use crate::types::TestStatus;

/// Exit code recorded for a test command killed by its timeout.
pub const TIMEOUT_EXIT_CODE: i32 = 124;

/// Identity and inputs of one run, fixed before the run starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSpec {
    pub test_id: String,
    pub upstream: String,
    pub upstream_version: String,
    pub downstream: String,
    pub test_command: String,
}

impl RunSpec {
    /// A new spec with a freshly generated run id.
    pub fn new(
        upstream: impl Into<String>,
        upstream_version: impl Into<String>,
        downstream: impl Into<String>,
        test_command: impl Into<String>,
    ) -> Self {
        Self {
            test_id: Uuid::new_v4().to_string(),
            upstream: upstream.into(),
            upstream_version: upstream_version.into(),
            downstream: downstream.into(),
            test_command: test_command.into(),
        }
    }
}

/// How a run ended.
#[derive(Debug, Clone)]
pub enum RunOutcome {
    /// The sandbox never became ready; the test command did not run.
    ProvisionFailed(ProvisionError),
    /// The test command ran (possibly until it was killed by `timeout`).
    Executed {
        process: ProcessOutcome,
        timeout: Duration,
        downstream_version: String,
        environment: BTreeMap<String, String>,
    },
    /// Anything else that stopped the command from running: spawn failure,
    /// a panicking run task, an unreachable ledger.
    Fault(String),
}

/// Build the final record for `spec`.
pub fn build(spec: &RunSpec, started_at: DateTime<Utc>, outcome: RunOutcome) -> TestRun {
    let (status, exit_code, output, downstream_version, environment) = match outcome {
        RunOutcome::ProvisionFailed(err) => (
            TestStatus::Error,
            NOT_EXECUTED,
            err.to_string(),
            UNKNOWN.to_string(),
            BTreeMap::new(),
        ),
        RunOutcome::Executed {
            process,
            timeout,
            downstream_version,
            environment,
        } => {
            if process.timed_out {
                let output = format!(
                    "{}\n{}",
                    timeout_marker(timeout),
                    process.combined_output()
                );
                (
                    TestStatus::Fail,
                    TIMEOUT_EXIT_CODE,
                    output,
                    downstream_version,
                    environment,
                )
            } else {
                (
                    TestStatus::from_exit_code(process.exit_code),
                    process.exit_code,
                    process.combined_output(),
                    downstream_version,
                    environment,
                )
            }
        }
        RunOutcome::Fault(message) => (
            TestStatus::Error,
            NOT_EXECUTED,
            message,
            UNKNOWN.to_string(),
            BTreeMap::new(),
        ),
    };

    TestRun {
        test_id: spec.test_id.clone(),
        upstream_package: spec.upstream.clone(),
        upstream_version: spec.upstream_version.clone(),
        downstream_package: spec.downstream.clone(),
        downstream_version,
        test_command: spec.test_command.clone(),
        commit_hash: UNKNOWN.to_string(),
        status,
        started_at,
        finished_at: Utc::now().max(started_at),
        output,
        exit_code,
        environment,
    }
}

/// First line of the output of a run killed by its timeout.
pub fn timeout_marker(timeout: Duration) -> String {
    format!("[wary] test command timed out after {}s", timeout.as_secs())
}
