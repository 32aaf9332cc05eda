// src/model/run.rs

//! The persisted record of one test run.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::TestStatus;

/// Placeholder for values that could not be resolved (downstream version,
/// commit hash).
pub const UNKNOWN: &str = "unknown";

/// Exit code reserved for "the test command never executed".
pub const NOT_EXECUTED: i32 = -1;

/// Immutable record of a single test run.
///
/// Values are only produced by [`crate::engine::result::build`] (or read back
/// from the ledger); nothing in the crate mutates a `TestRun` after
/// construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestRun {
    pub test_id: String,
    pub upstream_package: String,
    pub upstream_version: String,
    pub downstream_package: String,
    pub downstream_version: String,
    pub test_command: String,
    pub commit_hash: String,
    pub status: TestStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub output: String,
    pub exit_code: i32,
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
}

impl TestRun {
    /// Wall-clock duration of the run.
    pub fn duration(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }

    /// Whether `status` and `exit_code` agree:
    /// error ⟺ -1, pass ⟺ 0, fail ⟺ anything else.
    pub fn is_consistent(&self) -> bool {
        match self.status {
            TestStatus::Error => self.exit_code == NOT_EXECUTED,
            TestStatus::Pass => self.exit_code == 0,
            TestStatus::Fail => self.exit_code != 0 && self.exit_code != NOT_EXECUTED,
            TestStatus::Skip => self.exit_code != 0,
        }
    }
}

/// Multi-line human readable rendering of a run, used by the CLI.
pub fn format_test_run(run: &TestRun) -> String {
    format!(
        "{} {} (tested with {}@{})\n   Status: {}\n   Started: {}\n   Test ID: {}",
        run.status.symbol(),
        run.downstream_package,
        run.upstream_package,
        run.upstream_version,
        run.status,
        run.started_at.to_rfc3339(),
        run.test_id,
    )
}
