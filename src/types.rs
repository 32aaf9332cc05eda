use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Terminal status of a single test run.
///
/// - `Pass`: the test command ran and exited with code 0.
/// - `Fail`: the test command ran (or timed out) and exited non-zero.
/// - `Skip`: reserved for runs that were deliberately not executed.
/// - `Error`: the test command never ran (provisioning failed or the run
///   task faulted); the exit code is always `-1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestStatus {
    Pass,
    Fail,
    Skip,
    Error,
}

impl TestStatus {
    /// Classify the exit code of a command that actually ran.
    pub fn from_exit_code(code: i32) -> Self {
        if code == 0 {
            TestStatus::Pass
        } else {
            TestStatus::Fail
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TestStatus::Pass => "pass",
            TestStatus::Fail => "fail",
            TestStatus::Skip => "skip",
            TestStatus::Error => "error",
        }
    }

    /// Single-character marker used in human-readable listings.
    pub fn symbol(&self) -> &'static str {
        match self {
            TestStatus::Pass => "✓",
            TestStatus::Fail => "✗",
            TestStatus::Error => "⚠",
            TestStatus::Skip => "○",
        }
    }
}

impl fmt::Display for TestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TestStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pass" => Ok(TestStatus::Pass),
            "fail" => Ok(TestStatus::Fail),
            "skip" => Ok(TestStatus::Skip),
            "error" => Ok(TestStatus::Error),
            other => Err(format!(
                "invalid status: {other} (expected \"pass\", \"fail\", \"skip\" or \"error\")"
            )),
        }
    }
}
