// src/engine/batch.rs

use serde::Serialize;

use crate::model::TestRun;
use crate::types::TestStatus;

/// All runs produced for one `(upstream, version)` trigger.
///
/// `runs` is in completion order; callers must not rely on it matching the
/// order of the dependents that were passed in.
#[derive(Debug, Clone, Serialize)]
pub struct BatchResult {
    pub upstream: String,
    pub version: String,
    pub runs: Vec<TestRun>,
    /// How many of `runs` were synthesised from a faulted run task.
    pub faults: usize,
}

impl BatchResult {
    pub fn empty(upstream: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            upstream: upstream.into(),
            version: version.into(),
            runs: Vec::new(),
            faults: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.runs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    pub fn count(&self, status: TestStatus) -> usize {
        self.runs.iter().filter(|r| r.status == status).count()
    }

    pub fn passed(&self) -> usize {
        self.count(TestStatus::Pass)
    }

    pub fn failed(&self) -> usize {
        self.count(TestStatus::Fail)
    }

    pub fn errored(&self) -> usize {
        self.count(TestStatus::Error)
    }

    pub fn summary(&self) -> BatchSummary {
        BatchSummary {
            upstream: self.upstream.clone(),
            version: self.version.clone(),
            total: self.len(),
            passed: self.passed(),
            failed: self.failed(),
            errored: self.errored(),
            results: self
                .runs
                .iter()
                .map(|r| BatchEntry {
                    downstream: r.downstream_package.clone(),
                    status: r.status,
                    test_id: r.test_id.clone(),
                })
                .collect(),
        }
    }
}

/// Compact, serialisable view of a batch (what `wary test --json` prints).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchSummary {
    pub upstream: String,
    pub version: String,
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub errored: usize,
    pub results: Vec<BatchEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchEntry {
    pub downstream: String,
    pub status: TestStatus,
    pub test_id: String,
}
