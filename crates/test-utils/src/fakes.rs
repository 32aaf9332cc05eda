use std::collections::HashSet;
use std::sync::Mutex;

use wary::errors::{Result, WaryError};
use wary::graph::DependencySource;
use wary::ledger::ResultsStore;
use wary::model::{DependencyEdge, TestRun};

/// In-memory [`ResultsStore`] that can be told to refuse writes.
#[derive(Debug, Default)]
pub struct MemoryLedger {
    runs: Mutex<Vec<TestRun>>,
    failing_for: HashSet<String>,
    always_fail: bool,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject every write for runs of `downstream`.
    pub fn failing_for(mut self, downstream: &str) -> Self {
        self.failing_for.insert(downstream.to_string());
        self
    }

    /// Reject every write.
    pub fn unreachable() -> Self {
        Self {
            always_fail: true,
            ..Self::default()
        }
    }

    pub fn runs(&self) -> Vec<TestRun> {
        self.runs.lock().unwrap().clone()
    }
}

impl ResultsStore for MemoryLedger {
    fn add_result(&self, run: &TestRun) -> Result<()> {
        if self.always_fail || self.failing_for.contains(&run.downstream_package) {
            return Err(WaryError::Ledger("ledger is unreachable".to_string()));
        }
        let mut runs = self.runs.lock().unwrap();
        if runs.iter().any(|r| r.test_id == run.test_id) {
            return Err(WaryError::DuplicateRun(run.test_id.clone()));
        }
        runs.push(run.clone());
        Ok(())
    }
}

/// A fixed set of edges.
#[derive(Debug, Clone, Default)]
pub struct StaticGraph {
    pub edges: Vec<DependencyEdge>,
}

impl StaticGraph {
    pub fn new(edges: Vec<DependencyEdge>) -> Self {
        Self { edges }
    }
}

impl DependencySource for StaticGraph {
    fn get_dependents(&self, upstream: &str) -> Result<Vec<DependencyEdge>> {
        Ok(self
            .edges
            .iter()
            .filter(|e| e.upstream == upstream)
            .cloned()
            .collect())
    }
}

/// A graph whose backing store cannot be reached.
#[derive(Debug, Clone, Default)]
pub struct UnreachableGraph;

impl DependencySource for UnreachableGraph {
    fn get_dependents(&self, _upstream: &str) -> Result<Vec<DependencyEdge>> {
        Err(WaryError::Graph("connection refused".to_string()))
    }
}
