// src/ledger/mod.rs

//! Results ledger: persisted [`TestRun`] records keyed by run id.
//!
//! One JSON document per run (`<data_dir>/results/<test_id>.json`). Records
//! are write-once; re-adding an existing id is rejected.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::errors::{Result, WaryError};
use crate::fs::{FileSystem, JsonStore};
use crate::model::TestRun;
use crate::types::TestStatus;

/// Write side of the ledger, as used by the orchestrator's run tasks.
///
/// Implementations must tolerate concurrent calls from many tasks.
pub trait ResultsStore: Send + Sync {
    fn add_result(&self, run: &TestRun) -> Result<()>;
}

/// Filters for [`ResultsLedger::query_results`]. Unset fields match anything.
#[derive(Debug, Clone, Default)]
pub struct ResultQuery {
    pub upstream: Option<String>,
    pub downstream: Option<String>,
    pub status: Option<TestStatus>,
    /// Only runs started at or after this instant.
    pub after: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl ResultQuery {
    fn matches(&self, run: &TestRun) -> bool {
        if let Some(ref upstream) = self.upstream {
            if &run.upstream_package != upstream {
                return false;
            }
        }
        if let Some(ref downstream) = self.downstream {
            if &run.downstream_package != downstream {
                return false;
            }
        }
        if let Some(status) = self.status {
            if run.status != status {
                return false;
            }
        }
        if let Some(after) = self.after {
            if run.started_at < after {
                return false;
            }
        }
        true
    }
}

/// File-backed results ledger.
#[derive(Debug)]
pub struct ResultsLedger {
    store: JsonStore,
    write_lock: Mutex<()>,
}

impl ResultsLedger {
    pub fn new(fs: Arc<dyn FileSystem>, dir: impl Into<std::path::PathBuf>) -> Self {
        Self {
            store: JsonStore::new(fs, dir),
            write_lock: Mutex::new(()),
        }
    }

    pub fn get_result(&self, test_id: &str) -> Result<TestRun> {
        self.store
            .get::<TestRun>(test_id)
            .map_err(ledger_err)?
            .ok_or_else(|| WaryError::RunNotFound(test_id.to_string()))
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.store.keys().map_err(ledger_err)?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Runs matching `query`, newest `started_at` first.
    pub fn query_results(&self, query: &ResultQuery) -> Result<Vec<TestRun>> {
        let mut runs = Vec::new();
        for key in self.store.keys().map_err(ledger_err)? {
            let Some(run) = self.store.get::<TestRun>(&key).map_err(ledger_err)? else {
                continue;
            };
            if query.matches(&run) {
                runs.push(run);
            }
        }

        runs.sort_by(|a, b| {
            b.started_at
                .cmp(&a.started_at)
                .then_with(|| a.test_id.cmp(&b.test_id))
        });
        if let Some(limit) = query.limit {
            runs.truncate(limit);
        }
        Ok(runs)
    }

    /// Most recent run (by `started_at`) for an upstream/downstream pair.
    pub fn get_latest_result(&self, upstream: &str, downstream: &str) -> Result<Option<TestRun>> {
        let query = ResultQuery {
            upstream: Some(upstream.to_string()),
            downstream: Some(downstream.to_string()),
            limit: Some(1),
            ..Default::default()
        };
        Ok(self.query_results(&query)?.into_iter().next())
    }
}

impl ResultsStore for ResultsLedger {
    fn add_result(&self, run: &TestRun) -> Result<()> {
        let _guard = self
            .write_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if self.store.contains(&run.test_id).map_err(ledger_err)? {
            return Err(WaryError::DuplicateRun(run.test_id.clone()));
        }
        self.store.put(&run.test_id, run).map_err(ledger_err)?;

        debug!(
            test_id = %run.test_id,
            upstream = %run.upstream_package,
            downstream = %run.downstream_package,
            status = %run.status,
            "stored test result"
        );
        Ok(())
    }
}

fn ledger_err(err: anyhow::Error) -> WaryError {
    WaryError::Ledger(format!("{err:#}"))
}
