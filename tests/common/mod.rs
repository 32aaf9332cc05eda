#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use wary::engine::{Orchestrator, OrchestratorOptions};
use wary::exec::Provisioner;
use wary::ledger::ResultsStore;

pub use wary_test_utils::{init_tracing, with_timeout};

pub fn options(concurrency: usize, run_timeout: Duration) -> OrchestratorOptions {
    OrchestratorOptions {
        concurrency,
        run_timeout,
        ..OrchestratorOptions::default()
    }
}

pub fn orchestrator<P: Provisioner>(
    provisioner: Arc<P>,
    ledger: Arc<dyn ResultsStore>,
    options: OrchestratorOptions,
) -> Orchestrator<P> {
    Orchestrator::new(provisioner, ledger, options)
}
