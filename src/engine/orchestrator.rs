// src/engine/orchestrator.rs

//! Concurrent fan-out of test runs over a bounded worker pool.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use crate::errors::{Result, WaryError};
use crate::exec::{ProcessOutcome, ProvisionError, ProvisionRequest, Provisioner};
use crate::graph::DependencySource;
use crate::ledger::ResultsStore;
use crate::model::{DependencyEdge, TestRun};

use super::batch::BatchResult;
use super::result::{self, RunOutcome, RunSpec};
use super::state::{RunPhase, RunTracker};
use super::OrchestratorOptions;

/// Slack on top of a backend's own timeout before the orchestrator stops
/// waiting for it.
const BACKEND_GRACE: Duration = Duration::from_secs(5);

/// Runs dependents' test suites against an upstream release.
///
/// Cloning is cheap; clones share the provisioner and the ledger.
pub struct Orchestrator<P: Provisioner> {
    provisioner: Arc<P>,
    ledger: Arc<dyn ResultsStore>,
    options: OrchestratorOptions,
}

impl<P: Provisioner> Clone for Orchestrator<P> {
    fn clone(&self) -> Self {
        Self {
            provisioner: Arc::clone(&self.provisioner),
            ledger: Arc::clone(&self.ledger),
            options: self.options.clone(),
        }
    }
}

impl<P: Provisioner> fmt::Debug for Orchestrator<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Orchestrator")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl<P: Provisioner> Orchestrator<P> {
    pub fn new(
        provisioner: Arc<P>,
        ledger: Arc<dyn ResultsStore>,
        options: OrchestratorOptions,
    ) -> Self {
        Self {
            provisioner,
            ledger,
            options,
        }
    }

    pub fn options(&self) -> &OrchestratorOptions {
        &self.options
    }

    /// Run one dependent's tests against `upstream==version`.
    ///
    /// Always yields a record: provisioning failures and timeouts are
    /// classified into its status. The record is not persisted.
    pub async fn run_one(
        &self,
        upstream: &str,
        version: &str,
        downstream: &str,
        test_command: &str,
        timeout: Duration,
    ) -> TestRun {
        let spec = RunSpec::new(upstream, version, downstream, test_command);
        self.execute(&spec, timeout).await
    }

    /// Look up the dependents of `upstream` and test all of them.
    ///
    /// An unreachable graph is an error; an upstream with no dependents
    /// yields an empty batch.
    pub async fn test_dependents(
        &self,
        graph: &dyn DependencySource,
        upstream: &str,
        version: &str,
    ) -> Result<BatchResult> {
        let dependents = graph.get_dependents(upstream)?;
        if dependents.is_empty() {
            info!(upstream, version, "no dependents registered; nothing to test");
        }
        Ok(self.run_batch(upstream, version, &dependents).await)
    }

    /// Test every dependent concurrently, at most `concurrency` at a time.
    ///
    /// Exactly one run is returned per input edge, in completion order. Each
    /// run is persisted to the ledger by its own task.
    pub async fn run_batch(
        &self,
        upstream: &str,
        version: &str,
        dependents: &[DependencyEdge],
    ) -> BatchResult {
        let mut batch = BatchResult::empty(upstream, version);
        if dependents.is_empty() {
            return batch;
        }

        let concurrency = self.options.concurrency.max(1);
        info!(
            upstream,
            version,
            dependents = dependents.len(),
            concurrency,
            "starting test batch"
        );

        let semaphore = Arc::new(Semaphore::new(concurrency));
        let mut join_set = JoinSet::new();
        let mut pending: HashMap<String, RunSpec> = HashMap::new();

        for edge in dependents {
            let spec = RunSpec::new(
                upstream,
                version,
                edge.downstream.as_str(),
                edge.test_command_or(&self.options.default_test_command),
            );
            pending.insert(spec.test_id.clone(), spec.clone());

            let this = self.clone();
            let semaphore = Arc::clone(&semaphore);
            join_set.spawn(async move { this.supervised_run(spec, semaphore).await });
        }

        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((run, faulted)) => {
                    pending.remove(&run.test_id);
                    info!(
                        downstream = %run.downstream_package,
                        status = %run.status,
                        exit_code = run.exit_code,
                        test_id = %run.test_id,
                        "run finished"
                    );
                    if faulted {
                        batch.faults += 1;
                    }
                    batch.runs.push(run);
                }
                Err(e) => {
                    // Accounted for below through `pending`.
                    error!(error = %e, "run supervisor task failed");
                }
            }
        }

        for (_, spec) in pending {
            let message = format!("run task for {} was lost before reporting", spec.downstream);
            let run = self.record_fault(&spec, Utc::now(), message).await;
            batch.faults += 1;
            batch.runs.push(run);
        }

        info!(
            upstream,
            version,
            total = batch.len(),
            passed = batch.passed(),
            failed = batch.failed(),
            errored = batch.errored(),
            "test batch complete"
        );
        batch
    }

    /// Wait for a worker slot, run + persist in a child task, and turn
    /// anything that goes wrong there into an error record.
    async fn supervised_run(self, spec: RunSpec, semaphore: Arc<Semaphore>) -> (TestRun, bool) {
        let _permit = match semaphore.acquire_owned().await {
            Ok(permit) => permit,
            Err(e) => {
                let run = self
                    .record_fault(&spec, Utc::now(), format!("worker pool closed: {e}"))
                    .await;
                return (run, true);
            }
        };

        let started_at = Utc::now();
        let this = self.clone();
        let task_spec = spec.clone();
        let timeout = self.options.run_timeout;
        let mut task = AbortOnDrop(tokio::spawn(async move {
            this.run_and_record(&task_spec, timeout).await
        }));

        match (&mut task.0).await {
            Ok(Ok(run)) => (run, false),
            Ok(Err(fault)) => {
                warn!(
                    downstream = %spec.downstream,
                    test_id = %spec.test_id,
                    error = %fault,
                    "run task faulted"
                );
                let message = format!("internal fault: {fault}");
                (self.record_fault(&spec, started_at, message).await, true)
            }
            Err(join_err) => {
                let message = describe_join_error(join_err);
                error!(
                    downstream = %spec.downstream,
                    test_id = %spec.test_id,
                    error = %message,
                    "run task aborted"
                );
                (self.record_fault(&spec, started_at, message).await, true)
            }
        }
    }

    async fn run_and_record(&self, spec: &RunSpec, timeout: Duration) -> Result<TestRun> {
        let run = self.execute(spec, timeout).await;
        self.persist(&run).await?;
        Ok(run)
    }

    async fn execute(&self, spec: &RunSpec, timeout: Duration) -> TestRun {
        let started_at = Utc::now();
        let mut tracker = RunTracker::new(spec.test_id.as_str(), spec.downstream.as_str());

        tracker.advance(RunPhase::Provisioning);
        let request = ProvisionRequest::new(
            spec.upstream.as_str(),
            spec.upstream_version.as_str(),
            spec.downstream.as_str(),
        );
        let guard = timeout.saturating_add(BACKEND_GRACE);
        let provisioned = tokio::time::timeout(
            guard,
            self.provisioner.provision(&request, timeout),
        )
        .await
        .unwrap_or(Err(ProvisionError::Timeout(timeout)));

        let sandbox = match provisioned {
            Ok(sandbox) => sandbox,
            Err(e) => {
                warn!(
                    downstream = %spec.downstream,
                    test_id = %spec.test_id,
                    error = %e,
                    "provisioning failed; test command will not run"
                );
                tracker.advance(RunPhase::InstallFailed);
                return result::build(spec, started_at, RunOutcome::ProvisionFailed(e));
            }
        };
        tracker.advance(RunPhase::Installed);

        tracker.advance(RunPhase::Running);
        info!(
            downstream = %spec.downstream,
            downstream_version = %sandbox.downstream_version(),
            cmd = %spec.test_command,
            "running test command"
        );
        let executed = tokio::time::timeout(
            guard,
            self.provisioner.execute(&sandbox, &spec.test_command, timeout),
        )
        .await
        .unwrap_or_else(|_| Ok(abandoned_outcome(guard)));

        let outcome = match executed {
            Ok(process) => {
                tracker.advance(if process.timed_out {
                    RunPhase::TimedOut
                } else {
                    RunPhase::Completed
                });
                RunOutcome::Executed {
                    process,
                    timeout,
                    downstream_version: sandbox.downstream_version().to_string(),
                    environment: sandbox.environment().clone(),
                }
            }
            Err(e) => {
                tracker.advance(RunPhase::Completed);
                RunOutcome::Fault(format!("could not run test command: {e}"))
            }
        };

        let run = result::build(spec, started_at, outcome);
        drop(sandbox);
        debug!(test_id = %run.test_id, phase = %tracker.phase(), "run torn down");
        run
    }

    async fn persist(&self, run: &TestRun) -> Result<()> {
        let ledger = Arc::clone(&self.ledger);
        let record = run.clone();
        tokio::task::spawn_blocking(move || ledger.add_result(&record))
            .await
            .map_err(|e| WaryError::Ledger(format!("ledger write task failed: {e}")))?
    }

    /// Build an error record for a run that faulted, and try (once) to
    /// persist it.
    async fn record_fault(
        &self,
        spec: &RunSpec,
        started_at: chrono::DateTime<Utc>,
        message: String,
    ) -> TestRun {
        let run = result::build(spec, started_at, RunOutcome::Fault(message));
        if let Err(e) = self.persist(&run).await {
            warn!(
                test_id = %run.test_id,
                error = %e,
                "could not persist fault record"
            );
        }
        run
    }
}

/// Aborts the run task if its supervisor is dropped before it finishes,
/// so cancelling a batch also cancels (and tears down) its runs.
struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Stand-in outcome for a backend that ignored its own timeout.
fn abandoned_outcome(waited: Duration) -> ProcessOutcome {
    ProcessOutcome {
        exit_code: result::TIMEOUT_EXIT_CODE,
        stdout: String::new(),
        stderr: format!("backend did not return within {}s", waited.as_secs()),
        timed_out: true,
        elapsed: waited,
    }
}

fn describe_join_error(err: JoinError) -> String {
    if err.is_panic() {
        format!("run task panicked: {}", panic_message(err.into_panic()))
    } else {
        format!("run task was cancelled: {err}")
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
