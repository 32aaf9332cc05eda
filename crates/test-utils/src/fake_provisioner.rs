use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use wary::exec::backend::{ExecuteFuture, ProvisionFuture};
use wary::exec::process;
use wary::exec::{
    ExecError, ProcessOutcome, ProvisionError, ProvisionRequest, Provisioner, SandboxHandle,
};

/// What the fake should do for one downstream package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Script {
    /// Install fine, test command exits with this code.
    Exit(i32),
    /// Install fine, test command exits with `code` after writing `stderr`.
    ExitWith { code: i32, stderr: String },
    /// `pip install upstream==version` fails with this output.
    UpstreamInstallFails(String),
    /// `pip install downstream` fails with this output.
    DownstreamInstallFails(String),
    /// The test command never finishes on its own; the fake honours the
    /// timeout it is given and reports a killed process.
    Hang,
    /// The test command never finishes and the fake ignores its timeout,
    /// so only the caller's own guard ends the run.
    IgnoresTimeout,
    /// Installing never finishes; the fake honours the provisioning
    /// timeout and reports it.
    ProvisionHangs,
    /// Installing never finishes and the timeout is ignored.
    ProvisionIgnoresTimeout,
    /// The test command cannot be started at all.
    SpawnFails,
    /// The run task panics while executing.
    Panic,
}

#[derive(Debug, Default)]
struct Inner {
    scripts: HashMap<String, Script>,
    /// Sandbox root -> downstream it was provisioned for.
    sandboxes: HashMap<PathBuf, String>,
    provisioned: Vec<ProvisionRequest>,
    executed: Vec<(String, String)>,
}

/// A scripted [`Provisioner`] that:
/// - creates a real, empty temp directory per sandbox (so isolation and
///   teardown can be observed)
/// - never installs anything or spawns processes
/// - records every request and tracks how many runs overlap.
#[derive(Debug, Clone)]
pub struct FakeProvisioner {
    inner: Arc<Mutex<Inner>>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
    run_delay: Duration,
    downstream_version: String,
}

impl FakeProvisioner {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            in_flight: Arc::new(AtomicUsize::new(0)),
            max_in_flight: Arc::new(AtomicUsize::new(0)),
            run_delay: Duration::from_millis(20),
            downstream_version: "1.0.0".to_string(),
        }
    }

    /// Script the behaviour for `downstream` (default: `Script::Exit(0)`).
    pub fn script(self, downstream: &str, script: Script) -> Self {
        self.inner
            .lock()
            .unwrap()
            .scripts
            .insert(downstream.to_string(), script);
        self
    }

    /// How long every test command "runs" before exiting.
    pub fn with_run_delay(mut self, delay: Duration) -> Self {
        self.run_delay = delay;
        self
    }

    pub fn provisioned(&self) -> Vec<ProvisionRequest> {
        self.inner.lock().unwrap().provisioned.clone()
    }

    /// `(downstream, command)` pairs that reached the execute step.
    pub fn executed(&self) -> Vec<(String, String)> {
        self.inner.lock().unwrap().executed.clone()
    }

    /// Every sandbox root handed out, with the downstream it belonged to.
    pub fn sandboxes(&self) -> HashMap<PathBuf, String> {
        self.inner.lock().unwrap().sandboxes.clone()
    }

    /// Runs that have started provisioning and not yet finished.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn script_for(&self, downstream: &str) -> Script {
        self.inner
            .lock()
            .unwrap()
            .scripts
            .get(downstream)
            .cloned()
            .unwrap_or(Script::Exit(0))
    }

    fn enter(&self) {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
    }

    fn leave(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }

    /// Park forever; the in-flight count is released when the caller
    /// drops the future.
    async fn stall<T>(&self) -> T {
        let _leave = LeaveOnDrop(self);
        std::future::pending().await
    }

    async fn fake_provision(
        &self,
        request: &ProvisionRequest,
        timeout: Duration,
    ) -> Result<SandboxHandle, ProvisionError> {
        self.enter();
        self.inner
            .lock()
            .unwrap()
            .provisioned
            .push(request.clone());
        tokio::task::yield_now().await;

        match self.script_for(&request.downstream) {
            Script::UpstreamInstallFails(output) => {
                self.leave();
                return Err(ProvisionError::UpstreamInstall {
                    package: request.pinned_upstream(),
                    output,
                });
            }
            Script::DownstreamInstallFails(output) => {
                self.leave();
                return Err(ProvisionError::DownstreamInstall {
                    package: request.downstream.clone(),
                    output,
                });
            }
            Script::ProvisionHangs => {
                tokio::time::sleep(timeout).await;
                self.leave();
                return Err(ProvisionError::Timeout(timeout));
            }
            Script::ProvisionIgnoresTimeout => return self.stall().await,
            _ => {}
        }

        let dir = tempfile::Builder::new()
            .prefix("wary-fake-")
            .tempdir()
            .map_err(|e| {
                self.leave();
                ProvisionError::Sandbox(e.to_string())
            })?;
        let bin_dir = dir.path().join("bin");
        self.inner
            .lock()
            .unwrap()
            .sandboxes
            .insert(dir.path().to_path_buf(), request.downstream.clone());

        let environment = BTreeMap::from([("python".to_string(), "fake".to_string())]);
        Ok(SandboxHandle::from_tempdir(
            dir,
            bin_dir,
            self.downstream_version.clone(),
            environment,
        ))
    }

    fn exited(&self, downstream: &str, command: &str, code: i32, stderr: String) -> ProcessOutcome {
        ProcessOutcome {
            exit_code: code,
            stdout: format!("{downstream}: ran `{command}`"),
            stderr,
            timed_out: false,
            elapsed: self.run_delay,
        }
    }

    async fn fake_execute(
        &self,
        sandbox: &SandboxHandle,
        command: &str,
        timeout: Duration,
    ) -> Result<ProcessOutcome, ExecError> {
        let downstream = {
            let mut inner = self.inner.lock().unwrap();
            let downstream = inner
                .sandboxes
                .get(sandbox.root())
                .cloned()
                .unwrap_or_default();
            inner.executed.push((downstream.clone(), command.to_string()));
            downstream
        };

        let script = self.script_for(&downstream);
        let outcome = match script {
            Script::Exit(code) => {
                tokio::time::sleep(self.run_delay).await;
                Ok(self.exited(&downstream, command, code, String::new()))
            }
            Script::ExitWith { code, stderr } => {
                tokio::time::sleep(self.run_delay).await;
                Ok(self.exited(&downstream, command, code, stderr))
            }
            Script::Hang => {
                tokio::time::sleep(timeout).await;
                Ok(ProcessOutcome {
                    exit_code: 137,
                    stdout: format!("{downstream}: still running"),
                    stderr: String::new(),
                    timed_out: true,
                    elapsed: timeout,
                })
            }
            Script::IgnoresTimeout => self.stall().await,
            Script::SpawnFails => Err(ExecError::EmptyCommand),
            Script::Panic => {
                self.leave();
                panic!("scripted panic while testing {downstream}");
            }
            Script::UpstreamInstallFails(_)
            | Script::DownstreamInstallFails(_)
            | Script::ProvisionHangs
            | Script::ProvisionIgnoresTimeout => {
                unreachable!("install failures never reach execute")
            }
        };
        self.leave();
        outcome
    }
}

struct LeaveOnDrop<'a>(&'a FakeProvisioner);

impl Drop for LeaveOnDrop<'_> {
    fn drop(&mut self) {
        self.0.leave();
    }
}

impl Default for FakeProvisioner {
    fn default() -> Self {
        Self::new()
    }
}

impl Provisioner for FakeProvisioner {
    fn provision<'a>(
        &'a self,
        request: &'a ProvisionRequest,
        timeout: Duration,
    ) -> ProvisionFuture<'a> {
        Box::pin(self.fake_provision(request, timeout))
    }

    fn execute<'a>(
        &'a self,
        sandbox: &'a SandboxHandle,
        command: &'a str,
        timeout: Duration,
    ) -> ExecuteFuture<'a> {
        Box::pin(self.fake_execute(sandbox, command, timeout))
    }
}

/// Provisions an empty temp directory (no installs) and runs the test
/// command as a real process inside it.
#[derive(Debug, Clone, Default)]
pub struct LocalProvisioner;

impl Provisioner for LocalProvisioner {
    fn provision<'a>(
        &'a self,
        _request: &'a ProvisionRequest,
        _timeout: Duration,
    ) -> ProvisionFuture<'a> {
        Box::pin(async move {
            let dir = tempfile::Builder::new()
                .prefix("wary-local-")
                .tempdir()
                .map_err(|e| ProvisionError::Sandbox(e.to_string()))?;
            let root = dir.path().to_path_buf();
            Ok(SandboxHandle::from_tempdir(
                dir,
                root.join("bin"),
                "0.0.0",
                BTreeMap::new(),
            ))
        })
    }

    fn execute<'a>(
        &'a self,
        sandbox: &'a SandboxHandle,
        command: &'a str,
        timeout: Duration,
    ) -> ExecuteFuture<'a> {
        Box::pin(process::run_in_sandbox(
            sandbox,
            command,
            sandbox.root(),
            timeout,
        ))
    }
}
