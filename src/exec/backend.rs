// src/exec/backend.rs

//! Pluggable provisioning backend.
//!
//! The orchestrator talks to a [`Provisioner`] instead of spawning pip and
//! test processes itself. This makes it easy to swap in a scripted
//! provisioner in tests while keeping the production implementation,
//! [`VenvProvisioner`], here.

use std::collections::BTreeMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use super::process::{self, ExecError, ProcessOutcome};
use super::sandbox::{ProvisionError, ProvisionRequest, SandboxHandle};

pub type ProvisionFuture<'a> =
    Pin<Box<dyn Future<Output = std::result::Result<SandboxHandle, ProvisionError>> + Send + 'a>>;

pub type ExecuteFuture<'a> =
    Pin<Box<dyn Future<Output = std::result::Result<ProcessOutcome, ExecError>> + Send + 'a>>;

/// Trait abstracting how sandboxes are created and how commands run in them.
///
/// Production code uses [`VenvProvisioner`]; tests can provide their own
/// implementation that doesn't install anything or spawn real processes.
pub trait Provisioner: Send + Sync + 'static {
    /// Create a fresh sandbox and install the requested packages into it,
    /// all within `timeout`.
    fn provision<'a>(&'a self, request: &'a ProvisionRequest, timeout: Duration)
    -> ProvisionFuture<'a>;

    /// Run `command` inside `sandbox`, killing it after `timeout`.
    fn execute<'a>(
        &'a self,
        sandbox: &'a SandboxHandle,
        command: &'a str,
        timeout: Duration,
    ) -> ExecuteFuture<'a>;
}

/// Real backend: one Python virtual environment per run, packages installed
/// with the environment's own pip.
#[derive(Debug, Clone)]
pub struct VenvProvisioner {
    python: String,
}

impl VenvProvisioner {
    /// `python` is the interpreter used to create environments
    /// (e.g. `"python3"`).
    pub fn new(python: impl Into<String>) -> Self {
        Self {
            python: python.into(),
        }
    }

    async fn provision_venv(
        &self,
        request: &ProvisionRequest,
        timeout: Duration,
    ) -> std::result::Result<SandboxHandle, ProvisionError> {
        let deadline = Step::new(timeout);

        // Dropped (and deleted) on every early return below.
        let dir = tempfile::Builder::new()
            .prefix("wary-")
            .tempdir()
            .map_err(|e| ProvisionError::Sandbox(format!("creating temp dir: {e}")))?;
        let venv = dir.path().join("venv");

        info!(
            upstream = %request.upstream,
            downstream = %request.downstream,
            venv = ?venv,
            "creating virtual environment"
        );
        let venv_arg = venv.to_string_lossy().into_owned();
        let created = deadline
            .run(&self.python, &["-m", "venv", venv_arg.as_str()], dir.path())
            .await?;
        if !created.success() {
            return Err(ProvisionError::Sandbox(format!(
                "creating virtual environment: {}",
                created.stderr.trim()
            )));
        }

        let bin_dir = venv_bin_dir(&venv);
        let pip = bin_dir.join(exe_name("pip"));
        let pip = pip.to_string_lossy().into_owned();

        let pinned = request.pinned_upstream();
        info!(package = %pinned, "installing upstream");
        let upstream = deadline
            .run(&pip, &["install", pinned.as_str()], dir.path())
            .await?;
        if !upstream.success() {
            return Err(ProvisionError::UpstreamInstall {
                package: request.upstream.clone(),
                output: upstream.stderr,
            });
        }

        info!(package = %request.downstream, "installing downstream");
        let downstream = deadline
            .run(&pip, &["install", request.downstream.as_str()], dir.path())
            .await?;
        if !downstream.success() {
            return Err(ProvisionError::DownstreamInstall {
                package: request.downstream.clone(),
                output: downstream.stderr,
            });
        }

        let version = match deadline
            .run(&pip, &["show", request.downstream.as_str()], dir.path())
            .await
        {
            Ok(out) => parse_pip_show_version(&out.stdout),
            Err(e) => {
                warn!(error = %e, "could not resolve downstream version");
                None
            }
        }
        .unwrap_or_else(|| crate::model::UNKNOWN.to_string());

        let mut environment = BTreeMap::new();
        environment.insert("python".to_string(), self.python.clone());
        let python = bin_dir.join(exe_name("python"));
        if let Ok(out) = deadline
            .run::<&str>(&python.to_string_lossy(), &["--version"], dir.path())
            .await
        {
            // Older interpreters print the version on stderr.
            let reported = format!("{}{}", out.stdout.trim(), out.stderr.trim());
            if let Some(v) = reported.strip_prefix("Python ") {
                environment.insert("python_version".to_string(), v.trim().to_string());
            }
        }

        debug!(downstream_version = %version, "sandbox ready");
        Ok(SandboxHandle::from_tempdir(dir, bin_dir, version, environment))
    }
}

impl Provisioner for VenvProvisioner {
    fn provision<'a>(
        &'a self,
        request: &'a ProvisionRequest,
        timeout: Duration,
    ) -> ProvisionFuture<'a> {
        Box::pin(self.provision_venv(request, timeout))
    }

    fn execute<'a>(
        &'a self,
        sandbox: &'a SandboxHandle,
        command: &'a str,
        timeout: Duration,
    ) -> ExecuteFuture<'a> {
        Box::pin(process::run_in_sandbox(sandbox, command, sandbox.root(), timeout))
    }
}

/// Shared deadline for all provisioning steps of one sandbox.
struct Step {
    /// `None` when the budget is too large to be represented as an instant.
    deadline: Option<Instant>,
    budget: Duration,
}

impl Step {
    fn new(budget: Duration) -> Self {
        Self {
            deadline: Instant::now().checked_add(budget),
            budget,
        }
    }

    fn remaining(&self) -> Duration {
        match self.deadline {
            Some(deadline) => deadline.saturating_duration_since(Instant::now()),
            None => self.budget,
        }
    }

    async fn run<S: AsRef<std::ffi::OsStr>>(
        &self,
        program: &str,
        args: &[S],
        cwd: &Path,
    ) -> std::result::Result<ProcessOutcome, ProvisionError> {
        let remaining = self.remaining();
        if remaining.is_zero() {
            return Err(ProvisionError::Timeout(self.budget));
        }

        let envs = vec![("PIP_DISABLE_PIP_VERSION_CHECK".to_string(), "1".to_string())];
        let outcome = process::run_argv(program, args, &envs, cwd, remaining)
            .await
            .map_err(|e| ProvisionError::Sandbox(e.to_string()))?;

        if outcome.timed_out {
            return Err(ProvisionError::Timeout(self.budget));
        }
        Ok(outcome)
    }
}

fn venv_bin_dir(venv: &Path) -> PathBuf {
    if cfg!(windows) {
        venv.join("Scripts")
    } else {
        venv.join("bin")
    }
}

fn exe_name(name: &str) -> String {
    if cfg!(windows) {
        format!("{name}.exe")
    } else {
        name.to_string()
    }
}

/// Extract the `Version:` field from `pip show` output.
pub fn parse_pip_show_version(stdout: &str) -> Option<String> {
    stdout
        .lines()
        .filter_map(|line| line.strip_prefix("Version:"))
        .map(|v| v.trim().to_string())
        .find(|v| !v.is_empty())
}
