// src/exec/sandbox.rs

//! Per-run isolated environments.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tempfile::TempDir;
use thiserror::Error;
use tracing::debug;

/// Why a sandbox could not be made ready for the test command.
///
/// These are expected outcomes: the orchestrator records them as
/// `status = error` runs instead of propagating them.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProvisionError {
    #[error("Failed to create sandbox: {0}")]
    Sandbox(String),

    #[error("Failed to install {package}: {output}")]
    UpstreamInstall { package: String, output: String },

    #[error("Failed to install {package}: {output}")]
    DownstreamInstall { package: String, output: String },

    #[error("Provisioning timed out after {}s", .0.as_secs())]
    Timeout(Duration),
}

/// What to install into a fresh sandbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionRequest {
    pub upstream: String,
    /// Exact version; installed pinned.
    pub upstream_version: String,
    /// Installed unpinned.
    pub downstream: String,
}

impl ProvisionRequest {
    pub fn new(
        upstream: impl Into<String>,
        upstream_version: impl Into<String>,
        downstream: impl Into<String>,
    ) -> Self {
        Self {
            upstream: upstream.into(),
            upstream_version: upstream_version.into(),
            downstream: downstream.into(),
        }
    }

    /// `name==version` requirement for the upstream package.
    pub fn pinned_upstream(&self) -> String {
        format!("{}=={}", self.upstream, self.upstream_version)
    }
}

/// An exclusively owned, provisioned sandbox.
///
/// The backing directory (if any) is deleted when the handle is dropped,
/// whichever way the run ends.
#[derive(Debug)]
pub struct SandboxHandle {
    root: PathBuf,
    bin_dir: Option<PathBuf>,
    downstream_version: String,
    environment: BTreeMap<String, String>,
    dir: Option<TempDir>,
}

impl SandboxHandle {
    /// Wrap a provisioned temporary directory. `bin_dir` holds the sandbox's
    /// executables and is put first on `PATH` for commands run inside it.
    pub fn from_tempdir(
        dir: TempDir,
        bin_dir: PathBuf,
        downstream_version: impl Into<String>,
        environment: BTreeMap<String, String>,
    ) -> Self {
        Self {
            root: dir.path().to_path_buf(),
            bin_dir: Some(bin_dir),
            downstream_version: downstream_version.into(),
            environment,
            dir: Some(dir),
        }
    }

    /// A handle over an existing directory that is not owned (and therefore
    /// not removed) by the handle. Used by in-memory provisioners.
    pub fn detached(
        root: PathBuf,
        downstream_version: impl Into<String>,
        environment: BTreeMap<String, String>,
    ) -> Self {
        Self {
            root,
            bin_dir: None,
            downstream_version: downstream_version.into(),
            environment,
            dir: None,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Concrete downstream version installed, or `"unknown"`.
    pub fn downstream_version(&self) -> &str {
        &self.downstream_version
    }

    /// Descriptors recorded with every run (interpreter, runtime version...).
    pub fn environment(&self) -> &BTreeMap<String, String> {
        &self.environment
    }

    /// Environment overrides for processes started inside the sandbox.
    pub fn env_vars(&self) -> Vec<(String, String)> {
        let Some(ref bin_dir) = self.bin_dir else {
            return Vec::new();
        };

        let mut paths = vec![bin_dir.clone()];
        if let Some(existing) = std::env::var_os("PATH") {
            paths.extend(std::env::split_paths(&existing));
        }

        let mut vars = Vec::new();
        if let Ok(joined) = std::env::join_paths(paths) {
            vars.push(("PATH".to_string(), joined.to_string_lossy().into_owned()));
        }
        if let Some(venv) = bin_dir.parent() {
            vars.push(("VIRTUAL_ENV".to_string(), venv.to_string_lossy().into_owned()));
        }
        vars
    }
}

impl Drop for SandboxHandle {
    fn drop(&mut self) {
        if self.dir.is_some() {
            debug!(root = ?self.root, "tearing down sandbox");
        }
    }
}
