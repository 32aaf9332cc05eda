// src/config/model.rs

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::engine::{
    DEFAULT_CONCURRENCY, DEFAULT_RUN_TIMEOUT, DEFAULT_TEST_COMMAND, OrchestratorOptions,
};
use crate::watch::DEFAULT_INDEX_URL;

/// Configuration as read from `wary.toml`, before validation.
///
/// ```toml
/// [orchestrator]
/// concurrency = 3
/// timeout_secs = 600
/// default_test_command = "pytest"
/// python = "python3"
///
/// [storage]
/// data_dir = "/var/lib/wary"
///
/// [watch]
/// interval_secs = 300
/// index_url = "https://pypi.org/pypi"
/// packages = ["dol"]
/// ```
///
/// Every section and key is optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawConfigFile {
    #[serde(default)]
    pub orchestrator: OrchestratorSection,

    #[serde(default)]
    pub storage: StorageSection,

    #[serde(default)]
    pub watch: WatchSection,
}

/// Validated configuration.
///
/// Only obtainable through `TryFrom<RawConfigFile>` (see `validate.rs`), so
/// holders can rely on the numeric knobs being non-zero and the commands
/// being non-empty.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub orchestrator: OrchestratorSection,
    pub storage: StorageSection,
    pub watch: WatchSection,
}

impl ConfigFile {
    pub(crate) fn new_unchecked(
        orchestrator: OrchestratorSection,
        storage: StorageSection,
        watch: WatchSection,
    ) -> Self {
        Self {
            orchestrator,
            storage,
            watch,
        }
    }

    pub fn orchestrator_options(&self) -> OrchestratorOptions {
        OrchestratorOptions {
            concurrency: self.orchestrator.concurrency,
            run_timeout: Duration::from_secs(self.orchestrator.timeout_secs),
            default_test_command: self.orchestrator.default_test_command.clone(),
        }
    }

    /// Root directory for the graph, ledger and version stores.
    ///
    /// Falls back to `<platform data dir>/wary`, or `./.wary` on platforms
    /// without one.
    pub fn data_dir(&self) -> PathBuf {
        self.storage.data_dir.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .map(|d| d.join("wary"))
                .unwrap_or_else(|| PathBuf::from(".wary"))
        })
    }

    pub fn watch_interval(&self) -> Duration {
        Duration::from_secs(self.watch.interval_secs)
    }
}

impl Default for ConfigFile {
    fn default() -> Self {
        let raw = RawConfigFile::default();
        Self::new_unchecked(raw.orchestrator, raw.storage, raw.watch)
    }
}

/// `[orchestrator]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OrchestratorSection {
    /// Dependents tested at the same time.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Per-run budget, in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Used when a dependent registered no test command.
    #[serde(default = "default_test_command")]
    pub default_test_command: String,

    /// Interpreter used to create sandboxes.
    #[serde(default = "default_python")]
    pub python: String,
}

fn default_concurrency() -> usize {
    DEFAULT_CONCURRENCY
}

fn default_timeout_secs() -> u64 {
    DEFAULT_RUN_TIMEOUT.as_secs()
}

fn default_test_command() -> String {
    DEFAULT_TEST_COMMAND.to_string()
}

fn default_python() -> String {
    "python3".to_string()
}

impl Default for OrchestratorSection {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            timeout_secs: default_timeout_secs(),
            default_test_command: default_test_command(),
            python: default_python(),
        }
    }
}

/// `[storage]` section.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StorageSection {
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
}

/// `[watch]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WatchSection {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    #[serde(default = "default_index_url")]
    pub index_url: String,

    /// Packages `wary watch` follows when none are given on the command line.
    #[serde(default)]
    pub packages: Vec<String>,
}

fn default_interval_secs() -> u64 {
    300
}

fn default_index_url() -> String {
    DEFAULT_INDEX_URL.to_string()
}

impl Default for WatchSection {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            index_url: default_index_url(),
            packages: Vec::new(),
        }
    }
}
