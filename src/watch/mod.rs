// src/watch/mod.rs

//! Version watching: detect new upstream releases.
//!
//! The last version seen for each package is stored as
//! `<data_dir>/versions/<package>.json`; a package "has an update" whenever
//! the index reports something different from what was stored.

pub mod index;

use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::errors::{Result, WaryError};
use crate::fs::JsonStore;

pub use index::{DEFAULT_INDEX_URL, PackageIndex, PypiIndex};

/// A detected release: `old` is `None` the first time a package is seen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VersionChange {
    pub old: Option<String>,
    pub new: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredVersion {
    version: String,
    checked_at: DateTime<Utc>,
}

pub struct VersionWatcher<I: PackageIndex> {
    index: I,
    store: JsonStore,
}

impl<I: PackageIndex> VersionWatcher<I> {
    pub fn new(index: I, store: JsonStore) -> Self {
        Self { index, store }
    }

    /// Latest version according to the index. Index errors are logged and
    /// reported as `None`.
    pub async fn get_latest_version(&self, package: &str) -> Option<String> {
        match self.index.latest_version(package).await {
            Ok(version) => version,
            Err(e) => {
                warn!(package, error = %e, "could not fetch latest version");
                None
            }
        }
    }

    pub fn get_stored_version(&self, package: &str) -> Result<Option<String>> {
        Ok(self
            .store
            .get::<StoredVersion>(package)
            .map_err(store_err)?
            .map(|s| s.version))
    }

    pub fn update_stored_version(&self, package: &str, version: &str) -> Result<()> {
        let record = StoredVersion {
            version: version.to_string(),
            checked_at: Utc::now(),
        };
        self.store.put(package, &record).map_err(store_err)
    }

    /// Compare stored and latest versions for `packages`, remembering the
    /// new version for every package that changed.
    pub async fn check_for_updates(
        &self,
        packages: &[String],
    ) -> Result<BTreeMap<String, VersionChange>> {
        let mut updates = BTreeMap::new();

        for package in packages {
            let stored = self.get_stored_version(package)?;
            let Some(latest) = self.get_latest_version(package).await else {
                continue;
            };

            if stored.as_deref() == Some(latest.as_str()) {
                debug!(package = %package, version = %latest, "no new release");
                continue;
            }

            info!(
                package = %package,
                old = stored.as_deref().unwrap_or("<none>"),
                new = %latest,
                "new release detected"
            );
            self.update_stored_version(package, &latest)?;
            updates.insert(
                package.clone(),
                VersionChange {
                    old: stored,
                    new: latest,
                },
            );
        }

        Ok(updates)
    }

    /// Poll `packages` every `interval` until `shutdown` resolves, calling
    /// `on_update` for each detected release. The first check happens
    /// immediately.
    pub async fn watch_continuously<F, Fut, S>(
        &self,
        packages: &[String],
        interval: Duration,
        mut on_update: F,
        shutdown: S,
    ) -> Result<()>
    where
        F: FnMut(String, VersionChange) -> Fut,
        Fut: Future<Output = ()>,
        S: Future<Output = ()>,
    {
        if interval.is_zero() {
            return Err(WaryError::ConfigError(
                "watch interval must be non-zero".to_string(),
            ));
        }
        info!(packages = packages.len(), ?interval, "watching packages");
        tokio::pin!(shutdown);
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("shutdown requested; stopping watcher");
                    return Ok(());
                }
                _ = ticker.tick() => {
                    for (package, change) in self.check_for_updates(packages).await? {
                        on_update(package, change).await;
                    }
                }
            }
        }
    }
}

fn store_err(err: anyhow::Error) -> WaryError {
    WaryError::Other(err.context("version store"))
}
