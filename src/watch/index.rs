// src/watch/index.rs

//! Where the latest released version of a package comes from.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use crate::errors::{Result, WaryError};

pub const DEFAULT_INDEX_URL: &str = "https://pypi.org/pypi";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

pub type VersionFuture<'a> = Pin<Box<dyn Future<Output = Result<Option<String>>> + Send + 'a>>;

/// A package index that can report the latest released version.
pub trait PackageIndex: Send + Sync {
    /// `Ok(None)` when the index does not know the package.
    fn latest_version<'a>(&'a self, package: &'a str) -> VersionFuture<'a>;
}

/// PyPI JSON API (`<base>/<package>/json`, field `info.version`).
#[derive(Debug, Clone)]
pub struct PypiIndex {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct ProjectDocument {
    info: ProjectInfo,
}

#[derive(Debug, Deserialize)]
struct ProjectInfo {
    version: String,
}

impl PypiIndex {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!("wary/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| WaryError::Index(format!("building HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn project_url(&self, package: &str) -> String {
        format!("{}/{}/json", self.base_url, package)
    }

    async fn fetch_latest(&self, package: &str) -> Result<Option<String>> {
        let url = self.project_url(package);
        debug!(%url, "querying package index");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| WaryError::Index(format!("GET {url}: {e}")))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = response
            .error_for_status()
            .map_err(|e| WaryError::Index(format!("GET {url}: {e}")))?;

        let doc: ProjectDocument = response
            .json()
            .await
            .map_err(|e| WaryError::Index(format!("decoding {url}: {e}")))?;
        Ok(Some(doc.info.version))
    }
}

impl PackageIndex for PypiIndex {
    fn latest_version<'a>(&'a self, package: &'a str) -> VersionFuture<'a> {
        Box::pin(self.fetch_latest(package))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_project_urls_without_double_slashes() {
        let index = PypiIndex::new("https://pypi.org/pypi/").unwrap();
        assert_eq!(index.project_url("dol"), "https://pypi.org/pypi/dol/json");
    }

    #[test]
    fn decodes_the_version_field() {
        let doc: ProjectDocument =
            serde_json::from_str(r#"{"info": {"version": "0.2.51", "name": "dol"}, "releases": {}}"#)
                .unwrap();
        assert_eq!(doc.info.version, "0.2.51");
    }
}
