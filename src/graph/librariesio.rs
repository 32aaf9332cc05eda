// src/graph/librariesio.rs

//! Seeding the graph from the Libraries.io dependents API.

use std::collections::{HashSet, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::errors::{Result, WaryError};
use crate::model::{DependencyEdge, EdgeMetadata};

use super::DependencyGraph;

pub const DEFAULT_LIBRARIES_IO_URL: &str = "https://libraries.io/api";

/// Value of the `source` metadata key on imported edges.
pub const LIBRARIES_IO_SOURCE: &str = "librariesio";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const PER_PAGE: &str = "100";

/// A package reported as depending on the queried one.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RemoteDependent {
    pub name: String,
    /// Constraint on the queried package, when the index knows it.
    #[serde(default)]
    pub requirements: Option<String>,
}

pub type DependentsFuture<'a> =
    Pin<Box<dyn Future<Output = Result<Vec<RemoteDependent>>> + Send + 'a>>;

/// A remote index that can list the dependents of a package.
pub trait DependentsIndex: Send + Sync {
    fn dependents<'a>(&'a self, package: &'a str) -> DependentsFuture<'a>;
}

/// Libraries.io client (`<base>/pypi/<package>/dependents`).
#[derive(Debug, Clone)]
pub struct LibrariesIo {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl LibrariesIo {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!("wary/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| WaryError::Index(format!("building HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        })
    }

    /// Endpoint without the query string, so the key never reaches logs.
    fn dependents_url(&self, package: &str) -> String {
        format!("{}/pypi/{}/dependents", self.base_url, package)
    }

    async fn fetch_dependents(&self, package: &str) -> Result<Vec<RemoteDependent>> {
        let url = self.dependents_url(package);
        debug!(%url, "querying dependents");

        let response = self
            .client
            .get(&url)
            .query(&[("api_key", self.api_key.as_str()), ("per_page", PER_PAGE)])
            .send()
            .await
            .map_err(|e| WaryError::Index(format!("GET {url}: {}", e.without_url())))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        let response = response
            .error_for_status()
            .map_err(|e| WaryError::Index(format!("GET {url}: {}", e.without_url())))?;

        response
            .json()
            .await
            .map_err(|e| WaryError::Index(format!("decoding {url}: {}", e.without_url())))
    }
}

impl DependentsIndex for LibrariesIo {
    fn dependents<'a>(&'a self, package: &'a str) -> DependentsFuture<'a> {
        Box::pin(self.fetch_dependents(package))
    }
}

/// Register the dependents of `package` in `graph`, then theirs, down to
/// `depth` further levels (`depth = 0` imports direct dependents only).
///
/// Each package is queried at most once. A failed lookup of `package`
/// itself is an error; failures further down are logged and skipped.
/// Returns the edges registered, in discovery order.
pub async fn import_dependents(
    index: &dyn DependentsIndex,
    graph: &DependencyGraph,
    package: &str,
    depth: u32,
) -> Result<Vec<DependencyEdge>> {
    let mut imported = Vec::new();
    let mut queried = HashSet::new();
    let mut queue = VecDeque::from([(package.to_string(), 0u32)]);

    while let Some((upstream, level)) = queue.pop_front() {
        if !queried.insert(upstream.clone()) {
            continue;
        }

        let dependents = match index.dependents(&upstream).await {
            Ok(dependents) => dependents,
            Err(e) if level == 0 => return Err(e),
            Err(e) => {
                warn!(upstream = %upstream, error = %e, "skipping dependents lookup");
                continue;
            }
        };

        for dependent in dependents {
            let edge = graph.register_dependent(
                &upstream,
                &dependent.name,
                dependent.requirements.as_deref().unwrap_or_default(),
                imported_metadata(),
            )?;
            imported.push(edge);

            if level < depth {
                queue.push_back((dependent.name, level + 1));
            }
        }
    }

    info!(package, depth, edges = imported.len(), "imported dependents");
    Ok(imported)
}

fn imported_metadata() -> EdgeMetadata {
    let mut metadata = EdgeMetadata::default();
    metadata.extra.insert(
        "source".to_string(),
        serde_json::Value::String(LIBRARIES_IO_SOURCE.to_string()),
    );
    metadata
}
