// src/graph/mod.rs

//! Dependency graph: which downstream packages depend on which upstream.
//!
//! Edges are stored as one JSON document per upstream package
//! (`<data_dir>/graphs/<upstream>.json`) holding the list of its edges.

pub mod librariesio;

use std::sync::{Arc, Mutex};

use tracing::{debug, info};

use crate::errors::{Result, WaryError};
use crate::fs::{FileSystem, JsonStore};
use crate::model::{DependencyEdge, EdgeMetadata};

pub use librariesio::{DependentsIndex, LibrariesIo, import_dependents};

/// Read-only view of the graph consumed by the orchestrator.
pub trait DependencySource: Send + Sync {
    /// All edges whose upstream is `upstream`, in registration order.
    /// An unknown upstream yields an empty list, not an error.
    fn get_dependents(&self, upstream: &str) -> Result<Vec<DependencyEdge>>;
}

/// File-backed dependency graph.
#[derive(Debug)]
pub struct DependencyGraph {
    store: JsonStore,
    // Serialises the read-modify-write in `register_dependent`.
    write_lock: Mutex<()>,
}

impl DependencyGraph {
    pub fn new(fs: Arc<dyn FileSystem>, dir: impl Into<std::path::PathBuf>) -> Self {
        Self {
            store: JsonStore::new(fs, dir),
            write_lock: Mutex::new(()),
        }
    }

    /// Register `downstream` as a dependent of `upstream`.
    ///
    /// Registering an existing pair replaces its constraint and metadata in
    /// place of the old edge; the pair is never duplicated.
    pub fn register_dependent(
        &self,
        upstream: &str,
        downstream: &str,
        constraint: &str,
        metadata: EdgeMetadata,
    ) -> Result<DependencyEdge> {
        let _guard = self
            .write_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let mut edges = self.load(upstream)?;
        let before = edges.len();
        edges.retain(|e| e.downstream != downstream);
        let replaced = edges.len() != before;

        let edge = DependencyEdge::new(upstream, downstream, constraint, metadata);
        edges.push(edge.clone());

        self.store.put(upstream, &edges).map_err(graph_err)?;

        info!(
            upstream,
            downstream,
            replaced,
            "registered dependent"
        );
        Ok(edge)
    }

    /// Remove the edge for a pair; returns whether it existed.
    pub fn unregister_dependent(&self, upstream: &str, downstream: &str) -> Result<bool> {
        let _guard = self
            .write_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let mut edges = self.load(upstream)?;
        let before = edges.len();
        edges.retain(|e| e.downstream != downstream);
        if edges.len() == before {
            return Ok(false);
        }

        if edges.is_empty() {
            self.store.remove(upstream).map_err(graph_err)?;
        } else {
            self.store.put(upstream, &edges).map_err(graph_err)?;
        }
        debug!(upstream, downstream, "unregistered dependent");
        Ok(true)
    }

    /// Upstream packages that have at least one registered dependent.
    pub fn upstreams(&self) -> Result<Vec<String>> {
        self.store.keys().map_err(graph_err)
    }

    /// Every edge in the graph, grouped by upstream.
    pub fn all_edges(&self) -> Result<Vec<DependencyEdge>> {
        let mut all = Vec::new();
        for upstream in self.upstreams()? {
            all.extend(self.load(&upstream)?);
        }
        Ok(all)
    }

    fn load(&self, upstream: &str) -> Result<Vec<DependencyEdge>> {
        Ok(self
            .store
            .get::<Vec<DependencyEdge>>(upstream)
            .map_err(graph_err)?
            .unwrap_or_default())
    }
}

impl DependencySource for DependencyGraph {
    fn get_dependents(&self, upstream: &str) -> Result<Vec<DependencyEdge>> {
        self.load(upstream)
    }
}

fn graph_err(err: anyhow::Error) -> WaryError {
    WaryError::Graph(format!("{err:#}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::mock::MockFileSystem;

    fn graph() -> DependencyGraph {
        DependencyGraph::new(Arc::new(MockFileSystem::new()), "/data/graphs")
    }

    fn with_command(cmd: &str) -> EdgeMetadata {
        EdgeMetadata {
            test_command: Some(cmd.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn register_and_fetch_dependent() {
        let graph = graph();
        graph
            .register_dependent("dol", "my-package", "", with_command("pytest"))
            .unwrap();

        let deps = graph.get_dependents("dol").unwrap();
        assert_eq!(deps.len(), 1);
        assert_eq!(deps[0].downstream, "my-package");
        assert_eq!(deps[0].metadata.test_command.as_deref(), Some("pytest"));
    }

    #[test]
    fn unknown_upstream_has_no_dependents() {
        assert!(graph().get_dependents("nonexistent").unwrap().is_empty());
    }

    #[test]
    fn re_registering_a_pair_updates_in_place() {
        let graph = graph();
        graph
            .register_dependent("dol", "my-package", "", with_command("pytest"))
            .unwrap();
        graph
            .register_dependent("dol", "my-package", ">=0.2", with_command("pytest -v"))
            .unwrap();

        let deps = graph.get_dependents("dol").unwrap();
        assert_eq!(deps.len(), 1);
        assert_eq!(deps[0].constraint, ">=0.2");
        assert_eq!(deps[0].metadata.test_command.as_deref(), Some("pytest -v"));
    }

    #[test]
    fn all_edges_spans_upstreams() {
        let graph = graph();
        graph.register_dependent("dol", "package1", "", EdgeMetadata::default()).unwrap();
        graph.register_dependent("i2", "package2", "", EdgeMetadata::default()).unwrap();
        graph.register_dependent("qh", "package3", "", EdgeMetadata::default()).unwrap();

        assert_eq!(graph.all_edges().unwrap().len(), 3);
        assert_eq!(graph.upstreams().unwrap(), vec!["dol", "i2", "qh"]);
    }

    #[test]
    fn unregister_removes_only_that_pair() {
        let graph = graph();
        graph.register_dependent("dol", "a", "", EdgeMetadata::default()).unwrap();
        graph.register_dependent("dol", "b", "", EdgeMetadata::default()).unwrap();

        assert!(graph.unregister_dependent("dol", "a").unwrap());
        assert!(!graph.unregister_dependent("dol", "a").unwrap());

        let deps = graph.get_dependents("dol").unwrap();
        assert_eq!(deps.len(), 1);
        assert_eq!(deps[0].downstream, "b");
    }
}
