#![allow(dead_code)]

use wary::model::{DependencyEdge, EdgeMetadata};

/// Builder for `DependencyEdge` to simplify test setup.
pub struct EdgeBuilder {
    upstream: String,
    downstream: String,
    constraint: String,
    metadata: EdgeMetadata,
}

impl EdgeBuilder {
    pub fn new(upstream: &str, downstream: &str) -> Self {
        Self {
            upstream: upstream.to_string(),
            downstream: downstream.to_string(),
            constraint: String::new(),
            metadata: EdgeMetadata::default(),
        }
    }

    pub fn constraint(mut self, constraint: &str) -> Self {
        self.constraint = constraint.to_string();
        self
    }

    pub fn test_command(mut self, cmd: &str) -> Self {
        self.metadata.test_command = Some(cmd.to_string());
        self
    }

    pub fn contact(mut self, contact: &str) -> Self {
        self.metadata.contact = Some(contact.to_string());
        self
    }

    pub fn build(self) -> DependencyEdge {
        DependencyEdge::new(self.upstream, self.downstream, self.constraint, self.metadata)
    }
}

/// One edge per downstream name, all on `upstream`, default metadata.
pub fn edges(upstream: &str, downstreams: &[&str]) -> Vec<DependencyEdge> {
    downstreams
        .iter()
        .map(|d| EdgeBuilder::new(upstream, d).build())
        .collect()
}
