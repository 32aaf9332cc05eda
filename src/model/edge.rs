// src/model/edge.rs

use std::collections::BTreeMap;
use std::fmt;
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Risk score assigned to freshly registered edges.
pub const DEFAULT_RISK_SCORE: f64 = 0.5;

/// One "downstream depends on upstream" relation.
///
/// Edges are keyed by `(upstream, downstream)`; the graph never holds two
/// edges for the same pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DependencyEdge {
    pub upstream: String,
    pub downstream: String,
    /// Version constraint as written by the registrant (e.g. `">=1.0.0"`).
    #[serde(default)]
    pub constraint: String,
    pub registered_at: DateTime<Utc>,
    #[serde(default = "default_risk_score")]
    pub risk_score: f64,
    #[serde(default)]
    pub metadata: EdgeMetadata,
}

fn default_risk_score() -> f64 {
    DEFAULT_RISK_SCORE
}

/// Free-form metadata attached to an edge.
///
/// `test_command` and `contact` are the well-known keys; anything else is
/// preserved verbatim in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EdgeMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl DependencyEdge {
    pub fn new(
        upstream: impl Into<String>,
        downstream: impl Into<String>,
        constraint: impl Into<String>,
        metadata: EdgeMetadata,
    ) -> Self {
        Self {
            upstream: upstream.into(),
            downstream: downstream.into(),
            constraint: constraint.into(),
            registered_at: Utc::now(),
            risk_score: DEFAULT_RISK_SCORE,
            metadata,
        }
    }

    /// The command to run for this dependent, falling back to `default`
    /// when the metadata has none (or an empty one).
    pub fn test_command_or<'a>(&'a self, default: &'a str) -> &'a str {
        match self.metadata.test_command.as_deref() {
            Some(cmd) if !cmd.trim().is_empty() => cmd,
            _ => default,
        }
    }

    pub fn parsed_constraint(&self) -> Option<VersionConstraint> {
        VersionConstraint::parse(&self.constraint)
    }

    /// Short label for listings: `" (>= 1.0.0)"`, the raw text in
    /// parentheses when it does not parse, or nothing when unconstrained.
    pub fn constraint_label(&self) -> String {
        match self.parsed_constraint() {
            Some(c) => format!(" ({c})"),
            None if self.constraint.trim().is_empty() => String::new(),
            None => format!(" ({})", self.constraint.trim()),
        }
    }
}

static CONSTRAINT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(===|~=|==|!=|<=|>=|<|>)\s*([^\s,;]+)").expect("constraint regex is valid")
});

/// The first clause of a version constraint, split into operator and
/// version (`">=1.0.0, <2"` → `(">=", "1.0.0")`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionConstraint {
    pub operator: String,
    pub version: String,
}

impl VersionConstraint {
    /// Returns `None` for empty or unrecognised constraints.
    pub fn parse(constraint: &str) -> Option<Self> {
        let caps = CONSTRAINT_RE.captures(constraint)?;
        Some(Self {
            operator: caps[1].to_string(),
            version: caps[2].to_string(),
        })
    }
}

impl fmt::Display for VersionConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.operator, self.version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn falls_back_to_default_test_command() {
        let edge = DependencyEdge::new("dol", "my-package", "", EdgeMetadata::default());
        assert_eq!(edge.test_command_or("pytest"), "pytest");

        let edge = DependencyEdge::new(
            "dol",
            "my-package",
            "",
            EdgeMetadata {
                test_command: Some("pytest -v".to_string()),
                ..Default::default()
            },
        );
        assert_eq!(edge.test_command_or("pytest"), "pytest -v");
    }

    #[test]
    fn parses_first_constraint_clause() {
        let c = VersionConstraint::parse(">=1.0.0, <2").unwrap();
        assert_eq!(c.operator, ">=");
        assert_eq!(c.version, "1.0.0");

        let c = VersionConstraint::parse("~= 0.2").unwrap();
        assert_eq!(c.operator, "~=");
        assert_eq!(c.version, "0.2");

        assert!(VersionConstraint::parse("").is_none());
        assert!(VersionConstraint::parse("latest").is_none());
    }

    #[test]
    fn constraint_labels() {
        let label = |c: &str| {
            DependencyEdge::new("dol", "pkg", c, EdgeMetadata::default()).constraint_label()
        };
        assert_eq!(label(">=1.0.0, <2"), " (>= 1.0.0)");
        assert_eq!(label("==0.2.51"), " (== 0.2.51)");
        assert_eq!(label("  "), "");
        assert_eq!(label("latest"), " (latest)");
    }

    #[test]
    fn extra_metadata_survives_json() {
        let json = r#"{
            "upstream": "dol",
            "downstream": "pkg",
            "registered_at": "2024-01-01T00:00:00Z",
            "metadata": {"test_command": "pytest", "source": "librariesio"}
        }"#;
        let edge: DependencyEdge = serde_json::from_str(json).unwrap();
        assert_eq!(edge.risk_score, DEFAULT_RISK_SCORE);
        assert_eq!(edge.metadata.test_command.as_deref(), Some("pytest"));
        assert_eq!(
            edge.metadata.extra.get("source"),
            Some(&serde_json::Value::String("librariesio".to_string()))
        );
    }
}
