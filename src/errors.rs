// src/errors.rs

//! Crate-wide error aliases and helpers.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum WaryError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    /// The dependency graph could not be read or written.
    #[error("Dependency graph unavailable: {0}")]
    Graph(String),

    /// The results ledger could not be read or written.
    #[error("Results ledger unavailable: {0}")]
    Ledger(String),

    #[error("Duplicate test run id: {0}")]
    DuplicateRun(String),

    #[error("Test run not found: {0}")]
    RunNotFound(String),

    #[error("Package index error: {0}")]
    Index(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, WaryError>;
