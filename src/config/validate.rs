// src/config/validate.rs

use crate::config::model::{ConfigFile, RawConfigFile};
use crate::errors::{Result, WaryError};

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = WaryError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_raw_config(&raw)?;
        Ok(ConfigFile::new_unchecked(
            raw.orchestrator,
            raw.storage,
            raw.watch,
        ))
    }
}

fn validate_raw_config(cfg: &RawConfigFile) -> Result<()> {
    validate_orchestrator(cfg)?;
    validate_watch(cfg)?;
    Ok(())
}

fn validate_orchestrator(cfg: &RawConfigFile) -> Result<()> {
    let o = &cfg.orchestrator;
    if o.concurrency == 0 {
        return Err(WaryError::ConfigError(
            "[orchestrator].concurrency must be >= 1 (got 0)".to_string(),
        ));
    }
    if o.timeout_secs == 0 {
        return Err(WaryError::ConfigError(
            "[orchestrator].timeout_secs must be >= 1 (got 0)".to_string(),
        ));
    }
    if o.default_test_command.trim().is_empty() {
        return Err(WaryError::ConfigError(
            "[orchestrator].default_test_command must not be empty".to_string(),
        ));
    }
    if o.python.trim().is_empty() {
        return Err(WaryError::ConfigError(
            "[orchestrator].python must not be empty".to_string(),
        ));
    }
    Ok(())
}

fn validate_watch(cfg: &RawConfigFile) -> Result<()> {
    let w = &cfg.watch;
    if w.interval_secs == 0 {
        return Err(WaryError::ConfigError(
            "[watch].interval_secs must be >= 1 (got 0)".to_string(),
        ));
    }
    if !(w.index_url.starts_with("http://") || w.index_url.starts_with("https://")) {
        return Err(WaryError::ConfigError(format!(
            "[watch].index_url must be an http(s) URL (got '{}')",
            w.index_url
        )));
    }
    if let Some(bad) = w.packages.iter().find(|p| p.trim().is_empty()) {
        return Err(WaryError::ConfigError(format!(
            "[watch].packages contains an empty name ({bad:?})"
        )));
    }
    Ok(())
}
