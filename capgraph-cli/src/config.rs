//! Configuration loading: an optional TOML file layered over
//! `CoreConfig::default()`. One backend and four tunable sections, not a
//! multi-backend setup flow.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use capgraph_core::types::CoreConfig;

/// Resolve the directory the CLI keeps its database and checkpoint in.
#[must_use]
pub fn default_data_dir() -> PathBuf {
    dirs::data_dir().unwrap_or_else(|| PathBuf::from(".")).join("capgraph")
}

/// Load a [`CoreConfig`] from `path` if given, else fall back to defaults.
/// `CAPGRAPH_SCORER__LEARNING_RATE`-style env vars are not supported here;
/// only the on-disk TOML file is read, matching the scope of a one-shot CLI.
pub fn load_config(path: Option<&Path>) -> Result<CoreConfig> {
    let Some(path) = path else {
        return Ok(CoreConfig::default());
    };
    let text = std::fs::read_to_string(path).with_context(|| format!("reading config file {}", path.display()))?;
    let config: CoreConfig = toml::from_str(&text).with_context(|| format!("parsing config file {}", path.display()))?;
    Ok(config)
}
