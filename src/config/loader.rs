// src/config/loader.rs

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::config::model::{ConfigFile, RawConfigFile};
use crate::errors::Result;

/// Load a configuration file from a given path and return the raw `RawConfigFile`.
///
/// This only performs TOML deserialization; it does **not** perform semantic
/// validation. Use [`load_and_validate`] for that.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawConfigFile> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)?;

    parse_str(&contents)
}

/// Parse a configuration from TOML text.
pub fn parse_str(contents: &str) -> Result<RawConfigFile> {
    let config: RawConfigFile = toml::from_str(contents)?;
    Ok(config)
}

/// Load a configuration file from path and run validation.
///
/// - Reads TOML.
/// - Applies defaults (handled by `serde` + `Default` impls).
/// - Checks pipeline settings, connection references and durations.
///
/// The returned [`ConfigFile`] still has to go through
/// [`crate::pipeline::Pipeline::from_config`] to build the dependency graph.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<ConfigFile> {
    let path = path.as_ref();
    let raw_config = load_from_path(path)?;
    let config = ConfigFile::try_from(raw_config)?;
    debug!(
        path = %path.display(),
        pipeline = %config.pipeline.id,
        tasks = config.task.len(),
        "loaded pipeline config"
    );
    Ok(config)
}

/// Default config path: `Pipeline.toml` in the current working directory.
pub fn default_config_path() -> PathBuf {
    PathBuf::from("Pipeline.toml")
}
