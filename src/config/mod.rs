// src/config/mod.rs

//! Configuration loading and validation for ingestdag.
//!
//! Responsibilities:
//! - Define the TOML-backed data model (`model.rs`).
//! - Load a config file from disk (`loader.rs`).
//! - Validate pipeline settings, connections and durations (`validate.rs`).

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{load_and_validate, load_from_path, parse_str};
pub use model::{
    ConfigFile, ConnectionConfig, DefaultSection, PipelineSection, RawConfigFile, TaskConfig,
};
pub use validate::validate_raw_config;
