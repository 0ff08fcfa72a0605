// src/exec/connections.rs

//! Lookup of warehouse connections by id.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::config::model::{ConfigFile, ConnectionConfig};
use crate::errors::{IngestError, Result};
use crate::exec::sql::{PgConnection, SqlConnection};
use crate::types::parse_duration;

/// Resolves a connection id to a shared connection.
pub trait ConnectionRegistry: Send + Sync {
    fn lookup(&self, id: &str) -> Option<Arc<dyn SqlConnection>>;
}

/// Connection registry holding one pool per configured connection.
#[derive(Clone, Default)]
pub struct Connections {
    by_id: BTreeMap<String, Arc<dyn SqlConnection>>,
}

impl Connections {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a connection under `id`.
    pub fn with_connection(mut self, id: impl Into<String>, conn: Arc<dyn SqlConnection>) -> Self {
        self.by_id.insert(id.into(), conn);
        self
    }

    /// Create a lazy pool for every `[connection.<id>]` section.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn from_config(cfg: &ConfigFile) -> Result<Self> {
        let mut connections = Self::new();
        for (id, cc) in cfg.connection.iter() {
            let url = resolve_url(id, cc)?;
            let acquire_timeout = cc
                .acquire_timeout
                .as_deref()
                .map(parse_duration)
                .transpose()
                .map_err(|e| IngestError::ConfigError(format!("connection '{id}': {e}")))?;
            let conn = PgConnection::connect_lazy(id, &url, cc.max_connections, acquire_timeout)?;
            connections = connections.with_connection(id, Arc::new(conn));
        }
        Ok(connections)
    }
}

impl ConnectionRegistry for Connections {
    fn lookup(&self, id: &str) -> Option<Arc<dyn SqlConnection>> {
        self.by_id.get(id).cloned()
    }
}

/// Resolve the URL of a connection: `url` wins, else the environment
/// variable named by `url_env`.
pub fn resolve_url(id: &str, cc: &ConnectionConfig) -> Result<String> {
    if let Some(ref url) = cc.url {
        return Ok(url.clone());
    }
    match cc.url_env {
        Some(ref var) => std::env::var(var).map_err(|_| {
            IngestError::ConfigError(format!(
                "connection '{id}': environment variable '{var}' is not set"
            ))
        }),
        None => Err(IngestError::ConfigError(format!(
            "connection '{id}' needs either `url` or `url_env`"
        ))),
    }
}
