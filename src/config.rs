use std::path::Path;

use anyhow::Context;
use serde::Deserialize;

/// Connection parameters for the remote spatial database service.
///
/// Captured once at session construction and never mutated; the pool uses the
/// same record to open replacement connections.
#[derive(Debug, Clone, Deserialize)]
pub struct ConnectionConfig {
    pub host: String,
    pub port: u16,
    /// Service instance or database name.
    pub instance: String,
    pub username: String,
    pub password: String,
    /// Maximum size of the session pool.
    pub pool_size: Option<u32>,
    /// Seconds a pooled session may sit idle before the pool evicts it.
    pub session_timeout_seconds: Option<u64>,
}

impl ConnectionConfig {
    pub fn load(config_path: &Path) -> anyhow::Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from(config_path).required(true))
            .add_source(config::Environment::with_prefix("HERONPOOL").separator("_"))
            .build()
            .with_context(|| {
                format!(
                    "failed to load configuration from {}",
                    config_path.display()
                )
            })?;
        let cfg: ConnectionConfig = settings.try_deserialize().with_context(|| {
            format!(
                "failed to deserialize configuration from {}",
                config_path.display()
            )
        })?;
        Ok(cfg)
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5151,
            instance: "sde".to_string(),
            username: String::new(),
            password: String::new(),
            pool_size: None,
            session_timeout_seconds: None,
        }
    }
}
