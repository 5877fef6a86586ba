// config lets you read a separate config file
use config::{Config, Environment, File};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::Result;
use crate::repository::RetryPolicy;

/// Runtime settings. Defaults are overridden by an optional TOML file and
/// then by `ROWKEEPER__*` environment variables, e.g.
/// `ROWKEEPER__BUSY_TIMEOUT_MS=2000`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Settings {
    /// SQLite file. In-memory when absent.
    #[serde(default)]
    pub database: Option<PathBuf>,
    pub busy_timeout_ms: u64,
    pub cache_metadata: bool,
    pub retry_attempts: u32,
    pub retry_delay_ms: u64,
    pub bind: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database: None,
            busy_timeout_ms: 5000,
            cache_metadata: true,
            retry_attempts: 3,
            retry_delay_ms: 200,
            bind: "127.0.0.1:8080".into(),
        }
    }
}

impl Settings {
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let defaults = Self::default();
        let mut builder = Config::builder()
            .set_default("busy_timeout_ms", defaults.busy_timeout_ms as i64)?
            .set_default("cache_metadata", defaults.cache_metadata)?
            .set_default("retry_attempts", defaults.retry_attempts as i64)?
            .set_default("retry_delay_ms", defaults.retry_delay_ms as i64)?
            .set_default("bind", defaults.bind)?;
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(false));
        }
        let settings = builder
            .add_source(Environment::with_prefix("ROWKEEPER").separator("__").try_parsing(true))
            .build()?
            .try_deserialize()?;
        Ok(settings)
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.retry_attempts, Duration::from_millis(self.retry_delay_ms))
    }
}
