//! Client configuration.
//!
//! Settings are resolved in three layers: built-in defaults, an optional JSON
//! file, then `FLUXKV_*` environment variables.

use crate::error::{FluxError, FluxResult};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Environment variable prefix for overrides.
pub const ENV_PREFIX: &str = "FLUXKV_";

/// Tunables shared by the network loop and every transaction it serves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// First `on_error` backoff delay
    pub initial_backoff_ms: u64,
    /// Upper bound for the backoff delay unless a transaction overrides it
    pub max_backoff_ms: u64,
    /// How many versions behind the latest commit a read version may fall
    pub mvcc_window: i64,
    /// Default per-database watch limit
    pub max_watches: usize,
    /// Default transaction timeout; 0 disables it
    pub transaction_timeout_ms: u64,
    /// Default transaction size limit in bytes
    pub transaction_size_limit: usize,
    /// Name given to the thread started by `Api::start_network_thread`
    pub network_thread_name: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            initial_backoff_ms: 10,
            max_backoff_ms: 1_000,
            mvcc_window: 5_000_000,
            max_watches: 10_000,
            transaction_timeout_ms: 0,
            transaction_size_limit: 10_000_000,
            network_thread_name: "fluxkv-network".to_string(),
        }
    }
}

impl ClientConfig {
    /// Defaults overridden by the process environment.
    pub fn from_env() -> FluxResult<Self> {
        let mut config = Self::default();
        config.apply_overrides(|name| env::var(name).ok())?;
        Ok(config)
    }

    /// Load from a JSON file; missing fields take their defaults.
    pub fn load_from_file(path: &Path) -> FluxResult<Self> {
        let json = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&json)?;
        config.validate()?;
        Ok(config)
    }

    /// Persist as pretty-printed JSON, creating parent directories.
    pub fn save_to_file(&self, path: &Path) -> FluxResult<()> {
        let json = serde_json::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, json)?;
        Ok(())
    }

    /// Apply `FLUXKV_*` overrides fetched through `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> FluxResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |field: &str| lookup(&format!("{}{}", ENV_PREFIX, field.to_uppercase()));

        if let Some(v) = var("initial_backoff_ms") {
            self.initial_backoff_ms = parse_var("initial_backoff_ms", &v)?;
        }
        if let Some(v) = var("max_backoff_ms") {
            self.max_backoff_ms = parse_var("max_backoff_ms", &v)?;
        }
        if let Some(v) = var("mvcc_window") {
            self.mvcc_window = parse_var("mvcc_window", &v)?;
        }
        if let Some(v) = var("max_watches") {
            self.max_watches = parse_var("max_watches", &v)?;
        }
        if let Some(v) = var("transaction_timeout_ms") {
            self.transaction_timeout_ms = parse_var("transaction_timeout_ms", &v)?;
        }
        if let Some(v) = var("transaction_size_limit") {
            self.transaction_size_limit = parse_var("transaction_size_limit", &v)?;
        }
        if let Some(v) = var("network_thread_name") {
            self.network_thread_name = v;
        }
        self.validate()
    }

    /// Reject settings the engine cannot honor.
    pub fn validate(&self) -> FluxResult<()> {
        if self.initial_backoff_ms > self.max_backoff_ms {
            return Err(FluxError::Config(format!(
                "initial_backoff_ms ({}) exceeds max_backoff_ms ({})",
                self.initial_backoff_ms, self.max_backoff_ms
            )));
        }
        if self.mvcc_window <= 0 {
            return Err(FluxError::Config("mvcc_window must be positive".into()));
        }
        Ok(())
    }

    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }

    /// `None` when transactions never time out by default.
    pub fn transaction_timeout(&self) -> Option<Duration> {
        (self.transaction_timeout_ms > 0).then(|| Duration::from_millis(self.transaction_timeout_ms))
    }
}

fn parse_var<T: std::str::FromStr>(field: &str, raw: &str) -> FluxResult<T> {
    raw.trim().parse().map_err(|_| {
        FluxError::Config(format!(
            "{}{}: cannot parse {:?}",
            ENV_PREFIX,
            field.to_uppercase(),
            raw
        ))
    })
}
