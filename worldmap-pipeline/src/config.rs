//! `config.json` handling.
//!
//! Loading never fails: a missing file is created with defaults, unreadable
//! or malformed files fall back to defaults, and each field that is missing,
//! mistyped or out of range falls back to its own default.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::Value;
use worldmap_storage::FlushPolicy;

pub const CONFIG_FILE: &str = "config.json";

pub const DEFAULT_API_URL: &str = "http://localhost:3000/api/worker/process-chunk";
pub const DEFAULT_REQUEST_TIMEOUT_MILLIS: u64 = 30_000;
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_BATCH_SIZE: u32 = 10;
pub const DEFAULT_LEDGER_FLUSH_INTERVAL: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    pub api_url: String,
    pub request_timeout_millis: u64,
    pub max_retries: u32,
    /// Advisory only; the pipeline does not batch requests.
    pub batch_size: u32,
    pub debug_mode: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Ledger writes happen every this many delivered chunks (1 = every chunk).
    pub ledger_flush_interval: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            request_timeout_millis: DEFAULT_REQUEST_TIMEOUT_MILLIS,
            max_retries: DEFAULT_MAX_RETRIES,
            batch_size: DEFAULT_BATCH_SIZE,
            debug_mode: false,
            api_key: None,
            ledger_flush_interval: DEFAULT_LEDGER_FLUSH_INTERVAL,
        }
    }
}

impl Config {
    /// Load `config.json` from `data_dir`, writing defaults if it does not exist.
    pub fn load_or_init(data_dir: &Path) -> Self {
        let path = data_dir.join(CONFIG_FILE);

        if !path.exists() {
            let config = Self::default();
            match config.save(&path) {
                Ok(()) => log::info!("Wrote default configuration to {}", path.display()),
                Err(e) => log::error!("Failed to save config: {:#}", e),
            }
            return config;
        }

        match Self::read(&path) {
            Ok(config) => config,
            Err(e) => {
                log::warn!("Failed to load config: {:#}", e);
                log::warn!("Using default configuration");
                Self::default()
            }
        }
    }

    /// Read `config.json` without logging or creating anything.
    pub fn peek(data_dir: &Path) -> Option<Self> {
        Self::read(&data_dir.join(CONFIG_FILE)).ok()
    }

    fn read(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let value: Value = serde_json::from_str(&text)
            .with_context(|| format!("{} is not valid JSON", path.display()))?;
        Ok(Self::from_value(&value))
    }

    /// Pick fields out of a JSON object one by one.
    pub fn from_value(value: &Value) -> Self {
        let defaults = Self::default();

        let api_url = value
            .get("apiUrl")
            .and_then(Value::as_str)
            .filter(|url| !url.trim().is_empty())
            .map(str::to_string)
            .unwrap_or(defaults.api_url);

        let request_timeout_millis = positive(value, &["requestTimeoutMillis", "requestTimeout"])
            .unwrap_or(defaults.request_timeout_millis);

        let max_retries = positive(value, &["maxRetries"])
            .and_then(|v| u32::try_from(v).ok())
            .unwrap_or(defaults.max_retries);

        let batch_size = positive(value, &["batchSize"])
            .and_then(|v| u32::try_from(v).ok())
            .unwrap_or(defaults.batch_size);

        let debug_mode = value
            .get("debugMode")
            .and_then(Value::as_bool)
            .unwrap_or(defaults.debug_mode);

        let api_key = value
            .get("apiKey")
            .and_then(Value::as_str)
            .filter(|key| !key.trim().is_empty())
            .map(str::to_string);

        let ledger_flush_interval = positive(value, &["ledgerFlushInterval"])
            .and_then(|v| u32::try_from(v).ok())
            .unwrap_or(defaults.ledger_flush_interval);

        Self {
            api_url,
            request_timeout_millis,
            max_retries,
            batch_size,
            debug_mode,
            api_key,
            ledger_flush_interval,
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
        }
        let json = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_millis)
    }

    pub fn flush_policy(&self) -> FlushPolicy {
        FlushPolicy::from_interval(self.ledger_flush_interval as usize)
    }

    /// One-line description for logs and reports. Never includes the API key.
    pub fn summary(&self) -> String {
        format!(
            "api={} timeout={}ms retries={} flush_every={} debug={} auth={}",
            self.api_url,
            self.request_timeout_millis,
            self.max_retries,
            self.ledger_flush_interval,
            self.debug_mode,
            if self.api_key.is_some() { "bearer" } else { "none" },
        )
    }
}

/// First of `keys` holding a positive integer.
fn positive(value: &Value, keys: &[&str]) -> Option<u64> {
    keys.iter()
        .find_map(|key| value.get(*key))
        .and_then(Value::as_i64)
        .filter(|v| *v > 0)
        .map(|v| v as u64)
}
