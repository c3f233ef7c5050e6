//! Configuration structures for the scid-sync system.
//!
//! The configuration is loaded once per run, validated before any file I/O
//! and never mutated afterwards.

use crate::error::{Error, Result};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Main configuration for a sync run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Backing store configuration.
    pub store: StoreConfig,
    /// Directory holding checkpoint files.
    pub checkpoint_dir: PathBuf,
    /// Batching and pipelining configuration.
    pub batch: BatchConfig,
    /// Retry policy for transient store errors.
    pub retry: RetryConfig,
    /// Number of symbols synced in parallel (0 = one per CPU).
    pub workers: usize,
    /// Symbols keyed by name (e.g. "ES", "NQ").
    pub symbols: BTreeMap<String, SymbolConfig>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            store: StoreConfig::default(),
            checkpoint_dir: PathBuf::from("checkpoints"),
            batch: BatchConfig::default(),
            retry: RetryConfig::default(),
            workers: 0,
            symbols: BTreeMap::new(),
        }
    }
}

impl SyncConfig {
    /// Load configuration from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&text)
    }

    /// Parse configuration from a JSON string.
    pub fn from_json_str(text: &str) -> Result<Self> {
        let config: SyncConfig = serde_json::from_str(text)?;
        Ok(config)
    }

    /// Get configuration for a symbol.
    pub fn symbol(&self, symbol: &str) -> Result<&SymbolConfig> {
        self.symbols
            .get(symbol)
            .ok_or_else(|| Error::config(format!("no configuration for symbol {symbol}")))
    }

    /// All configured symbol names, sorted.
    pub fn symbol_names(&self) -> Vec<String> {
        self.symbols.keys().cloned().collect()
    }

    /// Effective worker count.
    pub fn effective_workers(&self) -> usize {
        if self.workers > 0 {
            self.workers
        } else {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        }
    }

    /// Validate thresholds and per-symbol settings that do not depend on the
    /// contract timeline.
    pub fn validate(&self) -> Result<()> {
        self.batch.validate()?;
        self.retry.validate()?;
        // Table names are case-insensitive in the stores.
        let mut destinations: BTreeMap<String, &str> = BTreeMap::new();
        for (name, symbol) in &self.symbols {
            let destination = symbol.destination(name);
            validate_identifier(&destination)?;
            if let Some(other) = destinations.insert(destination.to_ascii_lowercase(), name) {
                return Err(Error::config(format!(
                    "symbols {other} and {name} share destination {destination:?}"
                )));
            }
            if !(symbol.price_multiplier.is_finite() && symbol.price_multiplier > 0.0) {
                return Err(Error::config(format!(
                    "symbol {name}: price_multiplier must be a positive finite number"
                )));
            }
        }
        Ok(())
    }
}

/// Check that a destination name is a plain identifier.
pub fn validate_identifier(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name.len() <= 63
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !name.starts_with(|c: char| c.is_ascii_digit());
    if valid {
        Ok(())
    } else {
        Err(Error::config(format!("invalid destination name {name:?}")))
    }
}

/// Backing store selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    Sqlite,
    Duckdb,
    Memory,
}

/// Backing store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Store implementation.
    pub backend: StoreBackend,
    /// Database file (ignored by the memory backend).
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Sqlite,
            path: PathBuf::from("ticks.sqlite"),
        }
    }
}

/// Batching configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Rows per bulk write.
    pub max_rows: usize,
    /// Maximum age of an open batch before it is sealed (ms).
    pub max_age_ms: u64,
    /// Sealed batches buffered between the decode and write stages.
    pub queue_depth: usize,
    /// Timeout for one bulk write (ms).
    pub flush_timeout_ms: u64,
    /// Rows between progress log lines.
    pub progress_interval: u64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_rows: 10_000,
            max_age_ms: 5_000,
            queue_depth: 3,
            flush_timeout_ms: 30_000,
            progress_interval: 100_000,
        }
    }
}

impl BatchConfig {
    fn validate(&self) -> Result<()> {
        if self.max_rows == 0 {
            return Err(Error::config("batch.max_rows must be at least 1"));
        }
        if self.queue_depth == 0 {
            return Err(Error::config("batch.queue_depth must be at least 1"));
        }
        if self.flush_timeout_ms == 0 {
            return Err(Error::config("batch.flush_timeout_ms must be at least 1"));
        }
        Ok(())
    }
}

/// Retry policy for transient store errors.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts including the first.
    pub max_attempts: usize,
    /// First backoff delay (ms).
    pub base_delay_ms: u64,
    /// Backoff cap (ms).
    pub max_delay_ms: u64,
    /// Jitter as a fraction of the delay (0-1).
    pub jitter_pct: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 250,
            max_delay_ms: 5_000,
            jitter_pct: 0.2,
        }
    }
}

impl RetryConfig {
    fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(Error::config("retry.max_attempts must be at least 1"));
        }
        if !(0.0..=1.0).contains(&self.jitter_pct) {
            return Err(Error::config("retry.jitter_pct must be within 0..=1"));
        }
        Ok(())
    }
}

/// Configuration for a symbol (ES, NQ, etc.).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymbolConfig {
    /// Destination table; defaults to the symbol name.
    #[serde(default)]
    pub table_name: Option<String>,
    /// Factor applied to prices before loading.
    #[serde(default = "default_price_multiplier")]
    pub price_multiplier: f64,
    /// Contract files in rollover order.
    #[serde(default)]
    pub contracts: Vec<ContractConfig>,
}

fn default_price_multiplier() -> f64 {
    1.0
}

impl SymbolConfig {
    /// Destination name in the backing store.
    pub fn destination(&self, symbol: &str) -> String {
        self.table_name
            .clone()
            .unwrap_or_else(|| symbol.to_string())
    }
}

/// Configuration for a single contract file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContractConfig {
    /// Path to the contract file.
    pub file: PathBuf,
    /// Contract code; derived from the file name when absent.
    #[serde(default)]
    pub contract: Option<String>,
    /// Inclusive start (`YYYY-MM-DD` or RFC 3339).
    #[serde(default, deserialize_with = "deserialize_date")]
    pub start_date: Option<DateTime<Utc>>,
    /// Exclusive end (`YYYY-MM-DD` or RFC 3339).
    #[serde(default, deserialize_with = "deserialize_date")]
    pub end_date: Option<DateTime<Utc>>,
}

/// Parse a `YYYY-MM-DD` date (UTC midnight) or an RFC 3339 instant.
pub fn parse_date(text: &str) -> Result<DateTime<Utc>> {
    if let Ok(date) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
        if let Some(midnight) = date.and_hms_opt(0, 0, 0) {
            return Ok(midnight.and_utc());
        }
    }
    DateTime::parse_from_rfc3339(text)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::config(format!("invalid date {text:?}: {e}")))
}

fn deserialize_date<'de, D>(deserializer: D) -> std::result::Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let text: Option<String> = Option::deserialize(deserializer)?;
    match text {
        Some(text) => parse_date(&text)
            .map(Some)
            .map_err(serde::de::Error::custom),
        None => Ok(None),
    }
}
