//! Append interface of the backing time-series store.

use crate::{DuckDbTickStore, MemoryTickStore, SqliteTickStore};
use scid_core::config::{StoreBackend, StoreConfig};
use scid_core::{RawTime, Result, Tick};
use std::sync::Arc;

/// Column list shared by the SQL backends.
pub(crate) const COLUMNS: &str = "raw_time, ts_us, open, high, low, close, \
     num_trades, volume, bid_volume, ask_volume, contract, bundle";

/// Narrow bulk-write interface of the time-series store.
///
/// Each destination holds one symbol's continuous series and enforces
/// uniqueness on `raw_time`. Appends are insert-or-ignore, so re-sending a
/// batch that was partially applied is safe.
pub trait TickStore: Send + Sync {
    /// Create the destination if it does not exist.
    fn ensure_destination(&self, destination: &str) -> Result<()>;

    /// Insert an ordered batch, ignoring rows whose key already exists.
    ///
    /// Returns the number of rows actually written, which may be less than
    /// `ticks.len()`.
    fn append(&self, destination: &str, ticks: &[Tick]) -> Result<usize>;

    /// Total rows in a destination.
    fn row_count(&self, destination: &str) -> Result<u64>;

    /// Smallest and largest stored `raw_time`.
    fn raw_time_range(&self, destination: &str) -> Result<Option<(RawTime, RawTime)>>;

    /// Distinct contract codes stored in a destination, sorted.
    fn contracts(&self, destination: &str) -> Result<Vec<String>>;
}

/// Open the configured backend.
pub fn open_store(config: &StoreConfig) -> Result<Arc<dyn TickStore>> {
    let store: Arc<dyn TickStore> = match config.backend {
        StoreBackend::Sqlite => Arc::new(SqliteTickStore::open(&config.path)?),
        StoreBackend::Duckdb => Arc::new(DuckDbTickStore::open(&config.path)?),
        StoreBackend::Memory => Arc::new(MemoryTickStore::new()),
    };
    tracing::info!(backend = ?config.backend, path = %config.path.display(), "opened tick store");
    Ok(store)
}

/// DDL for one destination.
pub(crate) fn create_table_sql(destination: &str) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS \"{destination}\" (
            raw_time BIGINT PRIMARY KEY,
            ts_us BIGINT NOT NULL,
            open DOUBLE NOT NULL,
            high DOUBLE NOT NULL,
            low DOUBLE NOT NULL,
            close DOUBLE NOT NULL,
            num_trades BIGINT NOT NULL,
            volume BIGINT NOT NULL,
            bid_volume BIGINT NOT NULL,
            ask_volume BIGINT NOT NULL,
            contract VARCHAR NOT NULL,
            bundle SMALLINT NOT NULL
        )"
    )
}

/// Insert statement for one destination that skips rows whose `raw_time`
/// already exists. Any other constraint violation still fails the insert.
pub(crate) fn insert_sql(destination: &str) -> String {
    format!(
        "INSERT INTO \"{destination}\" ({COLUMNS}) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
         ON CONFLICT (raw_time) DO NOTHING"
    )
}
