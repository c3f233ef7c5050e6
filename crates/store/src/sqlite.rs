//! SQLite backend.
//!
//! One table per destination with `raw_time` as primary key; batches are
//! written inside a single transaction with `ON CONFLICT (raw_time) DO NOTHING`.

use crate::tick_store::{create_table_sql, insert_sql, TickStore};
use rusqlite::{params, Connection, ErrorCode};
use scid_core::config::validate_identifier;
use scid_core::{Error, RawTime, Result, Tick};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

/// How long SQLite waits on a locked database before reporting busy.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Map SQLite failures onto the store error taxonomy.
fn map_err(err: rusqlite::Error) -> Error {
    match &err {
        rusqlite::Error::SqliteFailure(e, _)
            if matches!(e.code, ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked) =>
        {
            Error::transient_store(err.to_string())
        }
        _ => Error::persistent_store(err.to_string()),
    }
}

/// Tick store backed by a SQLite database file.
pub struct SqliteTickStore {
    conn: Mutex<Connection>,
}

impl std::fmt::Debug for SqliteTickStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteTickStore").finish_non_exhaustive()
    }
}

impl SqliteTickStore {
    /// Open (or create) a database file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref()).map_err(map_err)?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))
            .map_err(map_err)?;
        conn.pragma_update(None, "synchronous", "NORMAL")
            .map_err(map_err)?;
        Self::from_connection(conn)
    }

    /// Open a private in-memory database.
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory().map_err(map_err)?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.busy_timeout(BUSY_TIMEOUT).map_err(map_err)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::persistent_store("sqlite connection lock poisoned"))
    }
}

impl TickStore for SqliteTickStore {
    fn ensure_destination(&self, destination: &str) -> Result<()> {
        validate_identifier(destination)?;
        let conn = self.lock()?;
        conn.execute_batch(&create_table_sql(destination))
            .map_err(map_err)
    }

    fn append(&self, destination: &str, ticks: &[Tick]) -> Result<usize> {
        validate_identifier(destination)?;
        if ticks.is_empty() {
            return Ok(0);
        }

        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(map_err)?;
        let mut inserted = 0;
        {
            let mut stmt = tx.prepare_cached(&insert_sql(destination)).map_err(map_err)?;
            for tick in ticks {
                inserted += stmt
                    .execute(params![
                        tick.raw_time,
                        tick.timestamp_micros(),
                        tick.open,
                        tick.high,
                        tick.low,
                        tick.close,
                        tick.num_trades,
                        tick.volume,
                        tick.bid_volume,
                        tick.ask_volume,
                        &*tick.contract,
                        tick.bundle.code(),
                    ])
                    .map_err(map_err)?;
            }
        }
        tx.commit().map_err(map_err)?;
        Ok(inserted)
    }

    fn row_count(&self, destination: &str) -> Result<u64> {
        validate_identifier(destination)?;
        let conn = self.lock()?;
        let count: i64 = conn
            .query_row(&format!("SELECT COUNT(*) FROM \"{destination}\""), [], |row| {
                row.get(0)
            })
            .map_err(map_err)?;
        Ok(count as u64)
    }

    fn raw_time_range(&self, destination: &str) -> Result<Option<(RawTime, RawTime)>> {
        validate_identifier(destination)?;
        let conn = self.lock()?;
        let (min, max): (Option<i64>, Option<i64>) = conn
            .query_row(
                &format!("SELECT MIN(raw_time), MAX(raw_time) FROM \"{destination}\""),
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .map_err(map_err)?;
        Ok(min.zip(max))
    }

    fn contracts(&self, destination: &str) -> Result<Vec<String>> {
        validate_identifier(destination)?;
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT DISTINCT contract FROM \"{destination}\" ORDER BY contract"
            ))
            .map_err(map_err)?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(map_err)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(map_err)
    }
}
