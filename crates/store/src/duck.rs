//! DuckDB backend.

use crate::tick_store::{create_table_sql, insert_sql, TickStore};
use duckdb::{params, Connection};
use scid_core::config::validate_identifier;
use scid_core::{Error, RawTime, Result, Tick};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// Lock conflicts are retryable; everything else is not.
fn map_err(err: duckdb::Error) -> Error {
    let msg = err.to_string();
    let lower = msg.to_ascii_lowercase();
    if lower.contains("lock") || lower.contains("conflict") {
        Error::transient_store(msg)
    } else {
        Error::persistent_store(msg)
    }
}

/// Tick store backed by a DuckDB database file.
pub struct DuckDbTickStore {
    conn: Mutex<Connection>,
}

impl std::fmt::Debug for DuckDbTickStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DuckDbTickStore").finish_non_exhaustive()
    }
}

impl DuckDbTickStore {
    /// Open (or create) a database file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref()).map_err(map_err)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open a private in-memory database.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(map_err)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::persistent_store("duckdb connection lock poisoned"))
    }
}

fn count_rows(conn: &Connection, destination: &str) -> duckdb::Result<i64> {
    conn.query_row(&format!("SELECT COUNT(*) FROM \"{destination}\""), [], |row| {
        row.get(0)
    })
}

impl TickStore for DuckDbTickStore {
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
        let before = count_rows(&tx, destination).map_err(map_err)?;
        {
            let mut stmt = tx.prepare_cached(&insert_sql(destination)).map_err(map_err)?;
            for tick in ticks {
                stmt.execute(params![
                    tick.raw_time,
                    tick.timestamp_micros(),
                    tick.open,
                    tick.high,
                    tick.low,
                    tick.close,
                    i64::from(tick.num_trades),
                    i64::from(tick.volume),
                    i64::from(tick.bid_volume),
                    i64::from(tick.ask_volume),
                    tick.contract.as_ref(),
                    i16::from(tick.bundle.code()),
                ])
                .map_err(map_err)?;
            }
        }
        let after = count_rows(&tx, destination).map_err(map_err)?;
        tx.commit().map_err(map_err)?;
        Ok((after - before).max(0) as usize)
    }

    fn row_count(&self, destination: &str) -> Result<u64> {
        validate_identifier(destination)?;
        let conn = self.lock()?;
        Ok(count_rows(&conn, destination).map_err(map_err)? as u64)
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tick_store::test_support::make_tick;

    #[test]
    fn test_insert_or_ignore_counts_new_rows() {
        let store = DuckDbTickStore::open_in_memory().unwrap();
        store.ensure_destination("ES").unwrap();

        let batch: Vec<_> = (0..4).map(|s| make_tick(s, "ESZ24")).collect();
        assert_eq!(store.append("ES", &batch).unwrap(), 4);

        let mut resend = batch[2..].to_vec();
        resend.push(make_tick(10, "ESZ24"));
        assert_eq!(store.append("ES", &resend).unwrap(), 1);
        assert_eq!(store.row_count("ES").unwrap(), 5);
    }

    #[test]
    fn test_range_and_contracts() {
        let store = DuckDbTickStore::open_in_memory().unwrap();
        store.ensure_destination("NQ").unwrap();
        assert_eq!(store.raw_time_range("NQ").unwrap(), None);

        let a = make_tick(0, "NQZ24");
        let b = make_tick(5, "NQH25");
        store.append("NQ", &[a.clone(), b.clone()]).unwrap();
        assert_eq!(store.raw_time_range("NQ").unwrap(), Some((a.raw_time, b.raw_time)));
        assert_eq!(store.contracts("NQ").unwrap(), vec!["NQH25", "NQZ24"]);
    }

    #[test]
    fn test_missing_table_is_persistent() {
        let store = DuckDbTickStore::open_in_memory().unwrap();
        let err = store.append("CL", &[make_tick(0, "CLF25")]).unwrap_err();
        assert!(!err.is_transient());
    }
}
