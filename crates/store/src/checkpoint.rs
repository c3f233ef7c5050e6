//! Durable per-contract progress.
//!
//! One JSON file per (symbol, contract) under `root/<symbol>/<contract>.json`.
//! Updates go through a temp file in the same directory followed by an
//! atomic rename, so readers only ever see a complete prior or new record.

use scid_core::{CheckpointRecord, Error, Result};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

/// Durable mapping from (symbol, contract) to the last committed progress.
pub trait CheckpointStore: Send + Sync {
    /// Last committed record, or `None` if the contract was never touched.
    fn get(&self, symbol: &str, contract: &str) -> Result<Option<CheckpointRecord>>;

    /// Atomically replace the record of `(record.symbol, record.contract_code)`.
    fn put(&self, record: &CheckpointRecord) -> Result<()>;
}

/// Checkpoint store backed by JSON files on the local filesystem.
#[derive(Debug, Clone)]
pub struct JsonCheckpointStore {
    root: PathBuf,
}

fn check_component(kind: &str, name: &str) -> Result<()> {
    if name.is_empty() || name.contains(['/', '\\']) || name.contains("..") {
        return Err(Error::config(format!(
            "{kind} {name:?} cannot be used as a checkpoint key"
        )));
    }
    Ok(())
}

impl JsonCheckpointStore {
    /// Create a store rooted at `root`. The directory is created lazily.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// File holding the record of one contract.
    pub fn path_for(&self, symbol: &str, contract: &str) -> Result<PathBuf> {
        check_component("symbol", symbol)?;
        check_component("contract", contract)?;
        Ok(self.root.join(symbol).join(format!("{contract}.json")))
    }
}

impl CheckpointStore for JsonCheckpointStore {
    fn get(&self, symbol: &str, contract: &str) -> Result<Option<CheckpointRecord>> {
        let path = self.path_for(symbol, contract)?;
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        if bytes.is_empty() {
            return Err(Error::checkpoint_corruption(&path, "file is empty"));
        }
        let record: CheckpointRecord = serde_json::from_slice(&bytes)
            .map_err(|e| Error::checkpoint_corruption(&path, e.to_string()))?;

        if record.symbol != symbol || record.contract_code != contract {
            return Err(Error::checkpoint_corruption(
                &path,
                format!(
                    "record belongs to {}/{}",
                    record.symbol, record.contract_code
                ),
            ));
        }
        Ok(Some(record))
    }

    fn put(&self, record: &CheckpointRecord) -> Result<()> {
        let path = self.path_for(&record.symbol, &record.contract_code)?;
        let dir = path
            .parent()
            .ok_or_else(|| Error::config(format!("invalid checkpoint path {}", path.display())))?;
        std::fs::create_dir_all(dir)?;

        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        serde_json::to_writer_pretty(&mut tmp, record)?;
        tmp.write_all(b"\n")?;
        tmp.as_file().sync_all()?;
        tmp.persist(&path).map_err(|e| Error::Io(e.error))?;

        #[cfg(unix)]
        std::fs::File::open(dir)?.sync_all()?;

        tracing::trace!(
            symbol = %record.symbol,
            contract = %record.contract_code,
            raw_time = ?record.last_committed_raw_time,
            status = ?record.status,
            "checkpoint written"
        );
        Ok(())
    }
}
