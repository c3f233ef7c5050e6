//! Batch accumulation and idempotent bulk writes.
//!
//! The accumulator runs on the decode side of the pipeline and seals batches
//! by row count or age. The loader runs on the write side and sends each
//! sealed batch to the store as one insert-or-ignore bulk write, retrying the
//! whole batch on transient failures and timeouts.

use crate::retry::RetryPolicy;
use scid_core::config::BatchConfig;
use scid_core::{Error, RawTime, Result, Tick};
use scid_store::TickStore;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Sealed, ordered ticks of one contract.
#[derive(Debug, Clone)]
pub struct Batch {
    /// Contract the ticks were read from.
    pub contract: Arc<str>,
    /// Ticks in file order.
    pub ticks: Arc<Vec<Tick>>,
    /// Raw time of the last tick, `None` for an empty batch.
    pub last_raw_time: Option<RawTime>,
    /// Byte offset just past the last record consumed for this batch.
    pub end_offset: u64,
    /// Whether this is the final batch of the contract window.
    pub exhausted: bool,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.ticks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ticks.is_empty()
    }
}

/// Builds batches from a tick stream.
#[derive(Debug)]
pub struct BatchAccumulator {
    contract: Arc<str>,
    max_rows: usize,
    max_age: Duration,
    ticks: Vec<Tick>,
    opened_at: Option<Instant>,
}

impl BatchAccumulator {
    pub fn new(contract: Arc<str>, config: &BatchConfig) -> Self {
        let max_rows = config.max_rows.max(1);
        Self {
            contract,
            max_rows,
            max_age: Duration::from_millis(config.max_age_ms),
            ticks: Vec::with_capacity(max_rows),
            opened_at: None,
        }
    }

    /// Ticks waiting in the open batch.
    pub fn pending(&self) -> usize {
        self.ticks.len()
    }

    /// Whether the open batch has reached a size or age threshold.
    pub fn is_due(&self) -> bool {
        self.ticks.len() >= self.max_rows
            || self
                .opened_at
                .map_or(false, |opened| opened.elapsed() >= self.max_age)
    }

    /// Append a tick, returning a sealed batch when a threshold is reached.
    ///
    /// `end_offset` is the byte offset just past the record of `tick`.
    pub fn accumulate(&mut self, tick: Tick, end_offset: u64) -> Option<Batch> {
        if self.ticks.is_empty() {
            self.opened_at = Some(Instant::now());
        }
        self.ticks.push(tick);
        if self.is_due() {
            Some(self.seal(end_offset, false))
        } else {
            None
        }
    }

    /// Seal whatever is pending as the final batch of the window.
    pub fn finish(&mut self, end_offset: u64) -> Batch {
        self.seal(end_offset, true)
    }

    fn seal(&mut self, end_offset: u64, exhausted: bool) -> Batch {
        let ticks = std::mem::replace(&mut self.ticks, Vec::with_capacity(self.max_rows));
        self.opened_at = None;
        Batch {
            contract: Arc::clone(&self.contract),
            last_raw_time: ticks.last().map(|t| t.raw_time),
            ticks: Arc::new(ticks),
            end_offset,
            exhausted,
        }
    }
}

/// Result of one confirmed bulk write.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushOutcome {
    /// Rows actually inserted.
    pub rows_written: usize,
    /// Rows the store ignored because their key already existed.
    pub duplicates: usize,
}

/// Writes sealed batches to one destination.
pub struct BatchLoader {
    store: Arc<dyn TickStore>,
    destination: Arc<str>,
    retry: RetryPolicy,
    timeout: Duration,
}

impl BatchLoader {
    pub fn new(
        store: Arc<dyn TickStore>,
        destination: &str,
        retry: RetryPolicy,
        timeout: Duration,
    ) -> Self {
        Self {
            store,
            destination: Arc::from(destination),
            retry,
            timeout,
        }
    }

    pub fn destination(&self) -> &str {
        &self.destination
    }

    /// Write a batch and wait for the store to confirm it.
    ///
    /// A timed-out attempt counts as transient and the whole batch is sent
    /// again; store-side dedup absorbs whatever the earlier attempt applied.
    pub async fn flush(&self, batch: &Batch) -> Result<FlushOutcome> {
        if batch.is_empty() {
            return Ok(FlushOutcome::default());
        }

        let timeout = self.timeout;
        let rows_written = self
            .retry
            .retry_transient("bulk_write", |attempt| {
                let store = Arc::clone(&self.store);
                let destination = Arc::clone(&self.destination);
                let ticks = Arc::clone(&batch.ticks);
                async move {
                    if attempt > 0 {
                        tracing::debug!(%destination, attempt, rows = ticks.len(), "resending batch");
                    }
                    let task = tokio::task::spawn_blocking(move || store.append(&destination, &ticks));
                    match tokio::time::timeout(timeout, task).await {
                        Ok(Ok(result)) => result,
                        Ok(Err(join)) => Err(Error::persistent_store(format!(
                            "bulk write task failed: {join}"
                        ))),
                        Err(_) => Err(Error::transient_store(format!(
                            "bulk write timed out after {} ms",
                            timeout.as_millis()
                        ))),
                    }
                }
            })
            .await?;

        let outcome = FlushOutcome {
            rows_written,
            duplicates: batch.len().saturating_sub(rows_written),
        };
        tracing::debug!(
            destination = %self.destination,
            contract = %batch.contract,
            rows = batch.len(),
            written = outcome.rows_written,
            duplicates = outcome.duplicates,
            "batch committed"
        );
        Ok(outcome)
    }
}
