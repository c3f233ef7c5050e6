//! Per-symbol pipeline driver.
//!
//! Walks the contract timeline in order. For each window the checkpoint is
//! consulted, the file is opened and streamed on a blocking thread that
//! filters by window and seals batches into a bounded channel; the async
//! side flushes each batch and only then advances the checkpoint. Batches
//! and checkpoints are therefore strictly ordered, and a full channel
//! blocks the decoder instead of buffering without bound.

use crate::batch::{Batch, BatchAccumulator, BatchLoader};
use crate::report::{ContractReport, Counts, SyncError, SyncReport};
use crate::retry::RetryPolicy;
use chrono::Utc;
use scid_core::config::{BatchConfig, SyncConfig};
use scid_core::{CheckpointRecord, CheckpointStatus, ContractWindow, Error, RawTime, Result};
use scid_ingestion::{ContractTimeline, FileCursor, ResumePoint};
use scid_store::{CheckpointStore, TickStore};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;

/// Pipeline states of one symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    Idle,
    OpeningFile,
    Streaming,
    Flushing,
    Checkpointing,
    RollingOver,
    Done,
    Failed,
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SyncState::Idle => "idle",
            SyncState::OpeningFile => "opening file",
            SyncState::Streaming => "streaming",
            SyncState::Flushing => "flushing",
            SyncState::Checkpointing => "checkpointing",
            SyncState::RollingOver => "rolling over",
            SyncState::Done => "done",
            SyncState::Failed => "failed",
        };
        f.write_str(name)
    }
}

fn join_error(err: JoinError) -> Error {
    Error::Io(std::io::Error::new(
        std::io::ErrorKind::Other,
        format!("worker task failed: {err}"),
    ))
}

/// Drives the pipeline of one symbol end to end.
///
/// Holds no per-run state: everything a run needs to resume is rebuilt from
/// the configuration and the checkpoint store.
pub struct SyncOrchestrator {
    config: Arc<SyncConfig>,
    store: Arc<dyn TickStore>,
    checkpoints: Arc<dyn CheckpointStore>,
    cancel: CancellationToken,
}

impl SyncOrchestrator {
    pub fn new(
        config: Arc<SyncConfig>,
        store: Arc<dyn TickStore>,
        checkpoints: Arc<dyn CheckpointStore>,
    ) -> Self {
        Self {
            config,
            store,
            checkpoints,
            cancel: CancellationToken::new(),
        }
    }

    /// Use an externally owned cancellation token.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Token that stops all runs at their next state boundary.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Sync one symbol.
    pub async fn sync(&self, symbol: &str) -> std::result::Result<SyncReport, SyncError> {
        let mut run = SymbolRun {
            owner: self,
            symbol: symbol.to_string(),
            state: SyncState::Idle,
            report: SyncReport::new(symbol),
        };

        match run.drive().await {
            Ok(()) => Ok(run.report),
            Err(source) => {
                let state = run.state;
                if matches!(source, Error::Cancelled) {
                    tracing::warn!(symbol, %state, "sync cancelled");
                } else {
                    tracing::error!(symbol, %state, error = %source, "sync failed");
                }
                run.transition(SyncState::Failed);
                Err(SyncError {
                    symbol: run.symbol,
                    state,
                    source,
                    report: run.report,
                })
            }
        }
    }
}

/// What the decode side needs to stream one window.
struct StreamPlan {
    window: ContractWindow,
    after: Option<RawTime>,
    multiplier: f64,
    batch: BatchConfig,
}

struct SymbolRun<'a> {
    owner: &'a SyncOrchestrator,
    symbol: String,
    state: SyncState,
    report: SyncReport,
}

impl SymbolRun<'_> {
    fn transition(&mut self, next: SyncState) {
        tracing::debug!(symbol = %self.symbol, from = %self.state, to = %next, "state transition");
        self.state = next;
    }

    fn check_cancelled(&self) -> Result<()> {
        if self.owner.cancel.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }

    async fn drive(&mut self) -> Result<()> {
        let config = Arc::clone(&self.owner.config);
        let symbol_config = config.symbol(&self.symbol)?;
        let timeline = ContractTimeline::build(&self.symbol, symbol_config)?;
        let destination = symbol_config.destination(&self.symbol);
        self.report.destination = destination.clone();

        let retry = RetryPolicy::from_config(&config.retry);
        self.ensure_destination(&destination, &retry).await?;
        let loader = BatchLoader::new(
            Arc::clone(&self.owner.store),
            &destination,
            retry,
            Duration::from_millis(config.batch.flush_timeout_ms),
        );

        tracing::info!(
            symbol = %self.symbol,
            %destination,
            contracts = timeline.len(),
            "sync started"
        );

        for window in &timeline {
            self.check_cancelled()?;
            self.transition(SyncState::OpeningFile);

            let mut contract = ContractReport::new(&window.contract_code);
            let result = self
                .sync_contract(window, &loader, symbol_config.price_multiplier, &mut contract)
                .await;
            self.report.contracts.push(contract);
            result?;

            self.transition(SyncState::RollingOver);
        }

        self.transition(SyncState::Done);
        let totals = self.report.totals();
        tracing::info!(
            symbol = %self.symbol,
            read = totals.records_read,
            written = totals.written,
            duplicates = totals.duplicates_skipped,
            filtered = totals.filtered_by_window,
            "sync finished"
        );
        Ok(())
    }

    async fn ensure_destination(&self, destination: &str, retry: &RetryPolicy) -> Result<()> {
        retry
            .retry_transient("ensure_destination", |_| {
                let store = Arc::clone(&self.owner.store);
                let destination = destination.to_string();
                async move {
                    tokio::task::spawn_blocking(move || store.ensure_destination(&destination))
                        .await
                        .map_err(join_error)?
                }
            })
            .await
    }

    async fn load_checkpoint(&self, contract: &str) -> Result<Option<CheckpointRecord>> {
        let checkpoints = Arc::clone(&self.owner.checkpoints);
        let symbol = self.symbol.clone();
        let contract = contract.to_string();
        tokio::task::spawn_blocking(move || checkpoints.get(&symbol, &contract))
            .await
            .map_err(join_error)?
    }

    async fn put_checkpoint(&self, record: CheckpointRecord) -> Result<()> {
        let checkpoints = Arc::clone(&self.owner.checkpoints);
        tokio::task::spawn_blocking(move || checkpoints.put(&record))
            .await
            .map_err(join_error)?
    }

    async fn sync_contract(
        &mut self,
        window: &ContractWindow,
        loader: &BatchLoader,
        multiplier: f64,
        report: &mut ContractReport,
    ) -> Result<()> {
        let code = window.contract_code.as_str();
        let checkpoint = self.load_checkpoint(code).await?;

        if let Some(cp) = &checkpoint {
            if cp.is_completed() && !window.is_open_ended() {
                tracing::info!(symbol = %self.symbol, contract = code, "contract already completed");
                report.skipped_completed = true;
                return Ok(());
            }
        }

        if !window.file.exists() {
            tracing::warn!(
                symbol = %self.symbol,
                contract = code,
                file = %window.file.display(),
                "contract file not found, skipping"
            );
            report.missing = true;
            return Ok(());
        }

        let path = window.file.clone();
        let contract = code.to_string();
        let cursor = tokio::task::spawn_blocking(move || FileCursor::open(&path, &contract))
            .await
            .map_err(join_error)??;

        let after = checkpoint.as_ref().and_then(|cp| cp.last_committed_raw_time);
        tracing::info!(
            symbol = %self.symbol,
            contract = code,
            records = cursor.record_count(),
            resume_after = ?after,
            "streaming contract"
        );

        self.transition(SyncState::Streaming);
        let config = &self.owner.config;
        let (tx, mut rx) = mpsc::channel(config.batch.queue_depth.max(1));
        let plan = StreamPlan {
            window: window.clone(),
            after,
            multiplier,
            batch: config.batch.clone(),
        };
        let producer = tokio::task::spawn_blocking(move || produce(cursor, plan, tx));

        let mut record = checkpoint.unwrap_or_else(|| CheckpointRecord::new(&self.symbol, code));
        let consumed = self.consume(&mut rx, loader, &mut record, report).await;
        // Unblocks the producer if the consumer stopped early.
        drop(rx);

        let (stats, produced) = producer.await.map_err(join_error)?;
        report.counts.records_read += stats.records_read;
        report.counts.decoded += stats.decoded;
        report.counts.filtered_by_window += stats.filtered_by_window;
        consumed?;
        produced?;

        tracing::info!(
            symbol = %self.symbol,
            contract = code,
            read = report.counts.records_read,
            written = report.counts.written,
            duplicates = report.counts.duplicates_skipped,
            filtered = report.counts.filtered_by_window,
            "contract done"
        );
        Ok(())
    }

    async fn consume(
        &mut self,
        rx: &mut mpsc::Receiver<Batch>,
        loader: &BatchLoader,
        record: &mut CheckpointRecord,
        report: &mut ContractReport,
    ) -> Result<()> {
        let interval = self.owner.config.batch.progress_interval.max(1);
        let mut since_progress = 0u64;

        while let Some(batch) = rx.recv().await {
            self.transition(SyncState::Flushing);
            let outcome = loader.flush(&batch).await?;
            report.counts.written += outcome.rows_written as u64;
            report.counts.duplicates_skipped += outcome.duplicates as u64;

            self.transition(SyncState::Checkpointing);
            advance(record, &batch, outcome.rows_written);
            self.put_checkpoint(record.clone()).await?;

            since_progress += batch.len() as u64;
            if since_progress >= interval {
                since_progress = 0;
                tracing::info!(
                    symbol = %self.symbol,
                    contract = %batch.contract,
                    written = report.counts.written,
                    raw_time = ?record.last_committed_raw_time,
                    "progress"
                );
            }

            self.check_cancelled()?;
            if !batch.exhausted {
                self.transition(SyncState::Streaming);
            }
        }
        Ok(())
    }
}

/// Move a checkpoint past a committed batch.
fn advance(record: &mut CheckpointRecord, batch: &Batch, rows_written: usize) {
    if let Some(raw_time) = batch.last_raw_time {
        record.last_committed_raw_time = Some(raw_time);
        record.last_committed_byte_offset = batch.end_offset;
    }
    record.rows_committed += rows_written as u64;
    record.status = if batch.exhausted {
        CheckpointStatus::Completed
    } else {
        CheckpointStatus::InProgress
    };
    record.updated_at = Utc::now();
}

/// Decode side of one window. Runs on a blocking thread.
fn produce(
    mut cursor: FileCursor,
    plan: StreamPlan,
    tx: mpsc::Sender<Batch>,
) -> (Counts, Result<()>) {
    let mut stats = Counts::default();
    let result = stream_window(&mut cursor, &plan, &tx, &mut stats);
    (stats, result)
}

fn stream_window(
    cursor: &mut FileCursor,
    plan: &StreamPlan,
    tx: &mpsc::Sender<Batch>,
    stats: &mut Counts,
) -> Result<()> {
    let window = &plan.window;

    // Slots up to the checkpoint were committed by an earlier run.
    let base = match plan.after {
        Some(t) => cursor.locate(ResumePoint::AfterRawTime(t))?,
        None => 0,
    };
    let start = match window.start_raw_time() {
        Some(s) => cursor.locate(ResumePoint::FromRawTime(s))?.max(base),
        None => base,
    };
    stats.records_read += start - base;
    stats.filtered_by_window += start - base;

    let mut acc = BatchAccumulator::new(Arc::from(cursor.contract()), &plan.batch);
    let offset = cursor.slot_offset(start);
    let mut ticks = cursor.resume_at(ResumePoint::ByteOffset(offset))?;

    while let Some(item) = ticks.next() {
        let tick = item?;
        stats.records_read += 1;
        stats.decoded += 1;

        if window.is_past_end(tick.timestamp) {
            let rest = ticks.remaining();
            stats.records_read += rest;
            stats.filtered_by_window += 1 + rest;
            break;
        }
        if !window.contains(tick.timestamp) {
            stats.filtered_by_window += 1;
            continue;
        }

        if let Some(batch) = acc.accumulate(tick.scaled(plan.multiplier), ticks.byte_position()) {
            if tx.blocking_send(batch).is_err() {
                return Ok(());
            }
        }
    }

    let last = acc.finish(ticks.byte_position());
    if tx.blocking_send(last).is_err() {
        tracing::debug!(contract = %window.contract_code, "consumer stopped before final batch");
    }
    Ok(())
}
