//! Multi-symbol runs.
//!
//! Every symbol is an independent task. A semaphore bounds how many run at
//! once and results come back over a completion channel.

use crate::orchestrator::{SyncOrchestrator, SyncState};
use crate::report::{SyncError, SyncReport};
use scid_core::{Error, Result};
use scid_ingestion::ContractTimeline;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};

/// Outcome of a multi-symbol run.
#[derive(Debug, Default)]
pub struct RunSummary {
    /// Symbols that finished, sorted by name.
    pub reports: Vec<SyncReport>,
    /// Symbols that failed, sorted by name.
    pub failures: Vec<SyncError>,
}

impl RunSummary {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    /// Process exit status: non-zero if any symbol failed.
    pub fn exit_code(&self) -> i32 {
        if self.is_success() {
            0
        } else {
            1
        }
    }
}

/// Runs many symbols over a bounded worker pool.
pub struct SyncRunner {
    orchestrator: Arc<SyncOrchestrator>,
    workers: usize,
}

impl SyncRunner {
    pub fn new(orchestrator: Arc<SyncOrchestrator>) -> Self {
        let workers = orchestrator.config().effective_workers();
        Self {
            orchestrator,
            workers,
        }
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Resolve the symbols to run and validate their timelines.
    ///
    /// An empty selection means every configured symbol. Any configuration
    /// error aborts the whole run before a single file is opened.
    pub fn plan(&self, selected: &[String]) -> Result<Vec<String>> {
        let config = self.orchestrator.config();
        let symbols = if selected.is_empty() {
            config.symbol_names()
        } else {
            let unique: BTreeSet<&String> = selected.iter().collect();
            unique.into_iter().cloned().collect()
        };
        if symbols.is_empty() {
            return Err(Error::config("no symbols configured"));
        }

        for symbol in &symbols {
            ContractTimeline::build(symbol, config.symbol(symbol)?)?;
        }
        Ok(symbols)
    }

    /// Sync the selected symbols in parallel.
    pub async fn run(&self, selected: &[String]) -> Result<RunSummary> {
        let symbols = self.plan(selected)?;
        tracing::info!(symbols = symbols.len(), workers = self.workers, "run started");

        let semaphore = Arc::new(Semaphore::new(self.workers.max(1)));
        let (tx, mut rx) = mpsc::channel(symbols.len());

        for symbol in &symbols {
            let orchestrator = Arc::clone(&self.orchestrator);
            let semaphore = Arc::clone(&semaphore);
            let tx = tx.clone();
            let symbol = symbol.clone();
            tokio::spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return;
                };
                let result = orchestrator.sync(&symbol).await;
                let _ = tx.send((symbol, result)).await;
            });
        }
        drop(tx);

        let mut summary = RunSummary::default();
        let mut pending: BTreeSet<String> = symbols.into_iter().collect();
        while let Some((symbol, result)) = rx.recv().await {
            pending.remove(&symbol);
            match result {
                Ok(report) => summary.reports.push(report),
                Err(err) => summary.failures.push(err),
            }
        }

        // A worker that panicked never reports back.
        for symbol in pending {
            tracing::error!(%symbol, "worker exited without a result");
            summary.failures.push(SyncError {
                report: SyncReport::new(&symbol),
                symbol,
                state: SyncState::Failed,
                source: Error::Io(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    "worker exited without a result",
                )),
            });
        }

        summary.reports.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        summary.failures.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        tracing::info!(
            succeeded = summary.reports.len(),
            failed = summary.failures.len(),
            "run finished"
        );
        Ok(summary)
    }
}
