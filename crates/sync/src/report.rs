//! Per-symbol results and failures.

use crate::orchestrator::SyncState;
use scid_core::Error;
use serde::Serialize;
use std::ops::AddAssign;

/// Record counts of one contract or a whole symbol.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Counts {
    /// Record slots examined this run, including those skipped by seeking.
    pub records_read: u64,
    /// Records decoded into ticks.
    pub decoded: u64,
    /// Rows actually inserted into the store.
    pub written: u64,
    /// Rows the store ignored because their key already existed.
    pub duplicates_skipped: u64,
    /// Records outside the contract window; never written.
    pub filtered_by_window: u64,
}

impl AddAssign for Counts {
    fn add_assign(&mut self, rhs: Self) {
        self.records_read += rhs.records_read;
        self.decoded += rhs.decoded;
        self.written += rhs.written;
        self.duplicates_skipped += rhs.duplicates_skipped;
        self.filtered_by_window += rhs.filtered_by_window;
    }
}

/// Outcome of one contract window.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ContractReport {
    pub contract: String,
    #[serde(flatten)]
    pub counts: Counts,
    /// The contract file did not exist and was skipped.
    pub missing: bool,
    /// A previous run already completed this bounded window.
    pub skipped_completed: bool,
}

impl ContractReport {
    pub fn new(contract: impl Into<String>) -> Self {
        Self {
            contract: contract.into(),
            ..Self::default()
        }
    }
}

/// Outcome of one symbol.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub symbol: String,
    pub destination: String,
    /// Contracts in rollover order, up to the failing one if the run failed.
    pub contracts: Vec<ContractReport>,
}

impl SyncReport {
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            ..Self::default()
        }
    }

    pub fn contract(&self, code: &str) -> Option<&ContractReport> {
        self.contracts.iter().find(|c| c.contract == code)
    }

    /// Counts summed over all contracts.
    pub fn totals(&self) -> Counts {
        let mut totals = Counts::default();
        for contract in &self.contracts {
            totals += contract.counts;
        }
        totals
    }
}

/// Fatal failure of one symbol's pipeline.
///
/// The checkpoint of the failing contract is left at its last committed
/// state; re-running resumes from there.
#[derive(Debug, thiserror::Error)]
#[error("sync of {symbol} failed while {state}: {source}")]
pub struct SyncError {
    pub symbol: String,
    /// State the pipeline was in when the error occurred.
    pub state: SyncState,
    pub source: Error,
    /// Work completed before the failure.
    pub report: SyncReport,
}

impl SyncError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self.source, Error::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_totals_sum_contracts() {
        let mut report = SyncReport::new("ES");
        let mut a = ContractReport::new("ESZ24");
        a.counts.written = 3;
        a.counts.filtered_by_window = 1;
        let mut b = ContractReport::new("ESH25");
        b.counts.written = 2;
        b.counts.duplicates_skipped = 1;
        report.contracts = vec![a, b];

        let totals = report.totals();
        assert_eq!(totals.written, 5);
        assert_eq!(totals.duplicates_skipped, 1);
        assert_eq!(totals.filtered_by_window, 1);
        assert_eq!(report.contract("ESH25").unwrap().counts.written, 2);
    }

    #[test]
    fn test_sync_error_message() {
        let err = SyncError {
            symbol: "ES".to_string(),
            state: SyncState::Flushing,
            source: Error::persistent_store("disk full"),
            report: SyncReport::new("ES"),
        };
        assert_eq!(
            err.to_string(),
            "sync of ES failed while flushing: Persistent store error: disk full"
        );
        assert!(!err.is_cancelled());
    }
}
