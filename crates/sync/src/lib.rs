//! Resumable, checkpointed ingestion pipeline.
//!
//! This crate provides:
//! - Batching and idempotent bulk writes (`BatchAccumulator`, `BatchLoader`)
//! - Bounded exponential backoff for transient store errors (`RetryPolicy`)
//! - The per-symbol state machine (`SyncOrchestrator`)
//! - Parallel multi-symbol runs over a bounded worker pool (`SyncRunner`)

pub mod batch;
pub mod orchestrator;
pub mod report;
pub mod retry;
pub mod runner;

pub use batch::{Batch, BatchAccumulator, BatchLoader, FlushOutcome};
pub use orchestrator::{SyncOrchestrator, SyncState};
pub use report::{ContractReport, Counts, SyncError, SyncReport};
pub use retry::RetryPolicy;
pub use runner::{RunSummary, SyncRunner};
