//! Backing stores for the scid-sync system.
//!
//! This crate provides:
//! - The append interface of the time-series store (`TickStore`)
//! - SQLite, DuckDB and in-memory implementations with insert-or-ignore
//!   semantics keyed on `raw_time` per destination
//! - Durable, atomically replaced checkpoints (`CheckpointStore`)

pub mod checkpoint;
pub mod duck;
pub mod memory;
pub mod sqlite;
pub mod tick_store;

pub use checkpoint::{CheckpointStore, JsonCheckpointStore};
pub use duck::DuckDbTickStore;
pub use memory::MemoryTickStore;
pub use sqlite::SqliteTickStore;
pub use tick_store::{open_store, TickStore};
