//! Core types and configuration for the scid-sync system.
//!
//! This crate provides shared types used across all other crates:
//! - Tick data and contract window types
//! - Checkpoint records
//! - Configuration structures
//! - Common error types

pub mod config;
pub mod error;
pub mod types;

pub use config::SyncConfig;
pub use error::{Error, Result};
pub use types::*;
