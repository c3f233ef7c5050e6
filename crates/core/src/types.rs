//! Core data types for the scid-sync system.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

/// Microseconds since the legacy epoch (1899-12-30T00:00:00Z).
pub type RawTime = i64;

/// Legacy epoch expressed as microseconds relative to the Unix epoch.
///
/// 25569 days separate 1899-12-30 from 1970-01-01.
pub const LEGACY_EPOCH_UNIX_MICROS: i128 = -25_569 * 86_400 * 1_000_000;

/// First trade of a bundled aggregate, stored in the `open` field.
pub const FIRST_BUNDLE_TRADE: f64 = -19990009513251226345509817234554355712.0;

/// Last trade of a bundled aggregate, stored in the `open` field.
pub const LAST_BUNDLE_TRADE: f64 = -19990019654456028171345029208179998720.0;

/// Matching tolerance for the bundle markers after widening from f32.
const BUNDLE_TOLERANCE: f64 = 1e10;

/// Convert a legacy raw time into a UTC instant.
///
/// Returns `None` when the instant is outside the representable range.
pub fn raw_time_to_timestamp(raw_time: RawTime) -> Option<DateTime<Utc>> {
    let unix_us = LEGACY_EPOCH_UNIX_MICROS + raw_time as i128;
    let unix_us = i64::try_from(unix_us).ok()?;
    DateTime::from_timestamp_micros(unix_us)
}

/// Convert a UTC instant into a legacy raw time (saturating).
pub fn timestamp_to_raw_time(ts: DateTime<Utc>) -> RawTime {
    let raw = ts.timestamp_micros() as i128 - LEGACY_EPOCH_UNIX_MICROS;
    raw.clamp(i64::MIN as i128, i64::MAX as i128) as i64
}

/// Bundled-trade tag derived from the `open` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum BundleMarker {
    /// Regular record, `open` carries a real value.
    #[default]
    None = 0,
    /// First trade of a bundle.
    First = 1,
    /// Last trade of a bundle.
    Last = 2,
}

impl BundleMarker {
    /// Classify the raw `open` value.
    #[inline]
    pub fn classify(open: f64) -> Self {
        if (open - FIRST_BUNDLE_TRADE).abs() < BUNDLE_TOLERANCE {
            BundleMarker::First
        } else if (open - LAST_BUNDLE_TRADE).abs() < BUNDLE_TOLERANCE {
            BundleMarker::Last
        } else {
            BundleMarker::None
        }
    }

    /// Get the numeric tag as stored.
    #[inline]
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Parse a stored numeric tag.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(BundleMarker::None),
            1 => Some(BundleMarker::First),
            2 => Some(BundleMarker::Last),
            _ => None,
        }
    }
}

/// One decoded intraday record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tick {
    /// UTC instant, microsecond precision.
    pub timestamp: DateTime<Utc>,
    /// Microseconds since the legacy epoch.
    pub raw_time: RawTime,
    /// Open price, or a bundle marker (see `bundle`).
    pub open: f64,
    /// High price.
    pub high: f64,
    /// Low price.
    pub low: f64,
    /// Close price. Authoritative trade price.
    pub close: f64,
    /// Number of trades.
    pub num_trades: u32,
    /// Total volume.
    pub volume: u32,
    /// Volume traded at the bid.
    pub bid_volume: u32,
    /// Volume traded at the ask.
    pub ask_volume: u32,
    /// Contract code this record was read from (e.g. "ESZ24").
    pub contract: Arc<str>,
    /// Bundled-trade tag.
    pub bundle: BundleMarker,
}

impl Tick {
    /// Trade price surfaced downstream.
    #[inline]
    pub fn price(&self) -> f64 {
        self.close
    }

    /// Whether `open` carries a bundle marker instead of a price.
    #[inline]
    pub fn is_bundled(&self) -> bool {
        self.bundle != BundleMarker::None
    }

    /// Unix timestamp in microseconds.
    #[inline]
    pub fn timestamp_micros(&self) -> i64 {
        self.timestamp.timestamp_micros()
    }

    /// Apply a price multiplier. Bundle markers in `open` are kept as-is.
    pub fn scaled(mut self, multiplier: f64) -> Self {
        if multiplier == 1.0 {
            return self;
        }
        if !self.is_bundled() {
            self.open *= multiplier;
        }
        self.high *= multiplier;
        self.low *= multiplier;
        self.close *= multiplier;
        self
    }
}

/// Time slice of one contract file that belongs to the continuous series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractWindow {
    /// Contract code (e.g. "ESH25").
    pub contract_code: String,
    /// Path of the contract file.
    pub file: PathBuf,
    /// Inclusive start. `None` means unbounded.
    pub start: Option<DateTime<Utc>>,
    /// Exclusive end. `None` means open-ended (live contract).
    pub end: Option<DateTime<Utc>>,
}

impl ContractWindow {
    /// Start as a raw time, if bounded.
    pub fn start_raw_time(&self) -> Option<RawTime> {
        self.start.map(timestamp_to_raw_time)
    }

    /// End as a raw time, if bounded.
    pub fn end_raw_time(&self) -> Option<RawTime> {
        self.end.map(timestamp_to_raw_time)
    }

    /// Whether the window has no end date.
    pub fn is_open_ended(&self) -> bool {
        self.end.is_none()
    }

    /// Whether `start <= ts < end`.
    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        self.start.map_or(true, |s| ts >= s) && self.end.map_or(true, |e| ts < e)
    }

    /// Whether a tick at `ts` lies at or beyond the window end.
    pub fn is_past_end(&self, ts: DateTime<Utc>) -> bool {
        self.end.map_or(false, |e| ts >= e)
    }
}

/// Progress state of one contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointStatus {
    /// Batches committed, file not yet exhausted.
    InProgress,
    /// The contract stream was exhausted and fully committed.
    Completed,
}

/// Durable progress of one (symbol, contract).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointRecord {
    pub symbol: String,
    pub contract_code: String,
    /// Raw time of the last committed tick, if any.
    pub last_committed_raw_time: Option<RawTime>,
    /// Byte offset just past the last committed record.
    pub last_committed_byte_offset: u64,
    pub status: CheckpointStatus,
    /// Rows confirmed written for this contract across all runs.
    pub rows_committed: u64,
    pub updated_at: DateTime<Utc>,
}

impl CheckpointRecord {
    /// Create an empty in-progress record.
    pub fn new(symbol: impl Into<String>, contract_code: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            contract_code: contract_code.into(),
            last_committed_raw_time: None,
            last_committed_byte_offset: 0,
            status: CheckpointStatus::InProgress,
            rows_committed: 0,
            updated_at: Utc::now(),
        }
    }

    /// Whether the contract stream was exhausted on a previous run.
    pub fn is_completed(&self) -> bool {
        self.status == CheckpointStatus::Completed
    }
}
