//! Bit-exact decoding of intraday tick files.
//!
//! Layout (little-endian, no padding):
//! - 56-byte header: `file_type_id[4]`, `header_size u32`, `record_size u32`,
//!   `version u16`, `unused u16`, `utc_start_index u32`, `reserve[36]`
//! - 40-byte records starting at `header_size`: `raw_time i64`,
//!   `open/high/low/close f32`, `num_trades/volume/bid_volume/ask_volume u32`

use scid_core::{raw_time_to_timestamp, BundleMarker, Error, RawTime, Result, Tick};
use std::sync::Arc;

/// Size of the fixed file header.
pub const HEADER_SIZE: usize = 56;

/// Size of one record slot.
pub const RECORD_SIZE: usize = 40;

/// Expected file signature.
pub const FILE_TYPE_ID: [u8; 4] = *b"SCID";

/// Header version written by the fixture writer.
pub const DEFAULT_VERSION: u16 = 1;

#[inline(always)]
fn le_u16(b: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([b[at], b[at + 1]])
}

#[inline(always)]
fn le_u32(b: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([b[at], b[at + 1], b[at + 2], b[at + 3]])
}

#[inline(always)]
fn le_f32(b: &[u8], at: usize) -> f32 {
    f32::from_bits(le_u32(b, at))
}

#[inline(always)]
fn le_i64(b: &[u8], at: usize) -> i64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&b[at..at + 8]);
    i64::from_le_bytes(raw)
}

/// Parsed file header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHeader {
    pub file_type_id: [u8; 4],
    /// Offset of the first record.
    pub header_size: u32,
    pub record_size: u32,
    pub version: u16,
    pub utc_start_index: u32,
}

impl Default for FileHeader {
    fn default() -> Self {
        Self {
            file_type_id: FILE_TYPE_ID,
            header_size: HEADER_SIZE as u32,
            record_size: RECORD_SIZE as u32,
            version: DEFAULT_VERSION,
            utc_start_index: 0,
        }
    }
}

impl FileHeader {
    /// Byte offset of the first record slot.
    #[inline]
    pub fn data_offset(&self) -> u64 {
        self.header_size as u64
    }

    /// Serialize to the on-disk layout. Bytes past the fixed fields are zero.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = vec![0u8; (self.header_size as usize).max(HEADER_SIZE)];
        out[0..4].copy_from_slice(&self.file_type_id);
        out[4..8].copy_from_slice(&self.header_size.to_le_bytes());
        out[8..12].copy_from_slice(&self.record_size.to_le_bytes());
        out[12..14].copy_from_slice(&self.version.to_le_bytes());
        out[16..20].copy_from_slice(&self.utc_start_index.to_le_bytes());
        out
    }
}

/// One record exactly as stored on disk.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawRecord {
    pub raw_time: RawTime,
    pub open: f32,
    pub high: f32,
    pub low: f32,
    pub close: f32,
    pub num_trades: u32,
    pub volume: u32,
    pub bid_volume: u32,
    pub ask_volume: u32,
}

impl RawRecord {
    /// Parse one record slot.
    pub fn from_bytes(b: &[u8; RECORD_SIZE]) -> Self {
        Self {
            raw_time: le_i64(b, 0),
            open: le_f32(b, 8),
            high: le_f32(b, 12),
            low: le_f32(b, 16),
            close: le_f32(b, 20),
            num_trades: le_u32(b, 24),
            volume: le_u32(b, 28),
            bid_volume: le_u32(b, 32),
            ask_volume: le_u32(b, 36),
        }
    }

    /// Serialize to one record slot.
    pub fn to_bytes(&self) -> [u8; RECORD_SIZE] {
        let mut out = [0u8; RECORD_SIZE];
        out[0..8].copy_from_slice(&self.raw_time.to_le_bytes());
        out[8..12].copy_from_slice(&self.open.to_le_bytes());
        out[12..16].copy_from_slice(&self.high.to_le_bytes());
        out[16..20].copy_from_slice(&self.low.to_le_bytes());
        out[20..24].copy_from_slice(&self.close.to_le_bytes());
        out[24..28].copy_from_slice(&self.num_trades.to_le_bytes());
        out[28..32].copy_from_slice(&self.volume.to_le_bytes());
        out[32..36].copy_from_slice(&self.bid_volume.to_le_bytes());
        out[36..40].copy_from_slice(&self.ask_volume.to_le_bytes());
        out
    }

    /// Read only the `raw_time` field of a slot.
    #[inline]
    pub fn raw_time_of(b: &[u8; 8]) -> RawTime {
        i64::from_le_bytes(*b)
    }
}

/// Decodes record slots of one contract file into ticks.
#[derive(Debug, Clone)]
pub struct RecordDecoder {
    contract: Arc<str>,
}

impl RecordDecoder {
    /// Create a decoder that stamps ticks with the given contract code.
    pub fn new(contract: impl Into<Arc<str>>) -> Self {
        Self {
            contract: contract.into(),
        }
    }

    /// Contract code stamped on decoded ticks.
    pub fn contract(&self) -> &str {
        &self.contract
    }

    /// Parse and validate the file header.
    pub fn decode_header(bytes: &[u8]) -> Result<FileHeader> {
        if bytes.len() < HEADER_SIZE {
            return Err(Error::format(
                bytes.len() as u64,
                format!("file too small for a {HEADER_SIZE}-byte header"),
            ));
        }

        let mut file_type_id = [0u8; 4];
        file_type_id.copy_from_slice(&bytes[0..4]);
        if file_type_id != FILE_TYPE_ID {
            return Err(Error::format(
                0,
                format!("unexpected file type id {:?}", String::from_utf8_lossy(&file_type_id)),
            ));
        }

        let header = FileHeader {
            file_type_id,
            header_size: le_u32(bytes, 4),
            record_size: le_u32(bytes, 8),
            version: le_u16(bytes, 12),
            utc_start_index: le_u32(bytes, 16),
        };

        if (header.header_size as usize) < HEADER_SIZE {
            return Err(Error::format(
                4,
                format!("header size {} is smaller than {HEADER_SIZE}", header.header_size),
            ));
        }
        if header.record_size as usize != RECORD_SIZE {
            return Err(Error::format(
                8,
                format!(
                    "unsupported record size {} (expected {RECORD_SIZE})",
                    header.record_size
                ),
            ));
        }

        Ok(header)
    }

    /// Check the file length against the header and return the record count.
    ///
    /// Bytes after the header must be an exact multiple of the record size.
    pub fn record_count(header: &FileHeader, file_len: u64) -> Result<u64> {
        let data_offset = header.data_offset();
        if file_len < data_offset {
            return Err(Error::format(
                file_len,
                format!("file ends inside the {data_offset}-byte header"),
            ));
        }
        let body = file_len - data_offset;
        let count = body / RECORD_SIZE as u64;
        let trailing = body % RECORD_SIZE as u64;
        if trailing != 0 {
            return Err(Error::format(
                data_offset + count * RECORD_SIZE as u64,
                format!("{trailing} trailing bytes after the last complete record"),
            ));
        }
        Ok(count)
    }

    /// Decode a record slot found at `offset`.
    pub fn decode(&self, bytes: &[u8; RECORD_SIZE], offset: u64) -> Result<Tick> {
        let raw = RawRecord::from_bytes(bytes);
        self.to_tick(&raw, offset)
    }

    /// Convert an on-disk record into a tagged tick.
    pub fn to_tick(&self, raw: &RawRecord, offset: u64) -> Result<Tick> {
        let timestamp = raw_time_to_timestamp(raw.raw_time).ok_or_else(|| {
            Error::format(offset, format!("raw_time {} is out of range", raw.raw_time))
        })?;
        let open = raw.open as f64;

        Ok(Tick {
            timestamp,
            raw_time: raw.raw_time,
            open,
            high: raw.high as f64,
            low: raw.low as f64,
            close: raw.close as f64,
            num_trades: raw.num_trades,
            volume: raw.volume,
            bid_volume: raw.bid_volume,
            ask_volume: raw.ask_volume,
            contract: Arc::clone(&self.contract),
            bundle: BundleMarker::classify(open),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use chrono::{TimeZone, Utc};
    use scid_core::{FIRST_BUNDLE_TRADE, LAST_BUNDLE_TRADE};

    fn make_record(raw_time: i64, open: f32, close: f32) -> RawRecord {
        RawRecord {
            raw_time,
            open,
            high: close + 0.25,
            low: close - 0.25,
            close,
            num_trades: 2,
            volume: 7,
            bid_volume: 3,
            ask_volume: 4,
        }
    }

    #[test]
    fn test_header_roundtrip() {
        let header = FileHeader::default();
        let bytes = header.to_bytes();
        assert_eq!(bytes.len(), HEADER_SIZE);
        assert_eq!(&bytes[0..4], b"SCID");
        assert_eq!(RecordDecoder::decode_header(&bytes).unwrap(), header);
    }

    #[test]
    fn test_header_too_small() {
        let err = RecordDecoder::decode_header(&[0u8; 12]).unwrap_err();
        assert!(matches!(err, Error::Format { offset: 12, .. }));
    }

    #[test]
    fn test_header_wrong_signature() {
        let mut bytes = FileHeader::default().to_bytes();
        bytes[0..4].copy_from_slice(b"XXXX");
        let err = RecordDecoder::decode_header(&bytes).unwrap_err();
        assert!(matches!(err, Error::Format { offset: 0, .. }));
    }

    #[test]
    fn test_header_wrong_record_size() {
        let header = FileHeader {
            record_size: 44,
            ..FileHeader::default()
        };
        let err = RecordDecoder::decode_header(&header.to_bytes()).unwrap_err();
        assert!(matches!(err, Error::Format { offset: 8, .. }));
    }

    #[test]
    fn test_record_count_exact_multiple() {
        let header = FileHeader::default();
        assert_eq!(RecordDecoder::record_count(&header, 56).unwrap(), 0);
        assert_eq!(RecordDecoder::record_count(&header, 56 + 3 * 40).unwrap(), 3);
    }

    #[test]
    fn test_record_count_rejects_trailing_bytes() {
        let header = FileHeader::default();
        let err = RecordDecoder::record_count(&header, 56 + 2 * 40 + 9).unwrap_err();
        match err {
            Error::Format { offset, .. } => assert_eq!(offset, 56 + 2 * 40),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_record_count_honours_larger_header() {
        let header = FileHeader {
            header_size: 64,
            ..FileHeader::default()
        };
        assert_eq!(RecordDecoder::record_count(&header, 64 + 40).unwrap(), 1);
        assert!(RecordDecoder::record_count(&header, 56 + 40).is_err());
    }

    #[test]
    fn test_decode_fields() {
        let decoder = RecordDecoder::new("ESZ24");
        let raw = make_record(3_942_000_000_000_000, 0.0, 6050.25);
        let tick = decoder.decode(&raw.to_bytes(), 56).unwrap();

        assert_eq!(tick.raw_time, 3_942_000_000_000_000);
        assert_relative_eq!(tick.close, 6050.25);
        assert_relative_eq!(tick.high, 6050.5);
        assert_relative_eq!(tick.low, 6050.0);
        assert_eq!(tick.num_trades, 2);
        assert_eq!(tick.volume, 7);
        assert_eq!(tick.bid_volume, 3);
        assert_eq!(tick.ask_volume, 4);
        assert_eq!(&*tick.contract, "ESZ24");
        assert_eq!(tick.bundle, BundleMarker::None);
    }

    #[test]
    fn test_decode_timestamp_uses_legacy_epoch() {
        let decoder = RecordDecoder::new("ESZ24");
        // One day and 1.5 seconds after 1899-12-30.
        let raw = make_record(86_400_000_000 + 1_500_000, 0.0, 1.0);
        let tick = decoder.decode(&raw.to_bytes(), 56).unwrap();
        let expected = Utc.with_ymd_and_hms(1899, 12, 31, 0, 0, 1).unwrap()
            + chrono::Duration::milliseconds(500);
        assert_eq!(tick.timestamp, expected);
    }

    #[test]
    fn test_decode_tags_bundle_markers() {
        let decoder = RecordDecoder::new("NQH25");
        let first = make_record(1000, FIRST_BUNDLE_TRADE as f32, 21000.5);
        let last = make_record(1001, LAST_BUNDLE_TRADE as f32, 21000.75);

        let first = decoder.decode(&first.to_bytes(), 56).unwrap();
        let last = decoder.decode(&last.to_bytes(), 96).unwrap();

        assert_eq!(first.bundle, BundleMarker::First);
        assert_eq!(last.bundle, BundleMarker::Last);
        assert!(first.is_bundled());
        // Sentinel kept in `open`, `close` surfaced as price.
        assert!(first.open < -1e37);
        assert_relative_eq!(first.price(), 21000.5);
        assert_relative_eq!(last.price(), 21000.75);
    }

    #[test]
    fn test_decode_out_of_range_time() {
        let decoder = RecordDecoder::new("ESZ24");
        let raw = make_record(i64::MAX, 0.0, 1.0);
        let err = decoder.decode(&raw.to_bytes(), 136).unwrap_err();
        assert!(matches!(err, Error::Format { offset: 136, .. }));
    }

    #[test]
    fn test_raw_time_of_prefix() {
        let raw = make_record(-42, 0.0, 1.0);
        let bytes = raw.to_bytes();
        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&bytes[0..8]);
        assert_eq!(RawRecord::raw_time_of(&prefix), -42);
    }
}
