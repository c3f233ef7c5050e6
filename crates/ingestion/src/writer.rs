//! Writer for bit-exact contract files.
//!
//! Used to build fixtures and to extend files the way the charting platform
//! does when a live contract keeps receiving ticks.

use crate::decoder::{FileHeader, RawRecord, RecordDecoder, HEADER_SIZE};
use scid_core::Result;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Read, Write};
use std::path::Path;

/// Sequential record writer.
pub struct ScidWriter<W: Write> {
    inner: BufWriter<W>,
    records: u64,
}

impl ScidWriter<File> {
    /// Create (or truncate) a file and write a default header.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        Self::create_with_header(path, &FileHeader::default())
    }

    /// Create (or truncate) a file with a custom header.
    pub fn create_with_header(path: impl AsRef<Path>, header: &FileHeader) -> Result<Self> {
        let file = File::create(path)?;
        let mut writer = Self::new(file);
        writer.inner.write_all(&header.to_bytes())?;
        Ok(writer)
    }

    /// Open an existing file for appending after validating its header.
    pub fn append(path: impl AsRef<Path>) -> Result<Self> {
        let mut file = OpenOptions::new().read(true).append(true).open(path)?;
        let mut head = Vec::with_capacity(HEADER_SIZE);
        (&mut file).take(HEADER_SIZE as u64).read_to_end(&mut head)?;
        let header = RecordDecoder::decode_header(&head)?;
        let records = RecordDecoder::record_count(&header, file.metadata()?.len())?;
        let mut writer = Self::new(file);
        writer.records = records;
        Ok(writer)
    }
}

impl<W: Write> ScidWriter<W> {
    /// Wrap a sink positioned after the header.
    pub fn new(inner: W) -> Self {
        Self {
            inner: BufWriter::new(inner),
            records: 0,
        }
    }

    /// Append one record.
    pub fn write_record(&mut self, record: &RawRecord) -> Result<()> {
        self.inner.write_all(&record.to_bytes())?;
        self.records += 1;
        Ok(())
    }

    /// Records in the file so far.
    pub fn records(&self) -> u64 {
        self.records
    }

    /// Flush buffered records and return the sink.
    pub fn finish(self) -> Result<W> {
        self.inner
            .into_inner()
            .map_err(|e| scid_core::Error::Io(e.into_error()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::RECORD_SIZE;

    fn make_record(raw_time: i64) -> RawRecord {
        RawRecord {
            raw_time,
            open: 0.0,
            high: 1.0,
            low: 1.0,
            close: 1.0,
            num_trades: 1,
            volume: 1,
            bid_volume: 0,
            ask_volume: 1,
        }
    }

    #[test]
    fn test_create_writes_header_and_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ESZ24_FUT_CME.scid");
        let mut writer = ScidWriter::create(&path).unwrap();
        writer.write_record(&make_record(1)).unwrap();
        writer.write_record(&make_record(2)).unwrap();
        writer.finish().unwrap();

        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(bytes.len(), HEADER_SIZE + 2 * RECORD_SIZE);
        assert_eq!(&bytes[0..4], b"SCID");
    }

    #[test]
    fn test_append_extends_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ESH25_FUT_CME.scid");
        let mut writer = ScidWriter::create(&path).unwrap();
        writer.write_record(&make_record(1)).unwrap();
        writer.finish().unwrap();

        let mut writer = ScidWriter::append(&path).unwrap();
        assert_eq!(writer.records(), 1);
        writer.write_record(&make_record(2)).unwrap();
        writer.finish().unwrap();

        let len = std::fs::metadata(&path).unwrap().len() as usize;
        assert_eq!(len, HEADER_SIZE + 2 * RECORD_SIZE);
    }

    #[test]
    fn test_into_vec() {
        let mut out = Vec::new();
        out.extend_from_slice(&FileHeader::default().to_bytes());
        let mut writer = ScidWriter::new(out);
        writer.write_record(&make_record(5)).unwrap();
        let bytes = writer.finish().unwrap();
        assert_eq!(bytes.len(), HEADER_SIZE + RECORD_SIZE);
    }
}
