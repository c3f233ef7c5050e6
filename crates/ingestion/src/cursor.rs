//! Lazy, restartable tick streams over one contract file.
//!
//! The header is validated once on open. Resuming by raw time uses a binary
//! search over record slots, which relies on `raw_time` being non-decreasing
//! within a file; the stream itself re-checks that invariant while reading.

use crate::decoder::{FileHeader, RawRecord, RecordDecoder, HEADER_SIZE, RECORD_SIZE};
use scid_core::{Error, RawTime, Result, Tick};
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

/// Read buffer for streaming.
const STREAM_BUFFER_SIZE: usize = 256 * 1024;

/// Where a stream starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumePoint {
    /// First record of the file.
    Start,
    /// First record with `raw_time >= t`.
    FromRawTime(RawTime),
    /// First record with `raw_time > t`.
    AfterRawTime(RawTime),
    /// Record slot at this byte offset (just past the last consumed record).
    ByteOffset(u64),
}

/// One open contract file.
pub struct FileCursor {
    path: PathBuf,
    file: File,
    header: FileHeader,
    decoder: RecordDecoder,
    record_count: u64,
}

impl std::fmt::Debug for FileCursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileCursor")
            .field("path", &self.path)
            .field("contract", &self.decoder.contract())
            .field("record_count", &self.record_count)
            .finish()
    }
}

impl FileCursor {
    /// Open a file and validate its header and length.
    pub fn open(path: impl AsRef<Path>, contract: &str) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = File::open(&path)?;
        let file_len = file.metadata()?.len();

        let mut head = Vec::with_capacity(HEADER_SIZE);
        (&mut file).take(HEADER_SIZE as u64).read_to_end(&mut head)?;
        let header = RecordDecoder::decode_header(&head)?;
        let record_count = RecordDecoder::record_count(&header, file_len)?;

        tracing::debug!(
            path = %path.display(),
            contract,
            version = header.version,
            records = record_count,
            "opened contract file"
        );

        Ok(Self {
            path,
            file,
            header,
            decoder: RecordDecoder::new(contract),
            record_count,
        })
    }

    /// Path of the underlying file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Contract code stamped on ticks.
    pub fn contract(&self) -> &str {
        self.decoder.contract()
    }

    /// Number of record slots at open time.
    pub fn record_count(&self) -> u64 {
        self.record_count
    }

    /// Byte offset of a slot.
    #[inline]
    pub fn slot_offset(&self, slot: u64) -> u64 {
        self.header.data_offset() + slot * RECORD_SIZE as u64
    }

    /// Read the raw time stored in a slot.
    pub fn raw_time_at(&self, slot: u64) -> Result<RawTime> {
        let offset = self.slot_offset(slot);
        let mut file = &self.file;
        file.seek(SeekFrom::Start(offset))?;
        let mut buf = [0u8; 8];
        file.read_exact(&mut buf)?;
        Ok(RawRecord::raw_time_of(&buf))
    }

    /// First slot for which `pred(raw_time)` is false.
    fn partition_point(&self, pred: impl Fn(RawTime) -> bool) -> Result<u64> {
        let (mut lo, mut hi) = (0u64, self.record_count);
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if pred(self.raw_time_at(mid)?) {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        Ok(lo)
    }

    /// Resolve a resume point to a slot index in `0..=record_count`.
    pub fn locate(&self, point: ResumePoint) -> Result<u64> {
        match point {
            ResumePoint::Start => Ok(0),
            ResumePoint::FromRawTime(t) => self.partition_point(|raw| raw < t),
            ResumePoint::AfterRawTime(t) => self.partition_point(|raw| raw <= t),
            ResumePoint::ByteOffset(offset) => {
                let data_offset = self.header.data_offset();
                let end = self.slot_offset(self.record_count);
                if offset < data_offset
                    || offset > end
                    || (offset - data_offset) % RECORD_SIZE as u64 != 0
                {
                    return Err(Error::format(
                        offset,
                        format!(
                            "resume offset is not a record boundary in {}",
                            self.path.display()
                        ),
                    ));
                }
                Ok((offset - data_offset) / RECORD_SIZE as u64)
            }
        }
    }

    /// Stream ticks starting at the resume point.
    ///
    /// Calling this again with the same point yields the same sequence.
    pub fn resume_at(&mut self, point: ResumePoint) -> Result<Ticks<'_>> {
        let start_slot = self.locate(point)?;
        let offset = self.slot_offset(start_slot);
        let mut reader = BufReader::with_capacity(STREAM_BUFFER_SIZE, &self.file);
        reader.seek(SeekFrom::Start(offset))?;

        Ok(Ticks {
            reader,
            decoder: &self.decoder,
            data_offset: self.header.data_offset(),
            next_slot: start_slot,
            end_slot: self.record_count,
            last_raw_time: None,
            done: false,
        })
    }
}

/// Finite tick sequence produced by [`FileCursor::resume_at`].
pub struct Ticks<'a> {
    reader: BufReader<&'a File>,
    decoder: &'a RecordDecoder,
    data_offset: u64,
    next_slot: u64,
    end_slot: u64,
    last_raw_time: Option<RawTime>,
    done: bool,
}

impl Ticks<'_> {
    /// Byte offset just past the last yielded record.
    pub fn byte_position(&self) -> u64 {
        self.data_offset + self.next_slot * RECORD_SIZE as u64
    }

    /// Slots not yet yielded.
    pub fn remaining(&self) -> u64 {
        self.end_slot - self.next_slot
    }

    fn read_next(&mut self) -> Result<Tick> {
        let offset = self.byte_position();
        let mut buf = [0u8; RECORD_SIZE];
        self.reader.read_exact(&mut buf)?;
        let tick = self.decoder.decode(&buf, offset)?;

        if let Some(last) = self.last_raw_time {
            if tick.raw_time < last {
                return Err(Error::format(
                    offset,
                    format!("raw_time {} decreases after {}", tick.raw_time, last),
                ));
            }
        }
        self.last_raw_time = Some(tick.raw_time);
        self.next_slot += 1;
        Ok(tick)
    }
}

impl Iterator for Ticks<'_> {
    type Item = Result<Tick>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done || self.next_slot >= self.end_slot {
            return None;
        }
        let result = self.read_next();
        if result.is_err() {
            self.done = true;
        }
        Some(result)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = if self.done { 0 } else { self.remaining() as usize };
        (0, Some(remaining))
    }
}

impl std::iter::FusedIterator for Ticks<'_> {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writer::ScidWriter;
    use tempfile::TempDir;

    fn make_record(raw_time: i64) -> RawRecord {
        RawRecord {
            raw_time,
            open: 0.0,
            high: 100.25,
            low: 99.75,
            close: 100.0,
            num_trades: 1,
            volume: 1,
            bid_volume: 1,
            ask_volume: 0,
        }
    }

    fn write_file(dir: &TempDir, name: &str, times: &[i64]) -> PathBuf {
        let path = dir.path().join(name);
        let mut writer = ScidWriter::create(&path).unwrap();
        for &t in times {
            writer.write_record(&make_record(t)).unwrap();
        }
        writer.finish().unwrap();
        path
    }

    fn collect_times(cursor: &mut FileCursor, point: ResumePoint) -> Vec<i64> {
        cursor
            .resume_at(point)
            .unwrap()
            .map(|t| t.unwrap().raw_time)
            .collect()
    }

    #[test]
    fn test_stream_from_start() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "ESZ24.scid", &[1000, 2000]);
        let mut cursor = FileCursor::open(&path, "ESZ24").unwrap();

        assert_eq!(cursor.record_count(), 2);
        assert_eq!(collect_times(&mut cursor, ResumePoint::Start), vec![1000, 2000]);
    }

    #[test]
    fn test_resume_after_raw_time() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "ESZ24.scid", &[10, 20, 20, 30, 40]);
        let mut cursor = FileCursor::open(&path, "ESZ24").unwrap();

        assert_eq!(collect_times(&mut cursor, ResumePoint::AfterRawTime(20)), vec![30, 40]);
        assert_eq!(collect_times(&mut cursor, ResumePoint::AfterRawTime(5)).len(), 5);
        assert!(collect_times(&mut cursor, ResumePoint::AfterRawTime(40)).is_empty());
    }

    #[test]
    fn test_resume_from_raw_time_inclusive() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "ESZ24.scid", &[10, 20, 20, 30]);
        let mut cursor = FileCursor::open(&path, "ESZ24").unwrap();

        assert_eq!(
            collect_times(&mut cursor, ResumePoint::FromRawTime(20)),
            vec![20, 20, 30]
        );
        assert_eq!(collect_times(&mut cursor, ResumePoint::FromRawTime(25)), vec![30]);
    }

    #[test]
    fn test_resume_by_byte_offset() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "ESZ24.scid", &[10, 20, 30]);
        let mut cursor = FileCursor::open(&path, "ESZ24").unwrap();

        let offset = cursor.slot_offset(1);
        assert_eq!(collect_times(&mut cursor, ResumePoint::ByteOffset(offset)), vec![20, 30]);

        let end = cursor.slot_offset(3);
        assert!(collect_times(&mut cursor, ResumePoint::ByteOffset(end)).is_empty());
    }

    #[test]
    fn test_misaligned_byte_offset_rejected() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "ESZ24.scid", &[10, 20]);
        let mut cursor = FileCursor::open(&path, "ESZ24").unwrap();

        assert!(matches!(
            cursor.resume_at(ResumePoint::ByteOffset(60)),
            Err(Error::Format { offset: 60, .. })
        ));
        assert!(matches!(
            cursor.resume_at(ResumePoint::ByteOffset(10)),
            Err(Error::Format { .. })
        ));
    }

    #[test]
    fn test_restart_is_deterministic() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "ESZ24.scid", &[1, 2, 3, 4, 5, 6]);
        let mut cursor = FileCursor::open(&path, "ESZ24").unwrap();

        let first = collect_times(&mut cursor, ResumePoint::AfterRawTime(3));
        let second = collect_times(&mut cursor, ResumePoint::AfterRawTime(3));
        assert_eq!(first, second);
        assert_eq!(first, vec![4, 5, 6]);
    }

    #[test]
    fn test_position_tracks_consumed_records() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "ESZ24.scid", &[1, 2, 3]);
        let mut cursor = FileCursor::open(&path, "ESZ24").unwrap();

        let mut ticks = cursor.resume_at(ResumePoint::Start).unwrap();
        assert_eq!(ticks.byte_position(), HEADER_SIZE as u64);
        ticks.next().unwrap().unwrap();
        assert_eq!(ticks.byte_position(), (HEADER_SIZE + RECORD_SIZE) as u64);
        assert_eq!(ticks.remaining(), 2);
    }

    #[test]
    fn test_position_follows_each_yielded_record() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "ESZ24.scid", &[1, 2, 3]);
        let mut cursor = FileCursor::open(&path, "ESZ24").unwrap();

        let mut ticks = cursor.resume_at(ResumePoint::AfterRawTime(1)).unwrap();
        let mut offsets = Vec::new();
        while let Some(tick) = ticks.next() {
            tick.unwrap();
            offsets.push(ticks.byte_position());
        }
        let base = HEADER_SIZE as u64;
        let step = RECORD_SIZE as u64;
        assert_eq!(offsets, vec![base + 2 * step, base + 3 * step]);
    }

    #[test]
    fn test_non_monotonic_file_fails() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "ESZ24.scid", &[10, 30, 20]);
        let mut cursor = FileCursor::open(&path, "ESZ24").unwrap();

        let results: Vec<_> = cursor.resume_at(ResumePoint::Start).unwrap().collect();
        assert_eq!(results.len(), 3);
        match &results[2] {
            Err(Error::Format { offset, .. }) => {
                assert_eq!(*offset, (HEADER_SIZE + 2 * RECORD_SIZE) as u64)
            }
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[test]
    fn test_truncated_file_rejected_on_open() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "ESZ24.scid", &[10, 20]);
        let mut bytes = std::fs::read(&path).unwrap();
        bytes.truncate(bytes.len() - 5);
        std::fs::write(&path, bytes).unwrap();

        assert!(matches!(
            FileCursor::open(&path, "ESZ24"),
            Err(Error::Format { .. })
        ));
    }

    #[test]
    fn test_empty_file_has_no_ticks() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "ESZ24.scid", &[]);
        let mut cursor = FileCursor::open(&path, "ESZ24").unwrap();
        assert_eq!(cursor.record_count(), 0);
        assert!(collect_times(&mut cursor, ResumePoint::FromRawTime(0)).is_empty());
    }
}
