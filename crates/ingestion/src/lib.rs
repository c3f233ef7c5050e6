//! Binary tick file ingestion for the scid-sync system.
//!
//! This crate handles:
//! - Header validation and bit-exact record decoding
//! - Lazy, resumable tick streams over one contract file
//! - Contract rollover timelines
//! - Writing fixture files in the same layout

pub mod cursor;
pub mod decoder;
pub mod timeline;
pub mod writer;

pub use cursor::{FileCursor, ResumePoint, Ticks};
pub use decoder::{FileHeader, RawRecord, RecordDecoder, HEADER_SIZE, RECORD_SIZE};
pub use timeline::{contract_code_from_path, ContractTimeline};
pub use writer::ScidWriter;
