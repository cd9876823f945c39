//! Text renderers for discovery records.
//!
//! This module provides a trait for turning decoded log records into lines of
//! text, and the CSV implementation used by `bluetrax-unpack`.

pub mod csv;

use crate::reader::UnpackError;
use crate::record::ScanRecord;

/// Trait for formatting records into output lines.
///
/// Implementations convert one `ScanRecord` into one line of text (without
/// the trailing newline) for a specific output format.
pub trait RecordFormatter: Send + Sync {
    /// The line written before any record.
    fn header(&self) -> &'static str;

    /// Format a record.
    ///
    /// # Errors
    /// Returns `UnpackError::InvalidTimestamp` if the record's time cannot be
    /// represented.
    fn format(&self, record: &ScanRecord) -> Result<String, UnpackError>;
}
