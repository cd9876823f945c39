//! Reading the binary log back.

use crate::output::RecordFormatter;
use crate::record::{ScanRecord, payload_len};
use std::io::{self, Read, Write};
use thiserror::Error;
use tracing::debug;

/// Errors produced while reading or rendering a log.
#[derive(Error, Debug)]
pub enum UnpackError {
    /// The stream ended inside a record
    #[error(
        "corrupt log at byte {offset}: record 0x{discriminant:02x} needs {expected} payload bytes, got {actual}"
    )]
    CorruptStream {
        discriminant: u8,
        expected: usize,
        actual: usize,
        offset: u64,
    },
    #[error("unknown record type 0x{0:02x}")]
    UnknownDiscriminant(u8),
    #[error("timestamp out of range: {seconds}s {microseconds}us")]
    InvalidTimestamp { seconds: i64, microseconds: i64 },
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Fill `buf` as far as the stream allows; returns the number of bytes read.
fn read_full(input: &mut impl Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match input.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Decodes [`ScanRecord`]s from a byte stream one at a time.
///
/// Iteration stops after the first error.
#[derive(Debug)]
pub struct RecordReader<R: Read> {
    input: R,
    offset: u64,
    failed: bool,
}

impl<R: Read> RecordReader<R> {
    pub fn new(input: R) -> Self {
        Self {
            input,
            offset: 0,
            failed: false,
        }
    }

    /// Bytes consumed so far.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Read the next record. End of stream at a record boundary is `Ok(None)`.
    pub fn read_next(&mut self) -> Result<Option<ScanRecord>, UnpackError> {
        let mut discriminant = [0u8; 1];
        if read_full(&mut self.input, &mut discriminant)? == 0 {
            return Ok(None);
        }
        let discriminant = discriminant[0];
        let start = self.offset;
        self.offset += 1;

        let expected =
            payload_len(discriminant).ok_or(UnpackError::UnknownDiscriminant(discriminant))?;
        let mut payload = [0u8; crate::record::MAX_RECORD_LEN];
        let actual = read_full(&mut self.input, &mut payload[..expected])?;
        self.offset += actual as u64;
        if actual != expected {
            return Err(UnpackError::CorruptStream {
                discriminant,
                expected,
                actual,
                offset: start,
            });
        }

        ScanRecord::decode(discriminant, &payload[..expected])
            .map(Some)
            .ok_or(UnpackError::UnknownDiscriminant(discriminant))
    }
}

impl<R: Read> Iterator for RecordReader<R> {
    type Item = Result<ScanRecord, UnpackError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match self.read_next() {
            Ok(record) => record.map(Ok),
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

/// Render every record of `input` through `formatter`, header first.
///
/// Returns the number of records rendered. Stops at the first error.
pub fn unpack(
    input: impl Read,
    formatter: &dyn RecordFormatter,
    out: &mut dyn Write,
) -> Result<u64, UnpackError> {
    writeln!(out, "{}", formatter.header())?;

    let mut reader = RecordReader::new(input);
    let mut rendered = 0u64;
    for record in reader.by_ref() {
        let record = record?;
        writeln!(out, "{}", formatter.format(&record)?)?;
        rendered += 1;
    }

    out.flush()?;
    debug!(records = rendered, bytes = reader.offset(), "unpacked log");
    Ok(rendered)
}
