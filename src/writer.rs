//! Binary log sink.

use crate::record::{MAX_RECORD_LEN, ScanRecord};
use crate::scanner::ScanError;
use std::io::{self, BufWriter, Write};
use tracing::debug;

/// When buffered records are pushed to the underlying sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlushPolicy {
    /// Flush when an inquiry period ends.
    #[default]
    PerPeriod,
    /// Flush after every record.
    Eager,
}

/// Appends encoded [`ScanRecord`]s to a byte sink.
#[derive(Debug)]
pub struct RecordWriter<W: Write> {
    sink: BufWriter<W>,
    policy: FlushPolicy,
    buf: Vec<u8>,
    written: u64,
}

impl<W: Write> RecordWriter<W> {
    pub fn new(sink: W, policy: FlushPolicy) -> Self {
        Self {
            sink: BufWriter::new(sink),
            policy,
            buf: Vec::with_capacity(MAX_RECORD_LEN),
            written: 0,
        }
    }

    pub fn policy(&self) -> FlushPolicy {
        self.policy
    }

    /// Encode `record` and write it as one contiguous chunk.
    pub fn write(&mut self, record: &ScanRecord) -> Result<(), ScanError> {
        self.buf.clear();
        record.encode_into(&mut self.buf);
        self.sink
            .write_all(&self.buf)
            .map_err(ScanError::WriteFailure)?;
        self.written += 1;
        Ok(())
    }

    /// Push everything written so far to the sink.
    pub fn flush(&mut self) -> Result<(), ScanError> {
        self.sink.flush().map_err(ScanError::WriteFailure)
    }

    /// Write `record`, then flush if the policy asks for it.
    pub fn append(&mut self, record: &ScanRecord) -> Result<(), ScanError> {
        self.write(record)?;
        if self.policy == FlushPolicy::Eager || record.is_period_boundary() {
            debug!(records = self.written, "flushing log");
            self.flush()?;
        }
        Ok(())
    }

    pub fn records_written(&self) -> u64 {
        self.written
    }

    pub fn get_ref(&self) -> &W {
        self.sink.get_ref()
    }

    /// Flush and return the sink.
    pub fn into_inner(self) -> io::Result<W> {
        self.sink.into_inner().map_err(io::IntoInnerError::into_error)
    }
}
