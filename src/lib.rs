//! `bluetrax` library.
//!
//! The binaries (`src/main.rs` and `src/bin/unpack.rs`) are responsible for
//! CLI parsing and process exit codes. The scan loop lives in [`crate::app`]
//! where it can be tested deterministically with an injected HCI channel and
//! output sink.

pub mod address;
pub mod app;
pub mod class;
pub mod logging;
pub mod output;
pub mod reader;
pub mod record;
pub mod scanner;
pub mod signal;
pub mod writer;

#[cfg(test)]
mod test_utils;

// Re-export commonly used types at the crate root
pub use address::DeviceAddress;
pub use app::{ScanConfig, ScanLoop, ScanOptions, ScanState, StopReason, UnpackOptions};
pub use class::DeviceClass;
pub use output::RecordFormatter;
pub use output::csv::CsvFormatter;
pub use reader::{RecordReader, UnpackError, unpack};
pub use record::{ScanRecord, Timestamp};
pub use scanner::decoder::{Decoded, EventDecoder};
pub use scanner::frame::RawFrame;
pub use scanner::{ControllerSession, DecodeError, HciChannel, ScanError};
pub use signal::{SignalCoordinator, StopSignal};
pub use writer::{FlushPolicy, RecordWriter};
