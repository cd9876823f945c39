//! Core scan runner for `bluetrax-scan`.
//!
//! This module is decoupled from process setup and exit codes: the loop takes
//! an injected channel opener and record sink so it can be tested
//! deterministically without a radio.

use crate::record::{LAYOUT_VERSION, ScanRecord, Timestamp};
use crate::scanner::decoder::{DEFAULT_MAX_RESPONSES, Decoded, EventDecoder};
use crate::scanner::frame::{DEFAULT_WATCHDOG, FrameOutcome, FrameReader};
use crate::scanner::{ControllerSession, HciChannel, ScanError};
use crate::signal::SignalCoordinator;
use crate::writer::{FlushPolicy, RecordWriter};
use clap::Parser;
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, error, info};

/// Command-line options for the scanner.
#[derive(Parser, Debug, Clone)]
#[command(name = "bluetrax-scan", author, about, version)]
pub struct ScanOptions {
    /// Inquiry length in 1.28 s units.
    #[arg(
        short,
        long,
        default_value_t = 8,
        value_parser = clap::value_parser!(u8).range(1..=100),
    )]
    pub length: u8,

    /// Append records to this file instead of stdout.
    #[arg(short, long, value_name = "PATH")]
    pub file: Option<PathBuf>,

    /// Truncate the file instead of appending.
    #[arg(short, long, requires = "file")]
    pub truncate: bool,

    /// Flush after every record instead of once per inquiry period.
    #[arg(short = 'u', long)]
    pub flush: bool,

    /// Log level: --verbose for debug, --verbose=0 for errors only.
    #[arg(
        short,
        long,
        num_args = 0..=1,
        require_equals = true,
        default_missing_value = "1",
        value_parser = clap::value_parser!(u8).range(0..=1),
    )]
    pub verbose: Option<u8>,

    /// Controller index (hciN). Defaults to the first controller that is up.
    #[arg(long, value_name = "N")]
    pub device: Option<u16>,

    /// Give up when no event arrives for this many seconds.
    #[arg(long, value_name = "SECS", default_value_t = DEFAULT_WATCHDOG.as_secs())]
    pub timeout: u64,
}

/// Command-line options for the log renderer.
#[derive(Parser, Debug, Clone)]
#[command(name = "bluetrax-unpack", author, about, version)]
pub struct UnpackOptions {
    /// Read the log from this file instead of stdin.
    #[arg(short, long, value_name = "PATH")]
    pub file: Option<PathBuf>,

    /// Log level: --verbose for debug, --verbose=0 for errors only.
    #[arg(
        short,
        long,
        num_args = 0..=1,
        require_equals = true,
        default_missing_value = "1",
        value_parser = clap::value_parser!(u8).range(0..=1),
    )]
    pub verbose: Option<u8>,
}

/// Settings the scan loop runs with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanConfig {
    pub scan_length: u8,
    pub flush: FlushPolicy,
    pub watchdog: Duration,
    pub device: Option<u16>,
    pub max_responses: usize,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            scan_length: 8,
            flush: FlushPolicy::default(),
            watchdog: DEFAULT_WATCHDOG,
            device: None,
            max_responses: DEFAULT_MAX_RESPONSES,
        }
    }
}

impl ScanOptions {
    pub fn scan_config(&self) -> ScanConfig {
        ScanConfig {
            scan_length: self.length,
            flush: if self.flush {
                FlushPolicy::Eager
            } else {
                FlushPolicy::PerPeriod
            },
            watchdog: Duration::from_secs(self.timeout),
            device: self.device,
            max_responses: DEFAULT_MAX_RESPONSES,
        }
    }

    /// Open the record sink: the file (appending unless truncating) or stdout.
    pub fn open_output(&self) -> io::Result<Box<dyn Write>> {
        match &self.file {
            Some(path) => {
                let file = OpenOptions::new()
                    .create(true)
                    .append(!self.truncate)
                    .write(true)
                    .truncate(self.truncate)
                    .open(path)?;
                Ok(Box::new(file))
            }
            None => Ok(Box::new(io::stdout())),
        }
    }
}

/// Why a scan ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Clean,
    Error,
}

/// Scan loop lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanState {
    Idle,
    Armed,
    Running,
    Draining(StopReason),
    Stopped(StopReason),
}

/// Drives one controller session from arming to shutdown.
pub struct ScanLoop<'a, W: Write> {
    config: ScanConfig,
    writer: &'a mut RecordWriter<W>,
    signals: &'a SignalCoordinator,
    state: ScanState,
}

impl<'a, W: Write> ScanLoop<'a, W> {
    pub fn new(
        config: &ScanConfig,
        writer: &'a mut RecordWriter<W>,
        signals: &'a SignalCoordinator,
    ) -> Self {
        Self {
            config: *config,
            writer,
            signals,
            state: ScanState::Idle,
        }
    }

    pub fn state(&self) -> ScanState {
        self.state
    }

    fn transition(&mut self, state: ScanState) {
        debug!(from = ?self.state, to = ?state, "scan state");
        self.state = state;
    }

    /// Open a channel with `open`, scan until stopped or failed, then disarm
    /// and close.
    ///
    /// Returns `Ok(())` only for a requested stop.
    pub async fn run<C: HciChannel>(
        &mut self,
        open: impl FnOnce() -> Result<C, ScanError>,
    ) -> Result<(), ScanError> {
        let channel = match open() {
            Ok(channel) => channel,
            Err(e) => {
                error!(error = %e, "failed to open controller");
                self.transition(ScanState::Stopped(StopReason::Error));
                return Err(e);
            }
        };

        let mut session = ControllerSession::new(channel);
        if let Err(e) = self.setup(&mut session).await {
            return self.drain(session, Err(e));
        }
        self.transition(ScanState::Armed);

        let result = self.scan(&mut session).await;
        self.drain(session, result)
    }

    async fn setup<C: HciChannel>(
        &self,
        session: &mut ControllerSession<C>,
    ) -> Result<(), ScanError> {
        session
            .arm_periodic_inquiry(self.config.scan_length)
            .await?;
        session.request_timestamps()?;
        session.install_event_filter()
    }

    async fn scan<C: HciChannel>(
        &mut self,
        session: &mut ControllerSession<C>,
    ) -> Result<(), ScanError> {
        // Marks where this run starts in an appended log.
        self.writer.write(&ScanRecord::Complete {
            timestamp: Timestamp::now(),
        })?;
        self.writer.flush()?;

        let decoder = EventDecoder::new(self.config.max_responses);
        let mut reader = FrameReader::new(self.config.watchdog);
        info!(
            layout = LAYOUT_VERSION,
            flush = ?self.writer.policy(),
            max_responses = decoder.max_responses(),
            watchdog = ?reader.watchdog(),
            "recording inquiry results"
        );
        self.transition(ScanState::Running);

        loop {
            match reader
                .wait_for_frame(session.channel_mut(), self.signals)
                .await
            {
                FrameOutcome::Ready(frame) => match decoder.decode(&frame)? {
                    Decoded::Records(records) => {
                        for record in &records {
                            self.writer.append(record)?;
                        }
                    }
                    Decoded::Ignored(_) => {}
                },
                FrameOutcome::Pending => {}
                FrameOutcome::Interrupted => {
                    if self.signals.stop_requested() {
                        return Ok(());
                    }
                }
                FrameOutcome::Timeout => return Err(ScanError::Timeout(reader.watchdog())),
                FrameOutcome::Error(e) => return Err(e),
            }
        }
    }

    fn drain<C: HciChannel>(
        &mut self,
        mut session: ControllerSession<C>,
        result: Result<(), ScanError>,
    ) -> Result<(), ScanError> {
        let reason = match result {
            Ok(()) => StopReason::Clean,
            Err(_) => StopReason::Error,
        };
        self.transition(ScanState::Draining(reason));

        if session.is_armed() {
            session.disarm();
        }
        session.close();

        let flushed = self.writer.flush();
        self.transition(ScanState::Stopped(reason));

        match (result, flushed) {
            (Ok(()), Ok(())) => {
                info!(records = self.writer.records_written(), "scan stopped");
                Ok(())
            }
            (Ok(()), Err(e)) => {
                error!(error = %e, "failed to flush log");
                Err(e)
            }
            (Err(e), flushed) => {
                if let Err(flush_error) = flushed {
                    error!(error = %flush_error, "failed to flush log");
                }
                error!(error = %e, "scan failed");
                Err(e)
            }
        }
    }
}
