//! HCI event framing.
//!
//! A read from the control channel is not guaranteed to hold exactly one
//! event, so bytes are accumulated in a [`FrameAssembler`] until the header's
//! parameter length is satisfied. [`FrameReader`] adds the bounded wait and
//! the receive timestamp.

use super::{HCI_EVENT_PKT, HCI_MAX_FRAME_SIZE, HciChannel, ScanError};
use crate::record::Timestamp;
use crate::signal::SignalCoordinator;
use std::io;
use std::time::Duration;
use tracing::{debug, warn};

/// Packet type, event code and parameter length.
pub const HCI_EVENT_HDR_SIZE: usize = 3;

/// Default liveness watchdog: no event for this long means the controller is stuck.
pub const DEFAULT_WATCHDOG: Duration = Duration::from_secs(5 * 60);

/// One complete HCI event packet and the time it was received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    bytes: Vec<u8>,
    timestamp: Timestamp,
}

impl RawFrame {
    /// Build an event packet from its code and parameters.
    ///
    /// Returns `None` if `params` does not fit the one-byte length field.
    pub fn event_packet(event: u8, params: &[u8], timestamp: Timestamp) -> Option<Self> {
        let plen = u8::try_from(params.len()).ok()?;
        let mut bytes = Vec::with_capacity(HCI_EVENT_HDR_SIZE + params.len());
        bytes.extend_from_slice(&[HCI_EVENT_PKT, event, plen]);
        bytes.extend_from_slice(params);
        Some(Self { bytes, timestamp })
    }

    pub fn event(&self) -> u8 {
        self.bytes[1]
    }

    /// The parameter length declared in the header.
    pub fn declared_len(&self) -> usize {
        usize::from(self.bytes[2])
    }

    pub fn params(&self) -> &[u8] {
        &self.bytes[HCI_EVENT_HDR_SIZE..]
    }

    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

/// Reassembles HCI event packets from arbitrarily split reads.
#[derive(Debug, Default)]
pub struct FrameAssembler {
    pending: Vec<u8>,
    timestamp: Timestamp,
}

impl FrameAssembler {
    /// Append bytes from one read. The first chunk of a frame sets its timestamp.
    pub fn push(&mut self, bytes: &[u8], timestamp: Timestamp) {
        if self.pending.is_empty() {
            self.timestamp = timestamp;
        }
        self.pending.extend_from_slice(bytes);
    }

    /// Number of buffered bytes not yet part of a returned frame.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Take the next complete frame, if one is buffered.
    pub fn next_frame(&mut self) -> Option<RawFrame> {
        let packet_type = *self.pending.first()?;
        if packet_type != HCI_EVENT_PKT {
            warn!(
                packet_type,
                discarded = self.pending.len(),
                "got non-event HCI packet"
            );
            self.pending.clear();
            return None;
        }

        if self.pending.len() < HCI_EVENT_HDR_SIZE {
            return None;
        }

        let total = HCI_EVENT_HDR_SIZE + usize::from(self.pending[2]);
        if self.pending.len() < total {
            debug!(
                len = self.pending.len(),
                plen = self.pending[2],
                "partial HCI event; waiting for the rest"
            );
            return None;
        }

        let rest = self.pending.split_off(total);
        let bytes = std::mem::replace(&mut self.pending, rest);
        debug!(evt = bytes[1], plen = bytes[2], "HCI event");

        Some(RawFrame {
            bytes,
            timestamp: self.timestamp,
        })
    }
}

/// Result of one bounded wait on the control channel.
#[derive(Debug)]
pub enum FrameOutcome {
    /// A complete frame is available.
    Ready(RawFrame),
    /// Data arrived but no complete frame yet.
    Pending,
    /// The watchdog expired with nothing received.
    Timeout,
    /// A stop request woke the wait.
    Interrupted,
    /// The channel failed.
    Error(ScanError),
}

enum Wake {
    Stop,
    Data(io::Result<super::Received>),
    Watchdog,
}

/// Waits for frames on one channel with a liveness watchdog.
#[derive(Debug)]
pub struct FrameReader {
    assembler: FrameAssembler,
    buf: Vec<u8>,
    watchdog: Duration,
    warned_missing_timestamp: bool,
}

impl FrameReader {
    pub fn new(watchdog: Duration) -> Self {
        Self {
            assembler: FrameAssembler::default(),
            buf: vec![0u8; HCI_MAX_FRAME_SIZE],
            watchdog,
            warned_missing_timestamp: false,
        }
    }

    pub fn watchdog(&self) -> Duration {
        self.watchdog
    }

    /// Wait once for data, stop request or watchdog expiry, whichever is first.
    ///
    /// A frame already buffered from an earlier read is returned without
    /// waiting.
    pub async fn wait_for_frame<C: HciChannel + ?Sized>(
        &mut self,
        channel: &mut C,
        signals: &SignalCoordinator,
    ) -> FrameOutcome {
        if let Some(frame) = self.assembler.next_frame() {
            return FrameOutcome::Ready(frame);
        }

        let wake = tokio::select! {
            biased;
            _ = signals.notified() => Wake::Stop,
            received = channel.recv(&mut self.buf) => Wake::Data(received),
            _ = tokio::time::sleep(self.watchdog) => Wake::Watchdog,
        };

        match wake {
            Wake::Stop => FrameOutcome::Interrupted,
            Wake::Watchdog => FrameOutcome::Timeout,
            Wake::Data(Err(e)) if e.kind() == io::ErrorKind::Interrupted => {
                FrameOutcome::Interrupted
            }
            Wake::Data(Err(e)) => FrameOutcome::Error(ScanError::Channel(e)),
            Wake::Data(Ok(received)) if received.len == 0 => FrameOutcome::Error(
                ScanError::Channel(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "HCI channel closed",
                )),
            ),
            Wake::Data(Ok(received)) => {
                let timestamp = match received.timestamp {
                    Some(timestamp) => timestamp,
                    None => {
                        if !self.warned_missing_timestamp {
                            warn!("HCI frame arrived without a timestamp; using the wall clock");
                            self.warned_missing_timestamp = true;
                        }
                        Timestamp::now()
                    }
                };
                let len = received.len.min(self.buf.len());
                self.assembler.push(&self.buf[..len], timestamp);

                match self.assembler.next_frame() {
                    Some(frame) => FrameOutcome::Ready(frame),
                    None => FrameOutcome::Pending,
                }
            }
        }
    }
}
