//! Controller session and HCI plumbing for periodic inquiry.
//!
//! [`HciChannel`] is the seam between the scan engine and the operating
//! system: the real raw-socket backend lives in [`hci`], and tests drive the
//! same engine through a scripted channel.

pub mod decoder;
pub mod frame;

#[cfg(feature = "hci")]
pub mod hci;

use crate::record::{
    EVT_INQUIRY_COMPLETE, EVT_INQUIRY_RESULT, EVT_INQUIRY_RESULT_WITH_RSSI, Timestamp,
};
use frame::FrameAssembler;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info};

// HCI packet types
pub const HCI_COMMAND_PKT: u8 = 0x01;
pub const HCI_EVENT_PKT: u8 = 0x04;

// HCI events used for command replies
pub const EVT_CMD_COMPLETE: u8 = 0x0E;
pub const EVT_CMD_STATUS: u8 = 0x0F;

// Link control commands
pub const OGF_LINK_CTL: u16 = 0x01;
pub const OCF_PERIODIC_INQUIRY: u16 = 0x0003;
pub const OCF_EXIT_PERIODIC_INQUIRY: u16 = 0x0004;

/// General/Unlimited Inquiry Access Code (GIAC) lower address part, 0x9E8B33.
pub const GIAC_LAP: [u8; 3] = [0x33, 0x8b, 0x9e];

/// Largest frame a single read can deliver (BlueZ `HCI_MAX_FRAME_SIZE`).
pub const HCI_MAX_FRAME_SIZE: usize = 1028;

/// How long to wait for the controller to answer a configuration command.
pub const COMMAND_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors produced while decoding an HCI event into records.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Parameter length disagrees with the length implied by the event contents
    #[error("bad plen for event 0x{event:02x}: declared {declared}, expected {expected}")]
    LengthMismatch {
        event: u8,
        declared: usize,
        expected: usize,
    },
    /// Inquiry Complete carried a non-zero status
    #[error("controller reported inquiry failure: status 0x{status:02x}")]
    HardwareReported { status: u8 },
    /// More responses in one event than the decoder accepts
    #[error("event 0x{event:02x} carries {count} responses; at most {max} accepted")]
    TooManyResponses { event: u8, count: usize, max: usize },
}

/// Error type for scan sessions. Every variant ends the session.
#[derive(Error, Debug)]
pub enum ScanError {
    #[error("no Bluetooth controller available: {0}")]
    DeviceUnavailable(String),
    #[error("controller rejected {command}: {reason}")]
    CommandRejected {
        command: &'static str,
        reason: String,
    },
    #[error("HCI channel error: {0}")]
    Channel(#[source] io::Error),
    #[error("no HCI event within {0:?}; controller presumed stuck")]
    Timeout(Duration),
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),
    #[error("failed to write record: {0}")]
    WriteFailure(#[source] io::Error),
    #[error("failed to install signal handlers: {0}")]
    Signal(#[source] io::Error),
}

/// HCI filter structure for raw sockets.
#[repr(C)]
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HciFilter {
    pub type_mask: u32,
    pub event_mask: [u32; 2],
    pub opcode: u16,
}

impl HciFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Events recorded by the scanner: inquiry results and completions.
    pub fn inquiry_events() -> Self {
        let mut filter = Self::new();
        filter.set_ptype(HCI_EVENT_PKT);
        filter.set_event(EVT_INQUIRY_COMPLETE);
        filter.set_event(EVT_INQUIRY_RESULT);
        filter.set_event(EVT_INQUIRY_RESULT_WITH_RSSI);
        filter
    }

    /// Replies to commands sent on the socket.
    pub fn command_replies() -> Self {
        let mut filter = Self::new();
        filter.set_ptype(HCI_EVENT_PKT);
        filter.set_event(EVT_CMD_COMPLETE);
        filter.set_event(EVT_CMD_STATUS);
        filter
    }

    pub fn set_ptype(&mut self, ptype: u8) {
        self.type_mask |= 1 << (ptype as u32);
    }

    pub fn set_event(&mut self, event: u8) {
        let bit = event as usize;
        self.event_mask[bit / 32] |= 1 << (bit % 32);
    }

    pub fn admits_event(&self, event: u8) -> bool {
        let bit = event as usize;
        self.event_mask[bit / 32] & (1 << (bit % 32)) != 0
    }
}

/// Combine a command group and command field into an HCI opcode.
pub fn opcode(ogf: u16, ocf: u16) -> u16 {
    (ogf << 10) | ocf
}

/// Create an HCI command packet
pub fn hci_command_packet(ogf: u16, ocf: u16, params: &[u8]) -> Vec<u8> {
    let opcode = opcode(ogf, ocf);
    let mut packet = Vec::with_capacity(4 + params.len());
    packet.push(HCI_COMMAND_PKT);
    packet.extend_from_slice(&opcode.to_le_bytes());
    packet.push(params.len() as u8);
    packet.extend_from_slice(params);
    packet
}

/// Periodic Inquiry Mode command parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeriodicInquiry {
    pub max_period: u16,
    pub min_period: u16,
    pub lap: [u8; 3],
    pub length: u8,
    /// Zero means an unlimited number of responses.
    pub num_rsp: u8,
}

impl PeriodicInquiry {
    /// Parameters giving the shortest randomized delay between inquiries the
    /// controller allows, which requires `max_period > min_period > length`.
    pub fn shortest_period(length: u8) -> Self {
        let min_period = u16::from(length) + 1;
        Self {
            max_period: min_period + 1,
            min_period,
            lap: GIAC_LAP,
            length,
            num_rsp: 0,
        }
    }

    pub fn to_bytes(&self) -> [u8; 9] {
        let max = self.max_period.to_le_bytes();
        let min = self.min_period.to_le_bytes();
        [
            max[0],
            max[1],
            min[0],
            min[1],
            self.lap[0],
            self.lap[1],
            self.lap[2],
            self.length,
            self.num_rsp,
        ]
    }

    pub fn packet(&self) -> Vec<u8> {
        hci_command_packet(OGF_LINK_CTL, OCF_PERIODIC_INQUIRY, &self.to_bytes())
    }
}

/// Bytes delivered by one read from an [`HciChannel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Received {
    pub len: usize,
    /// Receive time reported by the kernel, when timestamps are enabled.
    pub timestamp: Option<Timestamp>,
}

/// A local HCI control channel.
pub trait HciChannel: Send {
    /// Write one complete command packet.
    fn send_command(&mut self, packet: &[u8]) -> io::Result<()>;

    /// Restrict which packets the channel delivers.
    fn set_filter(&mut self, filter: &HciFilter) -> io::Result<()>;

    /// Ask for a receive timestamp with every delivered packet.
    fn enable_timestamps(&mut self) -> io::Result<()>;

    /// Wait until data is available and read it into `buf`.
    fn recv<'a>(
        &'a mut self,
        buf: &'a mut [u8],
    ) -> Pin<Box<dyn Future<Output = io::Result<Received>> + Send + 'a>>;
}

/// Status byte of a Command Complete/Command Status event answering `opcode`.
fn command_reply_status(event: u8, params: &[u8], opcode: u16) -> Option<u8> {
    match (event, params) {
        (EVT_CMD_COMPLETE, [_, lo, hi, status, ..]) if u16::from_le_bytes([*lo, *hi]) == opcode => {
            Some(*status)
        }
        (EVT_CMD_STATUS, [status, _, lo, hi, ..]) if u16::from_le_bytes([*lo, *hi]) == opcode => {
            Some(*status)
        }
        _ => None,
    }
}

/// An open control channel to one radio controller.
///
/// The session tracks whether periodic inquiry is armed so that shutdown can
/// undo it. Dropping the session releases the channel.
#[derive(Debug)]
pub struct ControllerSession<C: HciChannel> {
    channel: C,
    armed: bool,
}

impl<C: HciChannel> ControllerSession<C> {
    pub fn new(channel: C) -> Self {
        Self {
            channel,
            armed: false,
        }
    }

    pub fn channel_mut(&mut self) -> &mut C {
        &mut self.channel
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }

    /// Put the controller into periodic inquiry mode and wait for it to accept.
    pub async fn arm_periodic_inquiry(&mut self, scan_length: u8) -> Result<(), ScanError> {
        const COMMAND: &str = "periodic inquiry";
        let rejected = |reason: String| ScanError::CommandRejected {
            command: COMMAND,
            reason,
        };

        let params = PeriodicInquiry::shortest_period(scan_length);
        debug!(
            length = params.length,
            min_period = params.min_period,
            max_period = params.max_period,
            "requesting periodic inquiry"
        );

        self.channel
            .set_filter(&HciFilter::command_replies())
            .map_err(|e| rejected(format!("failed to set command reply filter: {e}")))?;
        self.channel
            .send_command(&params.packet())
            .map_err(|e| rejected(e.to_string()))?;

        let wanted = opcode(OGF_LINK_CTL, OCF_PERIODIC_INQUIRY);
        let status = tokio::time::timeout(COMMAND_TIMEOUT, self.await_command_reply(wanted))
            .await
            .map_err(|_| rejected(format!("no reply within {COMMAND_TIMEOUT:?}")))?
            .map_err(|e| rejected(e.to_string()))?;

        if status != 0 {
            return Err(rejected(format!("status 0x{status:02x}")));
        }

        self.armed = true;
        info!(length = scan_length, "periodic inquiry armed");
        Ok(())
    }

    async fn await_command_reply(&mut self, wanted: u16) -> io::Result<u8> {
        let mut assembler = FrameAssembler::default();
        let mut buf = vec![0u8; HCI_MAX_FRAME_SIZE];

        loop {
            let received = self.channel.recv(&mut buf).await?;
            if received.len == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "HCI channel closed",
                ));
            }
            assembler.push(&buf[..received.len], received.timestamp.unwrap_or_default());
            while let Some(frame) = assembler.next_frame() {
                if let Some(status) = command_reply_status(frame.event(), frame.params(), wanted) {
                    return Ok(status);
                }
            }
        }
    }

    /// Enable per-frame receive timestamps.
    pub fn request_timestamps(&mut self) -> Result<(), ScanError> {
        self.channel
            .enable_timestamps()
            .map_err(|e| ScanError::CommandRejected {
                command: "data timestamps",
                reason: e.to_string(),
            })
    }

    /// Deliver only inquiry results and inquiry completions.
    pub fn install_event_filter(&mut self) -> Result<(), ScanError> {
        self.channel
            .set_filter(&HciFilter::inquiry_events())
            .map_err(|e| ScanError::CommandRejected {
                command: "event filter",
                reason: e.to_string(),
            })
    }

    /// Best-effort exit from periodic inquiry mode; failures are only logged.
    pub fn disarm(&mut self) {
        let packet = hci_command_packet(OGF_LINK_CTL, OCF_EXIT_PERIODIC_INQUIRY, &[]);
        match self.channel.send_command(&packet) {
            Ok(()) => {
                self.armed = false;
                debug!("exit periodic inquiry requested");
            }
            Err(e) => error!(error = %e, "failed to exit periodic inquiry state"),
        }
    }

    /// Release the channel.
    pub fn close(self) {
        debug!(armed = self.armed, "closing controller session");
        drop(self.channel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{FakeChannel, command_complete};

    #[test]
    fn test_inquiry_filter_setup() {
        let filter = HciFilter::inquiry_events();

        // HCI_EVENT_PKT (0x04) sets bit 4 in type_mask
        assert_eq!(filter.type_mask, 1 << HCI_EVENT_PKT);
        // 0x01 and 0x02 live in the first word, 0x22 (34) in the second
        assert_eq!(filter.event_mask[0], 0b110);
        assert_eq!(filter.event_mask[1], 1 << 2);
        assert!(filter.admits_event(EVT_INQUIRY_RESULT_WITH_RSSI));
        assert!(!filter.admits_event(EVT_CMD_COMPLETE));
    }

    #[test]
    fn test_hci_command_packet() {
        let packet = hci_command_packet(OGF_LINK_CTL, OCF_EXIT_PERIODIC_INQUIRY, &[]);
        assert_eq!(packet, vec![0x01, 0x04, 0x04, 0x00]);
    }

    #[test]
    fn test_periodic_inquiry_periods() {
        for length in [1u8, 8, 100] {
            let params = PeriodicInquiry::shortest_period(length);
            assert!(params.max_period > params.min_period);
            assert!(params.min_period > u16::from(params.length));
            assert_eq!(params.max_period - u16::from(length), 2);
        }
    }

    #[test]
    fn test_periodic_inquiry_packet_layout() {
        let packet = PeriodicInquiry::shortest_period(8).packet();
        assert_eq!(
            packet,
            vec![0x01, 0x03, 0x04, 9, 10, 0, 9, 0, 0x33, 0x8b, 0x9e, 8, 0]
        );
    }

    #[test]
    fn test_command_reply_status() {
        let wanted = opcode(OGF_LINK_CTL, OCF_PERIODIC_INQUIRY);
        assert_eq!(
            command_reply_status(EVT_CMD_COMPLETE, &[1, 0x03, 0x04, 0x00], wanted),
            Some(0)
        );
        assert_eq!(
            command_reply_status(EVT_CMD_STATUS, &[0x0C, 1, 0x03, 0x04], wanted),
            Some(0x0C)
        );
        assert_eq!(
            command_reply_status(EVT_CMD_COMPLETE, &[1, 0x04, 0x04, 0x00], wanted),
            None
        );
        assert_eq!(command_reply_status(EVT_CMD_COMPLETE, &[1, 0x03], wanted), None);
    }

    #[tokio::test]
    async fn test_arm_waits_for_matching_reply() {
        let wanted = opcode(OGF_LINK_CTL, OCF_PERIODIC_INQUIRY);
        let channel = FakeChannel::new(vec![])
            // An unrelated reply first; it must be skipped.
            .with_reply(command_complete(opcode(0x03, 0x0003), 0))
            .with_reply(command_complete(wanted, 0));
        let log = channel.log();

        let mut session = ControllerSession::new(channel);
        session.arm_periodic_inquiry(8).await.unwrap();
        assert!(session.is_armed());

        let log = log.lock().unwrap();
        assert_eq!(log.filters, vec![HciFilter::command_replies()]);
        assert_eq!(log.commands, vec![PeriodicInquiry::shortest_period(8).packet()]);
    }

    #[tokio::test]
    async fn test_arm_rejected_by_status() {
        let wanted = opcode(OGF_LINK_CTL, OCF_PERIODIC_INQUIRY);
        let channel = FakeChannel::new(vec![]).with_reply(command_complete(wanted, 0x12));

        let mut session = ControllerSession::new(channel);
        let err = session.arm_periodic_inquiry(8).await.unwrap_err();
        assert!(matches!(err, ScanError::CommandRejected { .. }));
        assert!(err.to_string().contains("0x12"));
        assert!(!session.is_armed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_arm_without_reply_times_out() {
        let mut session = ControllerSession::new(FakeChannel::new(vec![]));
        let err = session.arm_periodic_inquiry(8).await.unwrap_err();
        assert!(err.to_string().contains("no reply"));
    }

    #[test]
    fn test_disarm_sends_exit_command() {
        let channel = FakeChannel::new(vec![]);
        let log = channel.log();
        let mut session = ControllerSession::new(channel);
        session.disarm();
        session.close();

        let log = log.lock().unwrap();
        assert_eq!(
            log.commands,
            vec![hci_command_packet(OGF_LINK_CTL, OCF_EXIT_PERIODIC_INQUIRY, &[])]
        );
        assert_eq!(log.closed, 1);
    }

    #[test]
    fn test_disarm_failure_is_not_escalated() {
        let channel = FakeChannel::new(vec![]).failing_commands();
        let log = channel.log();
        let mut session = ControllerSession::new(channel);
        session.disarm();
        session.close();
        assert_eq!(log.lock().unwrap().closed, 1);
    }

    #[test]
    fn test_decode_error_display() {
        let err = DecodeError::LengthMismatch {
            event: 0x22,
            declared: 14,
            expected: 15,
        };
        assert_eq!(
            err.to_string(),
            "bad plen for event 0x22: declared 14, expected 15"
        );

        let err = ScanError::from(DecodeError::HardwareReported { status: 0x0C });
        assert_eq!(
            err.to_string(),
            "Decode error: controller reported inquiry failure: status 0x0c"
        );
    }
}
