use crate::address::DeviceAddress;
use crate::class::DeviceClass;
use crate::record::{
    EVT_INQUIRY_COMPLETE, EVT_INQUIRY_RESULT, EVT_INQUIRY_RESULT_WITH_RSSI, Timestamp,
};
use crate::scanner::{
    EVT_CMD_COMPLETE, HCI_EVENT_PKT, HciChannel, HciFilter, OCF_PERIODIC_INQUIRY, OGF_LINK_CTL,
    Received, opcode,
};
use crate::signal::{SignalCoordinator, StopSignal};
use std::collections::VecDeque;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

/// One scripted outcome of [`FakeChannel::recv`].
#[derive(Debug, Clone)]
pub enum Step {
    /// Deliver these bytes with an optional kernel timestamp.
    Chunk(Vec<u8>, Option<Timestamp>),
    /// Raise a stop request, then block like an idle controller.
    Stop(StopSignal),
    /// Fail the read.
    Fail(io::ErrorKind),
}

impl Step {
    pub fn chunk(bytes: &[u8], timestamp: Timestamp) -> Self {
        Step::Chunk(bytes.to_vec(), Some(timestamp))
    }

    pub fn untimed(bytes: &[u8]) -> Self {
        Step::Chunk(bytes.to_vec(), None)
    }
}

/// Everything the code under test did to a [`FakeChannel`].
#[derive(Debug, Default)]
pub struct ChannelLog {
    pub commands: Vec<Vec<u8>>,
    pub filters: Vec<HciFilter>,
    pub timestamps_enabled: bool,
    pub closed: usize,
}

/// Scripted HCI channel. Reads pop [`Step`]s in order and block forever once
/// the script runs out.
#[derive(Debug)]
pub struct FakeChannel {
    steps: VecDeque<Step>,
    signals: Option<SignalCoordinator>,
    log: Arc<Mutex<ChannelLog>>,
    replies: Vec<Vec<u8>>,
    fail_commands: bool,
    fail_timestamps: bool,
}

impl FakeChannel {
    pub fn new(steps: Vec<Step>) -> Self {
        Self {
            steps: steps.into(),
            signals: None,
            log: Arc::default(),
            replies: Vec::new(),
            fail_commands: false,
            fail_timestamps: false,
        }
    }

    /// Queue a reply delivered right after the periodic inquiry command.
    pub fn with_reply(mut self, reply: Vec<u8>) -> Self {
        self.replies.push(reply);
        self
    }

    /// Accept the periodic inquiry command with status 0.
    pub fn accepting(self) -> Self {
        self.with_reply(command_complete(
            opcode(OGF_LINK_CTL, OCF_PERIODIC_INQUIRY),
            0,
        ))
    }

    /// Where [`Step::Stop`] sends its request.
    pub fn with_signals(mut self, signals: &SignalCoordinator) -> Self {
        self.signals = Some(signals.clone());
        self
    }

    pub fn failing_commands(mut self) -> Self {
        self.fail_commands = true;
        self
    }

    pub fn failing_timestamps(mut self) -> Self {
        self.fail_timestamps = true;
        self
    }

    /// Shared handle to the log; it outlives the channel.
    pub fn log(&self) -> Arc<Mutex<ChannelLog>> {
        Arc::clone(&self.log)
    }
}

impl Drop for FakeChannel {
    fn drop(&mut self) {
        if let Ok(mut log) = self.log.lock() {
            log.closed += 1;
        }
    }
}

fn is_periodic_inquiry(packet: &[u8]) -> bool {
    let wanted = opcode(OGF_LINK_CTL, OCF_PERIODIC_INQUIRY).to_le_bytes();
    packet.get(1..3) == Some(&wanted[..])
}

impl HciChannel for FakeChannel {
    fn send_command(&mut self, packet: &[u8]) -> io::Result<()> {
        self.log.lock().unwrap().commands.push(packet.to_vec());
        if self.fail_commands {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "command write failed"));
        }
        if is_periodic_inquiry(packet) {
            for reply in self.replies.drain(..).rev() {
                self.steps.push_front(Step::Chunk(reply, None));
            }
        }
        Ok(())
    }

    fn set_filter(&mut self, filter: &HciFilter) -> io::Result<()> {
        self.log.lock().unwrap().filters.push(filter.clone());
        Ok(())
    }

    fn enable_timestamps(&mut self) -> io::Result<()> {
        if self.fail_timestamps {
            return Err(io::Error::new(io::ErrorKind::PermissionDenied, "SO_TIMESTAMP denied"));
        }
        self.log.lock().unwrap().timestamps_enabled = true;
        Ok(())
    }

    fn recv<'a>(
        &'a mut self,
        buf: &'a mut [u8],
    ) -> Pin<Box<dyn Future<Output = io::Result<Received>> + Send + 'a>> {
        let step = self.steps.pop_front();
        let signals = self.signals.clone();
        Box::pin(async move {
            match step {
                Some(Step::Chunk(bytes, timestamp)) => {
                    let len = bytes.len().min(buf.len());
                    buf[..len].copy_from_slice(&bytes[..len]);
                    Ok(Received { len, timestamp })
                }
                Some(Step::Fail(kind)) => Err(io::Error::from(kind)),
                Some(Step::Stop(signal)) => {
                    if let Some(signals) = signals {
                        signals.request_stop(signal);
                    }
                    std::future::pending().await
                }
                None => std::future::pending().await,
            }
        })
    }
}

/// Two responses from phones/laptops nearby.
pub fn test_responses() -> Vec<(DeviceAddress, DeviceClass, i8)> {
    vec![
        (
            DeviceAddress([0x01, 0xEE, 0xDD, 0xCC, 0xBB, 0xAA]),
            DeviceClass([0x0C, 0x02, 0x5A]),
            -40,
        ),
        (
            DeviceAddress([0x02, 0xEE, 0xDD, 0xCC, 0xBB, 0xAA]),
            DeviceClass([0x0C, 0x01, 0x02]),
            -90,
        ),
    ]
}

fn event_bytes(event: u8, params: &[u8]) -> Vec<u8> {
    let mut bytes = vec![HCI_EVENT_PKT, event, params.len() as u8];
    bytes.extend_from_slice(params);
    bytes
}

/// Inquiry Result with RSSI event, header included.
pub fn rssi_frame(responses: &[(DeviceAddress, DeviceClass, i8)]) -> Vec<u8> {
    let mut params = vec![responses.len() as u8];
    for (address, class, rssi) in responses {
        params.extend_from_slice(&address.0);
        // page scan repetition mode, page scan period mode
        params.extend_from_slice(&[0x01, 0x00]);
        params.extend_from_slice(&class.0);
        // clock offset
        params.extend_from_slice(&[0x34, 0x12]);
        params.push(*rssi as u8);
    }
    event_bytes(EVT_INQUIRY_RESULT_WITH_RSSI, &params)
}

/// Inquiry Result event, header included.
pub fn result_frame(responses: &[(DeviceAddress, DeviceClass)]) -> Vec<u8> {
    let mut params = vec![responses.len() as u8];
    for (address, class) in responses {
        params.extend_from_slice(&address.0);
        // page scan repetition, period and mode
        params.extend_from_slice(&[0x01, 0x00, 0x00]);
        params.extend_from_slice(&class.0);
        params.extend_from_slice(&[0x34, 0x12]);
    }
    event_bytes(EVT_INQUIRY_RESULT, &params)
}

pub fn complete_frame(status: u8) -> Vec<u8> {
    event_bytes(EVT_INQUIRY_COMPLETE, &[status])
}

pub fn command_complete(opcode: u16, status: u8) -> Vec<u8> {
    let [lo, hi] = opcode.to_le_bytes();
    event_bytes(EVT_CMD_COMPLETE, &[1, lo, hi, status])
}
