//! Decoding of inquiry events into scan records.

use super::DecodeError;
use super::frame::RawFrame;
use crate::address::DeviceAddress;
use crate::class::DeviceClass;
use crate::record::{
    EVT_INQUIRY_COMPLETE, EVT_INQUIRY_RESULT, EVT_INQUIRY_RESULT_WITH_RSSI, ScanRecord, Timestamp,
};
use tracing::{debug, warn};

/// Size of one response in an Inquiry Result event.
///
/// bdaddr(6), page scan repetition mode(1), page scan period mode(1),
/// page scan mode(1), class of device(3), clock offset(2)
pub const INQUIRY_INFO_SIZE: usize = 14;

/// Size of one response in an Inquiry Result with RSSI event.
///
/// bdaddr(6), page scan repetition mode(1), page scan period mode(1),
/// class of device(3), clock offset(2), rssi(1)
pub const INQUIRY_INFO_WITH_RSSI_SIZE: usize = 14;

/// The response count is a single byte.
pub const DEFAULT_MAX_RESPONSES: usize = u8::MAX as usize;

/// What a frame decoded to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    /// Records to append to the log, in event order.
    Records(Vec<ScanRecord>),
    /// An event this decoder does not handle.
    Ignored(u8),
}

/// Validates inquiry events and turns them into [`ScanRecord`]s.
#[derive(Debug, Clone, Copy)]
pub struct EventDecoder {
    max_responses: usize,
}

impl Default for EventDecoder {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RESPONSES)
    }
}

fn address(info: &[u8]) -> DeviceAddress {
    let mut bytes = [0u8; DeviceAddress::LEN];
    bytes.copy_from_slice(&info[..DeviceAddress::LEN]);
    DeviceAddress(bytes)
}

fn class_at(info: &[u8], offset: usize) -> DeviceClass {
    let mut bytes = [0u8; DeviceClass::LEN];
    bytes.copy_from_slice(&info[offset..offset + DeviceClass::LEN]);
    DeviceClass(bytes)
}

fn inquiry_result(timestamp: Timestamp, info: &[u8]) -> ScanRecord {
    ScanRecord::Result {
        timestamp,
        address: address(info),
        class: class_at(info, 9),
    }
}

fn inquiry_result_with_rssi(timestamp: Timestamp, info: &[u8]) -> ScanRecord {
    ScanRecord::ResultWithRssi {
        timestamp,
        address: address(info),
        class: class_at(info, 8),
        rssi: info[13] as i8,
    }
}

impl EventDecoder {
    pub fn new(max_responses: usize) -> Self {
        Self { max_responses }
    }

    pub fn max_responses(&self) -> usize {
        self.max_responses
    }

    /// Decode one complete frame.
    ///
    /// A frame that fails validation yields an error and no records.
    pub fn decode(&self, frame: &RawFrame) -> Result<Decoded, DecodeError> {
        match frame.event() {
            EVT_INQUIRY_RESULT => self
                .decode_results(frame, INQUIRY_INFO_SIZE, inquiry_result)
                .map(Decoded::Records),
            EVT_INQUIRY_RESULT_WITH_RSSI => self
                .decode_results(frame, INQUIRY_INFO_WITH_RSSI_SIZE, inquiry_result_with_rssi)
                .map(Decoded::Records),
            EVT_INQUIRY_COMPLETE => decode_complete(frame).map(Decoded::Records),
            other => {
                warn!(evt = other, "unknown evt");
                Ok(Decoded::Ignored(other))
            }
        }
    }

    fn decode_results(
        &self,
        frame: &RawFrame,
        info_size: usize,
        build: fn(Timestamp, &[u8]) -> ScanRecord,
    ) -> Result<Vec<ScanRecord>, DecodeError> {
        let event = frame.event();
        let params = frame.params();
        let declared = params.len();

        let Some(&count) = params.first() else {
            return Err(DecodeError::LengthMismatch {
                event,
                declared,
                expected: 1,
            });
        };
        let count = usize::from(count);
        debug!(evt = event, num_rsp = count, "inquiry result");

        let expected = 1 + count * info_size;
        if declared != expected {
            return Err(DecodeError::LengthMismatch {
                event,
                declared,
                expected,
            });
        }
        if count > self.max_responses {
            return Err(DecodeError::TooManyResponses {
                event,
                count,
                max: self.max_responses,
            });
        }

        let mut records = Vec::with_capacity(count);
        records.extend(
            params[1..]
                .chunks_exact(info_size)
                .map(|info| build(frame.timestamp(), info)),
        );
        Ok(records)
    }
}

fn decode_complete(frame: &RawFrame) -> Result<Vec<ScanRecord>, DecodeError> {
    debug!("inquiry complete");
    match frame.params() {
        [0] => Ok(vec![ScanRecord::Complete {
            timestamp: frame.timestamp(),
        }]),
        [status] => Err(DecodeError::HardwareReported { status: *status }),
        params => Err(DecodeError::LengthMismatch {
            event: EVT_INQUIRY_COMPLETE,
            declared: params.len(),
            expected: 1,
        }),
    }
}
