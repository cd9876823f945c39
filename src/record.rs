//! Discovery records and their binary log layout.
//!
//! The log is a plain concatenation of `(discriminant, payload)` pairs. The
//! discriminant is the HCI event code the record was decoded from, and each
//! payload has a fixed width known from the discriminant alone. Integers are
//! written in host byte order with no padding.

use crate::address::DeviceAddress;
use crate::class::DeviceClass;
use std::time::{SystemTime, UNIX_EPOCH};

/// Version of the byte layout produced by [`ScanRecord::encode`].
pub const LAYOUT_VERSION: u8 = 1;

/// HCI event code for Inquiry Complete.
pub const EVT_INQUIRY_COMPLETE: u8 = 0x01;
/// HCI event code for Inquiry Result.
pub const EVT_INQUIRY_RESULT: u8 = 0x02;
/// HCI event code for Inquiry Result with RSSI.
pub const EVT_INQUIRY_RESULT_WITH_RSSI: u8 = 0x22;

const TIMESTAMP_LEN: usize = 16;
const RESULT_LEN: usize = TIMESTAMP_LEN + DeviceAddress::LEN + DeviceClass::LEN;

/// Largest encoded record, discriminant included.
pub const MAX_RECORD_LEN: usize = 1 + RESULT_LEN + 1;

/// A wall-clock instant with microsecond resolution, shaped like `struct timeval`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Timestamp {
    pub seconds: i64,
    pub microseconds: i64,
}

impl Timestamp {
    pub fn new(seconds: i64, microseconds: i64) -> Self {
        Self {
            seconds,
            microseconds,
        }
    }

    /// Read the wall clock.
    pub fn now() -> Self {
        SystemTime::now().into()
    }

    fn encode_into(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.seconds.to_ne_bytes());
        out.extend_from_slice(&self.microseconds.to_ne_bytes());
    }

    fn decode(bytes: &[u8; TIMESTAMP_LEN]) -> Self {
        let mut seconds = [0u8; 8];
        let mut microseconds = [0u8; 8];
        seconds.copy_from_slice(&bytes[..8]);
        microseconds.copy_from_slice(&bytes[8..]);
        Self {
            seconds: i64::from_ne_bytes(seconds),
            microseconds: i64::from_ne_bytes(microseconds),
        }
    }
}

impl From<SystemTime> for Timestamp {
    fn from(time: SystemTime) -> Self {
        match time.duration_since(UNIX_EPOCH) {
            Ok(since) => Self::new(since.as_secs() as i64, i64::from(since.subsec_micros())),
            Err(before) => {
                let before = before.duration();
                let micros = i64::from(before.subsec_micros());
                let seconds = -(before.as_secs() as i64);
                if micros == 0 {
                    Self::new(seconds, 0)
                } else {
                    Self::new(seconds - 1, 1_000_000 - micros)
                }
            }
        }
    }
}

/// One entry of the discovery log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanRecord {
    /// End of an inquiry period, or the synthetic start-of-scan marker.
    Complete { timestamp: Timestamp },
    /// A device answered the inquiry.
    Result {
        timestamp: Timestamp,
        address: DeviceAddress,
        class: DeviceClass,
    },
    /// A device answered the inquiry and the controller measured its RSSI (dBm).
    ResultWithRssi {
        timestamp: Timestamp,
        address: DeviceAddress,
        class: DeviceClass,
        rssi: i8,
    },
}

impl ScanRecord {
    /// The discriminant byte written before the payload.
    pub fn discriminant(&self) -> u8 {
        match self {
            ScanRecord::Complete { .. } => EVT_INQUIRY_COMPLETE,
            ScanRecord::Result { .. } => EVT_INQUIRY_RESULT,
            ScanRecord::ResultWithRssi { .. } => EVT_INQUIRY_RESULT_WITH_RSSI,
        }
    }

    pub fn timestamp(&self) -> Timestamp {
        match self {
            ScanRecord::Complete { timestamp }
            | ScanRecord::Result { timestamp, .. }
            | ScanRecord::ResultWithRssi { timestamp, .. } => *timestamp,
        }
    }

    /// Whether this record closes an inquiry period.
    pub fn is_period_boundary(&self) -> bool {
        matches!(self, ScanRecord::Complete { .. })
    }

    /// Append the discriminant and payload to `out`.
    pub fn encode_into(&self, out: &mut Vec<u8>) {
        out.push(self.discriminant());
        match self {
            ScanRecord::Complete { timestamp } => timestamp.encode_into(out),
            ScanRecord::Result {
                timestamp,
                address,
                class,
            } => {
                timestamp.encode_into(out);
                out.extend_from_slice(&address.0);
                out.extend_from_slice(&class.0);
            }
            ScanRecord::ResultWithRssi {
                timestamp,
                address,
                class,
                rssi,
            } => {
                timestamp.encode_into(out);
                out.extend_from_slice(&address.0);
                out.extend_from_slice(&class.0);
                out.extend_from_slice(&rssi.to_ne_bytes());
            }
        }
    }

    /// Encode into a fresh buffer.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(MAX_RECORD_LEN);
        self.encode_into(&mut out);
        out
    }

    /// Decode a payload that followed `discriminant`.
    ///
    /// `payload` must be exactly [`payload_len`] bytes for the discriminant.
    pub fn decode(discriminant: u8, payload: &[u8]) -> Option<Self> {
        if payload_len(discriminant)? != payload.len() {
            return None;
        }

        let timestamp = Timestamp::decode(payload[..TIMESTAMP_LEN].try_into().ok()?);
        if discriminant == EVT_INQUIRY_COMPLETE {
            return Some(ScanRecord::Complete { timestamp });
        }

        let address = DeviceAddress::from_wire(&payload[TIMESTAMP_LEN..])?;
        let class_start = TIMESTAMP_LEN + DeviceAddress::LEN;
        let class: [u8; DeviceClass::LEN] = payload[class_start..RESULT_LEN].try_into().ok()?;
        let class = DeviceClass(class);

        match discriminant {
            EVT_INQUIRY_RESULT => Some(ScanRecord::Result {
                timestamp,
                address,
                class,
            }),
            _ => Some(ScanRecord::ResultWithRssi {
                timestamp,
                address,
                class,
                rssi: i8::from_ne_bytes([payload[RESULT_LEN]]),
            }),
        }
    }
}

/// Payload width for a discriminant, or `None` if it is not a record type.
pub fn payload_len(discriminant: u8) -> Option<usize> {
    match discriminant {
        EVT_INQUIRY_COMPLETE => Some(TIMESTAMP_LEN),
        EVT_INQUIRY_RESULT => Some(RESULT_LEN),
        EVT_INQUIRY_RESULT_WITH_RSSI => Some(RESULT_LEN + 1),
        _ => None,
    }
}
