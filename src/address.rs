//! Bluetooth device address type.
//!
//! HCI delivers addresses least-significant byte first. The address is kept in
//! that wire order so it can be written to the log verbatim, and only reversed
//! when rendered as text.

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// A 6-byte Bluetooth device address (BD_ADDR) in HCI wire order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct DeviceAddress(pub [u8; 6]);

impl DeviceAddress {
    pub const LEN: usize = 6;

    /// Read an address from the first six bytes of `bytes`.
    pub fn from_wire(bytes: &[u8]) -> Option<Self> {
        let raw: [u8; Self::LEN] = bytes.get(..Self::LEN)?.try_into().ok()?;
        Some(Self(raw))
    }
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = &self.0;
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            b[5], b[4], b[3], b[2], b[1], b[0]
        )
    }
}

/// Errors returned when parsing a device address string.
#[derive(Error, Debug, PartialEq)]
pub enum ParseAddressError {
    #[error("invalid device address: expected 6 parts, got {0}")]
    InvalidLength(usize),
    #[error("invalid device address: part {0} has wrong length")]
    InvalidPartLength(usize),
    #[error("invalid device address: '{0}' is not valid hex")]
    InvalidHex(String),
}

impl FromStr for DeviceAddress {
    type Err = ParseAddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(':').collect();
        if parts.len() != Self::LEN {
            return Err(ParseAddressError::InvalidLength(parts.len()));
        }

        // Text is most-significant byte first; storage is wire order.
        let mut bytes = [0u8; Self::LEN];
        for (i, part) in parts.iter().enumerate() {
            if part.len() != 2 {
                return Err(ParseAddressError::InvalidPartLength(i));
            }
            bytes[Self::LEN - 1 - i] = u8::from_str_radix(part, 16)
                .map_err(|_| ParseAddressError::InvalidHex(part.to_string()))?;
        }

        Ok(DeviceAddress(bytes))
    }
}

impl From<[u8; 6]> for DeviceAddress {
    fn from(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }
}
