//! CSV output formatter.

use crate::address::DeviceAddress;
use crate::class::DeviceClass;
use crate::output::RecordFormatter;
use crate::reader::UnpackError;
use crate::record::{ScanRecord, Timestamp};
use chrono::{DateTime, Local, TimeZone};
use std::fmt::{self, Write};

const HEADER: &str = "type,time,bdaddr,services,major,minor,rssi";

/// Renders records as comma-separated rows with times in `Tz`.
#[derive(Debug, Clone)]
pub struct CsvFormatter<Tz: TimeZone> {
    tz: Tz,
}

impl<Tz: TimeZone> CsvFormatter<Tz> {
    pub fn new(tz: Tz) -> Self {
        Self { tz }
    }
}

impl CsvFormatter<Local> {
    /// Times in the host's local zone.
    pub fn local() -> Self {
        Self::new(Local)
    }
}

impl<Tz: TimeZone> CsvFormatter<Tz>
where
    Tz::Offset: fmt::Display,
{
    fn time(&self, timestamp: Timestamp) -> Result<String, UnpackError> {
        let invalid = || UnpackError::InvalidTimestamp {
            seconds: timestamp.seconds,
            microseconds: timestamp.microseconds,
        };
        if !(0..1_000_000).contains(&timestamp.microseconds) {
            return Err(invalid());
        }
        let time = DateTime::from_timestamp(timestamp.seconds, 0)
            .ok_or_else(invalid)?
            .with_timezone(&self.tz);
        Ok(format!(
            "{}.{:06}",
            time.format("%Y-%m-%d %H:%M:%S"),
            timestamp.microseconds
        ))
    }
}

fn push_device(line: &mut String, address: &DeviceAddress, class: &DeviceClass) {
    let (major, minor) = class.names().unwrap_or_default();
    // Writing to a String cannot fail.
    let _ = write!(line, ",{address},{},{major},{minor},", class.services());
}

impl<Tz> RecordFormatter for CsvFormatter<Tz>
where
    Tz: TimeZone + Send + Sync,
    Tz::Offset: fmt::Display,
{
    fn header(&self) -> &'static str {
        HEADER
    }

    fn format(&self, record: &ScanRecord) -> Result<String, UnpackError> {
        let time = self.time(record.timestamp())?;
        let line = match record {
            ScanRecord::Complete { .. } => format!("complete,{time},,,,,"),
            ScanRecord::Result { address, class, .. } => {
                let mut line = format!("inquiry,{time}");
                push_device(&mut line, address, class);
                line
            }
            ScanRecord::ResultWithRssi {
                address,
                class,
                rssi,
                ..
            } => {
                let mut line = format!("inquiry,{time}");
                push_device(&mut line, address, class);
                let _ = write!(line, "{rssi}");
                line
            }
        };
        Ok(line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{FixedOffset, Utc};

    const TS: Timestamp = Timestamp {
        seconds: 1_700_000_000,
        microseconds: 42,
    };

    fn rssi_record(class: DeviceClass, rssi: i8) -> ScanRecord {
        ScanRecord::ResultWithRssi {
            timestamp: TS,
            address: "AA:BB:CC:DD:EE:01".parse().unwrap(),
            class,
            rssi,
        }
    }

    #[test]
    fn test_header() {
        assert_eq!(CsvFormatter::new(Utc).header(), HEADER);
        assert_eq!(HEADER.split(',').count(), 7);
    }

    #[test]
    fn test_complete_row() {
        let row = CsvFormatter::new(Utc)
            .format(&ScanRecord::Complete { timestamp: TS })
            .unwrap();
        assert_eq!(row, "complete,2023-11-14 22:13:20.000042,,,,,");
    }

    #[test]
    fn test_rssi_row() {
        let row = CsvFormatter::new(Utc)
            .format(&rssi_record(DeviceClass([0x0C, 0x02, 0x5A]), -40))
            .unwrap();
        assert_eq!(
            row,
            "inquiry,2023-11-14 22:13:20.000042,AA:BB:CC:DD:EE:01,90,Phone,Smart phone,-40"
        );
    }

    #[test]
    fn test_result_row_has_empty_rssi() {
        let record = ScanRecord::Result {
            timestamp: TS,
            address: "00:11:22:33:44:55".parse().unwrap(),
            class: DeviceClass([0x0C, 0x01, 0x02]),
        };
        let row = CsvFormatter::new(Utc).format(&record).unwrap();
        assert_eq!(
            row,
            "inquiry,2023-11-14 22:13:20.000042,00:11:22:33:44:55,2,Computer,Laptop,"
        );
        assert_eq!(row.split(',').count(), 7);
    }

    #[test]
    fn test_unknown_major_renders_empty_names() {
        let row = CsvFormatter::new(Utc)
            .format(&rssi_record(DeviceClass([0x04, 0x0C, 0xFF]), 20))
            .unwrap();
        assert!(row.ends_with(",AA:BB:CC:DD:EE:01,255,,,20"), "{row}");
    }

    #[test]
    fn test_high_service_bits_are_unsigned() {
        // Top three service bits set.
        let row = CsvFormatter::new(Utc)
            .format(&rssi_record(DeviceClass([0x0C, 0x02, 0xE0]), -70))
            .unwrap();
        assert!(row.ends_with(",224,Phone,Smart phone,-70"), "{row}");
    }

    #[test]
    fn test_time_zone_is_applied() {
        let tz = FixedOffset::east_opt(2 * 3600).unwrap();
        let row = CsvFormatter::new(tz)
            .format(&ScanRecord::Complete { timestamp: TS })
            .unwrap();
        assert_eq!(row, "complete,2023-11-15 00:13:20.000042,,,,,");
    }

    #[test]
    fn test_invalid_microseconds() {
        let record = ScanRecord::Complete {
            timestamp: Timestamp::new(0, 1_000_000),
        };
        assert!(matches!(
            CsvFormatter::new(Utc).format(&record),
            Err(UnpackError::InvalidTimestamp {
                microseconds: 1_000_000,
                ..
            })
        ));
    }

    #[test]
    fn test_out_of_range_seconds() {
        let record = ScanRecord::Complete {
            timestamp: Timestamp::new(i64::MAX, 0),
        };
        assert!(CsvFormatter::new(Utc).format(&record).is_err());
    }
}
