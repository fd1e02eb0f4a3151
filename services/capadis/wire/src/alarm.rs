//! Decoded alarm events.

use crate::frame::{Frame, BASE_YEAR};
use crate::WireError;
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Named meaning of the point byte
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ThreeLine {
    /// Point 1
    Upper,
    /// Point 2
    Lower,
}

/// Calendar fields carried by a frame.
///
/// Fields are taken verbatim from the wire; nothing guarantees they name a
/// real date. Use [`AlarmTimestamp::to_datetime`] for a checked value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AlarmTimestamp {
    /// Full year (2000 + wire byte)
    pub year: u16,
    /// Month
    pub month: u8,
    /// Day of month
    pub day: u8,
    /// Hour
    pub hour: u8,
    /// Minute
    pub minute: u8,
    /// Second
    pub second: u8,
}

impl AlarmTimestamp {
    /// Create a timestamp from calendar fields
    pub fn new(year: u16, month: u8, day: u8, hour: u8, minute: u8, second: u8) -> Self {
        Self {
            year,
            month,
            day,
            hour,
            minute,
            second,
        }
    }

    /// Interpret the fields as a calendar date/time, if they form one
    pub fn to_datetime(&self) -> Option<NaiveDateTime> {
        NaiveDate::from_ymd_opt(self.year.into(), self.month.into(), self.day.into())?.and_hms_opt(
            self.hour.into(),
            self.minute.into(),
            self.second.into(),
        )
    }

    /// Checked conversion used by strict pipelines
    pub fn validate(&self) -> Result<NaiveDateTime, WireError> {
        self.to_datetime()
            .ok_or_else(|| WireError::Timestamp(self.to_string()))
    }
}

impl From<NaiveDateTime> for AlarmTimestamp {
    fn from(dt: NaiveDateTime) -> Self {
        use chrono::{Datelike, Timelike};
        Self {
            year: dt.year().clamp(0, u16::MAX as i32) as u16,
            month: dt.month() as u8,
            day: dt.day() as u8,
            hour: dt.hour() as u8,
            minute: dt.minute() as u8,
            second: dt.second() as u8,
        }
    }
}

impl fmt::Display for AlarmTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
            self.year, self.month, self.day, self.hour, self.minute, self.second
        )
    }
}

/// One decoded alarm report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlarmEvent {
    /// Zone/system identifier
    pub system: u8,
    /// Point identifier
    pub point: u8,
    /// Time reported by the device
    pub time: AlarmTimestamp,
}

impl AlarmEvent {
    /// Named three-line position, when the point byte carries one
    pub fn line(&self) -> Option<ThreeLine> {
        match self.point {
            1 => Some(ThreeLine::Upper),
            2 => Some(ThreeLine::Lower),
            _ => None,
        }
    }

    /// Encode back to the wire
    pub fn to_frame(&self) -> Result<Frame, WireError> {
        Frame::encode(self.system, self.point, &self.time)
    }
}

impl fmt::Display for AlarmEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "--{}--{}--{}", self.system, self.point, self.time)
    }
}

impl From<&Frame> for AlarmEvent {
    fn from(frame: &Frame) -> Self {
        decode_frame(frame)
    }
}

/// Unpack a validated frame. Infallible: the frame's shape is already checked.
pub fn decode_frame(frame: &Frame) -> AlarmEvent {
    let [y, m, d, hh, mm, ss] = frame.time_bytes();
    AlarmEvent {
        system: frame.system(),
        point: frame.point(),
        time: AlarmTimestamp::new(BASE_YEAR + u16::from(y), m, d, hh, mm, ss),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::validate_frame;

    fn frame(bytes: [u8; 10]) -> Frame {
        validate_frame(&bytes).unwrap()
    }

    #[test]
    fn test_decode_fields() {
        let event = decode_frame(&frame([0xEE, 4, 1, 0x12, 0x0B, 0x0E, 0x0F, 0x35, 0x2D, 0xED]));
        assert_eq!(event.system, 4);
        assert_eq!(event.point, 1);
        assert_eq!(event.time.to_string(), "2018-11-14 15:53:45");
        assert_eq!(event.line(), Some(ThreeLine::Upper));
        assert_eq!(event.to_string(), "--4--1--2018-11-14 15:53:45");
    }

    #[test]
    fn test_decode_zero_pads() {
        let event = decode_frame(&frame([0xEE, 0, 2, 3, 1, 2, 3, 4, 5, 0xED]));
        assert_eq!(event.time.to_string(), "2003-01-02 03:04:05");
        assert_eq!(event.line(), Some(ThreeLine::Lower));
    }

    #[test]
    fn test_out_of_range_fields_pass_through() {
        let event = decode_frame(&frame([0xEE, 255, 7, 23, 13, 40, 25, 61, 99, 0xED]));
        assert_eq!(event.point, 7);
        assert_eq!(event.line(), None);
        assert_eq!(event.time.to_string(), "2023-13-40 25:61:99");
        assert!(event.time.to_datetime().is_none());
        assert!(matches!(event.time.validate(), Err(WireError::Timestamp(_))));
    }

    #[test]
    fn test_year_byte_above_99() {
        let event = decode_frame(&frame([0xEE, 1, 1, 123, 1, 1, 0, 0, 0, 0xED]));
        assert_eq!(event.time.year, 2123);
        assert_eq!(event.time.to_string(), "2123-01-01 00:00:00");
    }

    #[test]
    fn test_valid_timestamp_converts() {
        let ts = AlarmTimestamp::new(2024, 2, 29, 23, 59, 59);
        let dt = ts.validate().unwrap();
        assert_eq!(AlarmTimestamp::from(dt), ts);

        assert!(AlarmTimestamp::new(2023, 2, 29, 0, 0, 0).to_datetime().is_none());
    }

    #[test]
    fn test_event_frame_roundtrip() {
        let bytes = [0xEE, 3, 9, 0x12, 0x0B, 0x0E, 0x0F, 0x35, 0x2E, 0xED];
        let event = AlarmEvent::from(&frame(bytes));
        assert_eq!(event.to_frame().unwrap().as_bytes(), &bytes);
    }

    #[test]
    fn test_event_serializes() {
        let event = AlarmEvent {
            system: 3,
            point: 9,
            time: AlarmTimestamp::new(2018, 11, 14, 15, 53, 46),
        };
        let json = serde_json::to_value(event).unwrap();
        assert_eq!(json["system"], 3);
        assert_eq!(json["time"]["year"], 2018);
    }
}
