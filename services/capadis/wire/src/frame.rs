//! Fixed-length alarm frame and its validator.
//!
//! Every alarm report on the wire is exactly [`FRAME_LEN`] bytes, opened by
//! [`HEAD`] and closed by [`END`]. Payload bytes are unconstrained, so a
//! payload byte may equal either sentinel; the validator only checks length
//! and the two sentinel positions.

use crate::alarm::AlarmTimestamp;
use crate::WireError;
use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;

/// Header sentinel
pub const HEAD: u8 = 0xEE;
/// End sentinel
pub const END: u8 = 0xED;
/// Total frame length in bytes
pub const FRAME_LEN: usize = 10;
/// Year encoded by a zero year byte
pub const BASE_YEAR: u16 = 2000;

/// Whether a byte is one of the two sentinel values
#[inline]
pub fn is_sentinel(byte: u8) -> bool {
    byte == HEAD || byte == END
}

/// A validated 10-byte alarm frame.
///
/// Only [`validate_frame`] and [`Frame::encode`] produce values of this
/// type, so the length and sentinel positions always hold.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Frame([u8; FRAME_LEN]);

impl Frame {
    /// Build a frame from alarm fields
    pub fn encode(system: u8, point: u8, ts: &AlarmTimestamp) -> Result<Self, WireError> {
        let year = ts
            .year
            .checked_sub(BASE_YEAR)
            .and_then(|y| u8::try_from(y).ok())
            .ok_or(WireError::Year(ts.year))?;

        Ok(Frame([
            HEAD, system, point, year, ts.month, ts.day, ts.hour, ts.minute, ts.second, END,
        ]))
    }

    /// Zone/system identifier
    pub fn system(&self) -> u8 {
        self.0[1]
    }

    /// Point identifier
    pub fn point(&self) -> u8 {
        self.0[2]
    }

    /// The six raw time bytes: year offset, month, day, hour, minute, second
    pub fn time_bytes(&self) -> [u8; 6] {
        let mut out = [0u8; 6];
        out.copy_from_slice(&self.0[3..9]);
        out
    }

    /// Raw frame bytes
    pub fn as_bytes(&self) -> &[u8; FRAME_LEN] {
        &self.0
    }

    /// Append the frame to a buffer
    pub fn encode_into(&self, buf: &mut BytesMut) {
        buf.put_slice(&self.0);
    }

    /// Copy the frame into a standalone buffer
    pub fn to_bytes(&self) -> Bytes {
        Bytes::copy_from_slice(&self.0)
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Frame(")?;
        for (i, b) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "{:02x}", b)?;
        }
        write!(f, ")")
    }
}

impl TryFrom<&[u8]> for Frame {
    type Error = WireError;

    fn try_from(candidate: &[u8]) -> Result<Self, Self::Error> {
        validate_frame(candidate)
    }
}

/// Promote a candidate slice to a [`Frame`].
///
/// Rejects anything that is not exactly [`FRAME_LEN`] bytes with [`HEAD`]
/// first and [`END`] last. Payload bytes are not inspected.
pub fn validate_frame(candidate: &[u8]) -> Result<Frame, WireError> {
    let bytes: [u8; FRAME_LEN] = candidate
        .try_into()
        .map_err(|_| WireError::Length(candidate.len()))?;

    if bytes[0] != HEAD {
        return Err(WireError::Header(bytes[0]));
    }
    if bytes[FRAME_LEN - 1] != END {
        return Err(WireError::End(bytes[FRAME_LEN - 1]));
    }

    Ok(Frame(bytes))
}
