//! Wire protocol error types.

use thiserror::Error;

/// Wire protocol errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    /// Candidate is not exactly one frame long
    #[error("bad frame length: {0}")]
    Length(usize),

    /// First byte is not the header sentinel
    #[error("bad header byte: {0:#04x}")]
    Header(u8),

    /// Last byte is not the end sentinel
    #[error("bad end byte: {0:#04x}")]
    End(u8),

    /// Timestamp fields do not form a calendar date/time (strict mode only)
    #[error("invalid timestamp: {0}")]
    Timestamp(String),

    /// Year cannot be expressed as a one-byte offset from 2000
    #[error("year out of range: {0}")]
    Year(u16),

    /// Carry-over would grow past its limit and was discarded
    #[error("carry-over overflow: {len} bytes exceeds limit of {max}")]
    CarryOverflow {
        /// Size the buffer would have reached
        len: usize,
        /// Configured limit
        max: usize,
    },
}

impl WireError {
    /// Whether this error reports resource exhaustion rather than a malformed frame
    pub fn is_resource_exhaustion(&self) -> bool {
        matches!(self, WireError::CarryOverflow { .. })
    }
}
