//! Sentinel framing, stream reassembly, validation and alarm decoding for capadis.
//!
//! A capacitance-disturbance alarm controller reports each alarm as one
//! fixed 10-byte frame over TCP. TCP delivers those bytes in arbitrary
//! chunks, so this crate recovers frames from a chunked byte stream and
//! turns them into [`AlarmEvent`]s.
//!
//! ## Wire Format
//!
//! ```text
//! +--------+--------+-------+------+-------+-----+------+--------+--------+--------+
//! | 0xEE   | system | point | year | month | day | hour | minute | second | 0xED   |
//! +--------+--------+-------+------+-------+-----+------+--------+--------+--------+
//!   header    u8       u8     +2000   u8      u8    u8     u8       u8      end
//! ```
//!
//! ## Layers
//!
//! - [`StreamReassembler`]: chunks in, frame-shaped candidates out, carry-over in between
//! - [`validate_frame`]: candidate to [`Frame`], checking length and sentinel positions
//! - [`decode_frame`]: [`Frame`] to [`AlarmEvent`]
//! - [`AlarmIngestPipeline`]: all three, one instance per connection
//!
//! ```rust
//! use capadis_wire::AlarmIngestPipeline;
//!
//! let mut pipeline = AlarmIngestPipeline::default();
//! assert!(pipeline.feed(b"\xee\x04\x01").events.is_empty());
//!
//! let out = pipeline.feed(b"\x12\x0b\x0e\x0f5-\xed");
//! assert_eq!(out.events[0].to_string(), "--4--1--2018-11-14 15:53:45");
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod alarm;
pub mod error;
pub mod frame;
pub mod pipeline;
pub mod reassembly;

// Re-export main types
pub use alarm::{decode_frame, AlarmEvent, AlarmTimestamp, ThreeLine};
pub use error::WireError;
pub use frame::{is_sentinel, validate_frame, Frame, BASE_YEAR, END, FRAME_LEN, HEAD};
pub use pipeline::{
    AlarmIngestPipeline, AlarmSink, Ingested, PipelineConfig, PipelineStats, RejectedFrame,
};
pub use reassembly::{
    CarryOverPolicy, ReassemblerStats, StreamReassembler, DEFAULT_MAX_CARRY_OVER,
};
