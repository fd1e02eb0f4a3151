//! Chunk-to-alarm ingest pipeline.
//!
//! Composes [`StreamReassembler`], [`validate_frame`] and [`decode_frame`].
//! The pipeline owns the reassembler, so it is as per-connection as the
//! reassembler is.

use crate::alarm::{decode_frame, AlarmEvent};
use crate::frame::validate_frame;
use crate::reassembly::{
    CarryOverPolicy, ReassemblerStats, StreamReassembler, DEFAULT_MAX_CARRY_OVER,
};
use crate::WireError;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Pipeline settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Carry-over limit in bytes
    pub max_carry_over: usize,
    /// Supersede policy for pending fragments
    pub carry_over_policy: CarryOverPolicy,
    /// Reject frames whose timestamp is not a real date/time
    pub strict_timestamps: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_carry_over: DEFAULT_MAX_CARRY_OVER,
            carry_over_policy: CarryOverPolicy::Replace,
            strict_timestamps: false,
        }
    }
}

/// A candidate that did not become an alarm
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedFrame {
    /// Candidate bytes; empty for carry-over overflows, whose buffer is not kept
    pub bytes: Bytes,
    /// Why it was rejected
    pub reason: WireError,
}

/// Receiver of pipeline output
pub trait AlarmSink {
    /// Called once per decoded alarm, in stream order
    fn on_alarm(&mut self, event: AlarmEvent);

    /// Called once per rejected candidate or overflow
    fn on_reject(&mut self, rejected: RejectedFrame);
}

/// Output of one [`AlarmIngestPipeline::feed`] call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Ingested {
    /// Decoded alarms in stream order
    pub events: Vec<AlarmEvent>,
    /// Rejected candidates in stream order
    pub rejected: Vec<RejectedFrame>,
}

impl Ingested {
    /// Whether the call produced nothing at all
    pub fn is_empty(&self) -> bool {
        self.events.is_empty() && self.rejected.is_empty()
    }
}

impl AlarmSink for Ingested {
    fn on_alarm(&mut self, event: AlarmEvent) {
        self.events.push(event);
    }

    fn on_reject(&mut self, rejected: RejectedFrame) {
        self.rejected.push(rejected);
    }
}

/// Pipeline counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    /// Alarms decoded
    pub accepted: u64,
    /// Candidates rejected (including overflows)
    pub rejected: u64,
    /// Reassembler counters
    pub reassembly: ReassemblerStats,
}

/// One stream's ingest pipeline
#[derive(Debug)]
pub struct AlarmIngestPipeline {
    reassembler: StreamReassembler,
    strict_timestamps: bool,
    candidates: Vec<Bytes>,
    accepted: u64,
    rejected: u64,
}

impl AlarmIngestPipeline {
    /// Create a pipeline
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            reassembler: StreamReassembler::with_limits(
                config.max_carry_over,
                config.carry_over_policy,
            ),
            strict_timestamps: config.strict_timestamps,
            candidates: Vec::new(),
            accepted: 0,
            rejected: 0,
        }
    }

    /// Feed one chunk and collect the results
    pub fn feed(&mut self, chunk: &[u8]) -> Ingested {
        let mut out = Ingested::default();
        self.feed_into(chunk, &mut out);
        out
    }

    /// Feed one chunk, delivering results to `sink`
    pub fn feed_into<S: AlarmSink + ?Sized>(&mut self, chunk: &[u8], sink: &mut S) {
        let mut candidates = std::mem::take(&mut self.candidates);
        let overflow = self.reassembler.extract(chunk, &mut candidates).err();

        for candidate in candidates.drain(..) {
            match self.accept(&candidate) {
                Ok(event) => {
                    debug!("Decoded alarm {}", event);
                    self.accepted += 1;
                    sink.on_alarm(event);
                }
                Err(reason) => {
                    warn!("Rejected candidate of {} bytes: {}", candidate.len(), reason);
                    self.rejected += 1;
                    sink.on_reject(RejectedFrame {
                        bytes: candidate,
                        reason,
                    });
                }
            }
        }
        self.candidates = candidates;

        if let Some(reason) = overflow {
            self.rejected += 1;
            sink.on_reject(RejectedFrame {
                bytes: Bytes::new(),
                reason,
            });
        }
    }

    fn accept(&self, candidate: &[u8]) -> Result<AlarmEvent, WireError> {
        let frame = validate_frame(candidate)?;
        let event = decode_frame(&frame);
        if self.strict_timestamps {
            event.time.validate()?;
        }
        Ok(event)
    }

    /// Bytes held for the next chunk
    pub fn carry_over(&self) -> &[u8] {
        self.reassembler.carry_over()
    }

    /// Lifetime counters
    pub fn stats(&self) -> PipelineStats {
        PipelineStats {
            accepted: self.accepted,
            rejected: self.rejected,
            reassembly: self.reassembler.stats(),
        }
    }
}

impl Default for AlarmIngestPipeline {
    fn default() -> Self {
        Self::new(PipelineConfig::default())
    }
}
