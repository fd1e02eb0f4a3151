//! Stream reassembly of sentinel-delimited frames.
//!
//! The transport hands over chunks whose boundaries have nothing to do with
//! frame boundaries. [`StreamReassembler`] scans each chunk once for sentinel
//! bytes and proposes *candidates*: byte runs that open with [`HEAD`] and
//! close with [`END`]. A frame interrupted by the end of a chunk is kept as
//! carry-over and completed by the next chunk.
//!
//! Payload bytes may equal a sentinel, so candidates are only frame-shaped;
//! [`validate_frame`](crate::validate_frame) decides whether they are frames.
//!
//! ```text
//!  chunk n:     .. ED | EE xx xx ED | EE xx xx
//!                  ^        ^            ^
//!              completes  body        tail -> carry-over
//!              carry-over candidate
//! ```

use crate::frame::{is_sentinel, END, FRAME_LEN, HEAD};
use crate::WireError;
use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tracing::{debug, warn};

/// Default upper bound for held carry-over (4 KiB)
pub const DEFAULT_MAX_CARRY_OVER: usize = 4 * 1024;

/// What to do with a pending fragment when a newer header sentinel arrives
/// before the fragment saw its end sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CarryOverPolicy {
    /// Drop the pending fragment; it is counted in [`ReassemblerStats::superseded`]
    #[default]
    Replace,
    /// Emit the pending fragment as a candidate so validation records it
    Flush,
}

impl FromStr for CarryOverPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "replace" => Ok(CarryOverPolicy::Replace),
            "flush" => Ok(CarryOverPolicy::Flush),
            other => Err(format!("unknown carry-over policy: {}", other)),
        }
    }
}

/// Counters kept by a reassembler over its lifetime
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReassemblerStats {
    /// Chunks passed to `extract`
    pub chunks: u64,
    /// Total bytes received
    pub bytes_in: u64,
    /// Candidates emitted
    pub candidates: u64,
    /// Pending fragments dropped because a newer header arrived
    pub superseded: u64,
    /// Bytes dropped without becoming part of a candidate
    pub discarded_bytes: u64,
    /// Carry-over overflows reported
    pub overflows: u64,
}

/// Per-stream reassembly state.
///
/// One instance belongs to exactly one connection; a new connection gets a
/// new reassembler.
#[derive(Debug)]
pub struct StreamReassembler {
    carry: BytesMut,
    max_carry_over: usize,
    policy: CarryOverPolicy,
    stats: ReassemblerStats,
}

impl StreamReassembler {
    /// Create a reassembler with the default limit and policy
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_MAX_CARRY_OVER, CarryOverPolicy::default())
    }

    /// Create a reassembler with an explicit carry-over limit and policy.
    ///
    /// Limits below one frame length are raised to [`FRAME_LEN`].
    pub fn with_limits(max_carry_over: usize, policy: CarryOverPolicy) -> Self {
        Self {
            carry: BytesMut::with_capacity(FRAME_LEN),
            max_carry_over: max_carry_over.max(FRAME_LEN),
            policy,
            stats: ReassemblerStats::default(),
        }
    }

    /// Bytes currently held for the next chunk
    pub fn carry_over(&self) -> &[u8] {
        &self.carry
    }

    /// Effective carry-over limit
    pub fn max_carry_over(&self) -> usize {
        self.max_carry_over
    }

    /// Active supersede policy
    pub fn policy(&self) -> CarryOverPolicy {
        self.policy
    }

    /// Lifetime counters
    pub fn stats(&self) -> ReassemblerStats {
        self.stats
    }

    /// Drop any held carry-over
    pub fn reset(&mut self) {
        self.carry.clear();
    }

    /// Split `chunk` (together with held carry-over) into candidates.
    ///
    /// Candidates are appended to `out` in stream order and the number
    /// appended is returned. If the carry-over would exceed its limit it is
    /// discarded and [`WireError::CarryOverflow`] is returned; candidates
    /// found earlier in the same chunk are still in `out`.
    pub fn extract(&mut self, chunk: &[u8], out: &mut Vec<Bytes>) -> Result<usize, WireError> {
        self.stats.chunks += 1;
        self.stats.bytes_in += chunk.len() as u64;
        let start = out.len();

        let markers: Vec<usize> = chunk
            .iter()
            .enumerate()
            .filter(|(_, b)| is_sentinel(**b))
            .map(|(i, _)| i)
            .collect();

        let (first, last) = match (markers.first(), markers.last()) {
            (Some(&first), Some(&last)) => (first, last),
            _ => {
                // Still accumulating.
                self.carry.extend_from_slice(chunk);
                self.check_limit()?;
                return Ok(0);
            }
        };

        // Head: everything before the first marker belongs to whatever was pending.
        if chunk[first] == END {
            self.complete_pending(&chunk[..=first], out);
        } else {
            self.supersede_pending(&chunk[..first], out);
        }

        // Body
        for pair in markers.windows(2) {
            let (i, j) = (pair[0], pair[1]);
            if chunk[i] == HEAD && chunk[j] == END {
                self.emit(Bytes::copy_from_slice(&chunk[i..=j]), out);
            }
        }

        // Tail
        if chunk[last] == HEAD {
            let tail = &chunk[last..];
            if tail.len() > self.max_carry_over {
                return Err(self.overflow(tail.len()));
            }
            self.carry.clear();
            self.carry.extend_from_slice(tail);
        } else {
            self.stats.discarded_bytes += (chunk.len() - last - 1) as u64;
        }

        Ok(out.len() - start)
    }

    /// The chunk opened with an end sentinel: finish the pending frame.
    fn complete_pending(&mut self, head: &[u8], out: &mut Vec<Bytes>) {
        if self.carry.is_empty() {
            debug!("Discarding {} leading bytes with no pending frame", head.len());
            self.stats.discarded_bytes += head.len() as u64;
            return;
        }

        self.carry.extend_from_slice(head);
        let pending = self.carry.split().freeze();
        if pending.contains(&HEAD) && pending.contains(&END) {
            self.emit(pending, out);
        } else {
            debug!("Discarding {} bytes that never saw a header", pending.len());
            self.stats.discarded_bytes += pending.len() as u64;
        }
    }

    /// The chunk opened with a header sentinel: the pending frame cannot complete.
    fn supersede_pending(&mut self, lead: &[u8], out: &mut Vec<Bytes>) {
        if self.carry.is_empty() {
            self.stats.discarded_bytes += lead.len() as u64;
            return;
        }

        self.carry.extend_from_slice(lead);
        let pending = self.carry.split().freeze();

        if pending[0] != HEAD {
            debug!("Discarding {} bytes that never saw a header", pending.len());
            self.stats.discarded_bytes += pending.len() as u64;
            return;
        }

        self.stats.superseded += 1;
        match self.policy {
            CarryOverPolicy::Replace => {
                warn!(
                    "Pending fragment of {} bytes superseded by a new header; dropping it",
                    pending.len()
                );
                self.stats.discarded_bytes += pending.len() as u64;
            }
            CarryOverPolicy::Flush => {
                debug!("Flushing superseded fragment of {} bytes", pending.len());
                self.emit(pending, out);
            }
        }
    }

    fn emit(&mut self, candidate: Bytes, out: &mut Vec<Bytes>) {
        self.stats.candidates += 1;
        out.push(candidate);
    }

    fn check_limit(&mut self) -> Result<(), WireError> {
        if self.carry.len() > self.max_carry_over {
            let len = self.carry.len();
            return Err(self.overflow(len));
        }
        Ok(())
    }

    fn overflow(&mut self, len: usize) -> WireError {
        warn!(
            "Carry-over reached {} bytes (limit {}); discarding",
            len, self.max_carry_over
        );
        self.stats.overflows += 1;
        self.stats.discarded_bytes += len as u64;
        self.carry.clear();
        WireError::CarryOverflow {
            len,
            max: self.max_carry_over,
        }
    }
}

impl Default for StreamReassembler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extract(r: &mut StreamReassembler, chunk: &[u8]) -> Vec<Bytes> {
        let mut out = Vec::new();
        r.extract(chunk, &mut out).unwrap();
        out
    }

    const F1: [u8; 10] = [0xEE, 0x04, 0x01, 0x12, 0x0B, 0x0E, 0x0F, 0x35, 0x2D, 0xED];
    const F2: [u8; 10] = [0xEE, 0x03, 0x09, 0x12, 0x0B, 0x0E, 0x0F, 0x35, 0x2E, 0xED];

    #[test]
    fn test_single_frame() {
        let mut r = StreamReassembler::new();
        let out = extract(&mut r, &F1);
        assert_eq!(out, vec![Bytes::copy_from_slice(&F1)]);
        assert!(r.carry_over().is_empty());
    }

    #[test]
    fn test_split_frame_completes_in_order() {
        let mut r = StreamReassembler::new();
        assert!(extract(&mut r, &F1[..3]).is_empty());
        assert_eq!(r.carry_over(), &F1[..3]);

        let mut second = F1[3..].to_vec();
        second.extend_from_slice(&F2);
        let out = extract(&mut r, &second);

        assert_eq!(out.len(), 2);
        assert_eq!(&out[0][..], &F1);
        assert_eq!(&out[1][..], &F2);
        assert!(r.carry_over().is_empty());
    }

    #[test]
    fn test_no_markers_accumulate() {
        let mut r = StreamReassembler::new();
        extract(&mut r, &F1[..1]);
        assert!(extract(&mut r, &F1[1..4]).is_empty());
        assert!(extract(&mut r, &F1[4..9]).is_empty());
        assert_eq!(r.carry_over(), &F1[..9]);

        let out = extract(&mut r, &F1[9..]);
        assert_eq!(out, vec![Bytes::copy_from_slice(&F1)]);
    }

    #[test]
    fn test_empty_chunk_is_noop() {
        let mut r = StreamReassembler::new();
        extract(&mut r, &F1[..5]);
        let before = r.carry_over().to_vec();
        assert!(extract(&mut r, &[]).is_empty());
        assert_eq!(r.carry_over(), &before[..]);
    }

    #[test]
    fn test_leading_fragment_without_pending_is_dropped() {
        let mut r = StreamReassembler::new();
        let mut chunk = vec![0x01, 0x02, 0xED];
        chunk.extend_from_slice(&F2);
        let out = extract(&mut r, &chunk);
        assert_eq!(out, vec![Bytes::copy_from_slice(&F2)]);
        assert_eq!(r.stats().discarded_bytes, 3);
    }

    #[test]
    fn test_body_pairs_other_than_head_end_emit_nothing() {
        let mut r = StreamReassembler::new();
        // EE EE .. ED: only the second header pairs with the end.
        let chunk = [0xEE, 0x01, 0xEE, 0x02, 0xED, 0x00, 0xED];
        let out = extract(&mut r, &chunk);
        assert_eq!(out, vec![Bytes::from_static(&[0xEE, 0x02, 0xED])]);
    }

    #[test]
    fn test_trailing_bytes_after_end_are_dropped() {
        let mut r = StreamReassembler::new();
        let mut chunk = F1.to_vec();
        chunk.extend_from_slice(&[0x01, 0x02]);
        assert_eq!(extract(&mut r, &chunk).len(), 1);
        assert!(r.carry_over().is_empty());
        assert_eq!(r.stats().discarded_bytes, 2);
    }

    #[test]
    fn test_headerless_prefix_is_discarded_on_end() {
        let mut r = StreamReassembler::new();
        extract(&mut r, &[0x10, 0x11, 0x12]);
        assert_eq!(r.carry_over(), &[0x10, 0x11, 0x12]);

        let out = extract(&mut r, &[0x13, 0xED]);
        assert!(out.is_empty());
        assert!(r.carry_over().is_empty());
    }

    #[test]
    fn test_replace_policy_drops_superseded_fragment() {
        let mut r = StreamReassembler::with_limits(64, CarryOverPolicy::Replace);
        extract(&mut r, &F1[..4]);

        let mut chunk = vec![0x00];
        chunk.extend_from_slice(&F2);
        let out = extract(&mut r, &chunk);

        assert_eq!(out, vec![Bytes::copy_from_slice(&F2)]);
        assert_eq!(r.stats().superseded, 1);
        assert_eq!(r.stats().discarded_bytes, 5);
    }

    #[test]
    fn test_flush_policy_emits_superseded_fragment() {
        let mut r = StreamReassembler::with_limits(64, CarryOverPolicy::Flush);
        extract(&mut r, &F1[..4]);

        let mut chunk = vec![0x00];
        chunk.extend_from_slice(&F2);
        let out = extract(&mut r, &chunk);

        assert_eq!(out.len(), 2);
        assert_eq!(&out[0][..], &[0xEE, 0x04, 0x01, 0x12, 0x00]);
        assert_eq!(&out[1][..], &F2);
        assert_eq!(r.stats().superseded, 1);
    }

    #[test]
    fn test_tail_replaces_after_supersede() {
        let mut r = StreamReassembler::new();
        extract(&mut r, &F1[..4]);
        let out = extract(&mut r, &F2[..6]);
        assert!(out.is_empty());
        assert_eq!(r.carry_over(), &F2[..6]);
        assert_eq!(r.stats().superseded, 1);
    }

    #[test]
    fn test_overflow_on_accumulation() {
        let mut r = StreamReassembler::with_limits(16, CarryOverPolicy::Replace);
        let mut out = Vec::new();
        assert!(r.extract(&[0u8; 10], &mut out).is_ok());
        assert_eq!(r.carry_over().len(), 10);

        let err = r.extract(&[0u8; 10], &mut out).unwrap_err();
        assert_eq!(err, WireError::CarryOverflow { len: 20, max: 16 });
        assert!(err.is_resource_exhaustion());
        assert!(r.carry_over().is_empty());
        assert_eq!(r.stats().overflows, 1);
    }

    #[test]
    fn test_overflow_on_tail_keeps_earlier_candidates() {
        let mut r = StreamReassembler::with_limits(12, CarryOverPolicy::Replace);
        let mut chunk = F1.to_vec();
        chunk.push(0xEE);
        chunk.extend_from_slice(&[0u8; 20]);

        let mut out = Vec::new();
        let err = r.extract(&chunk, &mut out).unwrap_err();
        assert_eq!(err, WireError::CarryOverflow { len: 21, max: 12 });
        assert_eq!(out, vec![Bytes::copy_from_slice(&F1)]);
        assert!(r.carry_over().is_empty());
    }

    #[test]
    fn test_limit_never_below_frame_len() {
        let r = StreamReassembler::with_limits(3, CarryOverPolicy::Flush);
        assert_eq!(r.max_carry_over(), FRAME_LEN);
        assert_eq!(r.policy(), CarryOverPolicy::Flush);
    }

    #[test]
    fn test_policy_from_str() {
        assert_eq!("replace".parse::<CarryOverPolicy>(), Ok(CarryOverPolicy::Replace));
        assert_eq!("FLUSH".parse::<CarryOverPolicy>(), Ok(CarryOverPolicy::Flush));
        assert!("keep".parse::<CarryOverPolicy>().is_err());
    }

    #[test]
    fn test_stats_and_reset() {
        let mut r = StreamReassembler::new();
        extract(&mut r, &F1);
        extract(&mut r, &F2[..5]);
        let stats = r.stats();
        assert_eq!(stats.chunks, 2);
        assert_eq!(stats.bytes_in, 15);
        assert_eq!(stats.candidates, 1);

        r.reset();
        assert!(r.carry_over().is_empty());
    }
}
