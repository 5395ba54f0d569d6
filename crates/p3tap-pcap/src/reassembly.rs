//! Per-stream TCP payload reassembly.
//!
//! One reassembler per stream key puts payload bytes back into sequence
//! order: in-order bytes append directly, out-of-order segments wait in a
//! pending map until the gap fills, stale retransmissions are trimmed to
//! their new tail or dropped. The reassembler never frames; it only hands
//! ordered bytes to a sink.

use std::collections::BTreeMap;

use bytes::BytesMut;
use p3tap_proto::Direction;

/// Bound on buffered out-of-order segments per stream. When a gap never
/// fills, new stragglers are dropped instead of growing without limit.
const MAX_PENDING_SEGMENTS: usize = 1024;

/// Identity of one direction of one captured TCP flow.
///
/// The two directions of a flow are distinct keys with independent sequence
/// spaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamKey {
    /// TCP source port.
    pub src_port: u16,
    /// TCP destination port.
    pub dst_port: u16,
    /// Direction relative to the server port.
    pub direction: Direction,
}

impl StreamKey {
    /// Key for a segment's ports and direction.
    #[must_use]
    pub fn new(src_port: u16, dst_port: u16, direction: Direction) -> Self {
        Self { src_port, dst_port, direction }
    }
}

/// Sequence-order reassembler for one stream key.
#[derive(Debug, Default)]
pub struct TcpReassembler {
    /// Next expected sequence number; `None` until the first segment.
    next_seq: Option<u64>,
    /// Contiguous bytes not yet drained.
    buffer: BytesMut,
    /// Out-of-order segments waiting for their gap to fill.
    pending: BTreeMap<u64, Vec<u8>>,
}

impl TcpReassembler {
    /// Empty reassembler.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes currently buffered and ready to drain.
    #[must_use]
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Accept one segment's payload at its sequence number.
    ///
    /// The first segment anchors the sequence space. After that: an exact
    /// match appends and folds in any pending successors, a future segment
    /// waits in the pending map (first writer wins per sequence number), and
    /// a stale segment contributes only the part that extends past what has
    /// already been accepted.
    pub fn on_segment(&mut self, seq: u32, payload: &[u8]) {
        if payload.is_empty() {
            return;
        }
        let seq = u64::from(seq);
        let len = payload.len() as u64;

        let Some(next_seq) = self.next_seq else {
            self.buffer.extend_from_slice(payload);
            self.next_seq = Some(seq + len);
            return;
        };

        if seq == next_seq {
            self.buffer.extend_from_slice(payload);
            self.advance_and_fold(next_seq + len);
        } else if seq > next_seq {
            if self.pending.len() < MAX_PENDING_SEGMENTS && !self.pending.contains_key(&seq) {
                self.pending.insert(seq, payload.to_vec());
            }
        } else if seq + len > next_seq {
            // Overlapping retransmission: only the new tail counts.
            let tail = &payload[(next_seq - seq) as usize..];
            self.buffer.extend_from_slice(tail);
            self.advance_and_fold(next_seq + tail.len() as u64);
        }
        // Fully covered retransmissions fall through and are dropped.
    }

    fn advance_and_fold(&mut self, mut next_seq: u64) {
        while let Some(payload) = self.pending.remove(&next_seq) {
            self.buffer.extend_from_slice(&payload);
            next_seq += payload.len() as u64;
        }
        // Pending segments the stream has since moved past are dead weight.
        self.pending.retain(|&seq, payload| seq + payload.len() as u64 > next_seq);
        self.next_seq = Some(next_seq);
    }

    /// Hand all contiguous bytes to `sink` and clear the local buffer.
    pub fn drain_to<F>(&mut self, mut sink: F)
    where
        F: FnMut(&[u8]),
    {
        if self.buffer.is_empty() {
            return;
        }
        sink(&self.buffer);
        self.buffer.clear();
    }
}
