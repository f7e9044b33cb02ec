// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::{
    error::Error,
    stream::{
        chunk::{Chunk, ChunkDeadline},
        deadline::Deadline,
    },
};
use bytes::Bytes;
use core::ops::Range;
use s2n_quic_core::{time::Timestamp, varint::VarInt};
use std::collections::VecDeque;

/// Queued application payload for one stream.
///
/// Chunks are consumed front to back; the front chunk may be partially
/// handed to the packet engine, in which case only the untransmitted
/// remainder is subject to expiry.
#[derive(Clone, Debug, Default)]
pub struct SendQueue {
    chunks: VecDeque<Chunk>,
    /// Offset assigned to the next enqueued byte
    next_offset: VarInt,
    /// Bytes of the front chunk already handed to the packet engine
    front_consumed: usize,
    /// A FIN whose carrying chunk was dropped and that still needs to
    /// be emitted at the stream's final offset
    pending_fin: Option<VarInt>,
    fin_enqueued: bool,
}

/// One payload handoff to the packet engine
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Handoff {
    pub offset: VarInt,
    pub data: Bytes,
    pub is_fin: bool,
    pub deadline: Option<ChunkDeadline>,
}

/// The outcome of an expiry pass
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Expired {
    /// Discarded byte ranges, coalesced by adjacency
    pub dropped: Vec<Range<VarInt>>,
    /// Chunks newly observed past their deadline (both modes)
    pub missed: u64,
}

impl SendQueue {
    /// Appends one application write.
    ///
    /// Empty writes are only recorded when they carry a FIN.
    pub fn push(
        &mut self,
        data: Bytes,
        is_fin: bool,
        now: Timestamp,
        deadline: Option<ChunkDeadline>,
    ) -> Result<(), Error> {
        if self.fin_enqueued {
            return Err(Error::StreamInvalid);
        }
        if data.is_empty() && !is_fin {
            return Ok(());
        }

        let offset = self.next_offset;
        let end = offset
            .checked_add_usize(data.len())
            .ok_or(Error::PayloadTooLarge)?;

        self.chunks.push_back(Chunk::new(data, offset, is_fin, now, deadline));
        self.next_offset = end;
        self.fin_enqueued = is_fin;
        Ok(())
    }

    /// Returns `true` when the queue has payload or a pending FIN to emit
    #[inline]
    pub fn has_data(&self) -> bool {
        !self.chunks.is_empty() || self.pending_fin.is_some()
    }

    /// Total bytes enqueued over the stream's lifetime
    #[inline]
    pub fn consumed_offset(&self) -> VarInt {
        self.next_offset
    }

    /// Bytes currently queued and not yet handed off
    pub fn queued_bytes(&self) -> usize {
        self.chunks
            .iter()
            .map(Chunk::len)
            .sum::<usize>()
            .saturating_sub(self.front_consumed)
    }

    /// Stamps the given deadline onto every queued chunk that does not
    /// carry one yet
    pub fn stamp_unstamped(&mut self, deadline: &Deadline) {
        for chunk in &mut self.chunks {
            chunk.stamp(deadline);
        }
    }

    /// Hands up to `max_len` bytes of the front chunk to the packet engine.
    ///
    /// The caller runs an expiry pass first so expired payload is never
    /// handed off.
    pub fn pop_handoff(&mut self, max_len: usize) -> Option<Handoff> {
        if let Some(front) = self.chunks.front() {
            let start = self.front_consumed;
            let end = front.len().min(start.saturating_add(max_len));
            let offset = front.offset() + start;
            let data = front.data().slice(start..end);

            if end == front.len() {
                let chunk = self.chunks.pop_front().expect("front chunk exists");
                self.front_consumed = 0;
                Some(Handoff {
                    offset,
                    data,
                    is_fin: chunk.is_fin(),
                    deadline: chunk.deadline(),
                })
            } else {
                self.front_consumed = end;
                Some(Handoff {
                    offset,
                    data,
                    is_fin: false,
                    deadline: front.deadline(),
                })
            }
        } else {
            self.pending_fin.take().map(|offset| Handoff {
                offset,
                data: Bytes::new(),
                is_fin: true,
                deadline: None,
            })
        }
    }

    /// Discards expired Hard payload and records newly missed deadlines.
    ///
    /// For a partially transmitted front chunk only the remaining bytes
    /// are dropped; the transmitted prefix is acknowledged normally.
    /// Soft chunks are never dropped, they only count a miss.
    pub fn prune_expired(&mut self, now: Timestamp) -> Expired {
        let mut expired = Expired::default();

        let mut index = 0;
        while index < self.chunks.len() {
            let consumed = if index == 0 { self.front_consumed } else { 0 };
            let chunk = &mut self.chunks[index];

            if !chunk.is_expired(now) {
                index += 1;
                continue;
            }

            let is_hard = chunk
                .deadline()
                .map(|deadline| deadline.mode.is_hard())
                .unwrap_or(false);

            if chunk.record_missed() {
                expired.missed += 1;
            }

            if !is_hard {
                index += 1;
                continue;
            }

            let start = chunk.offset() + consumed;
            let end = chunk.end_offset();
            if start < end {
                match expired.dropped.last_mut() {
                    Some(last) if last.end == start => last.end = end,
                    _ => expired.dropped.push(start..end),
                }
            }
            if chunk.is_fin() {
                self.pending_fin = Some(end);
            }

            self.chunks.remove(index);
            if index == 0 {
                self.front_consumed = 0;
            }
        }

        expired
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::deadline::{DeadlineMode, StreamDeadlineState};
    use core::time::Duration;
    use s2n_quic_core::time::{Clock, NoopClock};

    fn varint(value: u32) -> VarInt {
        VarInt::from_u32(value)
    }

    fn hard(t0: Timestamp, relative_ms: u64) -> Option<ChunkDeadline> {
        Some(ChunkDeadline {
            expires: t0 + Duration::from_millis(relative_ms),
            mode: DeadlineMode::Hard,
        })
    }

    fn soft(t0: Timestamp, relative_ms: u64) -> Option<ChunkDeadline> {
        Some(ChunkDeadline {
            expires: t0 + Duration::from_millis(relative_ms),
            mode: DeadlineMode::Soft,
        })
    }

    #[test]
    fn offsets_accumulate_across_pushes() {
        let t0 = NoopClock.get_time();
        let mut queue = SendQueue::default();
        queue.push(Bytes::from_static(&[1; 100]), false, t0, None).unwrap();
        queue.push(Bytes::from_static(&[2; 50]), true, t0, None).unwrap();
        assert_eq!(queue.consumed_offset(), varint(150));

        // writes after FIN are rejected
        assert_eq!(
            queue.push(Bytes::from_static(b"x"), false, t0, None),
            Err(Error::StreamInvalid)
        );

        let handoff = queue.pop_handoff(usize::MAX).unwrap();
        assert_eq!(handoff.offset, varint(0));
        assert_eq!(handoff.data.len(), 100);
        assert!(!handoff.is_fin);

        let handoff = queue.pop_handoff(usize::MAX).unwrap();
        assert_eq!(handoff.offset, varint(100));
        assert!(handoff.is_fin);

        assert!(queue.pop_handoff(usize::MAX).is_none());
    }

    #[test]
    fn partial_handoff_tracks_the_front_chunk() {
        let t0 = NoopClock.get_time();
        let mut queue = SendQueue::default();
        queue.push(Bytes::from_static(&[7; 1000]), false, t0, None).unwrap();

        let handoff = queue.pop_handoff(400).unwrap();
        assert_eq!((handoff.offset, handoff.data.len()), (varint(0), 400));
        assert!(!handoff.is_fin);
        assert_eq!(queue.queued_bytes(), 600);

        let handoff = queue.pop_handoff(400).unwrap();
        assert_eq!((handoff.offset, handoff.data.len()), (varint(400), 400));

        let handoff = queue.pop_handoff(400).unwrap();
        assert_eq!((handoff.offset, handoff.data.len()), (varint(800), 200));
        assert!(!queue.has_data());
    }

    #[test]
    fn expired_hard_chunks_are_dropped_and_coalesced() {
        let t0 = NoopClock.get_time();
        let mut queue = SendQueue::default();
        queue.push(Bytes::from_static(&[1; 100]), false, t0, hard(t0, 10)).unwrap();
        queue.push(Bytes::from_static(&[2; 100]), false, t0, hard(t0, 10)).unwrap();
        queue.push(Bytes::from_static(&[3; 100]), false, t0, hard(t0, 50)).unwrap();

        let expired = queue.prune_expired(t0 + Duration::from_millis(20));
        assert_eq!(expired.dropped, vec![varint(0)..varint(200)]);
        assert_eq!(expired.missed, 2);

        // the surviving chunk is handed off unchanged
        let handoff = queue.pop_handoff(usize::MAX).unwrap();
        assert_eq!(handoff.offset, varint(200));
        assert_eq!(handoff.data.len(), 100);
    }

    #[test]
    fn only_the_untransmitted_remainder_is_dropped() {
        let t0 = NoopClock.get_time();
        let mut queue = SendQueue::default();
        queue.push(Bytes::from_static(&[1; 100]), false, t0, hard(t0, 10)).unwrap();

        // 30 bytes already left for the packet engine
        let handoff = queue.pop_handoff(30).unwrap();
        assert_eq!(handoff.data.len(), 30);

        let expired = queue.prune_expired(t0 + Duration::from_millis(20));
        assert_eq!(expired.dropped, vec![varint(30)..varint(100)]);
        assert!(!queue.has_data());
    }

    #[test]
    fn soft_chunks_are_kept_and_missed_once() {
        let t0 = NoopClock.get_time();
        let mut queue = SendQueue::default();
        queue.push(Bytes::from_static(&[1; 100]), false, t0, soft(t0, 10)).unwrap();

        let expired = queue.prune_expired(t0 + Duration::from_millis(20));
        assert_eq!(expired.missed, 1);
        assert!(expired.dropped.is_empty());

        // a second pass does not double count
        let expired = queue.prune_expired(t0 + Duration::from_millis(30));
        assert_eq!(expired.missed, 0);
        assert!(queue.has_data());
    }

    #[test]
    fn dropped_fin_is_still_emitted() {
        let t0 = NoopClock.get_time();
        let mut queue = SendQueue::default();
        queue.push(Bytes::from_static(&[1; 100]), true, t0, hard(t0, 10)).unwrap();

        let expired = queue.prune_expired(t0 + Duration::from_millis(20));
        assert_eq!(expired.dropped, vec![varint(0)..varint(100)]);

        let handoff = queue.pop_handoff(usize::MAX).unwrap();
        assert_eq!(handoff.offset, varint(100));
        assert!(handoff.data.is_empty());
        assert!(handoff.is_fin);
        assert!(!queue.has_data());
    }

    #[test]
    fn retroactive_stamp_uses_enqueue_time() {
        let t0 = NoopClock.get_time();
        let mut queue = SendQueue::default();
        queue.push(Bytes::from_static(&[1; 100]), false, t0, None).unwrap();

        let mut state = StreamDeadlineState::default();
        let deadline = state.set(
            Duration::from_millis(10),
            DeadlineMode::Hard,
            t0 + Duration::from_millis(5),
        );
        queue.stamp_unstamped(&deadline);

        // enqueue time + 10ms, not assignment time + 10ms
        let expired = queue.prune_expired(t0 + Duration::from_millis(11));
        assert_eq!(expired.dropped, vec![varint(0)..varint(100)]);
    }
}
