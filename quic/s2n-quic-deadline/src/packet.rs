// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::stream::chunk::ChunkDeadline;
use s2n_quic_core::{stream::StreamId, time::Timestamp};
use smallvec::SmallVec;

/// Deadline metadata the packet engine attaches to a sent packet.
///
/// The tag has no on-wire form; it travels with the host's sent-packet
/// info and feeds the retransmission policy when the packet is
/// declared lost.
#[derive(Clone, Debug, Default)]
pub struct DeadlineTag {
    contains_deadline_data: bool,
    has_non_deadline_data: bool,
    hard_only: bool,
    earliest_chunk_deadline: Option<Timestamp>,
    streams: SmallVec<[StreamId; 2]>,
}

impl DeadlineTag {
    /// Folds one stream payload carried by the packet into the tag
    pub fn on_stream_data(&mut self, stream_id: StreamId, deadline: Option<ChunkDeadline>) {
        match deadline {
            Some(deadline) => {
                self.hard_only = if self.contains_deadline_data {
                    self.hard_only && deadline.mode.is_hard()
                } else {
                    deadline.mode.is_hard()
                };
                self.contains_deadline_data = true;
                self.earliest_chunk_deadline = Some(match self.earliest_chunk_deadline {
                    Some(current) => current.min(deadline.expires),
                    None => deadline.expires,
                });
                if !self.streams.contains(&stream_id) {
                    self.streams.push(stream_id);
                }
            }
            None => self.has_non_deadline_data = true,
        }
    }

    #[inline]
    pub fn contains_deadline_data(&self) -> bool {
        self.contains_deadline_data
    }

    #[inline]
    pub fn has_non_deadline_data(&self) -> bool {
        self.has_non_deadline_data
    }

    /// `true` when every tagged deadline payload is Hard mode
    #[inline]
    pub fn hard_only(&self) -> bool {
        self.contains_deadline_data && self.hard_only
    }

    #[inline]
    pub fn earliest_chunk_deadline(&self) -> Option<Timestamp> {
        self.earliest_chunk_deadline
    }

    /// The deadline streams with payload in the packet
    #[inline]
    pub fn streams(&self) -> &[StreamId] {
        &self.streams
    }

    /// `true` once the packet's earliest chunk deadline has passed
    pub fn is_expired(&self, now: Timestamp) -> bool {
        self.earliest_chunk_deadline
            .map(|deadline| deadline < now)
            .unwrap_or(false)
    }
}
