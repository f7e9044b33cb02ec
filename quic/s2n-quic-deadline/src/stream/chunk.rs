// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::stream::deadline::{Deadline, DeadlineMode};
use bytes::Bytes;
use s2n_quic_core::{time::Timestamp, varint::VarInt};

/// The deadline frozen into a chunk when it was enqueued.
///
/// A chunk's deadline is independent of later deadline changes to the
/// stream; the mode in effect at stamping time is frozen as well.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChunkDeadline {
    pub expires: Timestamp,
    pub mode: DeadlineMode,
}

impl ChunkDeadline {
    /// Derives the chunk deadline from the stream deadline and the
    /// chunk's original enqueue time
    pub fn stamp(deadline: &Deadline, enqueue_time: Timestamp) -> Self {
        Self {
            expires: enqueue_time + deadline.relative,
            mode: deadline.mode,
        }
    }

    #[inline]
    pub fn is_expired(&self, now: Timestamp) -> bool {
        self.expires < now
    }
}

/// One application write, the unit of scheduling and expiry
#[derive(Clone, Debug)]
pub struct Chunk {
    data: Bytes,
    offset: VarInt,
    fin: bool,
    enqueue_time: Timestamp,
    deadline: Option<ChunkDeadline>,
    missed_recorded: bool,
}

impl Chunk {
    pub(crate) fn new(
        data: Bytes,
        offset: VarInt,
        fin: bool,
        enqueue_time: Timestamp,
        deadline: Option<ChunkDeadline>,
    ) -> Self {
        Self {
            data,
            offset,
            fin,
            enqueue_time,
            deadline,
            missed_recorded: false,
        }
    }

    #[inline]
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[inline]
    pub fn offset(&self) -> VarInt {
        self.offset
    }

    /// The offset one past the chunk's last byte
    #[inline]
    pub fn end_offset(&self) -> VarInt {
        self.offset + self.data.len()
    }

    #[inline]
    pub fn is_fin(&self) -> bool {
        self.fin
    }

    #[inline]
    pub fn enqueue_time(&self) -> Timestamp {
        self.enqueue_time
    }

    #[inline]
    pub fn deadline(&self) -> Option<ChunkDeadline> {
        self.deadline
    }

    #[inline]
    pub fn is_expired(&self, now: Timestamp) -> bool {
        self.deadline
            .map(|deadline| deadline.is_expired(now))
            .unwrap_or(false)
    }

    /// Stamps a deadline onto a chunk that does not carry one yet,
    /// computed from the chunk's original enqueue time
    pub(crate) fn stamp(&mut self, deadline: &Deadline) {
        if self.deadline.is_none() {
            self.deadline = Some(ChunkDeadline::stamp(deadline, self.enqueue_time));
        }
    }

    /// Records that this chunk was observed past its deadline.
    ///
    /// Returns `true` the first time, so the miss is counted once.
    pub(crate) fn record_missed(&mut self) -> bool {
        let first = !self.missed_recorded;
        self.missed_recorded = true;
        first
    }
}
