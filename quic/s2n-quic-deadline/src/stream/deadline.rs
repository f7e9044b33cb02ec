// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use core::{ops::Range, time::Duration};
use s2n_quic_core::{interval_set::IntervalSet, time::Timestamp, varint::VarInt};

/// The reliability mode a deadline applies to stream data
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeadlineMode {
    /// The deadline affects scheduling priority only
    Soft,
    /// Data that misses the deadline is discarded and signaled to the peer
    Hard,
}

impl DeadlineMode {
    #[inline]
    pub fn is_hard(self) -> bool {
        matches!(self, Self::Hard)
    }

    /// Once enabled, a mode may only be tightened: Hard never relaxes
    /// back to Soft.
    #[inline]
    fn tighten(self, requested: Self) -> Self {
        match self {
            Self::Hard => Self::Hard,
            Self::Soft => requested,
        }
    }
}

/// A deadline currently assigned to a stream
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Deadline {
    /// The relative deadline applied to newly enqueued chunks
    pub relative: Duration,
    pub mode: DeadlineMode,
    /// The absolute stream-level deadline, fixed at assignment time
    pub expires: Timestamp,
}

impl Deadline {
    #[inline]
    pub fn is_expired(&self, now: Timestamp) -> bool {
        self.expires < now
    }
}

/// Per-stream deadline bookkeeping on the sending side.
///
/// Attached lazily the first time a deadline is asserted for the
/// stream and destroyed with it.
#[derive(Clone, Debug, Default)]
pub struct StreamDeadlineState {
    deadline: Option<Deadline>,
    deadlines_missed: u64,
    bytes_dropped: u64,
    dropped_ranges: IntervalSet<VarInt>,
}

/// Counters surfaced to the application
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Stats {
    pub deadlines_missed: u64,
    pub bytes_dropped: u64,
    pub dropped_range_count: usize,
    pub mode: Option<DeadlineMode>,
}

impl StreamDeadlineState {
    /// Assigns or renews the stream deadline.
    ///
    /// The absolute deadline is recomputed from `now`; chunks already
    /// stamped keep their frozen deadlines. An attempt to relax Hard
    /// back to Soft keeps Hard.
    pub fn set(&mut self, relative: Duration, mode: DeadlineMode, now: Timestamp) -> Deadline {
        let mode = match self.deadline {
            Some(current) => current.mode.tighten(mode),
            None => mode,
        };
        let deadline = Deadline {
            relative,
            mode,
            expires: now + relative,
        };
        self.deadline = Some(deadline);
        deadline
    }

    /// Cancels further deadline effects immediately
    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    #[inline]
    pub fn deadline(&self) -> Option<&Deadline> {
        self.deadline.as_ref()
    }

    #[inline]
    pub fn is_enabled(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn record_missed(&mut self, count: u64) {
        self.deadlines_missed += count;
    }

    /// Accumulates a discarded byte range.
    ///
    /// The interval set keeps the ranges ordered and coalesced.
    pub fn record_dropped(&mut self, range: Range<VarInt>) {
        debug_assert!(range.start < range.end, "dropped ranges are never empty");
        self.bytes_dropped += (range.end - range.start).as_u64();
        let _ = self.dropped_ranges.insert(range);
    }

    #[inline]
    pub fn dropped_ranges(&self) -> &IntervalSet<VarInt> {
        &self.dropped_ranges
    }

    /// Splits `range` into the sub-ranges that were not dropped and may
    /// still be (re)transmitted
    pub fn live_subranges(&self, range: Range<VarInt>) -> Vec<Range<VarInt>> {
        super::complement(&self.dropped_ranges, range)
    }

    pub fn stats(&self) -> Stats {
        Stats {
            deadlines_missed: self.deadlines_missed,
            bytes_dropped: self.bytes_dropped,
            dropped_range_count: self.dropped_ranges.interval_len(),
            mode: self.deadline.map(|deadline| deadline.mode),
        }
    }
}
