// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::frame::{DeadlineControl, StreamDataDropped};
use bytes::Bytes;
use core::time::Duration;
use s2n_quic_core::{interval_set::IntervalSet, transport, varint::VarInt};
use std::collections::BTreeMap;

/// An ordered outcome of receiving stream data or a drop signal
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Delivery {
    /// In-order payload ready for the application
    Data {
        offset: VarInt,
        data: Bytes,
        is_fin: bool,
    },
    /// A range the peer discarded; delivery resumes after it
    Gap { offset: VarInt, length: VarInt },
}

/// Receiver-side deadline state for one stream.
///
/// Tracks the peer's announced deadline, the gap ledger built from
/// STREAM_DATA_DROPPED frames, and the in-order delivery cursor that
/// skips those gaps. Flow control is advanced across a gap exactly as
/// if the range had been received with length zero.
#[derive(Clone, Debug, Default)]
pub struct RecvState {
    dropped_ranges: IntervalSet<VarInt>,
    /// Received payload not yet deliverable in order, keyed by offset
    segments: BTreeMap<VarInt, Bytes>,
    read_offset: VarInt,
    delivered_bytes: u64,
    peer_deadline: Option<Duration>,
    fin_offset: Option<VarInt>,
    fin_delivered: bool,
}

impl RecvState {
    /// Records the relative deadline the peer announced for this stream
    pub fn on_deadline_control(&mut self, frame: &DeadlineControl) {
        self.peer_deadline = frame.deadline();
    }

    #[inline]
    pub fn peer_deadline(&self) -> Option<Duration> {
        self.peer_deadline
    }

    /// Bytes surfaced to the application so far
    #[inline]
    pub fn delivered_bytes(&self) -> u64 {
        self.delivered_bytes
    }

    /// Bytes reported by the peer as dropped
    #[inline]
    pub fn gap_bytes(&self) -> u64 {
        self.dropped_ranges.count() as u64
    }

    /// The in-order cursor, counting delivered bytes and skipped gaps
    #[inline]
    pub fn read_offset(&self) -> VarInt {
        self.read_offset
    }

    #[inline]
    pub fn is_finished(&self) -> bool {
        self.fin_delivered
    }

    pub(crate) fn dropped_ranges(&self) -> &IntervalSet<VarInt> {
        &self.dropped_ranges
    }

    /// Handles received stream payload.
    ///
    /// Data overlapping a recorded gap is a late-arriving original copy
    /// of bytes the sender has since discarded; the overlap is ignored.
    pub fn on_data(
        &mut self,
        offset: VarInt,
        data: &Bytes,
        is_fin: bool,
    ) -> Result<Vec<Delivery>, transport::Error> {
        let end = offset.checked_add_usize(data.len()).ok_or(
            transport::Error::FRAME_ENCODING_ERROR
                .with_reason("stream data exceeds the maximum offset"),
        )?;

        if is_fin {
            match self.fin_offset {
                Some(fin) if fin != end => {
                    return Err(transport::Error::FINAL_SIZE_ERROR
                        .with_reason("conflicting stream final sizes"))
                }
                _ => self.fin_offset = Some(end),
            }
        }
        if let Some(fin) = self.fin_offset {
            if end > fin {
                return Err(transport::Error::FINAL_SIZE_ERROR
                    .with_reason("stream data past the final size"));
            }
        }

        for live in super::complement(&self.dropped_ranges, offset..end) {
            if live.end <= self.read_offset {
                continue;
            }
            let slice_start = (live.start - offset).as_u64() as usize;
            let slice_end = (live.end - offset).as_u64() as usize;
            let slice = data.slice(slice_start..slice_end);

            let entry = self.segments.entry(live.start).or_insert_with(Bytes::new);
            if entry.len() < slice.len() {
                *entry = slice;
            }
        }

        let mut deliveries = Vec::new();
        self.drain(&mut deliveries);
        Ok(deliveries)
    }

    /// Handles a STREAM_DATA_DROPPED frame from the peer.
    ///
    /// The range is added to the gap ledger and surfaced to the
    /// application; buffered copies of the range are discarded. A drop
    /// covering bytes already surfaced as data is a peer contract
    /// violation.
    pub fn on_data_dropped(
        &mut self,
        frame: &StreamDataDropped,
    ) -> Result<Vec<Delivery>, transport::Error> {
        let mut deliveries = Vec::new();
        if frame.length == VarInt::ZERO {
            return Ok(deliveries);
        }

        let range = frame.range();
        if let Some(fin) = self.fin_offset {
            if range.end > fin {
                return Err(transport::Error::FINAL_SIZE_ERROR
                    .with_reason("dropped range past the final size"));
            }
        }

        for new in super::complement(&self.dropped_ranges, range.clone()) {
            if new.start < self.read_offset {
                // those bytes were already delivered as data
                return Err(transport::Error::PROTOCOL_VIOLATION
                    .with_reason("dropped range covers delivered stream data"));
            }
            deliveries.push(Delivery::Gap {
                offset: new.start,
                length: new.end - new.start,
            });
        }

        let _ = self.dropped_ranges.insert(range.clone());

        // discard buffered copies of the dropped bytes; the covering
        // parts of a straddling segment survive
        let overlapping: Vec<(VarInt, Bytes)> = self
            .segments
            .range(..range.end)
            .filter(|(start, data)| **start + data.len() > range.start)
            .map(|(start, data)| (*start, data.clone()))
            .collect();
        for (start, data) in overlapping {
            self.segments.remove(&start);
            let end = start + data.len();
            if start < range.start {
                let keep = (range.start - start).as_u64() as usize;
                self.segments.insert(start, data.slice(..keep));
            }
            if end > range.end {
                let skip = (range.end - start).as_u64() as usize;
                self.segments.insert(range.end, data.slice(skip..));
            }
        }

        self.drain(&mut deliveries);
        Ok(deliveries)
    }

    /// Advances the in-order cursor, emitting data that became
    /// deliverable and skipping recorded gaps
    fn drain(&mut self, deliveries: &mut Vec<Delivery>) {
        loop {
            if let Some((&offset, _)) = self.segments.first_key_value() {
                if offset <= self.read_offset {
                    let (offset, data) = self.segments.pop_first().expect("first entry exists");
                    let end = offset + data.len();
                    if end <= self.read_offset {
                        continue;
                    }
                    let skip = (self.read_offset - offset).as_u64() as usize;
                    let data = data.slice(skip..);
                    let offset = self.read_offset;
                    self.read_offset = end;
                    self.delivered_bytes += data.len() as u64;
                    deliveries.push(Delivery::Data {
                        offset,
                        data,
                        is_fin: false,
                    });
                    continue;
                }
            }

            if let Some(end) = self.gap_end_at(self.read_offset) {
                self.read_offset = end;
                continue;
            }

            break;
        }

        if !self.fin_delivered && self.fin_offset == Some(self.read_offset) {
            self.fin_delivered = true;
            match deliveries.last_mut() {
                Some(Delivery::Data {
                    offset,
                    data,
                    is_fin,
                }) if *offset + data.len() == self.read_offset => *is_fin = true,
                _ => deliveries.push(Delivery::Data {
                    offset: self.read_offset,
                    data: Bytes::new(),
                    is_fin: true,
                }),
            }
        }
    }

    /// Returns the exclusive end of the gap containing `offset`, if any
    fn gap_end_at(&self, offset: VarInt) -> Option<VarInt> {
        for interval in self.dropped_ranges.intervals() {
            let start = interval.start_inclusive();
            let end = interval.end_exclusive();
            if start > offset {
                break;
            }
            if offset < end {
                return Some(end);
            }
        }
        None
    }
}
