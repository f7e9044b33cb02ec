// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

pub mod chunk;
pub mod deadline;
pub mod recv;
pub mod send;

pub use chunk::{Chunk, ChunkDeadline};
pub use deadline::{Deadline, DeadlineMode, Stats, StreamDeadlineState};
pub use recv::{Delivery, RecvState};
pub use send::SendQueue;

use core::ops::Range;
use s2n_quic_core::{interval_set::IntervalSet, varint::VarInt};

/// Splits `range` into the maximal sub-ranges not covered by `set`
pub(crate) fn complement(set: &IntervalSet<VarInt>, range: Range<VarInt>) -> Vec<Range<VarInt>> {
    let mut cursor = range.start;
    let mut out = Vec::new();

    for interval in set.intervals() {
        let start = interval.start_inclusive();
        let end = interval.end_exclusive();

        if end <= cursor {
            continue;
        }
        if start >= range.end {
            break;
        }
        if start > cursor {
            out.push(cursor..start.min(range.end));
        }
        cursor = cursor.max(end);
        if cursor >= range.end {
            break;
        }
    }

    if cursor < range.end {
        out.push(cursor..range.end);
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use bolero::check;

    fn varint(value: u64) -> VarInt {
        VarInt::new(value).unwrap()
    }

    #[test]
    fn complement_is_disjoint_from_the_set() {
        check!().with_type::<(Vec<(u16, u16)>, u16, u16)>().cloned().for_each(
            |(intervals, start, len)| {
                let mut set = IntervalSet::new();
                for &(start, len) in intervals.iter().take(8) {
                    let start = start as u64;
                    let len = (len as u64 % 64) + 1;
                    set.insert(varint(start)..varint(start + len)).unwrap();
                }

                let start = start as u64;
                let end = start + (len as u64 % 1024);
                let range = varint(start)..varint(end);

                let live = complement(&set, range.clone());

                // live sub-ranges are ordered, non-empty, within bounds,
                // and disjoint from the set
                let mut cursor = range.start;
                let mut covered = 0u64;
                for sub in &live {
                    assert!(sub.start < sub.end);
                    assert!(sub.start >= cursor);
                    assert!(sub.end <= range.end);
                    cursor = sub.end;
                    covered += (sub.end - sub.start).as_u64();
                    assert!(!set.contains(&sub.start));
                    assert!(!set.contains(&(sub.end - VarInt::from_u8(1))));
                }

                // everything in the range is either live or in the set
                let in_set: u64 = (start..end).filter(|v| set.contains(&varint(*v))).count() as u64;
                assert_eq!(covered + in_set, end - start);
            },
        );
    }
}
