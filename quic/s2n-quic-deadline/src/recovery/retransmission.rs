// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::path;
use core::ops::Range;
use s2n_quic_core::{stream::StreamId, varint::VarInt};

/// One stream byte range carried by a lost packet, taken from the
/// host's sent-packet info
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Loss {
    pub stream_id: StreamId,
    pub range: Range<VarInt>,
}

/// A still-live byte range to rebuild into a retransmission
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Segment {
    pub stream_id: StreamId,
    pub range: Range<VarInt>,
}

/// The retransmission decision for a lost packet
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Decision {
    /// The packet carried no deadline data; the base stack's policy
    /// applies unchanged
    BasePolicy,
    /// Every payload byte is expired Hard data: do not retransmit.
    /// The covering STREAM_DATA_DROPPED frames have been queued.
    Skip,
    /// Rebuild the retransmission from the listed still-live ranges
    /// and send it on the selected path
    Retransmit {
        path: Option<path::Id>,
        segments: Vec<Segment>,
    },
}
