// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use bytes::Bytes;
use s2n_quic_core::{stream::StreamId, varint::VarInt};

/// In-order stream payload surfaced to the application
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamData {
    pub stream_id: StreamId,
    pub offset: VarInt,
    pub data: Bytes,
    pub is_fin: bool,
}

/// A byte range the peer discarded under a hard deadline
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Gap {
    pub stream_id: StreamId,
    pub offset: VarInt,
    pub length: VarInt,
}

/// The stream finished cleanly at its final offset
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StreamFin {
    pub stream_id: StreamId,
}

/// The stream was abruptly reset
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StreamReset {
    pub stream_id: StreamId,
}

/// The application-facing callback capability owned by each connection
pub trait Subscriber {
    fn on_stream_data(&mut self, event: &StreamData) {
        let _ = event;
    }

    fn on_stream_data_discarded(&mut self, event: &Gap) {
        let _ = event;
    }

    fn on_stream_fin(&mut self, event: &StreamFin) {
        let _ = event;
    }

    fn on_stream_reset(&mut self, event: &StreamReset) {
        let _ = event;
    }
}

/// Discards every event
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopSubscriber;

impl Subscriber for NoopSubscriber {}
