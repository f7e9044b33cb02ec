// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

#![forbid(unsafe_code)]

use s2n_codec::{
    DecoderBuffer, DecoderBufferMut, DecoderBufferMutResult, DecoderBufferResult, DecoderError,
    DecoderValue, DecoderValueMut, Encoder, EncoderValue,
};
use s2n_quic_core::{frame::ack_elicitation::AckElicitable, varint::VarInt};

#[macro_use]
pub mod deadline_control;
#[macro_use]
pub mod stream_data_dropped;

pub use deadline_control::DeadlineControl;
pub use stream_data_dropped::StreamDataDropped;

/// Extension frames are identified by variable-length integer tags
/// outside the core QUIC frame range.
pub(crate) type Tag = VarInt;

/// One of the deadline extension frames.
///
/// Peers that did not negotiate `enable_deadline_aware_streams` treat
/// these tags as unknown frame types and fail the connection, so the
/// decoder is only invoked once negotiation has been confirmed.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Frame {
    DeadlineControl(DeadlineControl),
    StreamDataDropped(StreamDataDropped),
}

impl Frame {
    pub fn tag(&self) -> Tag {
        match self {
            Frame::DeadlineControl(frame) => frame.tag(),
            Frame::StreamDataDropped(frame) => frame.tag(),
        }
    }

    /// Returns `true` if `tag` identifies one of the deadline extension frames
    pub fn is_extension_tag(tag: VarInt) -> bool {
        matches!(
            tag.as_u64(),
            deadline_control_tag!() | stream_data_dropped_tag!()
        )
    }
}

impl AckElicitable for Frame {}

impl From<DeadlineControl> for Frame {
    #[inline]
    fn from(frame: DeadlineControl) -> Self {
        Frame::DeadlineControl(frame)
    }
}

impl From<StreamDataDropped> for Frame {
    #[inline]
    fn from(frame: StreamDataDropped) -> Self {
        Frame::StreamDataDropped(frame)
    }
}

impl EncoderValue for Frame {
    #[inline]
    fn encode<E: Encoder>(&self, buffer: &mut E) {
        match self {
            Frame::DeadlineControl(frame) => buffer.encode(frame),
            Frame::StreamDataDropped(frame) => buffer.encode(frame),
        }
    }
}

impl<'a> DecoderValue<'a> for Frame {
    #[inline]
    fn decode(buffer: DecoderBuffer<'a>) -> DecoderBufferResult<'a, Self> {
        let (tag, buffer) = buffer.decode::<Tag>()?;
        match tag.as_u64() {
            deadline_control_tag!() => {
                let (frame, buffer) = buffer.decode_parameterized(tag)?;
                Ok((Frame::DeadlineControl(frame), buffer))
            }
            stream_data_dropped_tag!() => {
                let (frame, buffer) = buffer.decode_parameterized(tag)?;
                Ok((Frame::StreamDataDropped(frame), buffer))
            }
            _ => Err(DecoderError::InvariantViolation("invalid deadline frame")),
        }
    }
}

impl<'a> DecoderValueMut<'a> for Frame {
    #[inline]
    fn decode_mut(buffer: DecoderBufferMut<'a>) -> DecoderBufferMutResult<'a, Self> {
        let (tag, buffer) = buffer.decode::<Tag>()?;
        match tag.as_u64() {
            deadline_control_tag!() => {
                let (frame, buffer) = buffer.decode_parameterized(tag)?;
                Ok((Frame::DeadlineControl(frame), buffer))
            }
            stream_data_dropped_tag!() => {
                let (frame, buffer) = buffer.decode_parameterized(tag)?;
                Ok((Frame::StreamDataDropped(frame), buffer))
            }
            _ => Err(DecoderError::InvariantViolation("invalid deadline frame")),
        }
    }
}
