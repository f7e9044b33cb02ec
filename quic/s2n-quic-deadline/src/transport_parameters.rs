// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use s2n_codec::{DecoderBuffer, DecoderError, Encoder, EncoderValue};
use s2n_quic_core::{transport, varint::VarInt};

//# enable_deadline_aware_streams (0x11de): The endpoint supports
//#    deadline-aware stream scheduling and the DEADLINE_CONTROL and
//#    STREAM_DATA_DROPPED extension frames. This parameter is a
//#    zero-length value; its presence MUST NOT alter any other
//#    transport parameter.

pub const TRANSPORT_PARAMETER_ID: VarInt = VarInt::from_u16(0x11de);

/// Whether deadline-aware streams are usable on a connection.
///
/// The capability takes effect only when both peers advertised the
/// transport parameter during the handshake.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DeadlineSupport {
    Enabled,
    #[default]
    Disabled,
}

impl DeadlineSupport {
    #[inline]
    pub fn is_enabled(self) -> bool {
        matches!(self, Self::Enabled)
    }

    /// Negotiation succeeds iff both peers advertised the parameter
    #[inline]
    pub fn negotiate(local: Self, peer: Self) -> Self {
        match (local, peer) {
            (Self::Enabled, Self::Enabled) => Self::Enabled,
            _ => Self::Disabled,
        }
    }

    /// The connection error for a deadline extension frame received
    /// while the capability was not negotiated
    pub fn on_unnegotiated_frame(frame_tag: VarInt) -> transport::Error {
        transport::Error::PROTOCOL_VIOLATION
            .with_reason("deadline extension frame received without negotiation")
            .with_frame_type(frame_tag)
    }
}

/// The zero-length `enable_deadline_aware_streams` transport parameter
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EnableDeadlineAwareStreams;

impl EnableDeadlineAwareStreams {
    /// Decodes the parameter value received from the peer.
    ///
    /// The host stack hands over the value buffer associated with
    /// [`TRANSPORT_PARAMETER_ID`]; any payload bytes are malformed.
    pub fn decode_value(value: DecoderBuffer) -> Result<DeadlineSupport, DecoderError> {
        value.ensure_empty()?;
        Ok(DeadlineSupport::Enabled)
    }
}

impl EncoderValue for EnableDeadlineAwareStreams {
    #[inline]
    fn encode<E: Encoder>(&self, buffer: &mut E) {
        buffer.encode(&TRANSPORT_PARAMETER_ID);
        buffer.encode(&VarInt::ZERO);
    }
}
