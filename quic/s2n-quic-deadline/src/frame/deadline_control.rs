// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use core::time::Duration;
use s2n_codec::{Encoder, EncoderValue};
use s2n_quic_core::varint::VarInt;

macro_rules! deadline_control_tag {
    () => {
        0xde0
    };
}

//# DEADLINE_CONTROL Frame {
//#   Type (i) = 0xde0,
//#   Stream ID (i),
//#   Deadline (i),
//# }
//#
//# A sender uses a DEADLINE_CONTROL frame to announce the relative
//# delivery deadline, in milliseconds, it applies to data it enqueues
//# on the identified stream. A Deadline of zero clears a previously
//# announced deadline. The frame carries no reliability mode; a peer
//# learns about discarded data exclusively through STREAM_DATA_DROPPED.

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct DeadlineControl {
    /// The stream the deadline applies to
    pub stream_id: VarInt,

    /// Relative deadline in milliseconds; zero clears the deadline
    pub deadline_ms: VarInt,
}

impl DeadlineControl {
    pub const fn tag(&self) -> crate::frame::Tag {
        VarInt::from_u16(deadline_control_tag!())
    }

    /// Returns the relative deadline, or `None` if the frame clears it
    pub fn deadline(&self) -> Option<Duration> {
        if self.deadline_ms == VarInt::ZERO {
            None
        } else {
            Some(Duration::from_millis(self.deadline_ms.as_u64()))
        }
    }
}

s2n_codec::decoder_parameterized_value!(
    impl<'a> DeadlineControl {
        fn decode(_tag: crate::frame::Tag, buffer: Buffer) -> Result<Self> {
            let (stream_id, buffer) = buffer.decode()?;
            let (deadline_ms, buffer) = buffer.decode()?;

            let frame = DeadlineControl {
                stream_id,
                deadline_ms,
            };

            Ok((frame, buffer))
        }
    }
);

impl EncoderValue for DeadlineControl {
    #[inline]
    fn encode<E: Encoder>(&self, buffer: &mut E) {
        buffer.encode(&self.tag());
        buffer.encode(&self.stream_id);
        buffer.encode(&self.deadline_ms);
    }
}
