// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use core::ops::Range;
use s2n_codec::{DecoderError, Encoder, EncoderValue};
use s2n_quic_core::varint::VarInt;

macro_rules! stream_data_dropped_tag {
    () => {
        0xde1
    };
}

//# STREAM_DATA_DROPPED Frame {
//#   Type (i) = 0xde1,
//#   Stream ID (i),
//#   Offset (i),
//#   Length (i),
//# }
//#
//# A STREAM_DATA_DROPPED frame is semantically a STREAM frame whose
//# payload the sender discarded before transmission. The receiver
//# records the gap, advances in-order delivery across it, and surfaces
//# the range to the application.

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct StreamDataDropped {
    /// The stream whose data was discarded
    pub stream_id: VarInt,

    /// First byte offset of the discarded range
    pub offset: VarInt,

    /// Number of discarded bytes
    pub length: VarInt,
}

impl StreamDataDropped {
    pub const fn tag(&self) -> crate::frame::Tag {
        VarInt::from_u16(stream_data_dropped_tag!())
    }

    /// The discarded byte range in the stream's sequence space
    pub fn range(&self) -> Range<VarInt> {
        // the bound was validated at decode/construction time
        self.offset..(self.offset + self.length)
    }
}

s2n_codec::decoder_parameterized_value!(
    impl<'a> StreamDataDropped {
        fn decode(_tag: crate::frame::Tag, buffer: Buffer) -> Result<Self> {
            let (stream_id, buffer) = buffer.decode()?;
            let (offset, buffer) = buffer.decode::<VarInt>()?;
            let (length, buffer) = buffer.decode::<VarInt>()?;

            offset.checked_add(length).ok_or(DecoderError::InvariantViolation(
                "dropped range exceeds the maximum stream offset",
            ))?;

            let frame = StreamDataDropped {
                stream_id,
                offset,
                length,
            };

            Ok((frame, buffer))
        }
    }
);

impl EncoderValue for StreamDataDropped {
    #[inline]
    fn encode<E: Encoder>(&self, buffer: &mut E) {
        buffer.encode(&self.tag());
        buffer.encode(&self.stream_id);
        buffer.encode(&self.offset);
        buffer.encode(&self.length);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use s2n_codec::DecoderBuffer;

    #[test]
    fn range_overflow_is_rejected() {
        let frame = StreamDataDropped {
            stream_id: VarInt::from_u8(4),
            offset: VarInt::MAX,
            length: VarInt::from_u8(1),
        };
        let bytes = s2n_codec::testing::encode(&frame).unwrap();
        assert!(
            DecoderBuffer::new(&bytes)
                .decode::<crate::frame::Frame>()
                .is_err(),
            "offset + length past the varint space must not decode"
        );
    }

    #[test]
    fn range_covers_the_discarded_bytes() {
        let frame = StreamDataDropped {
            stream_id: VarInt::from_u8(4),
            offset: VarInt::from_u32(7000),
            length: VarInt::from_u32(3000),
        };
        let range = frame.range();
        assert_eq!(range.start, VarInt::from_u32(7000));
        assert_eq!(range.end, VarInt::from_u32(10000));
    }
}
