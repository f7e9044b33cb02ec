// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use s2n_quic_core::varint::VarIntError;

/// Errors returned to the application by the deadline API.
///
/// Wire-level failures (malformed frames, frames received without
/// negotiation) are not represented here; those surface as
/// [`s2n_quic_core::transport::Error`] and close the connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    #[error("deadline-aware streams were not negotiated with the peer")]
    CapabilityDisabled,

    #[error("the stream is closed, reset, or otherwise unable to carry a deadline")]
    StreamInvalid,

    #[error("payload provided is too large and exceeded the maximum stream offset")]
    PayloadTooLarge,
}

impl From<VarIntError> for Error {
    #[inline]
    fn from(_: VarIntError) -> Self {
        Self::PayloadTooLarge
    }
}
