// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

pub mod coupling;
pub mod retransmission;

pub use coupling::{Controller, Coupling, NoopController, ProbePhase};
pub use retransmission::{Decision, Loss, Segment};
