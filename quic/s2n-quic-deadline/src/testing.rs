// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Deterministic helpers for driving the deadline engine in tests

use crate::{
    connection::Urgency,
    event,
    path,
    recovery::coupling::Controller,
};
use core::time::Duration;
use s2n_quic_core::{
    recovery::RttEstimator,
    stream::StreamId,
    time::{Clock, NoopClock, Timestamp},
    varint::VarInt,
};

pub fn stream_id(id: u32) -> StreamId {
    StreamId::from_varint(VarInt::from_u32(id))
}

/// The test epoch
pub fn now() -> Timestamp {
    NoopClock.get_time()
}

/// An estimator whose smoothed RTT is pinned to `ms` milliseconds
pub fn rtt(ms: u64) -> RttEstimator {
    RttEstimator::new(Duration::from_millis(ms))
}

/// A validated, loss-free path snapshot
pub fn clean_path(id: u8, srtt_ms: u64) -> path::Metrics {
    path::Metrics {
        id: path::Id::new(id),
        smoothed_rtt: Duration::from_millis(srtt_ms),
        congestion_window: 120_000,
        bytes_in_flight: 0,
        bytes_lost: 0,
        bytes_sent: 1_000_000,
        last_loss_event: None,
        is_validated: true,
    }
}

/// Captures every application event for later assertions
#[derive(Debug, Default)]
pub struct Events {
    pub data: Vec<event::StreamData>,
    pub gaps: Vec<event::Gap>,
    pub fins: Vec<event::StreamFin>,
    pub resets: Vec<event::StreamReset>,
}

impl Events {
    /// Total payload bytes surfaced for `stream_id`
    pub fn delivered_bytes(&self, stream_id: StreamId) -> u64 {
        self.data
            .iter()
            .filter(|event| event.stream_id == stream_id)
            .map(|event| event.data.len() as u64)
            .sum()
    }

    /// Total gap bytes surfaced for `stream_id`
    pub fn gap_bytes(&self, stream_id: StreamId) -> u64 {
        self.gaps
            .iter()
            .filter(|event| event.stream_id == stream_id)
            .map(|event| event.length.as_u64())
            .sum()
    }

    pub fn is_finished(&self, stream_id: StreamId) -> bool {
        self.fins.iter().any(|event| event.stream_id == stream_id)
    }
}

impl event::Subscriber for Events {
    fn on_stream_data(&mut self, event: &event::StreamData) {
        self.data.push(event.clone());
    }

    fn on_stream_data_discarded(&mut self, event: &event::Gap) {
        self.gaps.push(*event);
    }

    fn on_stream_fin(&mut self, event: &event::StreamFin) {
        self.fins.push(*event);
    }

    fn on_stream_reset(&mut self, event: &event::StreamReset) {
        self.resets.push(*event);
    }
}

/// Records every hook invocation and optionally requests boosts
#[derive(Debug, Default)]
pub struct MockController {
    pub urgency_changes: Vec<Urgency>,
    pub fairness_reports: Vec<(usize, bool)>,
    /// When set, `cwnd_adjust` asks for this window
    pub requested_cwnd: Option<u32>,
}

impl Controller for MockController {
    fn on_urgency_change(&mut self, urgency: Urgency) {
        self.urgency_changes.push(urgency);
    }

    fn cwnd_adjust(&mut self, base_cwnd: u32, _bdp: u32, _now: Timestamp) -> u32 {
        self.requested_cwnd.unwrap_or(base_cwnd)
    }

    fn update_fairness(&mut self, bytes_sent: usize, is_deadline_boosted: bool, _now: Timestamp) {
        self.fairness_reports.push((bytes_sent, is_deadline_boosted));
    }
}
