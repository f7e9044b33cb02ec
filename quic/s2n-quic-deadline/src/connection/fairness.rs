// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use core::time::Duration;
use num_rational::Ratio;
use s2n_quic_core::time::Timestamp;

/// Whether bytes belong to a deadline-bearing stream
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Class {
    Deadline,
    NonDeadline,
}

/// Rolling accounting window for deadline vs deadline-free bandwidth.
///
/// The window advances when wall time moves past its width; counters
/// reset on roll-over.
#[derive(Clone, Debug)]
pub struct Window {
    width: Duration,
    start: Option<Timestamp>,
    deadline_bytes: u64,
    non_deadline_bytes: u64,
    boosted_bytes: u64,
    last_non_deadline_scheduled: Option<Timestamp>,
}

impl Window {
    pub fn new(width: Duration) -> Self {
        Self {
            width,
            start: None,
            deadline_bytes: 0,
            non_deadline_bytes: 0,
            boosted_bytes: 0,
            last_non_deadline_scheduled: None,
        }
    }

    pub fn set_width(&mut self, width: Duration) {
        self.width = width;
    }

    /// Advances the window, resetting counters if it rolled over.
    ///
    /// Returns `true` when a new window was started.
    pub fn on_tick(&mut self, now: Timestamp) -> bool {
        match self.start {
            None => {
                self.start = Some(now);
                true
            }
            Some(start) if now.saturating_duration_since(start) >= self.width => {
                self.start = Some(now);
                self.deadline_bytes = 0;
                self.non_deadline_bytes = 0;
                self.boosted_bytes = 0;
                true
            }
            _ => false,
        }
    }

    pub fn on_bytes_sent(&mut self, class: Class, bytes: usize, boosted: bool) {
        let bytes = bytes as u64;
        match class {
            Class::Deadline => self.deadline_bytes += bytes,
            Class::NonDeadline => self.non_deadline_bytes += bytes,
        }
        if boosted {
            self.boosted_bytes += bytes;
        }
    }

    pub fn on_non_deadline_scheduled(&mut self, now: Timestamp) {
        self.last_non_deadline_scheduled = Some(now);
    }

    pub fn last_non_deadline_scheduled(&self) -> Option<Timestamp> {
        self.last_non_deadline_scheduled
    }

    pub fn deadline_bytes(&self) -> u64 {
        self.deadline_bytes
    }

    pub fn non_deadline_bytes(&self) -> u64 {
        self.non_deadline_bytes
    }

    fn total_bytes(&self) -> u64 {
        self.deadline_bytes + self.non_deadline_bytes
    }

    /// Returns `true` when the deadline-free share of the current
    /// window has fallen below `min_share`
    pub fn non_deadline_deficit(&self, min_share: Ratio<u64>) -> bool {
        let total = self.total_bytes();
        if total == 0 {
            return false;
        }
        (self.non_deadline_bytes as u128) * (*min_share.denom() as u128)
            < (total as u128) * (*min_share.numer() as u128)
    }

    /// Returns `true` when boosted bytes already claim more than
    /// `max_share` of the current window
    pub fn boost_budget_exhausted(&self, max_share: Ratio<u64>) -> bool {
        let total = self.total_bytes();
        if total == 0 {
            return false;
        }
        (self.boosted_bytes as u128) * (*max_share.denom() as u128)
            > (total as u128) * (*max_share.numer() as u128)
    }
}
