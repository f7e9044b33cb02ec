// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

pub mod fairness;
pub mod urgency;

pub use urgency::{Slack, Urgency};

use crate::config::Config;
use num_rational::Ratio;

const UNITY_GAIN: Ratio<u64> = Ratio::new_raw(1, 1);

/// Pacing gain multiplier applied under Critical urgency
const CRITICAL_PACING_GAIN: Ratio<u64> = Ratio::new_raw(3, 2);

/// Pacing gain multiplier applied under High urgency
const HIGH_PACING_GAIN: Ratio<u64> = Ratio::new_raw(5, 4);

/// Per-connection deadline state, created once both peers advertised
/// the capability.
///
/// All aggregate signals derived from the set of deadline streams live
/// here: the urgency level, the pacing gain it implies, and the
/// fairness accounting window.
#[derive(Clone, Debug)]
pub struct Context {
    has_deadline_streams: bool,
    urgency: Urgency,
    deadline_pacing_gain: Ratio<u64>,
    pub(crate) fairness: fairness::Window,
}

impl Context {
    pub fn new(config: &Config) -> Self {
        Self {
            has_deadline_streams: false,
            urgency: Urgency::None,
            deadline_pacing_gain: UNITY_GAIN,
            fairness: fairness::Window::new(config.fairness_window),
        }
    }

    #[inline]
    pub fn urgency(&self) -> Urgency {
        self.urgency
    }

    #[inline]
    pub fn has_deadline_streams(&self) -> bool {
        self.has_deadline_streams
    }

    /// The pacing-gain multiplier the current urgency level asks for,
    /// before the congestion coupling applies its caps
    #[inline]
    pub fn deadline_pacing_gain(&self) -> Ratio<u64> {
        self.deadline_pacing_gain
    }

    pub(crate) fn on_deadline_stream_attached(&mut self) {
        self.has_deadline_streams = true;
    }

    pub(crate) fn on_deadline_streams_drained(&mut self) {
        self.has_deadline_streams = false;
    }

    /// Records the newly derived urgency level.
    ///
    /// Returns `true` when the level changed, so the caller can notify
    /// the congestion controller.
    pub(crate) fn set_urgency(&mut self, urgency: Urgency, config: &Config) -> bool {
        let changed = self.urgency != urgency;
        self.urgency = urgency;
        self.deadline_pacing_gain = match urgency {
            Urgency::Critical => CRITICAL_PACING_GAIN,
            Urgency::High => HIGH_PACING_GAIN,
            _ => UNITY_GAIN,
        }
        .min(config.pacing_boost_cap);
        changed
    }
}
