// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use core::time::Duration;
use num_rational::Ratio;

/// The default width of the rolling window over which deadline vs
/// deadline-free byte shares are measured
const DEFAULT_FAIRNESS_WINDOW: Duration = Duration::from_millis(100);

/// The default age at which a waiting deadline-free stream preempts
/// deadline streams
const DEFAULT_MAX_STARVATION_TIME: Duration = Duration::from_millis(10);

/// The default fraction of window bytes reserved for deadline-free streams
const DEFAULT_MIN_NON_DEADLINE_SHARE: Ratio<u64> = Ratio::new_raw(1, 10);

/// The largest pacing gain multiplier deadline pressure may apply
const DEFAULT_PACING_BOOST_CAP: Ratio<u64> = Ratio::new_raw(3, 2);

/// The largest congestion window, as a multiple of the BDP, deadline
/// pressure may request
const DEFAULT_CWND_BOOST_CAP: Ratio<u64> = Ratio::new_raw(3, 2);

const ONE: Ratio<u64> = Ratio::new_raw(1, 1);

/// Multipliers of the smoothed RTT used to classify remaining slack
/// into urgency levels.
///
/// Slack below `high_rtts * smoothed_rtt` is High, below
/// `medium_rtts * smoothed_rtt` is Medium, anything larger is Low.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct UrgencyThresholds {
    pub medium_rtts: u32,
    pub high_rtts: u32,
}

impl UrgencyThresholds {
    pub const RECOMMENDED: Self = Self {
        medium_rtts: 3,
        high_rtts: 1,
    };
}

impl Default for UrgencyThresholds {
    fn default() -> Self {
        Self::RECOMMENDED
    }
}

/// Connection-level tuning knobs for deadline-aware scheduling
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Config {
    /// Minimum fraction of fairness-window bytes reserved for
    /// deadline-free streams
    pub min_non_deadline_share: Ratio<u64>,
    /// Age at which a starving deadline-free stream preempts
    pub max_starvation_time: Duration,
    /// Width of the fairness accounting window
    pub fairness_window: Duration,
    pub urgency_thresholds: UrgencyThresholds,
    /// Hard limit on the pacing-gain multiplier under deadline pressure
    pub pacing_boost_cap: Ratio<u64>,
    /// Hard limit on the boosted congestion window, as a multiple of BDP
    pub cwnd_boost_cap: Ratio<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Self::RECOMMENDED
    }
}

impl Config {
    pub const RECOMMENDED: Self = Self {
        min_non_deadline_share: DEFAULT_MIN_NON_DEADLINE_SHARE,
        max_starvation_time: DEFAULT_MAX_STARVATION_TIME,
        fairness_window: DEFAULT_FAIRNESS_WINDOW,
        urgency_thresholds: UrgencyThresholds::RECOMMENDED,
        pacing_boost_cap: DEFAULT_PACING_BOOST_CAP,
        cwnd_boost_cap: DEFAULT_CWND_BOOST_CAP,
    };

    /// Updates the fairness knobs, clamping the share into `[0, 1]`
    pub fn set_fairness(&mut self, min_non_deadline_share: Ratio<u64>, max_starvation_time: Duration) {
        self.min_non_deadline_share = min_non_deadline_share.min(ONE);
        self.max_starvation_time = max_starvation_time;
    }

    /// The share of window bytes deadline boosts may claim before they
    /// are suppressed
    pub fn max_boosted_share(&self) -> Ratio<u64> {
        ONE - self.min_non_deadline_share
    }
}
