// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use core::time::Duration;
use s2n_quic_core::time::Timestamp;

const RTT_WEIGHT: f32 = 0.4;
const CWND_WEIGHT: f32 = 0.3;
const LOSS_WEIGHT: f32 = 0.2;
const RECENT_LOSS_WEIGHT: f32 = 0.1;

/// A loss event within this many smoothed RTTs marks the path as
/// recently lossy
const RECENT_LOSS_RTTS: u32 = 3;

/// A retransmission stays on its original path only when that path
/// leads the best alternative by at least this score margin
const RETRANSMIT_MARGIN: f32 = 0.1;

/// Identifies a network path on a multipath connection
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Id(u8);

impl Id {
    pub const fn new(id: u8) -> Self {
        Self(id)
    }

    pub const fn as_u8(self) -> u8 {
        self.0
    }
}

/// A snapshot of one path's transmission characteristics, supplied by
/// the host stack at selection time
#[derive(Clone, Copy, Debug)]
pub struct Metrics {
    pub id: Id,
    pub smoothed_rtt: Duration,
    pub congestion_window: u32,
    pub bytes_in_flight: u32,
    pub bytes_lost: u64,
    pub bytes_sent: u64,
    pub last_loss_event: Option<Timestamp>,
    pub is_validated: bool,
}

impl Metrics {
    /// Returns `true` if the path saw a loss event within the last
    /// `RECENT_LOSS_RTTS` smoothed RTTs
    pub fn has_recent_loss(&self, now: Timestamp) -> bool {
        match self.last_loss_event {
            Some(at) => now.saturating_duration_since(at) <= self.smoothed_rtt * RECENT_LOSS_RTTS,
            None => false,
        }
    }

    #[inline]
    fn cwnd_headroom(&self) -> u32 {
        self.congestion_window.saturating_sub(self.bytes_in_flight)
    }

    /// Composite score in `[0, 1]` of how likely the path is to
    /// deliver within `slack`
    pub fn score(&self, slack: Duration, now: Timestamp) -> f32 {
        let slack_us = slack.as_micros() as f32;
        let srtt_us = self.smoothed_rtt.as_micros() as f32;

        let rtt_score = if slack_us > 0.0 {
            (1.0 - srtt_us / slack_us).clamp(0.0, 1.0)
        } else {
            0.0
        };

        let cwnd_score = if self.congestion_window > 0 {
            (self.cwnd_headroom() as f32 / self.congestion_window as f32).clamp(0.0, 1.0)
        } else {
            0.0
        };

        let loss_penalty = 1.0 - (self.bytes_lost as f32 / self.bytes_sent.max(1) as f32).min(1.0);

        let recent_loss_penalty = if self.has_recent_loss(now) { 0.25 } else { 1.0 };

        RTT_WEIGHT * rtt_score
            + CWND_WEIGHT * cwnd_score
            + LOSS_WEIGHT * loss_penalty
            + RECENT_LOSS_WEIGHT * recent_loss_penalty
    }

    /// A path is assumed able to meet the deadline when its RTT fits
    /// the slack, the congestion window has headroom, and it has not
    /// lost recently
    fn is_feasible(&self, slack: Duration, now: Timestamp) -> bool {
        self.smoothed_rtt <= slack && self.cwnd_headroom() > 0 && !self.has_recent_loss(now)
    }
}

/// Selects the path for a deadline stream with remaining `slack`.
///
/// Feasible paths compete on composite score. When no path is feasible
/// and every validated path's RTT exceeds the slack, the deadline is
/// unmeetable and the lowest-RTT path is used; otherwise the best
/// scoring validated path carries the data.
pub fn select(paths: &[Metrics], slack: Duration, now: Timestamp) -> Option<Id> {
    best(paths.iter(), slack, now).map(|(path, _)| path.id)
}

/// Selects the path for retransmitting deadline data originally sent
/// on `original`.
///
/// The original path is discarded unless it remains the best choice by
/// a margin of at least `RETRANSMIT_MARGIN`.
pub fn select_for_retransmission(
    paths: &[Metrics],
    slack: Duration,
    now: Timestamp,
    original: Id,
) -> Option<Id> {
    let (choice, _) = best(paths.iter(), slack, now)?;
    if choice.id != original {
        return Some(choice.id);
    }

    let alternatives = paths.iter().filter(|path| path.id != original);
    match best(alternatives, slack, now) {
        Some((alternative, alternative_score)) => {
            let original_score = choice.score(slack, now);
            if original_score >= alternative_score + RETRANSMIT_MARGIN {
                Some(original)
            } else {
                Some(alternative.id)
            }
        }
        None => Some(original),
    }
}

fn best<'a>(
    paths: impl Iterator<Item = &'a Metrics> + Clone,
    slack: Duration,
    now: Timestamp,
) -> Option<(&'a Metrics, f32)> {
    let validated = paths.filter(|path| path.is_validated);

    let feasible = validated
        .clone()
        .filter(|path| path.is_feasible(slack, now));
    if let Some(choice) = best_by_score(feasible, slack, now) {
        return Some(choice);
    }

    if validated.clone().all(|path| path.smoothed_rtt > slack) {
        // the deadline is unmeetable everywhere: lowest RTT limits the damage
        return validated
            .min_by_key(|path| (path.smoothed_rtt, path.id))
            .map(|path| (path, path.score(slack, now)));
    }

    best_by_score(validated, slack, now)
}

fn best_by_score<'a>(
    paths: impl Iterator<Item = &'a Metrics>,
    slack: Duration,
    now: Timestamp,
) -> Option<(&'a Metrics, f32)> {
    let mut selected: Option<(&Metrics, f32)> = None;
    for path in paths {
        let score = path.score(slack, now);
        let better = match selected {
            None => true,
            Some((current, current_score)) => {
                score > current_score
                    || (score == current_score
                        && (path.smoothed_rtt, path.id) < (current.smoothed_rtt, current.id))
            }
        };
        if better {
            selected = Some((path, score));
        }
    }
    selected
}
