// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::{config::Config, connection::fairness::Window, connection::Urgency};
use core::time::Duration;
use num_rational::Ratio;
use s2n_quic_core::time::Timestamp;
use tracing::{debug, trace};

const UNITY_GAIN: Ratio<u64> = Ratio::new_raw(1, 1);

/// Pacing gain multiplier applied under Critical urgency
const CRITICAL_GAIN_MULTIPLIER: Ratio<u64> = Ratio::new_raw(3, 2);

/// Pacing gain multiplier applied under High urgency
const HIGH_GAIN_MULTIPLIER: Ratio<u64> = Ratio::new_raw(5, 4);

/// Bandwidth-probing phases a coupled congestion controller cycles
/// through, in the shape of BBR's ProbeBW cycle
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProbePhase {
    /// Probing down to drain the queue
    Down,
    /// Cruising at the estimated bandwidth
    Cruise,
    /// Refilling the pipe before probing up
    Refill,
    /// Probing up for more bandwidth
    Up,
}

/// The hooks a congestion controller exposes to the deadline engine.
///
/// Every value a hook returns is clamped by [`Coupling`] before use,
/// so a controller cannot exceed the configured boost caps.
pub trait Controller {
    /// Informs the controller of the derived urgency level
    fn on_urgency_change(&mut self, urgency: Urgency) {
        let _ = urgency;
    }

    /// Returns a possibly boosted pacing gain
    fn pacing_gain_adjust(&mut self, base_gain: Ratio<u64>, in_probe_up: bool) -> Ratio<u64> {
        let _ = in_probe_up;
        base_gain
    }

    /// Returns a possibly boosted congestion window
    fn cwnd_adjust(&mut self, base_cwnd: u32, bdp: u32, now: Timestamp) -> u32 {
        let _ = (bdp, now);
        base_cwnd
    }

    /// Returns `true` if the controller itself wants to skip `phase`
    fn should_skip_probe_phase(&mut self, phase: ProbePhase, now: Timestamp) -> bool {
        let _ = (phase, now);
        false
    }

    /// Records bandwidth-share accounting for transmitted bytes
    fn update_fairness(&mut self, bytes_sent: usize, is_deadline_boosted: bool, now: Timestamp) {
        let _ = (bytes_sent, is_deadline_boosted, now);
    }
}

/// A controller that leaves every decision to the base stack
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopController;

impl Controller for NoopController {}

/// Applies the deadline engine's boost rules on top of a coupled
/// congestion controller.
#[derive(Clone, Debug, Default)]
pub struct Coupling {
    urgency: Urgency,
    last_cwnd_boost: Option<Timestamp>,
}

impl Coupling {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn urgency(&self) -> Urgency {
        self.urgency
    }

    /// Bytes sent while this returns `true` count as deadline-boosted
    /// in the fairness window
    #[inline]
    pub fn is_boost_active(&self) -> bool {
        self.urgency.allows_cwnd_boost()
    }

    /// Forwards a changed urgency level to the controller
    pub fn on_urgency<C: Controller>(&mut self, controller: &mut C, urgency: Urgency) {
        if self.urgency != urgency {
            trace!(?urgency, "urgency changed");
            self.urgency = urgency;
            controller.on_urgency_change(urgency);
        }
    }

    /// The pacing gain to use, with the deadline boost capped by
    /// urgency and configuration.
    ///
    /// No boost is applied while the controller runs its own upward
    /// probe.
    pub fn pacing_gain<C: Controller>(
        &mut self,
        controller: &mut C,
        base_gain: Ratio<u64>,
        in_probe_up: bool,
        config: &Config,
    ) -> Ratio<u64> {
        let adjusted = controller.pacing_gain_adjust(base_gain, in_probe_up);

        if in_probe_up {
            return adjusted.min(base_gain);
        }

        let multiplier = match self.urgency {
            Urgency::Critical => CRITICAL_GAIN_MULTIPLIER,
            Urgency::High => HIGH_GAIN_MULTIPLIER,
            _ => UNITY_GAIN,
        }
        .min(config.pacing_boost_cap);

        adjusted.min(base_gain * multiplier)
    }

    /// The congestion window to use, with the deadline boost capped at
    /// the configured multiple of the BDP, applied at most once per
    /// smoothed RTT, only under High or Critical urgency, and only
    /// within the fairness window's boost budget.
    #[allow(clippy::too_many_arguments)]
    pub fn congestion_window<C: Controller>(
        &mut self,
        controller: &mut C,
        base_cwnd: u32,
        bdp: u32,
        smoothed_rtt: Duration,
        fairness: &Window,
        config: &Config,
        now: Timestamp,
    ) -> u32 {
        let adjusted = controller.cwnd_adjust(base_cwnd, bdp, now);
        if adjusted <= base_cwnd {
            return adjusted;
        }

        if !self.urgency.allows_cwnd_boost() {
            return base_cwnd;
        }

        if let Some(last) = self.last_cwnd_boost {
            if now.saturating_duration_since(last) < smoothed_rtt {
                return base_cwnd;
            }
        }

        if fairness.boost_budget_exhausted(config.max_boosted_share()) {
            debug!("cwnd boost suppressed, boosted share exhausted");
            return base_cwnd;
        }

        let cap = apply_ratio(config.cwnd_boost_cap, bdp).max(base_cwnd);
        let boosted = adjusted.min(cap);
        if boosted > base_cwnd {
            self.last_cwnd_boost = Some(now);
            debug!(base_cwnd, boosted, "cwnd boosted for deadline pressure");
        }
        boosted
    }

    /// Whether the controller should skip (or cut short) `phase`.
    ///
    /// Down-probing is skipped at High and Critical urgency; Cruise is
    /// shortened at Critical. The controller's own opinion is honored
    /// either way.
    pub fn should_skip_probe_phase<C: Controller>(
        &mut self,
        controller: &mut C,
        phase: ProbePhase,
        now: Timestamp,
    ) -> bool {
        let policy = match phase {
            ProbePhase::Down => self.urgency >= Urgency::High,
            ProbePhase::Cruise => self.urgency == Urgency::Critical,
            ProbePhase::Refill | ProbePhase::Up => false,
        };
        policy || controller.should_skip_probe_phase(phase, now)
    }

    /// Reports transmitted bytes into the controller's fairness
    /// accounting
    pub fn on_packet_sent<C: Controller>(
        &mut self,
        controller: &mut C,
        bytes_sent: usize,
        is_deadline_boosted: bool,
        now: Timestamp,
    ) {
        controller.update_fairness(bytes_sent, is_deadline_boosted, now);
    }
}

fn apply_ratio(ratio: Ratio<u64>, value: u32) -> u32 {
    (value as u64 * ratio.numer() / ratio.denom()).min(u32::MAX as u64) as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use s2n_quic_core::time::{Clock, NoopClock};

    const RTT: Duration = Duration::from_millis(20);

    /// A controller that always asks for an unbounded boost
    #[derive(Default)]
    struct Greedy {
        urgency_changes: Vec<Urgency>,
    }

    impl Controller for Greedy {
        fn on_urgency_change(&mut self, urgency: Urgency) {
            self.urgency_changes.push(urgency);
        }

        fn pacing_gain_adjust(&mut self, base_gain: Ratio<u64>, _in_probe_up: bool) -> Ratio<u64> {
            base_gain * Ratio::new_raw(100, 1)
        }

        fn cwnd_adjust(&mut self, base_cwnd: u32, _bdp: u32, _now: Timestamp) -> u32 {
            base_cwnd.saturating_mul(100)
        }
    }

    fn setup(urgency: Urgency) -> (Coupling, Greedy, Config, Window, Timestamp) {
        let config = Config::default();
        let mut coupling = Coupling::new();
        let mut controller = Greedy::default();
        let mut window = Window::new(config.fairness_window);
        let now = NoopClock.get_time();
        window.on_tick(now);
        coupling.on_urgency(&mut controller, urgency);
        (coupling, controller, config, window, now)
    }

    #[test]
    fn pacing_gain_is_capped_by_urgency() {
        let base = Ratio::new_raw(1, 1);

        let (mut coupling, mut controller, config, _, _) = setup(Urgency::Critical);
        assert_eq!(
            coupling.pacing_gain(&mut controller, base, false, &config),
            Ratio::new_raw(3, 2)
        );

        let (mut coupling, mut controller, config, _, _) = setup(Urgency::High);
        assert_eq!(
            coupling.pacing_gain(&mut controller, base, false, &config),
            Ratio::new_raw(5, 4)
        );

        let (mut coupling, mut controller, config, _, _) = setup(Urgency::Medium);
        assert_eq!(
            coupling.pacing_gain(&mut controller, base, false, &config),
            base
        );
    }

    #[test]
    fn no_pacing_boost_during_an_upward_probe() {
        let base = Ratio::new_raw(5, 4);
        let (mut coupling, mut controller, config, _, _) = setup(Urgency::Critical);
        assert_eq!(
            coupling.pacing_gain(&mut controller, base, true, &config),
            base
        );
    }

    #[test]
    fn cwnd_boost_is_capped_and_once_per_rtt() {
        let (mut coupling, mut controller, config, window, now) = setup(Urgency::Critical);
        let base_cwnd = 10_000;
        let bdp = 20_000;

        let boosted = coupling.congestion_window(
            &mut controller,
            base_cwnd,
            bdp,
            RTT,
            &window,
            &config,
            now,
        );
        assert_eq!(boosted, 30_000, "boost is capped at 1.5 x BDP");

        // within the same RTT the boost is not granted again
        let again = coupling.congestion_window(
            &mut controller,
            base_cwnd,
            bdp,
            RTT,
            &window,
            &config,
            now + RTT / 2,
        );
        assert_eq!(again, base_cwnd);

        // a full RTT later it may boost again
        let later = coupling.congestion_window(
            &mut controller,
            base_cwnd,
            bdp,
            RTT,
            &window,
            &config,
            now + RTT,
        );
        assert_eq!(later, 30_000);
    }

    #[test]
    fn cwnd_boost_requires_high_urgency() {
        let (mut coupling, mut controller, config, window, now) = setup(Urgency::Medium);
        let result =
            coupling.congestion_window(&mut controller, 10_000, 20_000, RTT, &window, &config, now);
        assert_eq!(result, 10_000);
    }

    #[test]
    fn cwnd_boost_respects_the_fairness_budget() {
        use crate::connection::fairness::Class;

        let (mut coupling, mut controller, config, mut window, now) = setup(Urgency::Critical);
        // the window is already saturated with boosted bytes
        window.on_bytes_sent(Class::Deadline, 100_000, true);

        let result =
            coupling.congestion_window(&mut controller, 10_000, 20_000, RTT, &window, &config, now);
        assert_eq!(result, 10_000);
    }

    #[test]
    fn probe_skipping_follows_urgency() {
        let now = NoopClock.get_time();

        let (mut coupling, mut controller, ..) = setup(Urgency::High);
        assert!(coupling.should_skip_probe_phase(&mut controller, ProbePhase::Down, now));
        assert!(!coupling.should_skip_probe_phase(&mut controller, ProbePhase::Cruise, now));
        assert!(!coupling.should_skip_probe_phase(&mut controller, ProbePhase::Up, now));

        let (mut coupling, mut controller, ..) = setup(Urgency::Critical);
        assert!(coupling.should_skip_probe_phase(&mut controller, ProbePhase::Down, now));
        assert!(coupling.should_skip_probe_phase(&mut controller, ProbePhase::Cruise, now));

        let (mut coupling, mut controller, ..) = setup(Urgency::Low);
        assert!(!coupling.should_skip_probe_phase(&mut controller, ProbePhase::Down, now));
    }

    #[test]
    fn urgency_changes_are_forwarded_once() {
        let (mut coupling, mut controller, ..) = setup(Urgency::High);
        coupling.on_urgency(&mut controller, Urgency::High);
        coupling.on_urgency(&mut controller, Urgency::Critical);
        assert_eq!(
            controller.urgency_changes,
            vec![Urgency::High, Urgency::Critical]
        );
    }
}
