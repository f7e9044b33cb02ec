// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::{
    config::Config,
    connection::fairness::{Class, Window},
    stream::DeadlineMode,
};
use core::cmp::Ordering;
use s2n_quic_core::{stream::StreamId, time::Timestamp};

/// A stream with data ready at scheduling time.
///
/// A Soft stream past its deadline is presented without one: expiry
/// demotes it to normal scheduling.
#[derive(Clone, Copy, Debug)]
pub struct Candidate {
    pub id: StreamId,
    pub deadline: Option<CandidateDeadline>,
    /// When the stream last became ready without being served
    pub waiting_since: Timestamp,
}

#[derive(Clone, Copy, Debug)]
pub struct CandidateDeadline {
    pub expires: Timestamp,
    pub mode: DeadlineMode,
}

/// The scheduling decision for one transmission opportunity
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Selected {
    pub id: StreamId,
    pub class: Class,
}

/// Ranks two ready streams; `Less` is served first.
///
/// A deadline stream ranks strictly above a deadline-free stream.
/// Between deadline streams the earlier absolute deadline wins, Hard
/// breaks a timing tie against Soft, and the smaller stream id breaks
/// the rest. Between deadline-free streams the order is unspecified.
pub fn compare(a: &Candidate, b: &Candidate) -> Ordering {
    match (&a.deadline, &b.deadline) {
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
        (Some(lhs), Some(rhs)) => lhs
            .expires
            .cmp(&rhs.expires)
            .then_with(|| match (lhs.mode, rhs.mode) {
                (DeadlineMode::Hard, DeadlineMode::Soft) => Ordering::Less,
                (DeadlineMode::Soft, DeadlineMode::Hard) => Ordering::Greater,
                _ => Ordering::Equal,
            })
            .then_with(|| a.id.cmp(&b.id)),
    }
}

/// Earliest-deadline-first selection with starvation prevention and a
/// reserved deadline-free bandwidth share.
#[derive(Clone, Debug, Default)]
pub struct Scheduler {
    /// Round-robin cursor over deadline-free streams
    last_non_deadline: Option<StreamId>,
}

impl Scheduler {
    /// Picks the stream to serve next, or `None` when nothing is ready
    pub fn select(
        &mut self,
        candidates: &[Candidate],
        now: Timestamp,
        config: &Config,
        fairness: &Window,
    ) -> Option<Selected> {
        // a deadline-free stream waiting past the starvation limit
        // preempts everything
        if let Some(starving) = candidates
            .iter()
            .filter(|candidate| candidate.deadline.is_none())
            .filter(|candidate| {
                now.saturating_duration_since(candidate.waiting_since) > config.max_starvation_time
            })
            .min_by_key(|candidate| (candidate.waiting_since, candidate.id))
        {
            return Some(self.serve_non_deadline(starving.id));
        }

        // correct the byte-share ratio before serving more deadline data
        if fairness.non_deadline_deficit(config.min_non_deadline_share) {
            if let Some(id) = self.next_round_robin(candidates) {
                return Some(self.serve_non_deadline(id));
            }
        }

        // earliest deadline first
        if let Some(deadline) = candidates
            .iter()
            .filter(|candidate| candidate.deadline.is_some())
            .min_by(|a, b| compare(a, b))
        {
            return Some(Selected {
                id: deadline.id,
                class: Class::Deadline,
            });
        }

        // oldest waiting deadline-free stream
        candidates
            .iter()
            .filter(|candidate| candidate.deadline.is_none())
            .min_by_key(|candidate| (candidate.waiting_since, candidate.id))
            .map(|candidate| self.serve_non_deadline(candidate.id))
    }

    fn serve_non_deadline(&mut self, id: StreamId) -> Selected {
        self.last_non_deadline = Some(id);
        Selected {
            id,
            class: Class::NonDeadline,
        }
    }

    /// The deadline-free stream after the round-robin cursor, wrapping
    /// to the smallest id
    fn next_round_robin(&self, candidates: &[Candidate]) -> Option<StreamId> {
        let ids = candidates
            .iter()
            .filter(|candidate| candidate.deadline.is_none())
            .map(|candidate| candidate.id);

        if let Some(cursor) = self.last_non_deadline {
            if let Some(next) = ids.clone().filter(|id| *id > cursor).min() {
                return Some(next);
            }
        }
        ids.min()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::time::Duration;
    use num_rational::Ratio;
    use s2n_quic_core::{
        time::{Clock, NoopClock},
        varint::VarInt,
    };

    fn stream_id(id: u32) -> StreamId {
        StreamId::from_varint(VarInt::from_u32(id))
    }

    fn deadline_candidate(
        id: u32,
        expires: Timestamp,
        mode: DeadlineMode,
        waiting_since: Timestamp,
    ) -> Candidate {
        Candidate {
            id: stream_id(id),
            deadline: Some(CandidateDeadline { expires, mode }),
            waiting_since,
        }
    }

    fn plain_candidate(id: u32, waiting_since: Timestamp) -> Candidate {
        Candidate {
            id: stream_id(id),
            deadline: None,
            waiting_since,
        }
    }

    fn setup() -> (Scheduler, Config, Window, Timestamp) {
        let config = Config::default();
        let window = Window::new(config.fairness_window);
        (Scheduler::default(), config, window, NoopClock.get_time())
    }

    #[test]
    fn deadline_streams_rank_by_deadline_then_id() {
        let (_, _, _, t0) = setup();
        let a = deadline_candidate(4, t0 + Duration::from_millis(100), DeadlineMode::Soft, t0);
        let b = deadline_candidate(8, t0 + Duration::from_millis(50), DeadlineMode::Soft, t0);
        let c = plain_candidate(12, t0);

        // 8 < 4 < 12
        assert_eq!(compare(&b, &a), Ordering::Less);
        assert_eq!(compare(&a, &c), Ordering::Less);
        assert_eq!(compare(&b, &c), Ordering::Less);
        assert_eq!(compare(&c, &c), Ordering::Equal);

        // Hard wins a timing tie
        let soft = deadline_candidate(4, t0 + Duration::from_millis(50), DeadlineMode::Soft, t0);
        let hard = deadline_candidate(8, t0 + Duration::from_millis(50), DeadlineMode::Hard, t0);
        assert_eq!(compare(&hard, &soft), Ordering::Less);

        // equal deadline and mode falls back to the smaller id
        let first = deadline_candidate(4, t0 + Duration::from_millis(50), DeadlineMode::Hard, t0);
        assert_eq!(compare(&first, &hard), Ordering::Less);
    }

    #[test]
    fn earliest_deadline_is_selected() {
        let (mut scheduler, config, window, t0) = setup();
        let candidates = [
            deadline_candidate(4, t0 + Duration::from_millis(100), DeadlineMode::Soft, t0),
            deadline_candidate(8, t0 + Duration::from_millis(50), DeadlineMode::Soft, t0),
            plain_candidate(12, t0),
        ];

        let selected = scheduler.select(&candidates, t0, &config, &window).unwrap();
        assert_eq!(selected.id, stream_id(8));
        assert_eq!(selected.class, Class::Deadline);
    }

    #[test]
    fn starving_stream_preempts_deadlines() {
        let (mut scheduler, config, window, t0) = setup();
        let now = t0 + Duration::from_millis(11);
        let candidates = [
            deadline_candidate(4, now + Duration::from_millis(5), DeadlineMode::Hard, now),
            // ready since t0, past the 10ms starvation limit
            plain_candidate(12, t0),
        ];

        let selected = scheduler.select(&candidates, now, &config, &window).unwrap();
        assert_eq!(selected.id, stream_id(12));
        assert_eq!(selected.class, Class::NonDeadline);
    }

    #[test]
    fn share_deficit_forces_round_robin_over_plain_streams() {
        let (mut scheduler, mut config, mut window, t0) = setup();
        config.set_fairness(Ratio::new_raw(3, 10), Duration::from_secs(1));
        window.on_tick(t0);
        window.on_bytes_sent(Class::Deadline, 1000, false);

        let candidates = [
            deadline_candidate(4, t0 + Duration::from_millis(5), DeadlineMode::Hard, t0),
            plain_candidate(8, t0),
            plain_candidate(12, t0),
        ];

        let first = scheduler.select(&candidates, t0, &config, &window).unwrap();
        assert_eq!(first.class, Class::NonDeadline);
        assert_eq!(first.id, stream_id(8));

        // still in deficit: the next plain stream takes its turn
        let second = scheduler.select(&candidates, t0, &config, &window).unwrap();
        assert_eq!(second.id, stream_id(12));

        // the cursor wraps
        let third = scheduler.select(&candidates, t0, &config, &window).unwrap();
        assert_eq!(third.id, stream_id(8));
    }

    #[test]
    fn plain_streams_are_served_oldest_first() {
        let (mut scheduler, config, window, t0) = setup();
        let candidates = [
            plain_candidate(8, t0 + Duration::from_millis(2)),
            plain_candidate(12, t0),
        ];

        let selected = scheduler.select(&candidates, t0 + Duration::from_millis(3), &config, &window);
        assert_eq!(selected.unwrap().id, stream_id(12));
    }

    #[test]
    fn nothing_ready_selects_nothing() {
        let (mut scheduler, config, window, t0) = setup();
        assert!(scheduler.select(&[], t0, &config, &window).is_none());
    }
}
