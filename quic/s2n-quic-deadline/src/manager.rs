// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::{
    config::Config,
    connection::{
        self,
        fairness::Class,
        urgency::{Slack, Urgency},
    },
    error::Error,
    event::{self, Subscriber},
    frame::{DeadlineControl, Frame, StreamDataDropped},
    packet::DeadlineTag,
    path,
    recovery::{
        coupling::{Controller, Coupling, ProbePhase},
        retransmission::{Decision, Loss, Segment},
    },
    scheduler::{Candidate, CandidateDeadline, Scheduler},
    stream::{
        chunk::ChunkDeadline, recv::Delivery, DeadlineMode, RecvState, SendQueue, Stats,
        StreamDeadlineState,
    },
    transport_parameters::DeadlineSupport,
};
use bytes::Bytes;
use core::time::Duration;
use hashbrown::{HashMap, HashSet};
use num_rational::Ratio;
use s2n_quic_core::{
    recovery::RttEstimator, stream::StreamId, time::Timestamp, transport, varint::VarInt,
};
use std::collections::VecDeque;
use tracing::debug;

/// The smoothed RTT assumed before the first estimator sample arrives
const DEFAULT_SMOOTHED_RTT: Duration = Duration::from_millis(333);

#[derive(Debug, Default)]
struct Entry {
    send: SendQueue,
    deadline: StreamDeadlineState,
    recv: RecvState,
    /// When the stream last became ready without being served
    waiting_since: Option<Timestamp>,
}

/// One stream payload selected for transmission
#[derive(Clone, Debug)]
pub struct Transmission {
    pub stream_id: StreamId,
    pub offset: VarInt,
    pub data: Bytes,
    pub is_fin: bool,
    /// The path a deadline stream should use, when multipath metrics
    /// were supplied
    pub path: Option<path::Id>,
    /// Metadata for the packet engine to keep with the sent packet
    pub tag: DeadlineTag,
}

/// Per-connection deadline engine.
///
/// Owns every deadline stream's state, the scheduler, the congestion
/// coupling, and the queue of extension frames awaiting transmission.
/// The host drives it from the connection's event turn; nothing in
/// here blocks or suspends.
#[derive(Debug)]
pub struct Manager<Sub: Subscriber> {
    config: Config,
    support: DeadlineSupport,
    context: connection::Context,
    scheduler: Scheduler,
    coupling: Coupling,
    streams: HashMap<StreamId, Entry>,
    closed: HashSet<StreamId>,
    pending_frames: VecDeque<Frame>,
    last_smoothed_rtt: Duration,
    subscriber: Sub,
}

impl<Sub: Subscriber> Manager<Sub> {
    pub fn new(config: Config, subscriber: Sub) -> Self {
        Self {
            context: connection::Context::new(&config),
            config,
            support: DeadlineSupport::Disabled,
            scheduler: Scheduler::default(),
            coupling: Coupling::new(),
            streams: HashMap::new(),
            closed: HashSet::new(),
            pending_frames: VecDeque::new(),
            last_smoothed_rtt: DEFAULT_SMOOTHED_RTT,
            subscriber,
        }
    }

    /// Records the handshake outcome; the capability requires both
    /// peers to have advertised the transport parameter
    pub fn on_negotiation(&mut self, local: DeadlineSupport, peer: DeadlineSupport) {
        self.support = DeadlineSupport::negotiate(local, peer);
        debug!(support = ?self.support, "deadline capability negotiated");
    }

    #[inline]
    pub fn support(&self) -> DeadlineSupport {
        self.support
    }

    #[inline]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[inline]
    pub fn context(&self) -> &connection::Context {
        &self.context
    }

    #[inline]
    pub fn subscriber(&self) -> &Sub {
        &self.subscriber
    }

    #[inline]
    pub fn subscriber_mut(&mut self) -> &mut Sub {
        &mut self.subscriber
    }

    /// Updates the fairness knobs
    pub fn set_fairness(&mut self, min_non_deadline_share: Ratio<u64>, max_starvation_time: Duration) {
        self.config
            .set_fairness(min_non_deadline_share, max_starvation_time);
    }

    // === application API ===

    /// Assigns a relative deadline and mode to a stream.
    ///
    /// A relative deadline of zero cancels deadline effects. Queued
    /// chunks that carry no deadline yet are stamped from their
    /// original enqueue time; already stamped chunks are unaffected.
    pub fn set_stream_deadline(
        &mut self,
        stream_id: StreamId,
        relative: Duration,
        mode: DeadlineMode,
        now: Timestamp,
    ) -> Result<(), Error> {
        if !self.support.is_enabled() {
            return Err(Error::CapabilityDisabled);
        }
        if self.closed.contains(&stream_id) {
            return Err(Error::StreamInvalid);
        }

        let deadline_ms =
            VarInt::new(relative.as_millis() as u64).map_err(|_| Error::PayloadTooLarge)?;
        let entry = self.streams.entry(stream_id).or_default();

        if relative.is_zero() {
            entry.deadline.cancel();
        } else {
            let deadline = entry.deadline.set(relative, mode, now);
            entry.send.stamp_unstamped(&deadline);
            self.context.on_deadline_stream_attached();
            debug!(?stream_id, ?relative, ?mode, "stream deadline set");
        }

        self.pending_frames
            .push_back(Frame::DeadlineControl(DeadlineControl {
                stream_id: stream_id.into(),
                deadline_ms,
            }));

        self.refresh_urgency(now);
        Ok(())
    }

    /// Enqueues application data, stamping the enqueue time and the
    /// stream's current deadline into the chunk
    pub fn add_to_stream(
        &mut self,
        stream_id: StreamId,
        data: Bytes,
        is_fin: bool,
        now: Timestamp,
    ) -> Result<(), Error> {
        if self.closed.contains(&stream_id) {
            return Err(Error::StreamInvalid);
        }

        let entry = self.streams.entry(stream_id).or_default();
        let deadline = entry
            .deadline
            .deadline()
            .map(|deadline| ChunkDeadline::stamp(deadline, now));
        entry.send.push(data, is_fin, now, deadline)?;
        if entry.waiting_since.is_none() {
            entry.waiting_since = Some(now);
        }

        self.refresh_urgency(now);
        Ok(())
    }

    /// Combined form of [`Self::set_stream_deadline`] and
    /// [`Self::add_to_stream`]
    pub fn add_to_stream_with_deadline(
        &mut self,
        stream_id: StreamId,
        data: Bytes,
        is_fin: bool,
        relative: Duration,
        mode: DeadlineMode,
        now: Timestamp,
    ) -> Result<(), Error> {
        self.set_stream_deadline(stream_id, relative, mode, now)?;
        self.add_to_stream(stream_id, data, is_fin, now)
    }

    /// The stream's current relative deadline, if any
    pub fn get_stream_deadline(&self, stream_id: StreamId) -> Option<Duration> {
        self.streams
            .get(&stream_id)?
            .deadline
            .deadline()
            .map(|deadline| deadline.relative)
    }

    /// The relative deadline the peer announced for its sending side
    /// of the stream
    pub fn peer_deadline(&self, stream_id: StreamId) -> Option<Duration> {
        self.streams.get(&stream_id)?.recv.peer_deadline()
    }

    /// Deadline counters for the stream
    pub fn stream_stats(&self, stream_id: StreamId) -> Option<Stats> {
        Some(self.streams.get(&stream_id)?.deadline.stats())
    }

    /// Receiver-side accounting: bytes surfaced to the application and
    /// bytes reported as dropped by the peer
    pub fn receive_progress(&self, stream_id: StreamId) -> Option<(u64, u64)> {
        let recv = &self.streams.get(&stream_id)?.recv;
        Some((recv.delivered_bytes(), recv.gap_bytes()))
    }

    // === stream lifecycle ===

    /// Removes all deadline state for a reset stream
    pub fn on_stream_reset(&mut self, stream_id: StreamId) {
        self.streams.remove(&stream_id);
        self.closed.insert(stream_id);
        self.subscriber
            .on_stream_reset(&event::StreamReset { stream_id });
    }

    /// Removes all deadline state once a stream is fully closed
    pub fn on_stream_closed(&mut self, stream_id: StreamId) {
        self.streams.remove(&stream_id);
        self.closed.insert(stream_id);
    }

    // === frame transmission ===

    /// The next queued extension frame.
    ///
    /// The host must drain these before emitting STREAM frames so a
    /// STREAM_DATA_DROPPED signal always precedes later data for the
    /// same stream.
    pub fn pop_frame(&mut self) -> Option<Frame> {
        self.pending_frames.pop_front()
    }

    #[inline]
    pub fn has_pending_frames(&self) -> bool {
        !self.pending_frames.is_empty()
    }

    // === scheduling ===

    /// Runs one transmission turn: expiry, urgency derivation, EDF
    /// selection, and path choice.
    ///
    /// Returns the stream payload to emit, or `None` when no stream
    /// has data ready.
    pub fn poll_transmission<C: Controller>(
        &mut self,
        now: Timestamp,
        max_len: usize,
        rtt: &RttEstimator,
        paths: &[path::Metrics],
        controller: &mut C,
    ) -> Option<Transmission> {
        self.last_smoothed_rtt = rtt.smoothed_rtt();
        self.context.fairness.on_tick(now);
        self.expire(now);
        self.refresh_urgency(now);
        self.coupling.on_urgency(controller, self.context.urgency());

        let mut candidates = Vec::with_capacity(self.streams.len());
        for (id, entry) in self.streams.iter_mut() {
            if !entry.send.has_data() {
                continue;
            }
            let waiting_since = *entry.waiting_since.get_or_insert(now);
            let deadline = entry.deadline.deadline().and_then(|deadline| {
                if !deadline.mode.is_hard() && deadline.is_expired(now) {
                    // an expired Soft stream falls back to normal scheduling
                    None
                } else {
                    Some(CandidateDeadline {
                        expires: deadline.expires,
                        mode: deadline.mode,
                    })
                }
            });
            candidates.push(Candidate {
                id: *id,
                deadline,
                waiting_since,
            });
        }

        let selected = self
            .scheduler
            .select(&candidates, now, &self.config, &self.context.fairness)?;
        if selected.class == Class::NonDeadline {
            self.context.fairness.on_non_deadline_scheduled(now);
        }

        let entry = self.streams.get_mut(&selected.id)?;
        entry.waiting_since = Some(now);
        let handoff = entry.send.pop_handoff(max_len)?;

        let path = entry.deadline.deadline().and_then(|deadline| {
            if paths.is_empty() {
                return None;
            }
            let slack = deadline.expires.saturating_duration_since(now);
            path::select(paths, slack, now)
        });

        let mut tag = DeadlineTag::default();
        tag.on_stream_data(selected.id, handoff.deadline);

        Some(Transmission {
            stream_id: selected.id,
            offset: handoff.offset,
            data: handoff.data,
            is_fin: handoff.is_fin,
            path,
            tag,
        })
    }

    /// Records how many bytes the packet engine actually transmitted
    /// for the stream, updating fairness accounting
    pub fn on_packet_sent<C: Controller>(
        &mut self,
        stream_id: StreamId,
        bytes: usize,
        now: Timestamp,
        controller: &mut C,
    ) {
        let class = if self
            .streams
            .get(&stream_id)
            .map(|entry| entry.deadline.is_enabled())
            .unwrap_or(false)
        {
            Class::Deadline
        } else {
            Class::NonDeadline
        };
        let boosted = self.coupling.is_boost_active() && class == Class::Deadline;
        self.context.fairness.on_bytes_sent(class, bytes, boosted);
        self.coupling
            .on_packet_sent(controller, bytes, boosted, now);
    }

    /// Decides whether and where a lost packet's payload is
    /// retransmitted.
    ///
    /// Expired Hard payload is not retransmitted; its ranges are added
    /// to the dropped ledger and the covering STREAM_DATA_DROPPED
    /// frames are queued instead.
    pub fn on_packet_loss(
        &mut self,
        tag: &DeadlineTag,
        lost: &[Loss],
        paths: &[path::Metrics],
        original_path: Option<path::Id>,
        now: Timestamp,
    ) -> Decision {
        if !tag.contains_deadline_data() {
            return Decision::BasePolicy;
        }

        let all_streams_expired = !tag.streams().is_empty()
            && tag.streams().iter().all(|id| {
                self.streams
                    .get(id)
                    .and_then(|entry| entry.deadline.deadline())
                    .map(|deadline| deadline.is_expired(now))
                    .unwrap_or(false)
            });

        if (tag.is_expired(now) || all_streams_expired)
            && tag.hard_only()
            && !tag.has_non_deadline_data()
        {
            for loss in lost {
                let Some(entry) = self.streams.get_mut(&loss.stream_id) else {
                    continue;
                };
                for range in entry.deadline.live_subranges(loss.range.clone()) {
                    entry.deadline.record_dropped(range.clone());
                    self.pending_frames
                        .push_back(Frame::StreamDataDropped(StreamDataDropped {
                            stream_id: loss.stream_id.into(),
                            offset: range.start,
                            length: range.end - range.start,
                        }));
                }
            }
            debug!("expired hard-deadline packet lost, retransmission skipped");
            return Decision::Skip;
        }

        // rebuild from the current post-drop stream state
        let mut segments = Vec::new();
        for loss in lost {
            match self.streams.get(&loss.stream_id) {
                Some(entry) => {
                    for range in entry.deadline.live_subranges(loss.range.clone()) {
                        segments.push(Segment {
                            stream_id: loss.stream_id,
                            range,
                        });
                    }
                }
                None => segments.push(Segment {
                    stream_id: loss.stream_id,
                    range: loss.range.clone(),
                }),
            }
        }

        let slack = tag
            .streams()
            .iter()
            .filter_map(|id| {
                let deadline = self.streams.get(id)?.deadline.deadline()?;
                Some(deadline.expires.saturating_duration_since(now))
            })
            .min()
            .unwrap_or(Duration::ZERO);

        let path = if paths.is_empty() {
            None
        } else {
            match original_path {
                Some(original) => path::select_for_retransmission(paths, slack, now, original),
                None => path::select(paths, slack, now),
            }
        };

        Decision::Retransmit { path, segments }
    }

    // === congestion coupling ===

    /// The pacing gain to use for the next transmission burst
    pub fn pacing_gain<C: Controller>(
        &mut self,
        controller: &mut C,
        base_gain: Ratio<u64>,
        in_probe_up: bool,
    ) -> Ratio<u64> {
        self.coupling
            .pacing_gain(controller, base_gain, in_probe_up, &self.config)
    }

    /// The congestion window to use, after deadline boost rules
    pub fn congestion_window<C: Controller>(
        &mut self,
        controller: &mut C,
        base_cwnd: u32,
        bdp: u32,
        rtt: &RttEstimator,
        now: Timestamp,
    ) -> u32 {
        self.coupling.congestion_window(
            controller,
            base_cwnd,
            bdp,
            rtt.smoothed_rtt(),
            &self.context.fairness,
            &self.config,
            now,
        )
    }

    /// Whether the congestion controller should skip `phase`
    pub fn should_skip_probe_phase<C: Controller>(
        &mut self,
        controller: &mut C,
        phase: ProbePhase,
        now: Timestamp,
    ) -> bool {
        self.coupling
            .should_skip_probe_phase(controller, phase, now)
    }

    // === frame reception ===

    /// Decodes and handles one extension frame from `buffer`,
    /// returning the remaining bytes
    pub fn on_frame<'a>(
        &mut self,
        buffer: s2n_codec::DecoderBufferMut<'a>,
    ) -> Result<s2n_codec::DecoderBufferMut<'a>, transport::Error> {
        let (frame, remaining) = buffer.decode::<Frame>().map_err(|_| {
            transport::Error::FRAME_ENCODING_ERROR.with_reason("malformed deadline extension frame")
        })?;
        match &frame {
            Frame::DeadlineControl(frame) => self.on_deadline_control(frame)?,
            Frame::StreamDataDropped(frame) => self.on_stream_data_dropped(frame)?,
        }
        Ok(remaining)
    }

    /// Handles a DEADLINE_CONTROL frame from the peer
    pub fn on_deadline_control(
        &mut self,
        frame: &DeadlineControl,
    ) -> Result<(), transport::Error> {
        if !self.support.is_enabled() {
            return Err(DeadlineSupport::on_unnegotiated_frame(frame.tag()));
        }
        let stream_id = StreamId::from_varint(frame.stream_id);
        if self.closed.contains(&stream_id) {
            return Ok(());
        }
        self.streams
            .entry(stream_id)
            .or_default()
            .recv
            .on_deadline_control(frame);
        Ok(())
    }

    /// Handles a STREAM_DATA_DROPPED frame from the peer, surfacing
    /// the gap and any data it unblocks
    pub fn on_stream_data_dropped(
        &mut self,
        frame: &StreamDataDropped,
    ) -> Result<(), transport::Error> {
        if !self.support.is_enabled() {
            return Err(DeadlineSupport::on_unnegotiated_frame(frame.tag()));
        }
        let stream_id = StreamId::from_varint(frame.stream_id);
        if self.closed.contains(&stream_id) {
            return Ok(());
        }
        let deliveries = self
            .streams
            .entry(stream_id)
            .or_default()
            .recv
            .on_data_dropped(frame)?;
        self.deliver(stream_id, deliveries);
        Ok(())
    }

    /// Handles received stream payload from the host stack, surfacing
    /// whatever became deliverable in order
    pub fn on_received_data(
        &mut self,
        stream_id: StreamId,
        offset: VarInt,
        data: &Bytes,
        is_fin: bool,
    ) -> Result<(), transport::Error> {
        if self.closed.contains(&stream_id) {
            return Ok(());
        }
        let deliveries = self
            .streams
            .entry(stream_id)
            .or_default()
            .recv
            .on_data(offset, data, is_fin)?;
        self.deliver(stream_id, deliveries);
        Ok(())
    }

    // === internals ===

    fn deliver(&mut self, stream_id: StreamId, deliveries: Vec<Delivery>) {
        for delivery in deliveries {
            match delivery {
                Delivery::Data {
                    offset,
                    data,
                    is_fin,
                } => {
                    self.subscriber.on_stream_data(&event::StreamData {
                        stream_id,
                        offset,
                        data,
                        is_fin,
                    });
                    if is_fin {
                        self.subscriber.on_stream_fin(&event::StreamFin { stream_id });
                    }
                }
                Delivery::Gap { offset, length } => {
                    self.subscriber.on_stream_data_discarded(&event::Gap {
                        stream_id,
                        offset,
                        length,
                    });
                }
            }
        }
    }

    /// Discards expired Hard payload from every queue and turns the
    /// discarded ranges into STREAM_DATA_DROPPED frames
    fn expire(&mut self, now: Timestamp) {
        for (id, entry) in self.streams.iter_mut() {
            if !entry.send.has_data() {
                continue;
            }
            let expired = entry.send.prune_expired(now);
            if expired.missed > 0 {
                entry.deadline.record_missed(expired.missed);
            }
            for range in expired.dropped {
                debug!(stream_id = ?id, ?range, "expired chunk dropped");
                entry.deadline.record_dropped(range.clone());
                self.pending_frames
                    .push_back(Frame::StreamDataDropped(StreamDataDropped {
                        stream_id: (*id).into(),
                        offset: range.start,
                        length: range.end - range.start,
                    }));
            }
        }
    }

    /// Rederives urgency from the minimum slack across deadline
    /// streams with queued data
    fn refresh_urgency(&mut self, now: Timestamp) {
        let mut has_deadline_streams = false;
        let mut expired_hard = false;
        let mut expired_soft = false;
        let mut min_remaining: Option<Duration> = None;

        for entry in self.streams.values() {
            let Some(deadline) = entry.deadline.deadline() else {
                continue;
            };
            has_deadline_streams = true;
            if !entry.send.has_data() {
                continue;
            }
            if deadline.is_expired(now) {
                if deadline.mode.is_hard() {
                    expired_hard = true;
                } else {
                    expired_soft = true;
                }
            } else {
                let remaining = deadline.expires.saturating_duration_since(now);
                min_remaining = Some(match min_remaining {
                    Some(current) => current.min(remaining),
                    None => remaining,
                });
            }
        }

        if has_deadline_streams {
            self.context.on_deadline_stream_attached();
        } else {
            self.context.on_deadline_streams_drained();
        }

        let slack = if expired_hard {
            Slack::ExpiredHard
        } else if expired_soft {
            Slack::ExpiredSoft
        } else if let Some(remaining) = min_remaining {
            Slack::Remaining(remaining)
        } else {
            Slack::Idle
        };

        let urgency = Urgency::classify(slack, self.last_smoothed_rtt, self.config.urgency_thresholds);
        self.context.set_urgency(urgency, &self.config);
    }
}
