//! Transport-wide feedback: generator (receive side) and adapter (send side).
//!
//! The generator buffers arrival times and periodically packs them into a
//! [`TransportFeedback`] packet (§4.7). The adapter keeps a bounded store of
//! sent-packet records, joins incoming feedback against it, and emits
//! `PacketResult`s sorted by sequence number for the estimators to consume.

use crate::clock::{DataSize, TimeDelta, Timestamp};
use crate::error::ErrorCounters;
use crate::wire::{PacketStatus, TransportFeedback, DELTA_SCALE_FACTOR_US, REFERENCE_TIME_TICK_US};
use std::collections::BTreeMap;

const SENT_RECORD_WINDOW: TimeDelta = TimeDelta::from_micros(500_000);
const SENT_RECORD_MAX_COUNT: usize = 1000;
const RECEIVE_BUFFER_WINDOW: TimeDelta = TimeDelta::from_micros(500_000);

/// Small-delta range: up to 63.75ms, quantized to 250us, fits in `u8`.
const MAX_SMALL_DELTA_US: i64 = 63_750;
/// Large-delta range: `[-8192ms, 8191.75ms]`, quantized to 250us, `i16`.
const MAX_LARGE_DELTA_TICKS: i64 = 0x7fff;
const MIN_LARGE_DELTA_TICKS: i64 = -0x8000;

/// A record of a packet sent, kept until feedback may still arrive for it.
#[derive(Debug, Clone, Copy)]
pub struct SentPacket {
    pub sequence_number: u64,
    pub send_time: Timestamp,
    pub size: DataSize,
    pub probe_cluster_id: Option<u32>,
}

/// The result of joining a sent-packet record with its feedback.
#[derive(Debug, Clone, Copy)]
pub struct PacketResult {
    pub sent: SentPacket,
    /// `None` means the feedback reported this sequence as not received.
    pub receive_time: Option<Timestamp>,
}

#[derive(Debug, Clone)]
pub struct TransportPacketsFeedback {
    pub feedback_time: Timestamp,
    pub packet_results: Vec<PacketResult>,
}

// ─── Generator (receive side) ──────────────────────────────────────────────

pub struct TransportFeedbackGenerator {
    sender_ssrc: u32,
    media_ssrc: u32,
    /// Buffered `(seq -> arrival_time)`, in sequence order.
    arrivals: BTreeMap<u64, Timestamp>,
    feedback_packet_count: u8,
}

impl TransportFeedbackGenerator {
    pub fn new(sender_ssrc: u32, media_ssrc: u32) -> Self {
        TransportFeedbackGenerator {
            sender_ssrc,
            media_ssrc,
            arrivals: BTreeMap::new(),
            feedback_packet_count: 0,
        }
    }

    /// Record one packet's arrival. Should be called in the unwrapped
    /// sequence-number space (after [`crate::unwrap::SeqUnwrapper`]).
    pub fn on_received_packet(&mut self, seq: u64, arrival_time: Timestamp) {
        self.arrivals.insert(seq, arrival_time);
    }

    fn evict_stale(&mut self, now: Timestamp) {
        self.arrivals
            .retain(|_, t| now - *t <= RECEIVE_BUFFER_WINDOW);
    }

    /// Build a feedback packet covering everything buffered since the last
    /// call, or `None` if nothing has arrived yet. Per §8, an empty status
    /// vector is invalid and never produced.
    pub fn build_feedback(&mut self, now: Timestamp) -> Option<TransportFeedback> {
        self.evict_stale(now);
        if self.arrivals.is_empty() {
            return None;
        }

        let base_seq = *self.arrivals.keys().next().unwrap();
        let last_seq = *self.arrivals.keys().next_back().unwrap();
        let base_time = *self.arrivals.get(&base_seq).unwrap();
        let reference_time_ticks = (base_time.micros() / REFERENCE_TIME_TICK_US) as i32;
        let reference_time = Timestamp::from_micros(reference_time_ticks as i64 * REFERENCE_TIME_TICK_US);

        let mut statuses = Vec::with_capacity((last_seq - base_seq + 1) as usize);
        let mut prev_arrival = reference_time;
        for seq in base_seq..=last_seq {
            match self.arrivals.get(&seq) {
                None => statuses.push(PacketStatus::NotReceived),
                Some(&arrival) => {
                    let delta_us = (arrival - prev_arrival).micros();
                    let ticks = delta_us / DELTA_SCALE_FACTOR_US;
                    let status = if (0..=MAX_SMALL_DELTA_US / DELTA_SCALE_FACTOR_US).contains(&ticks) {
                        PacketStatus::SmallDelta(ticks as u8)
                    } else if (MIN_LARGE_DELTA_TICKS..=MAX_LARGE_DELTA_TICKS).contains(&ticks) {
                        PacketStatus::LargeDelta(ticks as i16)
                    } else {
                        // Delta too large to encode in this feedback packet;
                        // truncate here and let the next tick cover the rest.
                        break;
                    };
                    statuses.push(status);
                    prev_arrival = arrival;
                }
            }
        }

        self.arrivals.clear();
        let count = self.feedback_packet_count;
        self.feedback_packet_count = self.feedback_packet_count.wrapping_add(1);

        Some(TransportFeedback {
            sender_ssrc: self.sender_ssrc,
            media_ssrc: self.media_ssrc,
            base_sequence: (base_seq & 0xffff) as u16,
            reference_time_ticks,
            feedback_packet_count: count,
            statuses,
        })
    }
}

// ─── Adapter (send side) ───────────────────────────────────────────────────

pub struct TransportFeedbackAdapter {
    sent: BTreeMap<u64, SentPacket>,
    outstanding_data_bytes: i64,
}

impl TransportFeedbackAdapter {
    pub fn new() -> Self {
        TransportFeedbackAdapter {
            sent: BTreeMap::new(),
            outstanding_data_bytes: 0,
        }
    }

    pub fn outstanding_data(&self) -> DataSize {
        DataSize::from_bytes(self.outstanding_data_bytes.max(0) as u64)
    }

    /// Record that a packet was handed to the network.
    pub fn add_packet(&mut self, packet: SentPacket) {
        self.outstanding_data_bytes += packet.size.bytes() as i64;
        self.sent.insert(packet.sequence_number, packet);
        self.evict_stale(packet.send_time);
    }

    fn evict_stale(&mut self, now: Timestamp) {
        while self.sent.len() > SENT_RECORD_MAX_COUNT {
            if let Some((&seq, _)) = self.sent.iter().next() {
                self.sent.remove(&seq);
            }
        }
        self.sent
            .retain(|_, p| now - p.send_time <= SENT_RECORD_WINDOW);
    }

    /// Process a received feedback packet: reconstruct arrival times from
    /// the reference time and deltas, join against the sent-record store,
    /// and return results sorted by sequence number. Unknown sequences are
    /// dropped silently (stale or never sent on this transport).
    pub fn process_feedback(
        &mut self,
        fb: &TransportFeedback,
        base_seq_unwrapped: u64,
        now: Timestamp,
        errors: &mut ErrorCounters,
    ) -> TransportPacketsFeedback {
        let reference_time =
            Timestamp::from_micros(fb.reference_time_ticks as i64 * REFERENCE_TIME_TICK_US);

        let mut results = Vec::new();
        let mut prev_arrival = reference_time;
        for (i, status) in fb.statuses.iter().enumerate() {
            let seq = base_seq_unwrapped + i as u64;
            let arrival_time = match status {
                PacketStatus::NotReceived => None,
                PacketStatus::SmallDelta(ticks) => {
                    let t = prev_arrival + TimeDelta::from_micros(*ticks as i64 * DELTA_SCALE_FACTOR_US);
                    prev_arrival = t;
                    Some(t)
                }
                PacketStatus::LargeDelta(ticks) => {
                    let t = prev_arrival + TimeDelta::from_micros(*ticks as i64 * DELTA_SCALE_FACTOR_US);
                    prev_arrival = t;
                    Some(t)
                }
            };

            match self.sent.remove(&seq) {
                Some(sent) => {
                    if arrival_time.is_some() {
                        self.outstanding_data_bytes -= sent.size.bytes() as i64;
                    }
                    results.push(PacketResult {
                        sent,
                        receive_time: arrival_time,
                    });
                }
                None => {
                    errors.record_stale_state();
                }
            }
        }

        results.sort_by_key(|r| r.sent.sequence_number);
        self.evict_stale(now);

        TransportPacketsFeedback {
            feedback_time: now,
            packet_results: results,
        }
    }

    pub fn in_flight_count(&self) -> usize {
        self.sent.len()
    }
}

impl Default for TransportFeedbackAdapter {
    fn default() -> Self {
        Self::new()
    }
}
