//! # Receive-side pipeline
//!
//! Pure logic — no I/O, no fragment reassembly or RTP depacketization
//! (both are external-collaborator concerns per spec.md §1's non-goals).
//! What's left of the teacher's `Receiver` after that: decode wire packets,
//! unwrap sequence numbers, and drive the two things a receiver owes a
//! sender — transport-wide feedback and NACKs.
//!
//! ## Responsibilities
//!
//! 1. **Deserialization**: decode wire packets, classify data vs control
//! 2. **Sequence unwrapping**: 16-bit wire seq → monotonic 64-bit space
//! 3. **Feedback generation**: feed arrivals to `TransportFeedbackGenerator`
//! 4. **Loss tracking**: feed gaps to `NackModule`, emit NACKs on its tick

use bytes::{Buf, Bytes};

use crate::clock::Timestamp;
use crate::error::ErrorCounters;
use crate::feedback::TransportFeedbackGenerator;
use crate::nack::NackModule;
use crate::stats::ReceiverStats;
use crate::unwrap::SeqUnwrapper;
use crate::wire::{NackPacket, NackRange, Packet, PacketType, TransportFeedback, VarInt};

// ─── Configuration ──────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ReceiverConfig {
    pub nack_max_retries: u32,
    pub nack_max_list_size: usize,
    pub nack_reorder_quantile_packets: u32,
    pub feedback_interval: crate::clock::TimeDelta,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        ReceiverConfig {
            nack_max_retries: 10,
            nack_max_list_size: 1000,
            nack_reorder_quantile_packets: 1,
            feedback_interval: crate::clock::TimeDelta::from_millis(100),
        }
    }
}

// ─── Delivered Packet ───────────────────────────────────────────────────────

/// A data packet handed up to the application layer, unreassembled.
#[derive(Debug, Clone)]
pub struct DeliveredPacket {
    pub sequence: u64,
    pub timestamp_us: u32,
    pub payload: Bytes,
    pub is_keyframe: bool,
}

// ─── Receiver Events ────────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ReceiverEvent {
    SendNack(NackPacket),
    SendFeedback(TransportFeedback),
    Deliver(DeliveredPacket),
    RequestKeyframe,
}

// ─── Receiver ───────────────────────────────────────────────────────────────

pub struct Receiver {
    seq_unwrapper: SeqUnwrapper,
    nack: NackModule,
    feedback_gen: TransportFeedbackGenerator,
    errors: ErrorCounters,
    stats: ReceiverStats,
    events: Vec<ReceiverEvent>,
    last_feedback_at: Option<Timestamp>,
    feedback_interval: crate::clock::TimeDelta,
    last_unwrapped_seq: Option<u64>,
}

impl Receiver {
    pub fn new(config: ReceiverConfig, sender_ssrc: u32, media_ssrc: u32) -> Self {
        Receiver {
            seq_unwrapper: SeqUnwrapper::new(),
            nack: NackModule::new(
                config.nack_max_retries,
                config.nack_max_list_size,
                config.nack_reorder_quantile_packets,
            ),
            feedback_gen: TransportFeedbackGenerator::new(sender_ssrc, media_ssrc),
            errors: ErrorCounters::new(),
            stats: ReceiverStats::new(),
            events: Vec::new(),
            last_feedback_at: None,
            feedback_interval: config.feedback_interval,
            last_unwrapped_seq: None,
        }
    }

    /// Process a raw wire-format packet from the network.
    pub fn receive(&mut self, raw: Bytes, arrival_time: Timestamp) {
        let mut buf = raw;
        let pkt = match Packet::decode(&mut buf) {
            Some(p) => p,
            None => {
                self.errors.record_malformed_input();
                return;
            }
        };

        match pkt.header.packet_type {
            PacketType::Data => self.handle_data_packet(pkt, arrival_time),
            PacketType::Control => { /* control packets (PING/PONG/session) are handled by the caller's RTT tracker, not here */
            }
        }
    }

    fn handle_data_packet(&mut self, pkt: Packet, arrival_time: Timestamp) {
        let wire_seq = (pkt.header.sequence.value() & 0xffff) as u16;
        let seq = self.seq_unwrapper.unwrap_next(wire_seq);

        self.stats.packets_received += 1;
        self.stats.bytes_received += pkt.payload.len() as u64;

        if let Some(last) = self.last_unwrapped_seq {
            if seq <= last && self.nack.is_tracking(seq) {
                self.stats.late_packets += 1;
            } else if seq < last {
                self.stats.duplicates += 1;
            }
        }
        self.last_unwrapped_seq = Some(self.last_unwrapped_seq.map_or(seq, |l| l.max(seq)));

        if pkt.header.is_keyframe {
            self.nack.on_keyframe_received(seq);
        }
        if self.nack.on_received(seq, arrival_time, &mut self.errors).is_some() {
            self.nack.mark_recovered(seq);
        }
        if self.nack.poll_keyframe_request().is_some() {
            self.events.push(ReceiverEvent::RequestKeyframe);
        }
        self.feedback_gen.on_received_packet(seq, arrival_time);

        self.stats.packets_delivered += 1;
        self.stats.highest_delivered_seq = self.stats.highest_delivered_seq.max(seq);
        self.events.push(ReceiverEvent::Deliver(DeliveredPacket {
            sequence: seq,
            timestamp_us: pkt.header.timestamp_us,
            payload: pkt.payload,
            is_keyframe: pkt.header.is_keyframe,
        }));
    }

    /// Drive the NACK module's retry tick. Call periodically (§4.8: every
    /// 20ms by default).
    pub fn tick_nacks(&mut self, now: Timestamp, rtt: crate::clock::TimeDelta) {
        let to_nack = self.nack.tick(now, rtt);
        if to_nack.is_empty() {
            return;
        }
        let mut seqs = to_nack;
        seqs.sort_unstable();
        let ranges = coalesce_ranges(&seqs);
        self.stats.nacks_sent += ranges.len() as u64;
        self.events.push(ReceiverEvent::SendNack(NackPacket { ranges }));
    }

    /// Build a transport-wide feedback packet if the configured interval
    /// has elapsed since the last one.
    pub fn tick_feedback(&mut self, now: Timestamp) {
        let due = match self.last_feedback_at {
            None => true,
            Some(last) => now - last >= self.feedback_interval,
        };
        if !due {
            return;
        }
        if let Some(fb) = self.feedback_gen.build_feedback(now) {
            self.last_feedback_at = Some(now);
            self.events.push(ReceiverEvent::SendFeedback(fb));
        }
    }

    pub fn drain_events(&mut self) -> impl Iterator<Item = ReceiverEvent> + '_ {
        self.events.drain(..)
    }

    pub fn pending_events(&self) -> usize {
        self.events.len()
    }

    pub fn stats(&self) -> &ReceiverStats {
        &self.stats
    }

    pub fn errors(&self) -> &ErrorCounters {
        &self.errors
    }
}

fn coalesce_ranges(seqs: &[u64]) -> Vec<NackRange> {
    if seqs.is_empty() {
        return Vec::new();
    }
    let mut ranges = Vec::new();
    let mut start = seqs[0];
    let mut count = 1u64;
    for &seq in &seqs[1..] {
        if seq == start + count {
            count += 1;
        } else {
            ranges.push(NackRange {
                start: VarInt::from_u64(start),
                count: VarInt::from_u64(count),
            });
            start = seq;
            count = 1;
        }
    }
    ranges.push(NackRange {
        start: VarInt::from_u64(start),
        count: VarInt::from_u64(count),
    });
    ranges
}
