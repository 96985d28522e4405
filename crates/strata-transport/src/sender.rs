//! # Send-side pipeline
//!
//! Pure logic — no I/O, no sockets, no timers (the caller drives ticks).
//! Accepts already MTU-sized application payloads (packetisation and RTP
//! framing are an external collaborator's job per spec.md §1's non-goal),
//! assigns sequence numbers, queues them through the [`crate::pacer::Pacer`],
//! and retains the wire bytes long enough to answer a NACK or feed
//! [`crate::feedback::TransportFeedbackAdapter`].
//!
//! ## Responsibilities
//!
//! 1. **Packetisation**: assign sequence numbers and timestamps
//! 2. **Pacing**: hand `QueuedPacket` metadata to `Pacer`, resolve its
//!    decisions back into wire bytes to actually send
//! 3. **Retained-packet store**: keep sent payloads until acknowledged via
//!    feedback, expired by TTL, or requested by a NACK
//! 4. **Feedback processing**: feed `TransportFeedbackAdapter`, surface
//!    `PacketResult`s for the congestion controller
//! 5. **NACK processing**: re-enqueue the stored bytes for sequences a NACK
//!    names, bounded by retry count

use bytes::Bytes;
use std::collections::BTreeMap;

use crate::clock::{DataSize, TimeDelta, Timestamp};
use crate::error::ErrorCounters;
use crate::feedback::{SentPacket, TransportFeedbackAdapter, TransportPacketsFeedback};
use crate::pacer::{Pacer, QueuedPacket};
use crate::pool::{Priority, SequenceGenerator};
use crate::stats::SenderStats;
use crate::wire::{NackPacket, Packet, PacketHeader};

// ─── Configuration ──────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct SenderConfig {
    /// How long a sent packet's bytes are retained for possible retransmit.
    pub packet_ttl: TimeDelta,
    /// Maximum retransmit attempts per packet before it's given up on.
    pub max_retries: u8,
}

impl Default for SenderConfig {
    fn default() -> Self {
        SenderConfig {
            packet_ttl: TimeDelta::from_millis(5_000),
            max_retries: 5,
        }
    }
}

// ─── Output Packet ──────────────────────────────────────────────────────────

/// A packet the pacer has released; ready for the network.
#[derive(Debug, Clone)]
pub struct OutputPacket {
    pub data: Bytes,
    pub priority: Priority,
    pub sequence: u64,
    pub is_retransmit: bool,
}

struct RetainedPacket {
    wire_bytes: Bytes,
    priority: Priority,
    size: DataSize,
    sent_at: Timestamp,
    retries: u8,
}

// ─── Sender ─────────────────────────────────────────────────────────────────

pub struct Sender {
    config: SenderConfig,
    seq_gen: SequenceGenerator,
    ssrc: u32,
    pacer: Pacer,
    adapter: TransportFeedbackAdapter,
    retained: BTreeMap<u64, RetainedPacket>,
    stats: SenderStats,
}

impl Sender {
    pub fn new(config: SenderConfig, ssrc: u32, bwe_cfg: &crate::config::BweConfig) -> Self {
        Sender {
            config,
            seq_gen: SequenceGenerator::new(),
            ssrc,
            pacer: Pacer::new(bwe_cfg),
            adapter: TransportFeedbackAdapter::new(),
            retained: BTreeMap::new(),
            stats: SenderStats::new(),
        }
    }

    /// Submit one already-sized application payload. Assigns a sequence
    /// number, builds the wire packet, and hands it to the pacer — it will
    /// be released on a later [`Sender::poll_pacer`] call.
    pub fn send(&mut self, payload: Bytes, priority: Priority, now: Timestamp) -> u64 {
        let seq = self.seq_gen.next();
        let ts_us = now.micros() as u32;
        let mut header = PacketHeader::data(seq, ts_us, payload.len() as u16);
        if priority >= Priority::Reference {
            header = header.with_keyframe();
        }
        if priority >= Priority::Critical {
            header = header.with_config();
        }
        let pkt = Packet { header, payload };
        let wire_bytes = pkt.encode().freeze();
        let size = DataSize::from_bytes(wire_bytes.len() as u64);

        self.retained.insert(
            seq,
            RetainedPacket {
                wire_bytes: wire_bytes.clone(),
                priority,
                size,
                sent_at: now,
                retries: 0,
            },
        );

        self.pacer.enqueue(
            QueuedPacket {
                ssrc: self.ssrc,
                rtp_seq: (seq & 0xffff) as u16,
                size,
                is_retransmission: false,
                probe_cluster_id: None,
                enqueued_at: now,
            },
            priority,
        );

        seq
    }

    /// Drive the pacer's leaky bucket and turn its decisions into
    /// `OutputPacket`s the caller actually puts on the wire. Call on every
    /// pacer tick (§5: 25 ms by default).
    pub fn poll_pacer(&mut self, now: Timestamp) -> Vec<OutputPacket> {
        let released = self.pacer.process(now);
        let mut out = Vec::with_capacity(released.len());
        for queued in released {
            let seq = self.resolve_full_sequence(queued.rtp_seq);
            let Some(retained) = self.retained.get(&seq) else {
                continue;
            };
            self.stats.packets_sent += 1;
            if !queued.is_retransmission {
                self.stats.bytes_sent += retained.size.bytes();
            } else {
                self.stats.retransmissions += 1;
            }
            self.adapter.add_packet(SentPacket {
                sequence_number: seq,
                send_time: now,
                size: retained.size,
                probe_cluster_id: queued.probe_cluster_id,
            });
            out.push(OutputPacket {
                data: retained.wire_bytes.clone(),
                priority: retained.priority,
                sequence: seq,
                is_retransmit: queued.is_retransmission,
            });
        }
        out
    }

    /// Set the pacer's media/padding rates, typically following
    /// `controller.rs::GoogCcController`'s arbitrated target.
    pub fn set_pacing_rates(
        &mut self,
        media_rate: crate::clock::DataRate,
        padding_rate: crate::clock::DataRate,
    ) {
        self.pacer.set_pacing_rates(media_rate, padding_rate);
    }

    pub fn set_congestion_window(&mut self, bytes: Option<DataSize>) {
        self.pacer.set_congestion_window(bytes);
        self.pacer
            .update_outstanding_data(self.adapter.outstanding_data());
    }

    /// Process a NACK: re-enqueue the requested sequences as retransmissions,
    /// bounded by `max_retries`. Missing/expired sequences are silently
    /// skipped — the receiver's own retry-limit in `NackModule` is the
    /// primary backstop, this is a second line of defense against retrying
    /// packets this sender no longer has.
    pub fn process_nack(&mut self, nack: &NackPacket, now: Timestamp) -> usize {
        let mut requeued = 0;
        for range in &nack.ranges {
            let start = range.start.value();
            let count = range.count.value();
            for seq in start..(start + count) {
                let Some(retained) = self.retained.get_mut(&seq) else {
                    continue;
                };
                if retained.retries >= self.config.max_retries {
                    continue;
                }
                retained.retries += 1;
                self.pacer.enqueue(
                    QueuedPacket {
                        ssrc: self.ssrc,
                        rtp_seq: (seq & 0xffff) as u16,
                        size: retained.size,
                        is_retransmission: true,
                        probe_cluster_id: None,
                        enqueued_at: now,
                    },
                    retained.priority,
                );
                requeued += 1;
            }
        }
        requeued
    }

    /// Join incoming transport-wide feedback against the retained-packet
    /// store, update outstanding-data accounting, and drop acknowledged
    /// entries. Returns the joined results for the congestion controller.
    pub fn process_feedback(
        &mut self,
        fb: &crate::wire::TransportFeedback,
        base_seq_unwrapped: u64,
        now: Timestamp,
        errors: &mut ErrorCounters,
    ) -> TransportPacketsFeedback {
        let result = self
            .adapter
            .process_feedback(fb, base_seq_unwrapped, now, errors);
        for r in &result.packet_results {
            if r.receive_time.is_some() {
                self.retained.remove(&r.sent.sequence_number);
            }
        }
        self.pacer
            .update_outstanding_data(self.adapter.outstanding_data());
        result
    }

    /// Expire retained packets older than `packet_ttl`. Returns the count.
    pub fn expire_old_packets(&mut self, now: Timestamp) -> usize {
        let ttl = self.config.packet_ttl;
        let before = self.retained.len();
        self.retained.retain(|_, p| now - p.sent_at <= ttl);
        let expired = before - self.retained.len();
        self.stats.packets_expired += expired as u64;
        expired
    }

    pub fn create_probe_cluster(
        &mut self,
        target_rate: crate::clock::DataRate,
        id: u32,
        min_packets: u32,
    ) {
        self.pacer.create_probe_cluster(target_rate, id, min_packets);
    }

    pub fn pending_count(&self) -> usize {
        self.pacer.pending_count()
    }

    pub fn in_flight(&self) -> usize {
        self.retained.len()
    }

    pub fn outstanding_data(&self) -> DataSize {
        self.adapter.outstanding_data()
    }

    pub fn stats(&self) -> &SenderStats {
        &self.stats
    }

    pub fn next_sequence(&self) -> u64 {
        self.seq_gen.current()
    }

    /// The pacer only knows about 16-bit wire sequence numbers; resolve
    /// back to this sender's full unwrapped space. Since this sender is the
    /// origin of every sequence it tracks, the low 16 bits uniquely
    /// identify a retained entry as long as fewer than 2^16 packets are
    /// in flight at once, which `packet_ttl`/pacer backpressure guarantee.
    fn resolve_full_sequence(&self, rtp_seq: u16) -> u64 {
        self.retained
            .keys()
            .rev()
            .find(|&&seq| (seq & 0xffff) as u16 == rtp_seq)
            .copied()
            .unwrap_or(rtp_seq as u64)
    }
}
