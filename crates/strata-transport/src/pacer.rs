//! Leaky-bucket pacer: smooths egress to a target rate with per-SSRC
//! round-robin fairness, a probe lane, and congestion-window pushback.
//!
//! `IntervalBudget`'s leaky-bucket math is grounded on `original_source/
//! modules/pacing/interval_budget.{h,cc}` (the 500 ms window, the
//! `can_build_up_underuse` branch). The per-SSRC/priority queue shape is
//! grounded on the teacher's `pool.rs::Priority`/`PacketPool`, generalized
//! from a single slab into one FIFO per `(priority, ssrc)`.

use crate::clock::{DataRate, DataSize, TimeDelta, Timestamp};
use crate::config::BweConfig;
use crate::pool::Priority;
use std::collections::{BTreeMap, VecDeque};

const BUDGET_WINDOW: TimeDelta = TimeDelta::from_micros(500_000);

/// A leaky-bucket budget: accrues bytes over time up to a 500 ms cap,
/// drains as packets are sent. Matches `webrtc::IntervalBudget` exactly.
pub struct IntervalBudget {
    target_rate: DataRate,
    max_bytes: i64,
    bytes_remaining: i64,
    can_build_up_underuse: bool,
}

impl IntervalBudget {
    pub fn new(target_rate: DataRate, can_build_up_underuse: bool) -> Self {
        let mut b = IntervalBudget {
            target_rate: DataRate::zero(),
            max_bytes: 0,
            bytes_remaining: 0,
            can_build_up_underuse,
        };
        b.set_target_rate(target_rate);
        b
    }

    pub fn set_target_rate(&mut self, target_rate: DataRate) {
        self.target_rate = target_rate;
        self.max_bytes = (target_rate * BUDGET_WINDOW).bytes() as i64;
        self.bytes_remaining = self.bytes_remaining.clamp(-self.max_bytes, self.max_bytes);
    }

    pub fn increase_budget(&mut self, elapsed: TimeDelta) {
        let accrued = (self.target_rate * elapsed).bytes() as i64;
        if self.bytes_remaining < 0 || self.can_build_up_underuse {
            self.bytes_remaining = (self.bytes_remaining + accrued).min(self.max_bytes);
        } else {
            self.bytes_remaining = accrued.min(self.max_bytes);
        }
    }

    pub fn use_budget(&mut self, bytes: DataSize) {
        self.bytes_remaining = (self.bytes_remaining - bytes.bytes() as i64).max(-self.max_bytes);
    }

    pub fn bytes_remaining(&self) -> DataSize {
        DataSize::from_bytes(self.bytes_remaining.max(0) as u64)
    }

    pub fn budget_level_percent(&self) -> i32 {
        if self.max_bytes == 0 {
            return 0;
        }
        ((self.bytes_remaining * 100) / self.max_bytes) as i32
    }

    pub fn target_rate(&self) -> DataRate {
        self.target_rate
    }
}

#[derive(Debug, Clone)]
pub struct QueuedPacket {
    pub ssrc: u32,
    pub rtp_seq: u16,
    pub size: DataSize,
    pub is_retransmission: bool,
    pub probe_cluster_id: Option<u32>,
    pub enqueued_at: Timestamp,
}

struct ProbeLane {
    cluster_id: u32,
    budget: IntervalBudget,
    min_packets: u32,
    packets_sent: u32,
}

/// Leaky-bucket pacer. Owns per-`(priority, ssrc)` FIFO queues, a media and
/// a padding budget, and a single active probe lane.
pub struct Pacer {
    queues: BTreeMap<Priority, BTreeMap<u32, VecDeque<QueuedPacket>>>,
    ssrc_order: BTreeMap<Priority, VecDeque<u32>>,
    media_budget: IntervalBudget,
    padding_budget: IntervalBudget,
    congestion_window: Option<DataSize>,
    outstanding_data: DataSize,
    active_probe: Option<ProbeLane>,
    last_process: Option<Timestamp>,
    min_process_interval: TimeDelta,
}

impl Pacer {
    pub fn new(cfg: &BweConfig) -> Self {
        Pacer {
            queues: BTreeMap::new(),
            ssrc_order: BTreeMap::new(),
            media_budget: IntervalBudget::new(cfg.start_bitrate, cfg.pacer_can_build_up_underuse),
            padding_budget: IntervalBudget::new(DataRate::zero(), cfg.pacer_can_build_up_underuse),
            congestion_window: None,
            outstanding_data: DataSize::zero(),
            active_probe: None,
            last_process: None,
            min_process_interval: TimeDelta::from_millis(1),
        }
    }

    pub fn enqueue(&mut self, packet: QueuedPacket, priority: Priority) {
        let per_priority = self.queues.entry(priority).or_default();
        let order = self.ssrc_order.entry(priority).or_default();
        if !per_priority.contains_key(&packet.ssrc) {
            order.push_back(packet.ssrc);
        }
        per_priority.entry(packet.ssrc).or_default().push_back(packet);
    }

    /// `media_rate` is typically `2.5 x target_rate` (see
    /// `controller.rs::GoogCcController`); `padding_rate` bounds the
    /// padding budget separately.
    pub fn set_pacing_rates(&mut self, media_rate: DataRate, padding_rate: DataRate) {
        self.media_budget.set_target_rate(media_rate);
        self.padding_budget.set_target_rate(padding_rate);
    }

    pub fn set_congestion_window(&mut self, bytes: Option<DataSize>) {
        self.congestion_window = bytes;
    }

    pub fn update_outstanding_data(&mut self, bytes: DataSize) {
        self.outstanding_data = bytes;
    }

    pub fn create_probe_cluster(&mut self, target_rate: DataRate, id: u32, min_packets: u32) {
        self.active_probe = Some(ProbeLane {
            cluster_id: id,
            budget: IntervalBudget::new(target_rate, true),
            min_packets,
            packets_sent: 0,
        });
    }

    /// True when in-flight bytes have reached the congestion window —
    /// only probe/keepalive traffic may still be sent.
    fn congestion_window_full(&self) -> bool {
        match self.congestion_window {
            Some(window) => self.outstanding_data >= window,
            None => false,
        }
    }

    /// Drains queued packets according to §4.1's draining order: probe
    /// lane first, then priority + round-robin + FIFO, then padding.
    /// Returns the packets to actually send this tick. Never blocks: the
    /// caller re-enqueues anything the transport fails to send via
    /// [`Pacer::requeue_front`].
    pub fn process(&mut self, now: Timestamp) -> Vec<QueuedPacket> {
        let elapsed = match self.last_process {
            Some(last) => (now - last).max(self.min_process_interval),
            None => self.min_process_interval,
        };
        self.last_process = Some(now);

        self.media_budget.increase_budget(elapsed);
        self.padding_budget.increase_budget(elapsed);
        if let Some(probe) = &mut self.active_probe {
            probe.budget.increase_budget(elapsed);
        }

        let mut sent = Vec::new();

        if let Some(probe) = &mut self.active_probe {
            while probe.budget.bytes_remaining() > DataSize::zero() {
                let Some(packet) = self.pop_next() else {
                    break;
                };
                probe.budget.use_budget(packet.size);
                probe.packets_sent += 1;
                let mut packet = packet;
                packet.probe_cluster_id = Some(probe.cluster_id);
                sent.push(packet);
            }
            if probe.packets_sent >= probe.min_packets
                && probe.budget.bytes_remaining() == DataSize::zero()
            {
                self.active_probe = None;
            }
            return sent;
        }

        if self.congestion_window_full() {
            return sent;
        }

        while self.media_budget.bytes_remaining() > DataSize::zero() {
            let Some(packet) = self.pop_next() else {
                break;
            };
            self.media_budget.use_budget(packet.size);
            sent.push(packet);
        }

        sent
    }

    /// Re-queue a packet at the head of its SSRC's FIFO after a failed
    /// send, per §4.1's "never blocks" failure semantics.
    pub fn requeue_front(&mut self, packet: QueuedPacket, priority: Priority) {
        let per_priority = self.queues.entry(priority).or_default();
        let order = self.ssrc_order.entry(priority).or_default();
        if !per_priority.contains_key(&packet.ssrc) {
            order.push_front(packet.ssrc);
        }
        per_priority.entry(packet.ssrc).or_default().push_front(packet);
    }

    fn pop_next(&mut self) -> Option<QueuedPacket> {
        let priorities: Vec<Priority> = self.queues.keys().rev().copied().collect();
        for priority in priorities {
            let per_priority = self.queues.get_mut(&priority).unwrap();
            let ssrc_order = self.ssrc_order.get_mut(&priority).unwrap();
            let n = ssrc_order.len();
            for _ in 0..n {
                let Some(ssrc) = ssrc_order.pop_front() else {
                    break;
                };
                if let Some(queue) = per_priority.get_mut(&ssrc) {
                    if let Some(packet) = queue.pop_front() {
                        if queue.is_empty() {
                            per_priority.remove(&ssrc);
                        } else {
                            ssrc_order.push_back(ssrc);
                        }
                        return Some(packet);
                    }
                }
            }
        }
        None
    }

    pub fn pending_count(&self) -> usize {
        self.queues
            .values()
            .flat_map(|per_ssrc| per_ssrc.values())
            .map(VecDeque::len)
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn packet(ssrc: u32, seq: u16, bytes: u64) -> QueuedPacket {
        QueuedPacket {
            ssrc,
            rtp_seq: seq,
            size: DataSize::from_bytes(bytes),
            is_retransmission: false,
            probe_cluster_id: None,
            enqueued_at: Timestamp::from_millis(0),
        }
    }

    #[test]
    fn budget_accrues_and_drains() {
        let mut b = IntervalBudget::new(DataRate::from_kbps(800), false);
        b.increase_budget(TimeDelta::from_millis(10));
        assert!(b.bytes_remaining() > DataSize::zero());
        let remaining = b.bytes_remaining();
        b.use_budget(remaining);
        assert_eq!(b.bytes_remaining(), DataSize::zero());
    }

    #[test]
    fn underuse_is_cleared_without_build_up_flag() {
        let mut b = IntervalBudget::new(DataRate::from_kbps(800), false);
        b.increase_budget(TimeDelta::from_millis(100));
        let after_first = b.bytes_remaining();
        b.increase_budget(TimeDelta::from_millis(100));
        // Without build-up, the second interval doesn't add to unused budget.
        assert_eq!(b.bytes_remaining(), after_first);
    }

    #[test]
    fn build_up_underuse_accumulates_up_to_the_cap() {
        let mut b = IntervalBudget::new(DataRate::from_kbps(800), true);
        b.increase_budget(TimeDelta::from_millis(100));
        let after_first = b.bytes_remaining();
        b.increase_budget(TimeDelta::from_millis(100));
        assert!(b.bytes_remaining() > after_first);
    }

    #[test]
    fn round_robin_serves_ssrcs_in_turn() {
        let cfg = BweConfig::default();
        let mut pacer = Pacer::new(&cfg);
        pacer.set_pacing_rates(DataRate::from_kbps(8_000), DataRate::zero());
        pacer.enqueue(packet(1, 0, 100), Priority::Standard);
        pacer.enqueue(packet(2, 0, 100), Priority::Standard);
        pacer.enqueue(packet(1, 1, 100), Priority::Standard);
        let sent = pacer.process(Timestamp::from_millis(5));
        let ssrcs: Vec<u32> = sent.iter().map(|p| p.ssrc).collect();
        assert_eq!(ssrcs.first(), Some(&1));
        assert_eq!(ssrcs.get(1), Some(&2));
    }

    #[test]
    fn congestion_window_full_blocks_media() {
        let cfg = BweConfig::default();
        let mut pacer = Pacer::new(&cfg);
        pacer.set_pacing_rates(DataRate::from_kbps(8_000), DataRate::zero());
        pacer.set_congestion_window(Some(DataSize::from_bytes(1_000)));
        pacer.update_outstanding_data(DataSize::from_bytes(2_000));
        pacer.enqueue(packet(1, 0, 100), Priority::Standard);
        let sent = pacer.process(Timestamp::from_millis(5));
        assert!(sent.is_empty());
    }

    #[test]
    fn probe_cluster_is_served_before_media() {
        let cfg = BweConfig::default();
        let mut pacer = Pacer::new(&cfg);
        pacer.set_pacing_rates(DataRate::from_kbps(800), DataRate::zero());
        pacer.create_probe_cluster(DataRate::from_kbps(2_000), 7, 1);
        pacer.enqueue(packet(1, 0, 100), Priority::Standard);
        let sent = pacer.process(Timestamp::from_millis(15));
        assert_eq!(sent[0].probe_cluster_id, Some(7));
    }
}
