//! Bitrate probing: issues short bursts above the current send rate to
//! discover headroom faster than the delay/loss estimators would converge
//! on their own, and measures what those bursts actually achieved.
//!
//! No direct teacher precedent — `congestion.rs`'s `BiscayState` machine is
//! the structural precedent for an explicit state enum driving a per-link
//! controller; this module follows the same shape (states, typed events in,
//! typed clusters out) per spec §4.6.

use crate::clock::{DataRate, TimeDelta, Timestamp};
use crate::config::BweConfig;
use std::collections::VecDeque;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeState {
    Init,
    WaitingForProbingResult,
    ProbingComplete,
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProbeCluster {
    pub id: u32,
    pub target_rate: DataRate,
    pub min_probe_duration: TimeDelta,
    pub min_packets: u32,
}

impl ProbeCluster {
    /// Byte budget for the cluster: `target_rate * min_probe_duration`.
    pub fn byte_budget(&self) -> crate::clock::DataSize {
        self.target_rate * self.min_probe_duration
    }
}

pub struct ProbeController {
    state: ProbeState,
    next_cluster_id: u32,
    last_probe_target: Option<DataRate>,
    min_bitrate: DataRate,
    max_bitrate: DataRate,
    start_bitrate: DataRate,
    min_probe_duration: TimeDelta,
    min_packets: u32,
    initial_multiplier_1: f64,
    initial_multiplier_2: f64,
    further_rate_threshold: f64,
    further_multiplier: f64,
    pending: VecDeque<ProbeCluster>,
    ran_initial_probes: bool,
}

impl ProbeController {
    pub fn new(cfg: &BweConfig) -> Self {
        ProbeController {
            state: ProbeState::Init,
            next_cluster_id: 0,
            last_probe_target: None,
            min_bitrate: cfg.min_bitrate,
            max_bitrate: cfg.max_bitrate,
            start_bitrate: cfg.start_bitrate,
            min_probe_duration: TimeDelta::from_millis(cfg.probe_min_duration_ms),
            min_packets: cfg.probe_min_packets,
            initial_multiplier_1: cfg.probe_initial_multiplier_1,
            initial_multiplier_2: cfg.probe_initial_multiplier_2,
            further_rate_threshold: cfg.probe_further_rate_threshold,
            further_multiplier: cfg.probe_further_multiplier,
            pending: VecDeque::new(),
            ran_initial_probes: false,
        }
    }

    pub fn state(&self) -> ProbeState {
        self.state
    }

    fn next_cluster(&mut self, target_rate: DataRate) -> ProbeCluster {
        let id = self.next_cluster_id;
        self.next_cluster_id = self.next_cluster_id.wrapping_add(1);
        let target_rate = target_rate.clamp(self.min_bitrate, self.max_bitrate);
        self.last_probe_target = Some(target_rate);
        ProbeCluster {
            id,
            target_rate,
            min_probe_duration: self.min_probe_duration,
            min_packets: self.min_packets,
        }
    }

    /// Called once at startup: issues the initial probe pair at 3x/6x the
    /// starting bitrate, capped by `max_bitrate`.
    pub fn initial_probes(&mut self) -> Vec<ProbeCluster> {
        if self.ran_initial_probes {
            return Vec::new();
        }
        self.ran_initial_probes = true;
        self.state = ProbeState::WaitingForProbingResult;
        let first = self.next_cluster(self.start_bitrate * self.initial_multiplier_1);
        let second = self.next_cluster(self.start_bitrate * self.initial_multiplier_2);
        vec![first, second]
    }

    /// Called whenever the controller's target rate changes. Schedules a
    /// further probe when the new rate exceeds `further_rate_threshold`
    /// times the last probe target and we're not application-limited.
    pub fn on_target_updated(&mut self, new_rate: DataRate, in_alr: bool) -> Option<ProbeCluster> {
        if in_alr {
            return None;
        }
        let should_probe = match self.last_probe_target {
            None => false,
            Some(last) => new_rate.bps() as f64 > last.bps() as f64 * self.further_rate_threshold,
        };
        if !should_probe {
            return None;
        }
        self.state = ProbeState::WaitingForProbingResult;
        Some(self.next_cluster(new_rate * self.further_multiplier))
    }

    /// Called on ALR entry: requests a rampup probe at the current target.
    pub fn on_alr_started(&mut self, current_rate: DataRate) -> ProbeCluster {
        self.state = ProbeState::WaitingForProbingResult;
        self.next_cluster(current_rate * self.further_multiplier)
    }

    /// Called when the controller attributes a sudden rate drop to
    /// congestion rather than a probe's own overshoot — requests a
    /// re-probe at the pre-drop rate once the link has had a chance to
    /// recover.
    pub fn on_congestion_attributed_drop(&mut self, pre_drop_rate: DataRate) -> ProbeCluster {
        self.state = ProbeState::WaitingForProbingResult;
        self.next_cluster(pre_drop_rate)
    }

    /// Marks the named cluster's probing complete; transitions out of
    /// `WaitingForProbingResult` once there's nothing else pending.
    pub fn on_cluster_finished(&mut self, _cluster_id: u32) {
        if self.pending.is_empty() {
            self.state = ProbeState::ProbingComplete;
        }
    }

    pub fn stop(&mut self) {
        self.state = ProbeState::Done;
        self.pending.clear();
    }
}

/// Accumulates packet-level feedback for one in-flight probe cluster and
/// reports the achieved send rate once enough packets have been observed.
pub struct ProbeBitrateEstimator {
    cluster_id: u32,
    min_packets: u32,
    first_send_time: Option<Timestamp>,
    last_send_time: Option<Timestamp>,
    first_receive_time: Option<Timestamp>,
    last_receive_time: Option<Timestamp>,
    total_bytes: u64,
    packet_count: u32,
}

impl ProbeBitrateEstimator {
    pub fn new(cluster_id: u32, min_packets: u32) -> Self {
        ProbeBitrateEstimator {
            cluster_id,
            min_packets,
            first_send_time: None,
            last_send_time: None,
            first_receive_time: None,
            last_receive_time: None,
            total_bytes: 0,
            packet_count: 0,
        }
    }

    pub fn cluster_id(&self) -> u32 {
        self.cluster_id
    }

    /// Feed one packet belonging to this cluster that received an
    /// acknowledgment. Packets that were lost don't contribute.
    pub fn on_packet_feedback(
        &mut self,
        send_time: Timestamp,
        receive_time: Timestamp,
        size_bytes: u32,
    ) {
        self.first_send_time = Some(self.first_send_time.map_or(send_time, |t| t.min(send_time)));
        self.last_send_time = Some(self.last_send_time.map_or(send_time, |t| t.max(send_time)));
        self.first_receive_time =
            Some(self.first_receive_time.map_or(receive_time, |t| t.min(receive_time)));
        self.last_receive_time =
            Some(self.last_receive_time.map_or(receive_time, |t| t.max(receive_time)));
        self.total_bytes += size_bytes as u64;
        self.packet_count += 1;
    }

    /// Computes the achieved rate once `min_packets` have been observed,
    /// using the wider of the send-side and receive-side spans (the
    /// narrower span would over-estimate the rate if either side bursts).
    pub fn estimate(&self) -> Option<DataRate> {
        if self.packet_count < self.min_packets {
            return None;
        }
        let send_span = match (self.first_send_time, self.last_send_time) {
            (Some(a), Some(b)) => b - a,
            _ => return None,
        };
        let receive_span = match (self.first_receive_time, self.last_receive_time) {
            (Some(a), Some(b)) => b - a,
            _ => return None,
        };
        let span = send_span.max(receive_span);
        if span <= TimeDelta::zero() {
            return None;
        }
        let bps = (self.total_bytes as f64 * 8.0) / span.seconds_f64();
        Some(DataRate::from_bps(bps as u64))
    }
}
