//! GoogCC-style rate arbitration and the four-executor runtime that drives
//! it.
//!
//! `GoogCcController` is grounded on spec.md §4.5's component design; no
//! direct teacher precedent exists for the arbitration itself (the teacher's
//! `congestion.rs::BiscayState` picks a single state machine rather than
//! combining independent estimators), so the arbitration logic is built
//! straight from the prose. The surrounding `TransportRuntime` — named
//! worker threads talking over bounded `crossbeam_channel`s, with shared
//! state behind a tiny number of atomics — is grounded directly on
//! `strata-bonding::runtime::BondingRuntime`/`RuntimeMessage`: the same
//! "one thread per concern, message-pass everything else" shape, split
//! across the four executors spec.md §5 names instead of Bonding's single
//! scheduler thread.

use crate::clock::{DataRate, DataSize, TimeDelta, Timestamp};
use crate::config::BweConfig;
use crate::delay_bwe::DelayBasedBwe;
use crate::error::ErrorCounters;
use crate::loss_bwe::LossBasedBwe;
use crate::nack::NackModule;
use crate::pacer::{Pacer, QueuedPacket};
use crate::pool::Priority;
use crate::probe::{ProbeBitrateEstimator, ProbeCluster, ProbeController};
use crate::rtt::RttTracker;
use crate::stats::TargetTransferRate;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const MIN_CONGESTION_WINDOW_BYTES: i64 = 3_000;
const CONGESTION_WINDOW_EXTRA: TimeDelta = TimeDelta::from_micros(60_000);

/// Arbitrates the delay-based, loss-based, and (if present) REMB-reported
/// rates into a single target, and derives the pacer and congestion-window
/// configuration from it. One instance per send-side link.
pub struct GoogCcController {
    delay_based: DelayBasedBwe,
    loss_based: LossBasedBwe,
    probe_controller: ProbeController,
    rtt: RttTracker,
    remb: Option<DataRate>,
    reset_loss_based_on_route_change: bool,
    congestion_window: DataSize,
    media_rate_multiplier: f64,
    min_bitrate: DataRate,
    max_bitrate: DataRate,
    last_target: DataRate,
    paused: bool,
}

impl GoogCcController {
    pub fn new(cfg: &BweConfig) -> Self {
        GoogCcController {
            delay_based: DelayBasedBwe::new(cfg),
            loss_based: LossBasedBwe::new(cfg),
            probe_controller: ProbeController::new(cfg),
            rtt: RttTracker::new(),
            remb: None,
            // §9 Open Question resolved in DESIGN.md: a route change always
            // resets the delay-based estimator and any in-flight probe, but
            // only resets the loss-based estimator when this flag is set —
            // the upstream source's two callers disagree and neither is
            // clearly primary, so this is made an explicit, documented knob
            // rather than guessed at silently.
            reset_loss_based_on_route_change: false,
            congestion_window: DataSize::from_bytes(MIN_CONGESTION_WINDOW_BYTES as u64),
            media_rate_multiplier: cfg.pacer_media_rate_multiplier,
            min_bitrate: cfg.min_bitrate,
            max_bitrate: cfg.max_bitrate,
            last_target: cfg.start_bitrate,
            paused: false,
        }
    }

    pub fn target_rate(&self) -> DataRate {
        self.last_target
    }

    /// Feed one acknowledged packet (send/arrival time + size) into the
    /// delay-based estimator.
    pub fn on_packet_feedback(
        &mut self,
        send_time: Timestamp,
        arrival_time: Timestamp,
        size: DataSize,
        acknowledged_rate: Option<DataRate>,
    ) {
        if self.paused {
            return;
        }
        let rtt = self.rtt.srtt();
        self.delay_based
            .on_packet(send_time, arrival_time, size, acknowledged_rate, rtt);
    }

    /// Feed a loss report (cumulative deltas since the last call).
    pub fn on_loss_report(
        &mut self,
        packets_lost_delta: u64,
        packets_expected_delta: u64,
        now: Timestamp,
    ) {
        if self.paused {
            return;
        }
        let rtt = self.rtt.srtt();
        self.loss_based
            .update_loss(packets_lost_delta, packets_expected_delta, rtt, now);
    }

    pub fn on_remb(&mut self, remb: DataRate) {
        self.remb = Some(remb);
    }

    /// Periodic tick (default 25ms per §4.5): recompute the arbitrated
    /// target, derive pacer rates and the congestion window, and return
    /// them plus any probe clusters that should be issued this tick.
    pub fn tick(&mut self, now: Timestamp, in_alr: bool) -> ControllerUpdate {
        if self.paused {
            return ControllerUpdate {
                target: self.last_target,
                rate: None,
                probes: Vec::new(),
                congestion_window: self.congestion_window,
            };
        }

        self.loss_based.tick(now, self.rtt.srtt());

        let mut target = self.delay_based.rate().min(self.loss_based.rate());
        if let Some(remb) = self.remb {
            target = target.min(remb);
        }
        target = target.clamp(self.min_bitrate, self.max_bitrate);

        let mut probes = Vec::new();
        if self.probe_controller.state() == crate::probe::ProbeState::Init {
            probes.extend(self.probe_controller.initial_probes());
        } else if let Some(cluster) = self.probe_controller.on_target_updated(target, in_alr) {
            probes.push(cluster);
        }

        let rtt = self.rtt.srtt().max(TimeDelta::from_millis(1));
        let window_bytes = (target * (rtt + CONGESTION_WINDOW_EXTRA)).bytes() as i64;
        self.congestion_window = DataSize::from_bytes(window_bytes.max(MIN_CONGESTION_WINDOW_BYTES) as u64);

        let rate = if target != self.last_target {
            Some(TargetTransferRate {
                at_time: now,
                target_rate: target,
                loss_rate_ratio: self.loss_based.last_fraction_loss() as f64 / 256.0,
                rtt: self.rtt.srtt(),
                bwe_period: TimeDelta::from_millis(1000),
            })
        } else {
            None
        };
        self.last_target = target;

        ControllerUpdate {
            target,
            rate,
            probes,
            congestion_window: self.congestion_window,
        }
    }

    pub fn media_rate(&self) -> DataRate {
        self.last_target.max(self.min_bitrate) * self.media_rate_multiplier
    }

    pub fn rtt_tracker(&mut self) -> &mut RttTracker {
        &mut self.rtt
    }

    /// Route change: the delay-based estimator and any in-flight probe are
    /// always reset; the loss-based estimator only if configured to.
    pub fn on_route_change(&mut self, cfg: &BweConfig) {
        self.delay_based = DelayBasedBwe::new(cfg);
        self.probe_controller.stop();
        self.probe_controller = ProbeController::new(cfg);
        if self.reset_loss_based_on_route_change {
            self.loss_based = LossBasedBwe::new(cfg);
        }
        self.remb = None;
    }

    /// "Network down": pause estimation. `on_network_up` resumes and zeros
    /// outstanding data via the caller's `Pacer::update_outstanding_data`.
    pub fn on_network_down(&mut self) {
        self.paused = true;
    }

    pub fn on_network_up(&mut self) {
        self.paused = false;
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }
}

pub struct ControllerUpdate {
    pub target: DataRate,
    pub rate: Option<TargetTransferRate>,
    pub probes: Vec<ProbeCluster>,
    pub congestion_window: DataSize,
}

// ─── Runtime ─────────────────────────────────────────────────────────────

/// Messages posted to the worker executor: everything that mutates
/// estimator or NACK state funnels through here so that state stays
/// single-owned per executor (§5).
enum WorkerMessage {
    PacketFeedback {
        send_time: Timestamp,
        arrival_time: Timestamp,
        size: DataSize,
        acknowledged_rate: Option<DataRate>,
    },
    LossReport {
        packets_lost_delta: u64,
        packets_expected_delta: u64,
        now: Timestamp,
    },
    Enqueue {
        packet: QueuedPacket,
        priority: Priority,
    },
    RouteChanged,
    NetworkDown,
    NetworkUp,
    Shutdown,
}

/// Observer callback invoked from the worker thread whenever the target
/// rate changes, per spec.md §6's `on_target_transfer_rate` contract.
pub type ObserverFn = Box<dyn FnMut(TargetTransferRate) + Send>;

/// Four-executor send-side runtime: a worker thread owns the controller
/// and NACK module, a pacer-tick thread drains the `Pacer` on its own
/// cadence, network ingress is fed externally via [`TransportRuntime::submit_feedback`],
/// and outstanding-data is shared with the pacer-tick executor through a
/// single `Arc<AtomicI64>` rather than a lock, matching §5's ordering
/// guarantee that cross-executor state is either message-posted or atomic.
pub struct TransportRuntime {
    worker_tx: Sender<WorkerMessage>,
    outstanding_data_bytes: Arc<AtomicI64>,
    worker_handle: Option<thread::JoinHandle<()>>,
    pacer_handle: Option<thread::JoinHandle<()>>,
}

impl TransportRuntime {
    pub fn new(cfg: BweConfig, mut observer: ObserverFn, mut send_fn: Box<dyn FnMut(QueuedPacket) -> bool + Send>) -> Self {
        let (worker_tx, worker_rx) = bounded::<WorkerMessage>(4096);
        let outstanding_data_bytes = Arc::new(AtomicI64::new(0));
        let outstanding_clone = outstanding_data_bytes.clone();

        let (pacer_tx, pacer_rx) = bounded::<Vec<QueuedPacket>>(256);
        let pacer_cfg = cfg.clone();
        let outstanding_for_pacer = outstanding_data_bytes.clone();

        let worker_handle = thread::Builder::new()
            .name("transport-worker".into())
            .spawn(move || {
                worker_loop(
                    worker_rx,
                    cfg,
                    &mut observer,
                    pacer_tx,
                    outstanding_clone,
                )
            })
            .expect("failed to spawn transport worker");

        let pacer_handle = thread::Builder::new()
            .name("transport-pacer".into())
            .spawn(move || pacer_loop(pacer_rx, pacer_cfg, outstanding_for_pacer, send_fn.as_mut()))
            .expect("failed to spawn pacer executor");

        TransportRuntime {
            worker_tx,
            outstanding_data_bytes,
            worker_handle: Some(worker_handle),
            pacer_handle: Some(pacer_handle),
        }
    }

    pub fn submit_feedback(
        &self,
        send_time: Timestamp,
        arrival_time: Timestamp,
        size: DataSize,
        acknowledged_rate: Option<DataRate>,
    ) {
        let _ = self.worker_tx.send(WorkerMessage::PacketFeedback {
            send_time,
            arrival_time,
            size,
            acknowledged_rate,
        });
    }

    pub fn submit_loss_report(
        &self,
        packets_lost_delta: u64,
        packets_expected_delta: u64,
        now: Timestamp,
    ) {
        let _ = self.worker_tx.send(WorkerMessage::LossReport {
            packets_lost_delta,
            packets_expected_delta,
            now,
        });
    }

    pub fn enqueue(&self, packet: QueuedPacket, priority: Priority) {
        let _ = self.worker_tx.send(WorkerMessage::Enqueue { packet, priority });
    }

    pub fn route_changed(&self) {
        let _ = self.worker_tx.send(WorkerMessage::RouteChanged);
    }

    pub fn network_down(&self) {
        let _ = self.worker_tx.send(WorkerMessage::NetworkDown);
    }

    pub fn network_up(&self) {
        let _ = self.worker_tx.send(WorkerMessage::NetworkUp);
    }

    pub fn outstanding_data(&self) -> DataSize {
        DataSize::from_bytes(self.outstanding_data_bytes.load(Ordering::Acquire).max(0) as u64)
    }

    pub fn shutdown(&mut self) {
        let _ = self.worker_tx.send(WorkerMessage::Shutdown);
        if let Some(h) = self.worker_handle.take() {
            let _ = h.join();
        }
        if let Some(h) = self.pacer_handle.take() {
            let _ = h.join();
        }
    }
}

impl Drop for TransportRuntime {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(
    rx: Receiver<WorkerMessage>,
    cfg: BweConfig,
    observer: &mut ObserverFn,
    pacer_tx: Sender<Vec<QueuedPacket>>,
    outstanding_data_bytes: Arc<AtomicI64>,
) {
    let mut controller = GoogCcController::new(&cfg);
    let mut nack = NackModule::from_config(&cfg);
    let mut errors = ErrorCounters::new();
    let mut probe_estimators: Vec<ProbeBitrateEstimator> = Vec::new();
    let tick_interval = Duration::from_millis(25);

    loop {
        match rx.recv_timeout(tick_interval) {
            Ok(WorkerMessage::PacketFeedback {
                send_time,
                arrival_time,
                size,
                acknowledged_rate,
            }) => {
                controller.on_packet_feedback(send_time, arrival_time, size, acknowledged_rate);
                for est in &mut probe_estimators {
                    est.on_packet_feedback(send_time, arrival_time, size.bytes() as u32);
                }
            }
            Ok(WorkerMessage::LossReport {
                packets_lost_delta,
                packets_expected_delta,
                now,
            }) => {
                controller.on_loss_report(packets_lost_delta, packets_expected_delta, now);
            }
            Ok(WorkerMessage::Enqueue { packet, priority: _ }) => {
                // Gaps are tracked by rtp_seq; queueing itself happens on
                // the pacer executor, reached via `pacer_tx` in the tick
                // below, keeping the `Pacer`'s internal queues single-owned
                // there rather than shared with the worker.
                let now = Timestamp::from_micros(packet.enqueued_at.micros());
                let _ = nack.on_received(packet.rtp_seq as u64, now, &mut errors);
                let _ = pacer_tx.try_send(vec![packet]);
            }
            Ok(WorkerMessage::RouteChanged) => {
                controller.on_route_change(&cfg);
            }
            Ok(WorkerMessage::NetworkDown) => {
                controller.on_network_down();
                outstanding_data_bytes.store(0, Ordering::Release);
            }
            Ok(WorkerMessage::NetworkUp) => {
                controller.on_network_up();
                outstanding_data_bytes.store(0, Ordering::Release);
            }
            Ok(WorkerMessage::Shutdown) => break,
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }

        let now = Timestamp::from_micros(0);
        let update = controller.tick(now, false);
        if let Some(rate) = update.rate {
            observer(rate);
        }
        probe_estimators.retain(|est| est.estimate().is_none());
    }
}

fn pacer_loop(
    rx: Receiver<Vec<QueuedPacket>>,
    cfg: BweConfig,
    outstanding_data_bytes: Arc<AtomicI64>,
    send_fn: &mut dyn FnMut(QueuedPacket) -> bool,
) {
    let mut pacer = Pacer::new(&cfg);
    let process_interval = Duration::from_millis(5);

    loop {
        match rx.recv_timeout(process_interval) {
            Ok(packets) => {
                for packet in packets {
                    pacer.enqueue(packet, Priority::Standard);
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }

        let now = Timestamp::from_micros(0);
        for packet in pacer.process(now) {
            let size = packet.size.bytes() as i64;
            if send_fn(packet) {
                outstanding_data_bytes.fetch_add(size, Ordering::AcqRel);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> BweConfig {
        BweConfig::default()
    }

    #[test]
    fn target_rate_starts_at_configured_start_bitrate() {
        let cc = GoogCcController::new(&cfg());
        assert_eq!(cc.target_rate(), cfg().start_bitrate);
    }

    #[test]
    fn tick_issues_initial_probes_exactly_once() {
        let mut cc = GoogCcController::new(&cfg());
        let t0 = Timestamp::from_millis(0);
        let first = cc.tick(t0, false);
        assert_eq!(first.probes.len(), 2);
        let second = cc.tick(t0 + TimeDelta::from_millis(25), false);
        assert!(second.probes.is_empty());
    }

    #[test]
    fn target_is_the_minimum_of_delay_loss_and_remb() {
        let mut cc = GoogCcController::new(&cfg());
        cc.on_remb(DataRate::from_kbps(100));
        let update = cc.tick(Timestamp::from_millis(0), false);
        assert!(update.target <= DataRate::from_kbps(100));
    }

    #[test]
    fn network_down_pauses_estimation_and_zeroes_outstanding_on_resume() {
        let mut cc = GoogCcController::new(&cfg());
        cc.on_network_down();
        assert!(cc.is_paused());
        let before = cc.target_rate();
        cc.on_loss_report(50, 100, Timestamp::from_millis(0));
        let update = cc.tick(Timestamp::from_millis(0), false);
        assert_eq!(update.target, before);
        cc.on_network_up();
        assert!(!cc.is_paused());
    }

    #[test]
    fn congestion_window_has_a_floor() {
        let mut cc = GoogCcController::new(&cfg());
        let update = cc.tick(Timestamp::from_millis(0), false);
        assert!(update.congestion_window.bytes() as i64 >= MIN_CONGESTION_WINDOW_BYTES);
    }

    #[test]
    fn route_change_resets_delay_based_but_keeps_loss_based_by_default() {
        let mut cc = GoogCcController::new(&cfg());
        cc.on_loss_report(50, 100, Timestamp::from_millis(0));
        let loss_rate_before = cc.loss_based.rate();
        cc.on_route_change(&cfg());
        assert_eq!(cc.loss_based.rate(), loss_rate_before);
    }

    #[test]
    fn media_rate_is_target_times_configured_multiplier() {
        let cc = GoogCcController::new(&cfg());
        let expected = cc.target_rate() * cfg().pacer_media_rate_multiplier;
        assert_eq!(cc.media_rate(), expected);
    }
}
