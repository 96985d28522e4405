//! End-to-end behavioral scenarios for the congestion-control pipeline:
//! one test per characteristic link condition (clean, lossy, congested,
//! feedback-starved, probed, gappy) driving the real estimator/pacer/nack
//! components directly rather than mocking them out.

use strata_transport::aimd::AimdState;
use strata_transport::clock::{DataRate, DataSize, TimeDelta, Timestamp};
use strata_transport::config::BweConfig;
use strata_transport::controller::GoogCcController;
use strata_transport::delay_bwe::DelayBasedBwe;
use strata_transport::error::ErrorCounters;
use strata_transport::loss_bwe::LossBasedBwe;
use strata_transport::nack::NackModule;
use strata_transport::pacer::{Pacer, QueuedPacket};
use strata_transport::pool::Priority;
use strata_transport::probe::{ProbeBitrateEstimator, ProbeCluster};

fn cfg() -> BweConfig {
    BweConfig::default()
}

// ─── Clean link ─────────────────────────────────────────────────────────────
//
// Zero loss, arrival tracking send exactly: target should only ever move
// up, never regress, over a sustained run, and the pacer's media rate
// should keep tracking it via the configured multiplier.

#[test]
fn clean_link_with_zero_loss_drives_target_rate_above_start() {
    let cfg = cfg();
    let mut cc = GoogCcController::new(&cfg);
    let mut t = Timestamp::from_millis(0);
    let mut last_target = cc.target_rate();

    for i in 0..2_000 {
        let send = t;
        let arrival = t; // no delay growth
        cc.on_packet_feedback(send, arrival, DataSize::from_bytes(1_200), Some(DataRate::from_kbps(500)));

        if i % 25 == 0 {
            // A receiver report every 25 packets, always zero loss.
            cc.on_loss_report(0, 25, t);
        }
        if i % 5 == 0 {
            let update = cc.tick(t, false);
            assert!(
                update.target >= last_target,
                "target regressed on a clean link: {:?} -> {:?}",
                last_target,
                update.target
            );
            last_target = update.target;
        }
        t = t + TimeDelta::from_millis(5);
    }

    assert!(
        cc.target_rate() > cfg.start_bitrate,
        "target never grew above the starting bitrate: {:?}",
        cc.target_rate()
    );
    assert_eq!(cc.media_rate(), cc.target_rate().max(cfg.min_bitrate) * cfg.pacer_media_rate_multiplier);
}

// ─── Step loss ──────────────────────────────────────────────────────────────
//
// A loss report above the high-loss threshold cuts the rate immediately;
// a second report inside the 300ms+rtt cooldown must not cut it again.

#[test]
fn step_loss_cuts_the_rate_once_and_holds_for_the_cooldown_window() {
    let mut bwe = LossBasedBwe::new(&cfg());
    let rtt = TimeDelta::from_millis(50);
    let t0 = Timestamp::from_millis(5_000);

    // 20% loss: well above the 10% high-loss threshold.
    bwe.update_loss(20, 100, rtt, t0);
    let after_first_cut = bwe.rate();
    assert!(
        after_first_cut < BweConfig::default().start_bitrate,
        "high loss should have cut the rate below the start bitrate"
    );

    // A second high-loss report 100ms later falls inside the 300ms+rtt
    // cooldown (350ms) and must not cut the rate again.
    let t1 = t0 + TimeDelta::from_millis(100);
    bwe.update_loss(20, 100, rtt, t1);
    assert_eq!(
        bwe.rate(),
        after_first_cut,
        "a second high-loss report inside the cooldown window must not lower the rate further"
    );

    // A third report past the cooldown (400ms later) may cut again.
    let t2 = t0 + TimeDelta::from_millis(400);
    bwe.update_loss(20, 100, rtt, t2);
    assert!(
        bwe.rate() <= after_first_cut,
        "once the cooldown has elapsed a sustained high-loss report may cut further"
    );
}

// ─── Delay ramp ─────────────────────────────────────────────────────────────
//
// A steady one-way delay increase must eventually flip the AIMD state
// machine to `Decrease` and pull the rate down from its pre-ramp value.

#[test]
fn delay_ramp_overuse_flips_aimd_to_decrease() {
    let cfg = cfg();
    let mut bwe = DelayBasedBwe::new(&cfg);
    // No acknowledged-rate sample: keeps `apply_decrease`'s floor at
    // `min_bitrate` instead of `ack * beta`, so the multiplicative cut below
    // actually bites (a high ack relative to the pre-ramp rate would pin the
    // floor above the decrease target and mask it).
    let ack = None;
    let rtt = TimeDelta::from_millis(50);
    let mut t = 0i64;

    // Clean phase: on-time groups every 10ms, long enough to leave `Hold`.
    for _ in 0..50 {
        let send = Timestamp::from_millis(t);
        bwe.on_packet(send, send, DataSize::from_bytes(1_200), ack, rtt);
        t += 10;
    }
    let rate_before_ramp = bwe.rate();

    // Ramp phase: the one-way delay itself grows by 1ms every group, so
    // each successive arrival-delta exceeds its send-delta by a constant
    // margin — a steady gradient, not just a one-off offset.
    let mut extra_delay_ms = 0i64;
    for _ in 0..200 {
        let send = Timestamp::from_millis(t);
        extra_delay_ms += 1;
        let arrival = Timestamp::from_millis(t + extra_delay_ms);
        bwe.on_packet(send, arrival, DataSize::from_bytes(1_200), ack, rtt);
        t += 10;
    }

    assert!(
        bwe.rate() < rate_before_ramp,
        "sustained delay growth should have decreased the rate: {:?} -> {:?}",
        rate_before_ramp,
        bwe.rate()
    );
}

// ─── Feedback gap ───────────────────────────────────────────────────────────
//
// With the feedback-timeout experiment on, 16s of silence (well past the
// 3x report-interval threshold) applies the 0.8x backoff exactly once,
// then holds there rather than repeating the cut every tick.

#[test]
fn feedback_gap_applies_the_timeout_backoff_exactly_once() {
    let cfg = BweConfig {
        feedback_timeout_experiment: true,
        ..BweConfig::default()
    };
    let mut bwe = LossBasedBwe::new(&cfg);
    let t0 = Timestamp::from_millis(0);

    // One valid report to arm `time_last_valid_report`, then silence.
    bwe.update_loss(0, 100, TimeDelta::from_millis(50), t0);
    let rate_before_gap = bwe.rate();

    // 16s of silence: 3x the 5s report interval is 15s, so this should
    // have tripped the backoff by now.
    let rtt = TimeDelta::from_millis(50);
    let t_gap = t0 + TimeDelta::from_millis(16_000);
    bwe.tick(t_gap, rtt);
    let rate_after_gap = bwe.rate();
    assert_eq!(
        rate_after_gap,
        (rate_before_gap * 0.8).clamp(cfg.min_bitrate, cfg.max_bitrate),
        "the feedback-timeout backoff should apply exactly the 0.8x factor"
    );

    // Further silent ticks must hold at that level, not keep cutting.
    bwe.tick(t_gap + TimeDelta::from_millis(25), rtt);
    bwe.tick(t_gap + TimeDelta::from_millis(50), rtt);
    assert_eq!(bwe.rate(), rate_after_gap, "the backoff must apply once, not every tick");
}

// ─── Probe success ──────────────────────────────────────────────────────────
//
// A 2 Mbps probe cluster issued while running at 500 kbps must fit within
// its configured duration at the expected byte budget, and the packets the
// pacer actually releases should let the estimator report a rate in a
// plausible range around the target.

#[test]
fn probe_success_fills_its_budget_and_estimates_within_range() {
    let cfg = cfg();
    let cluster = ProbeCluster {
        id: 1,
        target_rate: DataRate::from_kbps(2_000),
        min_probe_duration: TimeDelta::from_millis(cfg.probe_min_duration_ms),
        min_packets: cfg.probe_min_packets,
    };
    // 2 Mbps * 15ms / 8 = 3750 bytes.
    let budget = cluster.byte_budget();
    assert!(
        (3_700..=3_800).contains(&budget.bytes()),
        "probe byte budget should be about 3.75kB, got {:?}",
        budget
    );

    // Pacer wiring: once a probe cluster is active it must be served
    // ahead of (and tagged apart from) ordinary media, and it must stop
    // asking for more once it has both met `min_packets` and drained its
    // lane's budget for the tick — it doesn't need the full duration's
    // worth of queued bytes to do that.
    let mut pacer = Pacer::new(&cfg);
    pacer.set_pacing_rates(DataRate::from_kbps(500), DataRate::zero());
    pacer.create_probe_cluster(cluster.target_rate, cluster.id, cluster.min_packets);
    let packet_size = 188u64; // bytes
    for seq in 0..80u16 {
        pacer.enqueue(
            QueuedPacket {
                ssrc: 1,
                rtp_seq: seq,
                size: DataSize::from_bytes(packet_size),
                is_retransmission: false,
                probe_cluster_id: None,
                enqueued_at: Timestamp::from_millis(0),
            },
            Priority::Standard,
        );
    }
    let mut probe_packets_sent = 0u32;
    for ms in 1..=cfg.probe_min_duration_ms {
        let batch = pacer.process(Timestamp::from_millis(ms));
        assert!(
            batch.iter().all(|p| p.probe_cluster_id == Some(cluster.id) || probe_packets_sent >= cluster.min_packets),
            "packets released before the probe lane is done must carry its cluster id"
        );
        probe_packets_sent += batch.iter().filter(|p| p.probe_cluster_id == Some(cluster.id)).count() as u32;
    }
    assert!(
        probe_packets_sent >= cluster.min_packets,
        "the probe lane should release at least min_packets packets, got {probe_packets_sent}"
    );

    // Estimator: fed with packets that actually achieved close to the
    // cluster's target rate over its window, it should report a rate
    // close to that target (mirrors the precedent in probe.rs's own
    // `estimator_reports_rate_within_probe_window`, generalized to the
    // exact cluster size here: `byte_budget()` bytes over
    // `min_probe_duration`).
    let mut estimator = ProbeBitrateEstimator::new(cluster.id, cluster.min_packets);
    let packets_for_estimate = (cluster.min_packets as u64).max(5);
    let bytes_per_packet = budget.bytes() / packets_for_estimate;
    let gap = TimeDelta::from_micros(cluster.min_probe_duration.micros() / packets_for_estimate as i64);
    for i in 0..packets_for_estimate {
        let send_time = Timestamp::from_micros(gap.micros() * i as i64);
        let receive_time = send_time + TimeDelta::from_millis(1);
        estimator.on_packet_feedback(send_time, receive_time, bytes_per_packet as u32);
    }

    let estimate = estimator.estimate().expect("enough packets were fed to produce an estimate");
    assert!(
        estimate >= DataRate::from_kbps(1_500) && estimate <= DataRate::from_kbps(2_500),
        "probe estimate should land within [1.5, 2.5] Mbps, got {:?}",
        estimate
    );
}

// ─── NACK bound ─────────────────────────────────────────────────────────────
//
// Every 10th sequence of 1..1000 is missing. Each gap must be NACKed at
// most `max_retries` times, spread across `max_retries * rtt`, and none
// of them fire again once that window has passed.

#[test]
fn nack_bound_retries_each_gap_at_most_max_retries_times() {
    let max_retries = 10u32;
    let mut nack = NackModule::new(max_retries, 1_000, 1);
    let mut errors = ErrorCounters::new();
    let t0 = Timestamp::from_millis(0);

    let mut missing = Vec::new();
    for seq in 1u64..=1_000 {
        if seq % 10 == 0 {
            missing.push(seq);
            continue;
        }
        nack.on_received(seq, t0, &mut errors);
    }
    for &seq in &missing {
        assert!(nack.is_tracking(seq), "seq {seq} should be tracked as a gap");
    }

    let rtt = TimeDelta::from_millis(50);
    let mut fire_counts = std::collections::HashMap::new();
    let mut now = t0;
    for _ in 0..=max_retries {
        for seq in nack.tick(now, rtt) {
            *fire_counts.entry(seq).or_insert(0u32) += 1;
        }
        now = now + rtt;
    }

    for &seq in &missing {
        let count = fire_counts.get(&seq).copied().unwrap_or(0);
        assert!(
            count <= max_retries,
            "seq {seq} fired {count} times, more than max_retries ({max_retries})"
        );
    }

    // Past `max_retries * rtt` (plus a little slack) every gap must have
    // been dropped and stop firing entirely.
    let epsilon = TimeDelta::from_millis(1);
    let final_fires = nack.tick(now + epsilon, rtt);
    assert!(
        final_fires.iter().all(|seq| !missing.contains(seq)),
        "no gap should still be firing past max_retries * rtt"
    );
    for &seq in &missing {
        assert!(!nack.is_tracking(seq), "seq {seq} should have been dropped after exhausting its retries");
    }
}

#[test]
fn aimd_state_during_delay_ramp_is_not_increase() {
    // Companion assertion to `delay_ramp_overuse_flips_aimd_to_decrease`:
    // drives the same ramp directly against the AIMD state machine to
    // confirm it actually left `Increase`, not just that the rate dipped.
    use strata_transport::trendline::DelayState;
    let cfg = cfg();
    let mut aimd = strata_transport::aimd::AimdRateControl::new(&cfg);
    let mut now = Timestamp::from_millis(0);
    for _ in 0..20 {
        now = now + TimeDelta::from_millis(100);
        aimd.update(DelayState::Normal, None, TimeDelta::from_millis(50), now);
    }
    assert_eq!(aimd.state(), AimdState::Increase);

    now = now + TimeDelta::from_millis(100);
    aimd.update(DelayState::Overuse, Some(DataRate::from_kbps(500)), TimeDelta::from_millis(50), now);
    assert_eq!(aimd.state(), AimdState::Decrease);
}
