//! Loss-driven rate control.
//!
//! Consumes `(packets_lost, packets_expected)` deltas per reporting
//! interval plus RTT, and produces a loss-based target rate per spec §4.4.
//! Keeps its own `min_bitrate_history` — a rolling minimum of the current
//! rate over the last second — independent of the AIMD link-capacity EWMA
//! in [`crate::aimd`]; the two estimators never share history.

use crate::clock::{DataRate, TimeDelta, Timestamp};
use crate::config::BweConfig;
use std::collections::VecDeque;

pub struct LossBasedBwe {
    min_packets_for_valid_report: u32,
    report_interval: TimeDelta,
    min_decrease_interval: TimeDelta,
    feedback_timeout_experiment: bool,
    low_loss: f64,
    high_loss: f64,
    bitrate_threshold: DataRate,
    min_bitrate: DataRate,
    max_bitrate: DataRate,
    rtt_limit: TimeDelta,
    rtt_drop_fraction: f64,
    rtt_drop_interval: TimeDelta,
    rtt_bandwidth_floor: DataRate,

    current_bitrate: DataRate,
    last_fraction_loss: u8,
    min_bitrate_history: VecDeque<(Timestamp, DataRate)>,
    time_last_decrease: Option<Timestamp>,
    time_last_valid_report: Option<Timestamp>,
    time_last_rtt_drop: Option<Timestamp>,

    packets_lost_since_last: u64,
    packets_expected_since_last: u64,
}

impl LossBasedBwe {
    pub fn new(cfg: &BweConfig) -> Self {
        LossBasedBwe {
            min_packets_for_valid_report: cfg.loss_min_packets_for_valid_report,
            report_interval: TimeDelta::from_millis(cfg.loss_report_interval_ms),
            min_decrease_interval: TimeDelta::from_millis(cfg.loss_min_decrease_interval_ms),
            feedback_timeout_experiment: cfg.feedback_timeout_experiment,
            low_loss: cfg.loss_thresholds.low_loss,
            high_loss: cfg.loss_thresholds.high_loss,
            bitrate_threshold: cfg.loss_thresholds.bitrate_threshold,
            min_bitrate: cfg.min_bitrate,
            max_bitrate: cfg.max_bitrate,
            rtt_limit: TimeDelta::from_millis(cfg.max_rtt_limit_ms as i64),
            rtt_drop_fraction: cfg.rtt_backoff_drop_fraction,
            rtt_drop_interval: TimeDelta::from_millis(cfg.rtt_backoff_drop_interval_ms),
            rtt_bandwidth_floor: cfg.rtt_backoff_bandwidth_floor,
            current_bitrate: cfg.start_bitrate,
            last_fraction_loss: 0,
            min_bitrate_history: VecDeque::new(),
            time_last_decrease: None,
            time_last_valid_report: None,
            time_last_rtt_drop: None,
            packets_lost_since_last: 0,
            packets_expected_since_last: 0,
        }
    }

    pub fn rate(&self) -> DataRate {
        self.current_bitrate
    }

    pub fn last_fraction_loss(&self) -> u8 {
        self.last_fraction_loss
    }

    /// Called once per received receiver report.
    pub fn update_loss(
        &mut self,
        packets_lost_delta: u64,
        packets_expected_delta: u64,
        rtt: TimeDelta,
        now: Timestamp,
    ) {
        self.packets_lost_since_last += packets_lost_delta;
        self.packets_expected_since_last += packets_expected_delta;

        // §9 open question: an early return here, preserved for
        // bit-compatibility, rather than reinterpreted as an error.
        if self.packets_expected_since_last < 1 {
            return;
        }

        if self.packets_expected_since_last < self.min_packets_for_valid_report as u64 {
            return;
        }

        self.last_fraction_loss =
            ((self.packets_lost_since_last * 256) / self.packets_expected_since_last).min(255) as u8;
        self.packets_lost_since_last = 0;
        self.packets_expected_since_last = 0;
        self.time_last_valid_report = Some(now);

        self.update_min_history(now);

        // §4.4 step 4: the RTT backoff is a separate clamp on the output
        // and, while engaged, preempts the ordinary loss rule for this call.
        if !self.apply_rtt_backoff(rtt, now) {
            self.apply_loss_rule(rtt, now);
        }
    }

    /// Called on every controller tick regardless of whether a report
    /// arrived, to apply the RTT backoff and the feedback-timeout backoff.
    pub fn tick(&mut self, now: Timestamp, rtt: TimeDelta) {
        if self.apply_rtt_backoff(rtt, now) {
            return;
        }
        if !self.feedback_timeout_experiment {
            return;
        }
        let Some(last) = self.time_last_valid_report else {
            return;
        };
        if now - last >= self.report_interval * 3.0 {
            self.current_bitrate = (self.current_bitrate * 0.8).clamp(self.min_bitrate, self.max_bitrate);
            self.packets_lost_since_last = 0;
            self.packets_expected_since_last = 0;
            // Prevent repeatedly reapplying the backoff every tick.
            self.time_last_valid_report = Some(now);
        }
    }

    /// RTT-backoff sub-state (§3, §4.4 step 4): while RTT stays over
    /// `rtt_limit`, drop the rate by `rtt_drop_fraction` down to
    /// `rtt_bandwidth_floor`, at most once per `rtt_drop_interval`. Returns
    /// whether RTT is currently over the limit, so callers can skip their
    /// own decision logic for this call.
    fn apply_rtt_backoff(&mut self, rtt: TimeDelta, now: Timestamp) -> bool {
        if rtt <= self.rtt_limit {
            return false;
        }
        if self.current_bitrate > self.rtt_bandwidth_floor {
            let since_drop = self
                .time_last_rtt_drop
                .map(|t| now - t)
                .unwrap_or(TimeDelta::plus_infinity());
            if since_drop >= self.rtt_drop_interval {
                self.current_bitrate = (self.current_bitrate * self.rtt_drop_fraction)
                    .max(self.rtt_bandwidth_floor)
                    .clamp(self.min_bitrate, self.max_bitrate);
                self.time_last_rtt_drop = Some(now);
            }
        }
        true
    }

    fn apply_loss_rule(&mut self, rtt: TimeDelta, now: Timestamp) {
        let loss_fraction = self.last_fraction_loss as f64 / 256.0;

        if loss_fraction <= self.low_loss && self.current_bitrate > self.bitrate_threshold {
            if let Some((_, min_rate)) = self.min_bitrate_history.front() {
                self.current_bitrate =
                    ((*min_rate * 1.08) + DataRate::from_bps(1_000)).clamp(self.min_bitrate, self.max_bitrate);
            }
        } else if loss_fraction > self.high_loss {
            let since_decrease = self
                .time_last_decrease
                .map(|t| now - t)
                .unwrap_or(TimeDelta::plus_infinity());
            let required = TimeDelta::from_millis(300) + rtt;
            if since_decrease >= required {
                let numerator = 512u64.saturating_sub(self.last_fraction_loss as u64);
                self.current_bitrate = DataRate::from_bps(
                    (self.current_bitrate.bps() as u128 * numerator as u128 / 512) as u64,
                )
                .clamp(self.min_bitrate, self.max_bitrate);
                self.time_last_decrease = Some(now);
            }
        }
        // loss in (low_loss, high_loss] or current_bitrate == bitrate_threshold: hold.
    }

    /// Rolling minimum of the current rate over the last second: pop front
    /// entries older than 1s, pop back entries with rate >= 0.65 * current,
    /// push (now, current).
    fn update_min_history(&mut self, now: Timestamp) {
        while let Some((t, _)) = self.min_bitrate_history.front() {
            if now - *t > TimeDelta::from_seconds(1.0) {
                self.min_bitrate_history.pop_front();
            } else {
                break;
            }
        }
        while let Some((_, rate)) = self.min_bitrate_history.back() {
            if rate.bps() as f64 >= 0.65 * self.current_bitrate.bps() as f64 {
                self.min_bitrate_history.pop_back();
            } else {
                break;
            }
        }
        self.min_bitrate_history.push_back((now, self.current_bitrate));
    }
}
