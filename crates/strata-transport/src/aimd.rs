//! Additive-Increase / Multiplicative-Decrease rate control driven by the
//! delay state from [`crate::trendline`].
//!
//! State machine per spec §4.3:
//!
//! | From \ Input | overuse  | normal   | underuse |
//! |--------------|----------|----------|----------|
//! | hold         | decrease | increase | hold     |
//! | increase     | decrease | increase | hold     |
//! | decrease     | decrease | hold     | hold     |

use crate::clock::{DataRate, DataSize, TimeDelta, Timestamp};
use crate::config::BweConfig;
use crate::stats::Ewma;
use crate::trendline::DelayState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AimdState {
    Hold,
    Increase,
    Decrease,
}

pub struct AimdRateControl {
    min_bitrate: DataRate,
    max_bitrate: DataRate,
    multiplicative_increase_per_sec: f64,
    decrease_beta: f64,
    additive_margin_bytes: u32,

    state: AimdState,
    current_rate: DataRate,
    link_capacity: Ewma,
    last_decrease_at: Option<Timestamp>,
    last_change_at: Option<Timestamp>,
}

impl AimdRateControl {
    pub fn new(cfg: &BweConfig) -> Self {
        AimdRateControl {
            min_bitrate: cfg.min_bitrate,
            max_bitrate: cfg.max_bitrate,
            multiplicative_increase_per_sec: cfg.aimd_multiplicative_increase_per_sec,
            decrease_beta: cfg.aimd_decrease_factor_beta,
            additive_margin_bytes: cfg.aimd_additive_increase_margin_bytes,
            state: AimdState::Hold,
            current_rate: cfg.start_bitrate,
            link_capacity: Ewma::new(0.05),
            last_decrease_at: None,
            last_change_at: None,
        }
    }

    pub fn rate(&self) -> DataRate {
        self.current_rate
    }

    pub fn state(&self) -> AimdState {
        self.state
    }

    /// Advance the state machine and the rate estimate.
    ///
    /// `acknowledged_rate` is the best current estimate of throughput the
    /// network has actually demonstrated (from the feedback adapter);
    /// `rtt` drives the additive-increase step size.
    pub fn update(
        &mut self,
        delay_state: DelayState,
        acknowledged_rate: Option<DataRate>,
        rtt: TimeDelta,
        now: Timestamp,
    ) {
        self.state = Self::next_state(self.state, delay_state);

        match self.state {
            AimdState::Hold => {}
            AimdState::Increase => self.apply_increase(acknowledged_rate, rtt, now),
            AimdState::Decrease => self.apply_decrease(acknowledged_rate, now),
        }
    }

    fn next_state(current: AimdState, input: DelayState) -> AimdState {
        use AimdState::*;
        use DelayState::*;
        match (current, input) {
            (_, Overuse) => Decrease,
            (Hold, Normal) => Increase,
            (Increase, Normal) => Increase,
            (Decrease, Normal) => Hold,
            (Hold, Underuse) => Hold,
            (Increase, Underuse) => Hold,
            (Decrease, Underuse) => Hold,
        }
    }

    fn apply_increase(&mut self, acknowledged_rate: Option<DataRate>, rtt: TimeDelta, now: Timestamp) {
        let near_capacity = acknowledged_rate
            .map(|ack| {
                let capacity = DataRate::from_bps(self.link_capacity.value() as u64);
                capacity.bps() > 0 && ack.bps() * 100 >= capacity.bps() * 90
            })
            .unwrap_or(false);

        let new_rate = if near_capacity {
            let half_rtt = TimeDelta::from_micros(rtt.micros() / 2);
            let half_rtt_throughput = self.current_rate * half_rtt;
            let additive_per_rtt =
                DataSize::from_bytes(self.additive_margin_bytes as u64) + half_rtt_throughput;
            let dt = self
                .last_change_at
                .map(|last| now - last)
                .unwrap_or(rtt)
                .micros()
                .max(0) as f64;
            let rtt_us = rtt.micros().max(1) as f64;
            let bytes_elapsed = additive_per_rtt.bytes() as f64 * (dt / rtt_us);
            DataRate::from_bps(self.current_rate.bps() + (bytes_elapsed * 8.0) as u64)
        } else {
            let dt = self
                .last_change_at
                .map(|last| (now - last).seconds_f64())
                .unwrap_or(0.02);
            let factor = self.multiplicative_increase_per_sec.powf(dt.max(0.0));
            self.current_rate * factor
        };

        let bounded_by_ack = acknowledged_rate
            .map(|ack| DataRate::from_bps((ack.bps() as f64 * 1.5) as u64))
            .unwrap_or(self.max_bitrate);

        self.current_rate = new_rate
            .clamp(self.min_bitrate, self.max_bitrate.min(bounded_by_ack.max(self.min_bitrate)));
        self.last_change_at = Some(now);
    }

    fn apply_decrease(&mut self, acknowledged_rate: Option<DataRate>, now: Timestamp) {
        let decreased = self.current_rate * self.decrease_beta;
        let floor = acknowledged_rate
            .map(|ack| ack * self.decrease_beta)
            .unwrap_or(self.min_bitrate);
        // The rate cannot drop below what the network just demonstrably
        // carried times beta, even if that floor is above current_rate.
        self.current_rate = decreased.max(floor).clamp(self.min_bitrate, self.max_bitrate);

        if let Some(ack) = acknowledged_rate {
            self.link_capacity.update(ack.bps() as f64);
        }
        self.last_decrease_at = Some(now);
        self.last_change_at = Some(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> BweConfig {
        BweConfig::default()
    }

    #[test]
    fn overuse_always_transitions_to_decrease() {
        assert_eq!(
            AimdRateControl::next_state(AimdState::Hold, DelayState::Overuse),
            AimdState::Decrease
        );
        assert_eq!(
            AimdRateControl::next_state(AimdState::Increase, DelayState::Overuse),
            AimdState::Decrease
        );
        assert_eq!(
            AimdRateControl::next_state(AimdState::Decrease, DelayState::Overuse),
            AimdState::Decrease
        );
    }

    #[test]
    fn decrease_on_normal_returns_to_hold_not_increase() {
        assert_eq!(
            AimdRateControl::next_state(AimdState::Decrease, DelayState::Normal),
            AimdState::Hold
        );
    }

    #[test]
    fn underuse_from_increase_goes_to_hold() {
        assert_eq!(
            AimdRateControl::next_state(AimdState::Increase, DelayState::Underuse),
            AimdState::Hold
        );
    }

    #[test]
    fn decrease_never_drops_below_beta_times_acknowledged() {
        let mut aimd = AimdRateControl::new(&cfg());
        let now = Timestamp::from_millis(0);
        aimd.update(DelayState::Overuse, Some(DataRate::from_kbps(1000)), TimeDelta::from_millis(100), now);
        assert!(aimd.rate() >= DataRate::from_kbps(1000) * 0.85);
    }

    #[test]
    fn repeated_increase_grows_the_rate() {
        let mut aimd = AimdRateControl::new(&cfg());
        let start = aimd.rate();
        let mut now = Timestamp::from_millis(0);
        for _ in 0..20 {
            now = now + TimeDelta::from_millis(100);
            aimd.update(DelayState::Normal, None, TimeDelta::from_millis(50), now);
        }
        assert!(aimd.rate() > start, "rate should have grown: {:?} vs {:?}", aimd.rate(), start);
    }
}
