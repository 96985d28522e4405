//! Linear-regression delay-gradient trend detector.
//!
//! Feed it `(send_delta, arrival_delta, now)` triples from [`crate::interarrival`];
//! it maintains an accumulated-delay series, smooths it with an EWMA (`alpha`
//! ≈ 0.9), fits a least-squares line over the last `window` samples, and
//! compares the scaled slope against an adaptive threshold to classify the
//! link as `Overuse`, `Normal`, or `Underuse`.

use crate::clock::TimeDelta;
use crate::config::BweConfig;
use crate::stats::Ewma;
use std::collections::VecDeque;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DelayState {
    Overuse,
    Normal,
    Underuse,
}

#[derive(Debug, Clone, Copy)]
struct Sample {
    accumulated_delay_ms: f64,
    smoothed_delay_ms: f64,
    arrival_time_ms: i64,
}

pub struct TrendlineEstimator {
    window: usize,
    threshold_gain: f64,
    k_up: f64,
    k_down: f64,
    gamma_min: f64,
    gamma_max: f64,
    overuse_time: TimeDelta,

    accumulated_delay_ms: f64,
    smoothing: Ewma,
    samples: VecDeque<Sample>,

    gamma: f64,
    state: DelayState,
    time_over_threshold: TimeDelta,
    last_update_ms: Option<i64>,
}

impl TrendlineEstimator {
    pub fn new(cfg: &BweConfig) -> Self {
        TrendlineEstimator {
            window: cfg.trendline_window,
            threshold_gain: cfg.trendline_threshold_gain,
            k_up: cfg.trendline_k_up,
            k_down: cfg.trendline_k_down,
            gamma_min: cfg.trendline_gamma_min,
            gamma_max: cfg.trendline_gamma_max,
            overuse_time: TimeDelta::from_millis(cfg.trendline_overuse_time_ms),
            accumulated_delay_ms: 0.0,
            smoothing: Ewma::new(1.0 - cfg.trendline_smoothing_alpha),
            samples: VecDeque::with_capacity(cfg.trendline_window + 1),
            gamma: cfg.trendline_initial_gamma,
            state: DelayState::Normal,
            time_over_threshold: TimeDelta::zero(),
            last_update_ms: None,
        }
    }

    pub fn state(&self) -> DelayState {
        self.state
    }

    /// Feed one inter-group delta. `now` drives the threshold's adaptive
    /// decay/growth and the `overuse_time_ms` debounce.
    pub fn update(&mut self, send_delta: TimeDelta, arrival_delta: TimeDelta, now_ms: i64) {
        let delay_gradient_ms = (arrival_delta - send_delta).millis() as f64;
        self.accumulated_delay_ms += delay_gradient_ms;
        let smoothed = self.smoothing.update(self.accumulated_delay_ms);

        self.samples.push_back(Sample {
            accumulated_delay_ms: self.accumulated_delay_ms,
            smoothed_delay_ms: smoothed,
            arrival_time_ms: now_ms,
        });
        while self.samples.len() > self.window {
            self.samples.pop_front();
        }

        if self.samples.len() < 2 {
            self.last_update_ms = Some(now_ms);
            return;
        }

        let slope = self.linear_regression_slope();
        let modified_trend = slope * self.threshold_gain * (self.samples.len() as f64);

        let dt_ms = self
            .last_update_ms
            .map(|last| (now_ms - last).max(0) as f64)
            .unwrap_or(0.0);
        self.last_update_ms = Some(now_ms);

        let k = if modified_trend.abs() > self.gamma {
            self.k_up
        } else {
            self.k_down
        };
        self.gamma += k * (modified_trend.abs() - self.gamma) * dt_ms;
        self.gamma = self.gamma.clamp(self.gamma_min, self.gamma_max);

        if modified_trend > self.gamma {
            self.time_over_threshold += TimeDelta::from_millis(dt_ms as i64);
            if self.time_over_threshold >= self.overuse_time {
                self.state = DelayState::Overuse;
            }
        } else if modified_trend < -self.gamma {
            self.time_over_threshold = TimeDelta::zero();
            self.state = DelayState::Underuse;
        } else {
            self.time_over_threshold = TimeDelta::zero();
            self.state = DelayState::Normal;
        }
    }

    /// Least-squares slope of `smoothed_delay_ms` against `arrival_time_ms`
    /// over the current window.
    fn linear_regression_slope(&self) -> f64 {
        let n = self.samples.len() as f64;
        let t0 = self.samples.front().unwrap().arrival_time_ms as f64;

        let (mut sum_x, mut sum_y, mut sum_xy, mut sum_xx) = (0.0, 0.0, 0.0, 0.0);
        for s in &self.samples {
            let x = s.arrival_time_ms as f64 - t0;
            let y = s.smoothed_delay_ms;
            sum_x += x;
            sum_y += y;
            sum_xy += x * y;
            sum_xx += x * x;
        }
        let denom = n * sum_xx - sum_x * sum_x;
        if denom.abs() < f64::EPSILON {
            return 0.0;
        }
        (n * sum_xy - sum_x * sum_y) / denom
    }
}
