//! The single immutable configuration struct.
//!
//! Replaces the source's string-keyed feature-flag lookups: every option
//! named in the external-interfaces table is a typed field here, built once
//! at startup and read by value thereafter. Nothing in this crate looks up
//! a config option by name at steady state.

use crate::clock::DataRate;

/// Loss thresholds and the bitrate boundary for the loss-based estimator's
/// three-way branch, overridable via `bwe_loss_experiment_thresholds`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LossThresholds {
    pub low_loss: f64,
    pub high_loss: f64,
    pub bitrate_threshold: DataRate,
}

impl Default for LossThresholds {
    fn default() -> Self {
        LossThresholds {
            low_loss: 0.02,
            high_loss: 0.10,
            bitrate_threshold: DataRate::from_kbps(0),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BweConfig {
    // --- §6 option table ---
    /// `send_side_bwe_with_overhead`: count transport overhead bytes toward
    /// estimated bitrate.
    pub send_side_bwe_with_overhead: bool,
    /// `add_pacing_to_congestion_window`: include pacer queue bytes in CWND
    /// accounting.
    pub add_pacing_to_congestion_window: bool,
    /// `feedback_timeout_experiment`: enable the 0.8x backoff when feedback
    /// is silent for 3x the report interval.
    pub feedback_timeout_experiment: bool,
    /// `stable_bandwidth_estimate`: report the link-capacity estimate as the
    /// stable bandwidth rather than the instantaneous delay-based rate.
    pub stable_bandwidth_estimate: bool,
    /// `max_packet_buffer_size`: must be a power of 2; non-conforming values
    /// fall back to the default and bump `ErrorCounters::config_fallback`.
    pub max_packet_buffer_size: usize,
    /// `send_nack_delay_ms`: artificial delay before the first NACK send,
    /// clamped to `[0, 20]` ms.
    pub send_nack_delay_ms: u32,
    /// `bwe_loss_experiment_thresholds`.
    pub loss_thresholds: LossThresholds,
    /// `max_rtt_limit`: RTT above this triggers the RTT-backoff clamp.
    pub max_rtt_limit_ms: u32,
    /// Fraction the loss-based rate is dropped by while RTT stays over
    /// `max_rtt_limit_ms`, applied at most once per `rtt_drop_interval_ms`.
    pub rtt_backoff_drop_fraction: f64,
    /// Minimum spacing between successive RTT-backoff drops.
    pub rtt_backoff_drop_interval_ms: i64,
    /// Floor the RTT-backoff drop will not push the rate below.
    pub rtt_backoff_bandwidth_floor: DataRate,

    // --- pass-through flags, §9 Open Questions ---
    /// Read but never branched on beyond forwarding into `PacerConfig`.
    pub ignore_seq_num_id_change: bool,
    /// Read but never branched on beyond forwarding into `Observer` output.
    pub force_no_audio_feedback: bool,

    // --- rate bounds ---
    pub min_bitrate: DataRate,
    pub max_bitrate: DataRate,
    pub start_bitrate: DataRate,

    // --- algorithm constants (spec §4, overridable for simulation/tests) ---
    pub trendline_smoothing_alpha: f64,
    pub trendline_threshold_gain: f64,
    pub trendline_window: usize,
    pub trendline_overuse_time_ms: i64,
    pub trendline_k_up: f64,
    pub trendline_k_down: f64,
    pub trendline_gamma_min: f64,
    pub trendline_gamma_max: f64,
    pub trendline_initial_gamma: f64,
    pub interarrival_group_length_ms: i64,
    pub interarrival_reordered_reset_threshold: u32,
    pub aimd_multiplicative_increase_per_sec: f64,
    pub aimd_decrease_factor_beta: f64,
    pub aimd_additive_increase_margin_bytes: u32,
    pub loss_report_interval_ms: i64,
    pub loss_min_decrease_interval_ms: i64,
    pub loss_min_packets_for_valid_report: u32,
    pub pacer_media_rate_multiplier: f64,
    pub pacer_budget_window_ms: i64,
    pub pacer_can_build_up_underuse: bool,
    pub feedback_generation_interval_ms: i64,
    pub nack_max_retries: u32,
    pub nack_tick_interval_ms: i64,
    pub nack_max_list_size: usize,
    pub nack_reorder_quantile_packets: u32,
    pub probe_initial_multiplier_1: f64,
    pub probe_initial_multiplier_2: f64,
    pub probe_further_rate_threshold: f64,
    pub probe_further_multiplier: f64,
    pub probe_min_duration_ms: i64,
    pub probe_min_packets: u32,
}

impl Default for BweConfig {
    fn default() -> Self {
        BweConfig {
            send_side_bwe_with_overhead: false,
            add_pacing_to_congestion_window: false,
            feedback_timeout_experiment: false,
            stable_bandwidth_estimate: false,
            max_packet_buffer_size: 2048,
            send_nack_delay_ms: 0,
            loss_thresholds: LossThresholds::default(),
            max_rtt_limit_ms: 500,
            rtt_backoff_drop_fraction: 0.5,
            rtt_backoff_drop_interval_ms: 300,
            rtt_backoff_bandwidth_floor: DataRate::from_kbps(5),

            ignore_seq_num_id_change: false,
            force_no_audio_feedback: false,

            min_bitrate: DataRate::from_kbps(30),
            max_bitrate: DataRate::from_kbps(2_000),
            start_bitrate: DataRate::from_kbps(300),

            trendline_smoothing_alpha: 0.9,
            trendline_threshold_gain: 4.0,
            trendline_window: 20,
            trendline_overuse_time_ms: 10,
            trendline_k_up: 0.0087,
            trendline_k_down: 0.039,
            trendline_gamma_min: 6.0,
            trendline_gamma_max: 600.0,
            trendline_initial_gamma: 12.5,
            interarrival_group_length_ms: 5,
            interarrival_reordered_reset_threshold: 3,
            aimd_multiplicative_increase_per_sec: 1.08,
            aimd_decrease_factor_beta: 0.85,
            aimd_additive_increase_margin_bytes: 1_000,
            loss_report_interval_ms: 5_000,
            loss_min_decrease_interval_ms: 300,
            loss_min_packets_for_valid_report: 20,
            pacer_media_rate_multiplier: 2.5,
            pacer_budget_window_ms: 500,
            pacer_can_build_up_underuse: false,
            feedback_generation_interval_ms: 100,
            nack_max_retries: 10,
            nack_tick_interval_ms: 20,
            nack_max_list_size: 1000,
            nack_reorder_quantile_packets: 1,
            probe_initial_multiplier_1: 3.0,
            probe_initial_multiplier_2: 6.0,
            probe_further_rate_threshold: 1.5,
            probe_further_multiplier: 1.5,
            probe_min_duration_ms: 15,
            probe_min_packets: 5,
        }
    }
}

impl BweConfig {
    /// Validate the fields that `spec.md`'s error-handling design calls out
    /// as configuration errors. On failure, bumps
    /// [`crate::error::ErrorCounters::config_fallback`] and returns a config
    /// with the offending field reset to default, rather than an `Err` —
    /// per §7, configuration errors "log once and fall back to default."
    pub fn validated(mut self, errors: &mut crate::error::ErrorCounters) -> Self {
        if !self.max_packet_buffer_size.is_power_of_two() {
            errors.record_config_fallback("max_packet_buffer_size");
            self.max_packet_buffer_size = BweConfig::default().max_packet_buffer_size;
        }
        if self.send_nack_delay_ms > 20 {
            errors.record_config_fallback("send_nack_delay_ms");
            self.send_nack_delay_ms = self.send_nack_delay_ms.min(20);
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCounters;

    #[test]
    fn default_config_is_self_consistent() {
        let cfg = BweConfig::default();
        assert!(cfg.min_bitrate < cfg.start_bitrate);
        assert!(cfg.start_bitrate < cfg.max_bitrate);
        assert!(cfg.max_packet_buffer_size.is_power_of_two());
    }

    #[test]
    fn invalid_buffer_size_falls_back() {
        let mut errors = ErrorCounters::new();
        let cfg = BweConfig {
            max_packet_buffer_size: 3000,
            ..BweConfig::default()
        }
        .validated(&mut errors);
        assert!(cfg.max_packet_buffer_size.is_power_of_two());
        assert_eq!(errors.config_fallback, 1);
    }

    #[test]
    fn nack_delay_clamped_to_20ms() {
        let mut errors = ErrorCounters::new();
        let cfg = BweConfig {
            send_nack_delay_ms: 500,
            ..BweConfig::default()
        }
        .validated(&mut errors);
        assert_eq!(cfg.send_nack_delay_ms, 20);
    }
}
