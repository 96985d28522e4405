//! Composes [`crate::interarrival`], [`crate::trendline`], and
//! [`crate::aimd`] into the delay-based half of bandwidth estimation.

use crate::aimd::AimdRateControl;
use crate::clock::{DataRate, DataSize, TimeDelta, Timestamp};
use crate::config::BweConfig;
use crate::interarrival::InterArrival;
use crate::trendline::TrendlineEstimator;

pub struct DelayBasedBwe {
    inter_arrival: InterArrival,
    trendline: TrendlineEstimator,
    aimd: AimdRateControl,
}

impl DelayBasedBwe {
    pub fn new(cfg: &BweConfig) -> Self {
        DelayBasedBwe {
            inter_arrival: InterArrival::new(
                TimeDelta::from_millis(cfg.interarrival_group_length_ms),
                cfg.interarrival_reordered_reset_threshold,
            ),
            trendline: TrendlineEstimator::new(cfg),
            aimd: AimdRateControl::new(cfg),
        }
    }

    pub fn rate(&self) -> DataRate {
        self.aimd.rate()
    }

    /// Feed one packet's send/arrival time and size; advances the inter-
    /// arrival grouping, the trendline, and the AIMD state machine whenever
    /// a new group boundary produces a delta.
    pub fn on_packet(
        &mut self,
        send_time: Timestamp,
        arrival_time: Timestamp,
        size: DataSize,
        acknowledged_rate: Option<DataRate>,
        rtt: TimeDelta,
    ) {
        if let Some(deltas) = self
            .inter_arrival
            .compute_deltas(send_time, arrival_time, size)
        {
            self.trendline
                .update(deltas.send_delta, deltas.arrival_delta, arrival_time.millis());
            self.aimd
                .update(self.trendline.state(), acknowledged_rate, rtt, arrival_time);
        }
    }
}
