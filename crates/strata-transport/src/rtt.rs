//! RTT measurement via PING/PONG round trips.
//!
//! Adapted from the teacher's session-handshake `RttTracker`; the
//! surrounding session-establishment state machine is dropped (signaling is
//! out of scope here) but the RFC 6298 SRTT/RTTVAR math and the ping/pong
//! wire exchange are unchanged.

use crate::clock::{TimeDelta, Timestamp};
use crate::wire::{PingPacket, PongPacket};
use std::collections::HashMap;

pub struct RttTracker {
    pending: HashMap<u16, Timestamp>,
    next_ping_id: u16,
    srtt_us: f64,
    rttvar_us: f64,
    min_rtt_us: f64,
    max_rtt_us: f64,
    sample_count: u64,
    pub ping_interval: TimeDelta,
    pub last_ping_sent: Option<Timestamp>,
}

impl RttTracker {
    pub fn new() -> Self {
        RttTracker {
            pending: HashMap::new(),
            next_ping_id: 0,
            srtt_us: 0.0,
            rttvar_us: 0.0,
            min_rtt_us: f64::MAX,
            max_rtt_us: 0.0,
            sample_count: 0,
            ping_interval: TimeDelta::from_millis(100),
            last_ping_sent: None,
        }
    }

    pub fn make_ping(&mut self, now: Timestamp, origin_timestamp_us: u32) -> PingPacket {
        let ping_id = self.next_ping_id;
        self.next_ping_id = self.next_ping_id.wrapping_add(1);
        self.pending.insert(ping_id, now);
        self.last_ping_sent = Some(now);
        PingPacket {
            origin_timestamp_us,
            ping_id,
        }
    }

    pub fn make_pong(ping: &PingPacket, receive_timestamp_us: u32) -> PongPacket {
        PongPacket {
            origin_timestamp_us: ping.origin_timestamp_us,
            ping_id: ping.ping_id,
            receive_timestamp_us,
        }
    }

    /// Process a received PONG; returns the measured RTT, or `None` if the
    /// ping id is unknown (already evicted or never sent).
    pub fn handle_pong(&mut self, pong: &PongPacket, now: Timestamp) -> Option<TimeDelta> {
        let send_time = self.pending.remove(&pong.ping_id)?;
        let rtt = now - send_time;
        let rtt_us = rtt.micros().max(0) as f64;

        self.sample_count += 1;
        self.min_rtt_us = self.min_rtt_us.min(rtt_us);
        self.max_rtt_us = self.max_rtt_us.max(rtt_us);

        if self.sample_count == 1 {
            self.srtt_us = rtt_us;
            self.rttvar_us = rtt_us / 2.0;
        } else {
            self.rttvar_us = 0.75 * self.rttvar_us + 0.25 * (self.srtt_us - rtt_us).abs();
            self.srtt_us = 0.875 * self.srtt_us + 0.125 * rtt_us;
        }

        let cutoff = now - TimeDelta::from_seconds(5.0);
        self.pending.retain(|_, t| *t > cutoff);

        Some(rtt)
    }

    pub fn needs_ping(&self, now: Timestamp) -> bool {
        match self.last_ping_sent {
            None => true,
            Some(last) => now - last >= self.ping_interval,
        }
    }

    pub fn srtt(&self) -> TimeDelta {
        TimeDelta::from_micros(self.srtt_us as i64)
    }

    pub fn rttvar(&self) -> TimeDelta {
        TimeDelta::from_micros(self.rttvar_us as i64)
    }

    pub fn min_rtt(&self) -> TimeDelta {
        if self.min_rtt_us == f64::MAX {
            TimeDelta::zero()
        } else {
            TimeDelta::from_micros(self.min_rtt_us as i64)
        }
    }

    /// RFC 6298: RTO = SRTT + 4*RTTVAR, clamped to [1ms, 60s].
    pub fn rto(&self) -> TimeDelta {
        let rto_us = (self.srtt_us + 4.0 * self.rttvar_us).clamp(1_000.0, 60_000_000.0);
        TimeDelta::from_micros(rto_us as i64)
    }

    pub fn sample_count(&self) -> u64 {
        self.sample_count
    }
}

impl Default for RttTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_sample_seeds_srtt_directly() {
        let mut t = RttTracker::new();
        let now = Timestamp::from_millis(0);
        let ping = t.make_ping(now, 0);
        let pong = RttTracker::make_pong(&ping, 0);
        let later = now + TimeDelta::from_millis(40);
        let rtt = t.handle_pong(&pong, later).unwrap();
        assert_eq!(rtt, TimeDelta::from_millis(40));
        assert_eq!(t.srtt().millis(), 40);
    }

    #[test]
    fn unknown_ping_id_returns_none() {
        let mut t = RttTracker::new();
        let bogus = PongPacket {
            origin_timestamp_us: 0,
            ping_id: 999,
            receive_timestamp_us: 0,
        };
        assert!(t.handle_pong(&bogus, Timestamp::from_millis(0)).is_none());
    }

    #[test]
    fn rto_has_a_floor_of_one_millisecond() {
        let t = RttTracker::new();
        assert_eq!(t.rto(), TimeDelta::from_millis(1));
    }

    #[test]
    fn needs_ping_before_any_ping_sent() {
        let t = RttTracker::new();
        assert!(t.needs_ping(Timestamp::from_millis(0)));
    }
}
