//! Groups packets by send time and emits deltas between completed groups.
//!
//! Grounded on the original inter-arrival grouping design: a new group
//! starts once the send-time delta from the group's first packet exceeds
//! `group_length`. For each pair of successive completed groups, emits
//! `(send_delta, arrival_delta, size_delta)`. A run of reordered arrivals
//! longer than `reordered_reset_threshold` resets the estimator, to recover
//! from clock jumps rather than emit nonsense deltas forever.

use crate::clock::{DataSize, TimeDelta, Timestamp};

#[derive(Debug, Clone, Copy)]
struct Group {
    first_send_time: Timestamp,
    complete_send_time: Timestamp,
    first_arrival_time: Timestamp,
    complete_arrival_time: Timestamp,
    size: DataSize,
}

impl Group {
    fn new(send_time: Timestamp, arrival_time: Timestamp, size: DataSize) -> Self {
        Group {
            first_send_time: send_time,
            complete_send_time: send_time,
            first_arrival_time: arrival_time,
            complete_arrival_time: arrival_time,
            size,
        }
    }
}

/// Emitted for each pair of completed groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArrivalDeltas {
    pub send_delta: TimeDelta,
    pub arrival_delta: TimeDelta,
    pub size_delta: i64,
}

pub struct InterArrival {
    group_length: TimeDelta,
    reordered_reset_threshold: u32,
    current_group: Option<Group>,
    prev_group: Option<Group>,
    num_consecutive_reordered_packets: u32,
}

impl InterArrival {
    pub fn new(group_length: TimeDelta, reordered_reset_threshold: u32) -> Self {
        InterArrival {
            group_length,
            reordered_reset_threshold,
            current_group: None,
            prev_group: None,
            num_consecutive_reordered_packets: 0,
        }
    }

    /// Feed one packet's send/arrival time and size. Returns deltas once a
    /// group completes and there's a previous group to diff against.
    pub fn compute_deltas(
        &mut self,
        send_time: Timestamp,
        arrival_time: Timestamp,
        size: DataSize,
    ) -> Option<ArrivalDeltas> {
        let Some(current) = self.current_group else {
            self.current_group = Some(Group::new(send_time, arrival_time, size));
            return None;
        };

        if send_time < current.first_send_time {
            // Reordered relative to the group's own start; tolerate a few,
            // reset on a sustained run (likely a clock jump).
            self.num_consecutive_reordered_packets += 1;
            if self.num_consecutive_reordered_packets > self.reordered_reset_threshold {
                self.reset();
                self.current_group = Some(Group::new(send_time, arrival_time, size));
            }
            return None;
        }
        self.num_consecutive_reordered_packets = 0;

        let belongs_to_current_group =
            send_time - current.first_send_time <= self.group_length;

        if belongs_to_current_group {
            let mut updated = current;
            updated.complete_send_time = send_time;
            updated.complete_arrival_time = arrival_time;
            updated.size = DataSize::from_bytes(updated.size.bytes() + size.bytes());
            self.current_group = Some(updated);
            return None;
        }

        let result = self.prev_group.map(|prev| ArrivalDeltas {
            send_delta: current.complete_send_time - prev.complete_send_time,
            arrival_delta: current.complete_arrival_time - prev.complete_arrival_time,
            size_delta: current.size.bytes() as i64 - prev.size.bytes() as i64,
        });

        self.prev_group = Some(current);
        self.current_group = Some(Group::new(send_time, arrival_time, size));
        result
    }

    fn reset(&mut self) {
        self.current_group = None;
        self.prev_group = None;
        self.num_consecutive_reordered_packets = 0;
    }
}
