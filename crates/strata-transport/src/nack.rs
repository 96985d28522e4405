//! NACK module: tracks gaps in received sequence numbers and schedules
//! bounded-retry retransmission requests.
//!
//! Adapted from the teacher's `arq::LossDetector`/`RetransmitTracker` pair,
//! replaced with the exact per-entry semantics of §4.8: a missing sequence
//! is scheduled with `send_at_seq = seq + ceil(reorder_quantile)` so a
//! small amount of reordering doesn't trigger an immediate NACK, then a
//! periodic tick fires it either by time (`now - sent_at >= rtt`) or by
//! sequence progress (`sent_at == never && newest_seq >= send_at_seq`).

use crate::clock::{TimeDelta, Timestamp};
use crate::error::ErrorCounters;
use std::collections::{BTreeMap, HashSet};

#[derive(Debug, Clone, Copy)]
struct NackEntry {
    send_at_seq: u64,
    created_at: Timestamp,
    sent_at: Option<Timestamp>,
    retries: u32,
}

/// Emitted when the NACK list overflows and can't be trimmed without
/// dropping un-recovered gaps — the caller should request a keyframe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyframeRequest;

pub struct NackModule {
    max_retries: u32,
    max_list_size: usize,
    reorder_quantile_packets: u64,

    last_seen: Option<u64>,
    newest_seq: u64,
    last_keyframe_seq: Option<u64>,
    entries: BTreeMap<u64, NackEntry>,
    recovered: HashSet<u64>,
    pending_keyframe_request: bool,
}

impl NackModule {
    pub fn new(max_retries: u32, max_list_size: usize, reorder_quantile_packets: u32) -> Self {
        NackModule {
            max_retries,
            max_list_size,
            reorder_quantile_packets: reorder_quantile_packets as u64,
            last_seen: None,
            newest_seq: 0,
            last_keyframe_seq: None,
            entries: BTreeMap::new(),
            recovered: HashSet::new(),
            pending_keyframe_request: false,
        }
    }

    pub fn from_config(cfg: &crate::config::BweConfig) -> Self {
        Self::new(
            cfg.nack_max_retries,
            cfg.nack_max_list_size,
            cfg.nack_reorder_quantile_packets,
        )
    }

    /// Mark a sequence recovered out-of-band (FEC/RTX); suppresses any
    /// further NACKs for it.
    pub fn mark_recovered(&mut self, seq: u64) {
        self.recovered.insert(seq);
        self.entries.remove(&seq);
    }

    /// Record the sequence number of a received keyframe, so a future
    /// capacity overflow can drop everything before it: packets the
    /// decoder has already moved past are no longer worth retransmitting.
    pub fn on_keyframe_received(&mut self, seq: u64) {
        self.last_keyframe_seq = Some(self.last_keyframe_seq.map_or(seq, |k| k.max(seq)));
    }

    /// Takes and clears the pending keyframe request raised by the last
    /// capacity overflow, if any (§4.8/§7: "request a full keyframe").
    pub fn poll_keyframe_request(&mut self) -> Option<KeyframeRequest> {
        if self.pending_keyframe_request {
            self.pending_keyframe_request = false;
            Some(KeyframeRequest)
        } else {
            None
        }
    }

    /// Feed one received sequence number, per §4.8 steps 1-4. Returns the
    /// prior retry count when a reordered (late) arrival clears a tracked
    /// gap, so the caller can fold it into jitter statistics.
    pub fn on_received(
        &mut self,
        seq: u64,
        now: Timestamp,
        errors: &mut ErrorCounters,
    ) -> Option<u32> {
        let Some(last_seen) = self.last_seen else {
            self.last_seen = Some(seq);
            self.newest_seq = seq;
            return None;
        };

        if seq == last_seen {
            return None; // duplicate, ignore
        }

        if seq < last_seen {
            // Reordered: if we'd tracked it as missing, it has now arrived.
            self.recovered.remove(&seq);
            return self.entries.remove(&seq).map(|entry| entry.retries);
        }

        // seq > last_seen
        if seq > last_seen + 1 {
            for missing in (last_seen + 1)..seq {
                if self.recovered.contains(&missing) {
                    continue;
                }
                self.entries.entry(missing).or_insert(NackEntry {
                    send_at_seq: missing + self.reorder_quantile_packets,
                    created_at: now,
                    sent_at: None,
                    retries: 0,
                });
            }
        }
        self.last_seen = Some(seq);
        self.newest_seq = self.newest_seq.max(seq);

        if let Some(KeyframeRequest) = self.enforce_capacity() {
            errors.record_resource_exhaustion();
            self.pending_keyframe_request = true;
        }
        None
    }

    /// Periodic tick (default every 20ms): returns the sequences to NACK
    /// this round. Entries past `max_retries` are dropped.
    pub fn tick(&mut self, now: Timestamp, rtt: TimeDelta) -> Vec<u64> {
        let mut to_send = Vec::new();
        let mut drop_list = Vec::new();

        for (&seq, entry) in self.entries.iter_mut() {
            let time_triggered = entry
                .sent_at
                .map(|sent_at| now - sent_at >= rtt)
                .unwrap_or(false);
            let seq_triggered = entry.sent_at.is_none() && self.newest_seq >= entry.send_at_seq;

            if time_triggered || seq_triggered {
                entry.retries += 1;
                entry.sent_at = Some(now);
                if entry.retries > self.max_retries {
                    drop_list.push(seq);
                } else {
                    to_send.push(seq);
                }
            }
        }

        for seq in drop_list {
            self.entries.remove(&seq);
        }

        to_send
    }

    /// §4.8: on overflow, first drop entries for sequences before the next
    /// keyframe boundary (the decoder has already moved past them, so
    /// retransmitting them is moot); if the list is still over capacity,
    /// clear it outright and return `Some(KeyframeRequest)` so the caller
    /// asks the sender for a fresh keyframe.
    fn enforce_capacity(&mut self) -> Option<KeyframeRequest> {
        if self.entries.len() <= self.max_list_size {
            return None;
        }
        if let Some(boundary) = self.last_keyframe_seq {
            self.entries.retain(|&seq, _| seq >= boundary);
        }
        if self.entries.len() <= self.max_list_size {
            return None;
        }
        self.entries.clear();
        Some(KeyframeRequest)
    }

    pub fn pending_count(&self) -> usize {
        self.entries.len()
    }

    pub fn is_tracking(&self, seq: u64) -> bool {
        self.entries.contains_key(&seq)
    }
}
