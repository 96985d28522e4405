//! Converts 16-bit wire sequence numbers into a monotonic 64-bit counter.
//!
//! Per the design notes: the core never reasons about wraparound directly;
//! wrapping is confined to this boundary. A seq `0xFFFF` followed by `0x0000`
//! unwraps to contiguous values, not a 65535-packet gap.

const WRAP_PERIOD: i64 = 1 << 16;
const HALF_WRAP: i64 = WRAP_PERIOD / 2;

/// Unwraps a stream of 16-bit sequence numbers into monotonically
/// increasing 64-bit values, assuming no gap between consecutive calls
/// exceeds half the wrap period (the usual RTP/transport-cc assumption).
#[derive(Debug, Clone, Default)]
pub struct SeqUnwrapper {
    last_unwrapped: Option<i64>,
}

impl SeqUnwrapper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Unwrap the next wire sequence number. Must be called in the order
    /// packets are observed (send order on the sender side, arrival order
    /// on the receiver side) for the half-period assumption to hold.
    pub fn unwrap_next(&mut self, wire_seq: u16) -> u64 {
        let wire = wire_seq as i64;
        let unwrapped = match self.last_unwrapped {
            None => wire,
            Some(last) => {
                let last_wire = last.rem_euclid(WRAP_PERIOD);
                let forward_delta = (wire - last_wire).rem_euclid(WRAP_PERIOD);
                let backward_delta = forward_delta - WRAP_PERIOD;
                // Pick whichever delta has the smaller magnitude; ties go forward.
                let delta = if forward_delta <= HALF_WRAP {
                    forward_delta
                } else {
                    backward_delta
                };
                last + delta
            }
        };
        self.last_unwrapped = Some(unwrapped);
        unwrapped as u64
    }

    /// Unwrap without committing state — useful for peeking ahead in a
    /// reordered batch. Does not advance `last_unwrapped`.
    pub fn peek(&self, wire_seq: u16) -> u64 {
        let mut clone = self.clone();
        clone.unwrap_next(wire_seq)
    }

    pub fn reset(&mut self) {
        self.last_unwrapped = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contiguous_sequence_unwraps_to_contiguous() {
        let mut u = SeqUnwrapper::new();
        assert_eq!(u.unwrap_next(10), 10);
        assert_eq!(u.unwrap_next(11), 11);
        assert_eq!(u.unwrap_next(12), 12);
    }

    #[test]
    fn wraparound_is_contiguous_not_a_gap() {
        let mut u = SeqUnwrapper::new();
        assert_eq!(u.unwrap_next(0xFFFE), 0xFFFE);
        assert_eq!(u.unwrap_next(0xFFFF), 0xFFFF);
        assert_eq!(u.unwrap_next(0x0000), 0x10000);
        assert_eq!(u.unwrap_next(0x0001), 0x10001);
    }

    #[test]
    fn large_backward_jump_is_treated_as_reorder_not_new_wrap() {
        let mut u = SeqUnwrapper::new();
        u.unwrap_next(100);
        // A small backward step (reordering) must not be treated as a wrap.
        assert_eq!(u.unwrap_next(99), 99);
    }

    #[test]
    fn multiple_wraps_keep_increasing() {
        let mut u = SeqUnwrapper::new();
        let mut seq: u16 = 0;
        let mut last = 0u64;
        for _ in 0..200_000u32 {
            let unwrapped = u.unwrap_next(seq);
            assert!(unwrapped >= last);
            last = unwrapped;
            seq = seq.wrapping_add(1);
        }
    }
}
