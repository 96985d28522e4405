#![no_main]

use bytes::Bytes;
use libfuzzer_sys::fuzz_target;
use strata_transport::clock::Timestamp;
use strata_transport::receiver::{Receiver, ReceiverConfig};

/// Fuzz the receiver state machine with arbitrary wire-format bytes.
///
/// This target exercises:
/// - Packet parsing inside Receiver::receive()
/// - Loss detection (gap tracking, NACK generation)
/// - Duplicate/late-packet suppression
/// - Transport-wide feedback building
///
/// The receiver must never panic, even on garbage input.
fuzz_target!(|data: &[u8]| {
    let t0 = Timestamp::from_millis(0);

    let mut rx = Receiver::new(ReceiverConfig::default(), 42, 42);
    rx.receive(Bytes::copy_from_slice(data), t0);
    for _ in rx.drain_events() {}

    // If the input is long enough, split it into two packets fed at
    // successive instants to exercise gap detection and NACK scheduling.
    if data.len() >= 16 {
        let mut rx2 = Receiver::new(ReceiverConfig::default(), 42, 42);

        let mid = data.len() / 2;
        rx2.receive(Bytes::copy_from_slice(&data[..mid]), t0);
        rx2.receive(
            Bytes::copy_from_slice(&data[mid..]),
            t0 + strata_transport::clock::TimeDelta::from_millis(5),
        );
        for _ in rx2.drain_events() {}

        rx2.tick_nacks(
            t0 + strata_transport::clock::TimeDelta::from_millis(200),
            strata_transport::clock::TimeDelta::from_millis(50),
        );
        for _ in rx2.drain_events() {}
    }
});
