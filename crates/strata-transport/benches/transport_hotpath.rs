//! Per-packet processing latency benchmarks for strata-transport.
//!
//! Measures latency contributions of the hot-path components:
//! - VarInt encode/decode
//! - PacketHeader encode/decode
//! - Full Packet encode/decode (various payload sizes)
//! - Sender.send()/poll_pacer() (the full send pipeline: queue + pace)
//! - NACK module tick/on_received
//! - Transport-wide feedback generate/process round trip
//!
//! Run with: cargo bench --package strata-transport

use bytes::{Bytes, BytesMut};
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};

use strata_transport::clock::{DataRate, TimeDelta, Timestamp};
use strata_transport::config::BweConfig;
use strata_transport::error::ErrorCounters;
use strata_transport::nack::NackModule;
use strata_transport::pool::Priority;
use strata_transport::receiver::{Receiver, ReceiverConfig, ReceiverEvent};
use strata_transport::sender::{Sender, SenderConfig};
use strata_transport::wire::{Packet, PacketHeader, VarInt};

// ─── VarInt ──────────────────────────────────────────────────────────────

fn bench_varint_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("varint_encode");

    // 1-byte encoding (0..63)
    group.bench_function("1byte", |b| {
        let vi = VarInt::from_u64(42);
        b.iter(|| {
            let mut buf = BytesMut::with_capacity(8);
            black_box(vi).encode(&mut buf);
            black_box(buf);
        });
    });

    // 2-byte encoding (64..16383)
    group.bench_function("2byte", |b| {
        let vi = VarInt::from_u64(1000);
        b.iter(|| {
            let mut buf = BytesMut::with_capacity(8);
            black_box(vi).encode(&mut buf);
            black_box(buf);
        });
    });

    // 4-byte encoding (16384..2^30-1)
    group.bench_function("4byte", |b| {
        let vi = VarInt::from_u64(100_000);
        b.iter(|| {
            let mut buf = BytesMut::with_capacity(8);
            black_box(vi).encode(&mut buf);
            black_box(buf);
        });
    });

    // 8-byte encoding (2^30..)
    group.bench_function("8byte", |b| {
        let vi = VarInt::from_u64(2_000_000_000);
        b.iter(|| {
            let mut buf = BytesMut::with_capacity(8);
            black_box(vi).encode(&mut buf);
            black_box(buf);
        });
    });

    group.finish();
}

fn bench_varint_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("varint_decode");

    for (name, val) in [
        ("1byte", 42u64),
        ("2byte", 1000),
        ("4byte", 100_000),
        ("8byte", 2_000_000_000),
    ] {
        let vi = VarInt::from_u64(val);
        let mut buf = BytesMut::with_capacity(8);
        vi.encode(&mut buf);
        let encoded = buf.freeze();

        group.bench_function(name, |b| {
            b.iter(|| {
                let mut r = encoded.clone();
                black_box(VarInt::decode(&mut r));
            });
        });
    }

    group.finish();
}

// ─── PacketHeader ────────────────────────────────────────────────────────

fn bench_header_encode(c: &mut Criterion) {
    let hdr = PacketHeader::data(42, 1_000_000, 1200);
    c.bench_function("header_encode", |b| {
        b.iter(|| {
            let mut buf = BytesMut::with_capacity(16);
            black_box(&hdr).encode(&mut buf);
            black_box(buf);
        });
    });
}

fn bench_header_decode(c: &mut Criterion) {
    let hdr = PacketHeader::data(42, 1_000_000, 1200);
    let mut buf = BytesMut::with_capacity(16);
    hdr.encode(&mut buf);
    let encoded = buf.freeze();

    c.bench_function("header_decode", |b| {
        b.iter(|| {
            let mut r = encoded.clone();
            black_box(PacketHeader::decode(&mut r));
        });
    });
}

// ─── Full Packet ─────────────────────────────────────────────────────────

fn bench_packet_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("packet_encode");

    for size in [100, 500, 1200, 4000] {
        let pkt = Packet::new_data(100, 42_000, Bytes::from(vec![0xAB; size]));
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_function(format!("{size}B"), |b| {
            b.iter(|| {
                black_box(black_box(&pkt).encode());
            });
        });
    }

    group.finish();
}

fn bench_packet_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("packet_decode");

    for size in [100, 500, 1200, 4000] {
        let pkt = Packet::new_data(100, 42_000, Bytes::from(vec![0xAB; size]));
        let encoded = pkt.encode().freeze();
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_function(format!("{size}B"), |b| {
            b.iter(|| {
                let mut r = encoded.clone();
                black_box(Packet::decode(&mut r));
            });
        });
    }

    group.finish();
}

// ─── Sender Pipeline ─────────────────────────────────────────────────────

fn bench_sender_send(c: &mut Criterion) {
    let mut group = c.benchmark_group("sender_send");

    for size in [100, 1200, 4000] {
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_function(format!("{size}B"), |b| {
            let mut sender = Sender::new(SenderConfig::default(), 42, &BweConfig::default());
            sender.set_pacing_rates(DataRate::from_kbps(10_000), DataRate::zero());
            let mut now = Timestamp::from_millis(0);

            b.iter(|| {
                let payload = Bytes::from(vec![0xAB; size]);
                let seq = sender.send(payload, Priority::Standard, now);
                black_box(seq);
                // Drain the pacer to prevent unbounded queue growth.
                sender.poll_pacer(now).into_iter().for_each(|p| {
                    black_box(p);
                });
                now = now + TimeDelta::from_millis(5);
            });
        });
    }

    group.finish();
}

fn bench_sender_poll_32_packets(c: &mut Criterion) {
    c.bench_function("sender_poll_32_packets", |b| {
        let mut sender = Sender::new(SenderConfig::default(), 42, &BweConfig::default());
        sender.set_pacing_rates(DataRate::from_kbps(10_000), DataRate::zero());
        let mut now = Timestamp::from_millis(0);

        b.iter(|| {
            for i in 0..32u8 {
                sender.send(Bytes::from(vec![i; 1200]), Priority::Standard, now);
            }
            let count = sender.poll_pacer(now).len();
            black_box(count);
            now = now + TimeDelta::from_millis(5);
        });
    });
}

// ─── NACK module ─────────────────────────────────────────────────────────

fn bench_nack_tick(c: &mut Criterion) {
    c.bench_function("nack_tick_1000_tracked_gaps", |b| {
        let rtt = TimeDelta::from_millis(50);
        b.iter_batched(
            || {
                let mut nack = NackModule::new(5, 4096, 1);
                let mut errors = ErrorCounters::new();
                let t0 = Timestamp::from_millis(0);
                // Every 10th sequence is a gap the module keeps tracking.
                for seq in 1u64..=2_000 {
                    if seq % 10 != 0 {
                        nack.on_received(seq, t0, &mut errors);
                    }
                }
                nack
            },
            |mut nack| {
                black_box(nack.tick(Timestamp::from_millis(1_000), rtt));
            },
            criterion::BatchSize::SmallInput,
        );
    });
}

// ─── Transport-wide feedback round trip ─────────────────────────────────

fn bench_feedback_roundtrip(c: &mut Criterion) {
    c.bench_function("feedback_build_then_process_100_packets", |b| {
        b.iter(|| {
            let mut sender = Sender::new(SenderConfig::default(), 7, &BweConfig::default());
            sender.set_pacing_rates(DataRate::from_kbps(10_000), DataRate::zero());
            let mut receiver = Receiver::new(ReceiverConfig::default(), 7, 7);
            let t0 = Timestamp::from_millis(0);

            for _ in 0..100u32 {
                sender.send(Bytes::from(vec![0xAB; 200]), Priority::Standard, t0);
            }
            let out = sender.poll_pacer(t0);
            for pkt in out {
                receiver.receive(pkt.data, t0);
            }
            receiver.drain_events().for_each(drop);

            receiver.tick_feedback(t0);
            let mut errors = ErrorCounters::new();
            for event in receiver.drain_events() {
                if let ReceiverEvent::SendFeedback(fb) = event {
                    let base = fb.base_sequence as u64;
                    black_box(sender.process_feedback(&fb, base, t0, &mut errors));
                }
            }
        });
    });
}

// ─── Roundtrip ───────────────────────────────────────────────────────────

fn bench_packet_roundtrip(c: &mut Criterion) {
    c.bench_function("packet_roundtrip_1200B", |b| {
        b.iter(|| {
            let pkt = Packet::new_data(100, 42_000, Bytes::from(vec![0xAB; 1200]));
            let encoded = pkt.encode();
            let decoded = Packet::decode(&mut encoded.freeze());
            black_box(decoded);
        });
    });
}

criterion_group!(
    benches,
    bench_varint_encode,
    bench_varint_decode,
    bench_header_encode,
    bench_header_decode,
    bench_packet_encode,
    bench_packet_decode,
    bench_sender_send,
    bench_sender_poll_32_packets,
    bench_nack_tick,
    bench_feedback_roundtrip,
    bench_packet_roundtrip,
);
criterion_main!(benches);
