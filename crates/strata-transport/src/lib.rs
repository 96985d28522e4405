//! # strata-transport
//!
//! Send-side congestion control and RTCP transport-feedback pipeline for a
//! WebRTC-like RTP/RTCP media engine: loss-based and delay-based bandwidth
//! estimation arbitrated by a GoogCC-style controller, a leaky-bucket pacer,
//! transport-wide feedback generation/adaptation, and NACK-based loss
//! recovery.
//!
//! ## Crate structure
//!
//! - [`clock`] — `Timestamp`/`TimeDelta`/`DataRate`/`DataSize` value types
//! - [`config`] — `BweConfig`, the single immutable configuration struct
//! - [`error`] — `TransportError`, `ErrorCounters`
//! - [`unwrap`] — 16-bit to 64-bit sequence number unwrapping
//! - [`wire`] — Packet header serialization, control packets, VarInt,
//!   transport-wide feedback RTCP chunks
//! - [`interarrival`] — Packet arrival grouping
//! - [`trendline`] — Delay-gradient trend estimation
//! - [`aimd`] — Additive-increase/multiplicative-decrease rate control
//! - [`delay_bwe`] — Composes interarrival + trendline + AIMD
//! - [`loss_bwe`] — Loss-driven target rate
//! - [`rtt`] — RTT measurement via PING/PONG
//! - [`probe`] — Bitrate probing controller and estimator
//! - [`pacer`] — Leaky-bucket egress pacing
//! - [`feedback`] — Transport-wide feedback generator and adapter
//! - [`nack`] — Gap detection and bounded-retry retransmission requests
//! - [`controller`] — `GoogCcController` arbitration and the runtime
//! - [`pool`] — Sequence/timestamp/priority primitives
//! - [`stats`] — Per-link and aggregate statistics
//! - [`sender`] — Packetisation, pacing, retained-packet store, NACK/feedback
//!   processing
//! - [`receiver`] — Arrival handling, sequence unwrapping, feedback/NACK
//!   generation
//!
//! FEC/RLNC and multi-link bonding are out of scope for this pipeline; the
//! teacher's `arq` module's gap-detection/retry logic moved into
//! [`nack`], and its AIMD state machine into [`aimd`]/[`controller`].

pub mod aimd;
pub mod clock;
pub mod config;
pub mod controller;
pub mod delay_bwe;
pub mod error;
pub mod feedback;
pub mod interarrival;
pub mod loss_bwe;
pub mod nack;
pub mod pacer;
pub mod pool;
pub mod probe;
pub mod receiver;
pub mod rtt;
pub mod sender;
pub mod stats;
pub mod trendline;
pub mod unwrap;
pub mod wire;
