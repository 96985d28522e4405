//! # Strata Wire Format
//!
//! Custom lightweight packet header — no RTP dependency.
//!
//! ## Data Packet Header (variable 7-15 bytes)
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |V=1|T| F |K|C|R|          Payload Length (16)                   |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                    Sequence Number (VarInt, 1-8 bytes)         |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                    Timestamp (32-bit, µs)                      |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! ## Control packets (T=1) carry a 1-byte subtype after the base header.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::fmt;

// ─── Constants ───────────────────────────────────────────────────────────────

/// Protocol version.
pub const PROTOCOL_VERSION: u8 = 1;

/// Minimum header size: 1 (flags) + 2 (payload len) + 1 (min varint) + 4 (timestamp) = 8.
pub const MIN_HEADER_SIZE: usize = 8;

/// Maximum header size: 1 + 2 + 8 + 4 = 15.
pub const MAX_HEADER_SIZE: usize = 15;

/// Maximum payload in a single packet (64 KiB - 1).
pub const MAX_PAYLOAD_LEN: usize = u16::MAX as usize;

// ─── VarInt (QUIC-style, RFC 9000 §16) ──────────────────────────────────────

/// A 62-bit variable-length integer encoded in 1, 2, 4, or 8 bytes.
///
/// Encoding:
/// - `0x00..0x3F` → 1 byte  (6 bits)
/// - `0x40..0x3FFF` → 2 bytes (14 bits), prefix `01`
/// - `0x4000..0x3FFF_FFFF` → 4 bytes (30 bits), prefix `10`
/// - `0x4000_0000..0x3FFF_FFFF_FFFF_FFFF` → 8 bytes (62 bits), prefix `11`
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VarInt(u64);

impl VarInt {
    /// Maximum representable value: 2^62 - 1.
    pub const MAX: u64 = (1 << 62) - 1;

    /// Create a VarInt, returning `None` if the value exceeds 62 bits.
    #[inline]
    pub fn new(val: u64) -> Option<Self> {
        if val <= Self::MAX {
            Some(VarInt(val))
        } else {
            None
        }
    }

    /// Create a VarInt from a u64, panicking if out of range.
    #[inline]
    pub fn from_u64(val: u64) -> Self {
        Self::new(val).expect("VarInt value exceeds 62-bit limit")
    }

    /// Get the underlying u64 value.
    #[inline]
    pub fn value(self) -> u64 {
        self.0
    }

    /// Number of bytes this value encodes to.
    #[inline]
    pub fn encoded_len(self) -> usize {
        if self.0 < 0x40 {
            1
        } else if self.0 < 0x4000 {
            2
        } else if self.0 < 0x4000_0000 {
            4
        } else {
            8
        }
    }

    /// Encode into a mutable buffer. Panics if insufficient space.
    pub fn encode(&self, buf: &mut impl BufMut) {
        match self.encoded_len() {
            1 => buf.put_u8(self.0 as u8),
            2 => buf.put_u16(0x4000 | self.0 as u16),
            4 => buf.put_u32(0x8000_0000 | self.0 as u32),
            8 => buf.put_u64(0xC000_0000_0000_0000 | self.0),
            _ => unreachable!(),
        }
    }

    /// Decode from a buffer. Returns `None` if buffer is too short or value is invalid.
    pub fn decode(buf: &mut impl Buf) -> Option<Self> {
        if !buf.has_remaining() {
            return None;
        }

        let first = buf.chunk()[0];
        let prefix = first >> 6;

        let len = 1usize << prefix;
        if buf.remaining() < len {
            return None;
        }

        let val = match len {
            1 => {
                buf.advance(1);
                (first & 0x3F) as u64
            }
            2 => {
                let raw = buf.get_u16();
                (raw & 0x3FFF) as u64
            }
            4 => {
                let raw = buf.get_u32();
                (raw & 0x3FFF_FFFF) as u64
            }
            8 => {
                let raw = buf.get_u64();
                raw & 0x3FFF_FFFF_FFFF_FFFF
            }
            _ => unreachable!(),
        };

        Some(VarInt(val))
    }
}

impl fmt::Debug for VarInt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VarInt({})", self.0)
    }
}

impl fmt::Display for VarInt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<u32> for VarInt {
    fn from(v: u32) -> Self {
        VarInt(v as u64)
    }
}

impl From<u16> for VarInt {
    fn from(v: u16) -> Self {
        VarInt(v as u64)
    }
}

impl From<u8> for VarInt {
    fn from(v: u8) -> Self {
        VarInt(v as u64)
    }
}

// ─── Packet Type ─────────────────────────────────────────────────────────────

/// Whether the packet carries data or control information.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketType {
    Data = 0,
    Control = 1,
}

// ─── Fragment Flags ──────────────────────────────────────────────────────────

/// Fragmentation status of a data packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Fragment {
    /// Complete packet (not fragmented).
    Complete = 0b00,
    /// First fragment.
    Start = 0b01,
    /// Middle fragment.
    Middle = 0b10,
    /// Last fragment.
    End = 0b11,
}

impl Fragment {
    fn from_bits(bits: u8) -> Self {
        match bits & 0b11 {
            0b00 => Fragment::Complete,
            0b01 => Fragment::Start,
            0b10 => Fragment::Middle,
            0b11 => Fragment::End,
            _ => unreachable!(),
        }
    }
}

// ─── Control Subtypes ────────────────────────────────────────────────────────

/// Control packet sub-types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ControlType {
    Nack = 0x02,
    Ping = 0x06,
    Pong = 0x07,
    TransportFeedback = 0x0A,
}

impl ControlType {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0x02 => Some(ControlType::Nack),
            0x06 => Some(ControlType::Ping),
            0x07 => Some(ControlType::Pong),
            0x0A => Some(ControlType::TransportFeedback),
            _ => None,
        }
    }
}

// ─── Packet Header ──────────────────────────────────────────────────────────

/// Decoded packet header — present on every Strata packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketHeader {
    /// Protocol version (must be 1).
    pub version: u8,
    /// Data or control packet.
    pub packet_type: PacketType,
    /// Fragment status (meaningful for data packets).
    pub fragment: Fragment,
    /// Whether this packet contains a keyframe.
    pub is_keyframe: bool,
    /// Whether this packet contains codec config (SPS/PPS/VPS).
    pub is_config: bool,
    /// Payload length in bytes (after header).
    pub payload_len: u16,
    /// 62-bit sequence number.
    pub sequence: VarInt,
    /// Microsecond timestamp (wraps every ~71 min).
    pub timestamp_us: u32,
}

impl PacketHeader {
    /// Encode the header into a buffer.
    pub fn encode(&self, buf: &mut BytesMut) {
        // Flags byte: VV T FF K C R
        let flags: u8 = ((self.version & 0x03) << 6)
            | ((self.packet_type as u8) << 5)
            | ((self.fragment as u8) << 3)
            | ((self.is_keyframe as u8) << 2)
            | ((self.is_config as u8) << 1);
        buf.put_u8(flags);

        // Payload length (16-bit big endian)
        buf.put_u16(self.payload_len);

        // Sequence number (VarInt)
        self.sequence.encode(buf);

        // Timestamp (32-bit µs)
        buf.put_u32(self.timestamp_us);
    }

    /// Decode a header from a buffer. Returns `None` if buffer is too short or invalid.
    pub fn decode(buf: &mut impl Buf) -> Option<Self> {
        if buf.remaining() < MIN_HEADER_SIZE {
            return None;
        }

        let flags = buf.get_u8();
        let version = (flags >> 6) & 0x03;
        if version != PROTOCOL_VERSION {
            return None;
        }

        let packet_type = if (flags >> 5) & 1 == 1 {
            PacketType::Control
        } else {
            PacketType::Data
        };
        let fragment = Fragment::from_bits((flags >> 3) & 0x03);
        let is_keyframe = (flags >> 2) & 1 == 1;
        let is_config = (flags >> 1) & 1 == 1;

        let payload_len = buf.get_u16();
        let sequence = VarInt::decode(buf)?;
        if buf.remaining() < 4 {
            return None;
        }
        let timestamp_us = buf.get_u32();

        Some(PacketHeader {
            version,
            packet_type,
            fragment,
            is_keyframe,
            is_config,
            payload_len,
            sequence,
            timestamp_us,
        })
    }

    /// Total encoded size of this header.
    pub fn encoded_len(&self) -> usize {
        1 + 2 + self.sequence.encoded_len() + 4
    }

    /// Create a new data packet header.
    pub fn data(sequence: u64, timestamp_us: u32, payload_len: u16) -> Self {
        PacketHeader {
            version: PROTOCOL_VERSION,
            packet_type: PacketType::Data,
            fragment: Fragment::Complete,
            is_keyframe: false,
            is_config: false,
            payload_len,
            sequence: VarInt::from_u64(sequence),
            timestamp_us,
        }
    }

    /// Create a new control packet header.
    pub fn control(sequence: u64, timestamp_us: u32, payload_len: u16) -> Self {
        PacketHeader {
            version: PROTOCOL_VERSION,
            packet_type: PacketType::Control,
            fragment: Fragment::Complete,
            is_keyframe: false,
            is_config: false,
            payload_len,
            sequence: VarInt::from_u64(sequence),
            timestamp_us,
        }
    }

    /// Set this as a keyframe packet.
    pub fn with_keyframe(mut self) -> Self {
        self.is_keyframe = true;
        self
    }

    /// Set this as a codec config packet.
    pub fn with_config(mut self) -> Self {
        self.is_config = true;
        self
    }

    /// Set fragmentation.
    pub fn with_fragment(mut self, frag: Fragment) -> Self {
        self.fragment = frag;
        self
    }
}

// ─── Control Packet Bodies ──────────────────────────────────────────────────

/// NACK packet: range-based loss report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NackPacket {
    /// List of (start_seq, count) ranges of missing packets.
    pub ranges: Vec<NackRange>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NackRange {
    pub start: VarInt,
    pub count: VarInt,
}

impl NackPacket {
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(ControlType::Nack as u8);
        VarInt::from_u64(self.ranges.len() as u64).encode(buf);
        for range in &self.ranges {
            range.start.encode(buf);
            range.count.encode(buf);
        }
    }

    pub fn decode(buf: &mut impl Buf) -> Option<Self> {
        let num_ranges = VarInt::decode(buf)?.value() as usize;
        if num_ranges > 256 {
            return None; // sanity limit
        }
        let mut ranges = Vec::with_capacity(num_ranges);
        for _ in 0..num_ranges {
            let start = VarInt::decode(buf)?;
            let count = VarInt::decode(buf)?;
            ranges.push(NackRange { start, count });
        }
        Some(NackPacket { ranges })
    }
}

/// PING packet for RTT measurement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PingPacket {
    /// Sender's timestamp in µs when the ping was sent.
    pub origin_timestamp_us: u32,
    /// Ping sequence (for matching with pong).
    pub ping_id: u16,
}

impl PingPacket {
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(ControlType::Ping as u8);
        buf.put_u32(self.origin_timestamp_us);
        buf.put_u16(self.ping_id);
    }

    pub fn decode(buf: &mut impl Buf) -> Option<Self> {
        if buf.remaining() < 6 {
            return None;
        }
        Some(PingPacket {
            origin_timestamp_us: buf.get_u32(),
            ping_id: buf.get_u16(),
        })
    }
}

/// PONG response to a PING.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PongPacket {
    /// Echoed origin timestamp from the PING.
    pub origin_timestamp_us: u32,
    /// Echoed ping ID.
    pub ping_id: u16,
    /// Receiver's timestamp when the ping was received.
    pub receive_timestamp_us: u32,
}

impl PongPacket {
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(ControlType::Pong as u8);
        buf.put_u32(self.origin_timestamp_us);
        buf.put_u16(self.ping_id);
        buf.put_u32(self.receive_timestamp_us);
    }

    pub fn decode(buf: &mut impl Buf) -> Option<Self> {
        if buf.remaining() < 10 {
            return None;
        }
        Some(PongPacket {
            origin_timestamp_us: buf.get_u32(),
            ping_id: buf.get_u16(),
            receive_timestamp_us: buf.get_u32(),
        })
    }
}

// ─── Transport-wide congestion control feedback (RTCP FMT=15, PT=205) ──────

/// One packet's receive status as tracked while building a feedback packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketStatus {
    NotReceived,
    /// Receive delta in units of 250us, fits in one byte: `[0, 255]`.
    SmallDelta(u8),
    /// Receive delta in units of 250us, signed 16-bit: `[-8192*4, 8191*4+3]` ticks.
    LargeDelta(i16),
}

impl PacketStatus {
    fn delta_size(self) -> u8 {
        match self {
            PacketStatus::NotReceived => 0,
            PacketStatus::SmallDelta(_) => 1,
            PacketStatus::LargeDelta(_) => 2,
        }
    }
}

/// Quantum of a receive delta: 250us, per the wire format in §6.
pub const DELTA_SCALE_FACTOR_US: i64 = 250;
/// Reference time ticks are 64ms units; the field is a signed 24-bit value.
pub const REFERENCE_TIME_TICK_US: i64 = 64_000;

const MAX_RUN_LENGTH: usize = 0x1fff; // 13-bit field
const MAX_ONE_BIT_CAPACITY: usize = 14;
const MAX_TWO_BIT_CAPACITY: usize = 7;

/// Accumulates delta-sizes (0/1/2) and emits them as the smallest legal
/// chunk encoding once the accumulator can't take another status. Greedy,
/// matching the source's `LastChunk`: run-length is preferred when every
/// status in the run is identical, otherwise a bit-vector chunk.
#[derive(Debug, Default)]
struct LastChunk {
    delta_sizes: Vec<u8>,
}

impl LastChunk {
    fn is_empty(&self) -> bool {
        self.delta_sizes.is_empty()
    }

    fn can_add(&self, delta_size: u8) -> bool {
        if self.delta_sizes.is_empty() {
            return true;
        }
        let all_same = self.delta_sizes.iter().all(|&d| d == self.delta_sizes[0]);
        if all_same && self.delta_sizes[0] == delta_size {
            // Could still become a run-length chunk.
            return self.delta_sizes.len() < MAX_RUN_LENGTH;
        }
        // Otherwise it must fit as a vector chunk.
        let has_large = self.delta_sizes.iter().any(|&d| d == 2) || delta_size == 2;
        let cap = if has_large {
            MAX_TWO_BIT_CAPACITY
        } else {
            MAX_ONE_BIT_CAPACITY
        };
        self.delta_sizes.len() < cap
    }

    fn add(&mut self, delta_size: u8) {
        self.delta_sizes.push(delta_size);
    }

    fn clear(&mut self) {
        self.delta_sizes.clear();
    }

    /// Encode everything accumulated so far into one 16-bit chunk, choosing
    /// run-length when legal (smaller encoding for long uniform runs),
    /// otherwise a one- or two-bit vector.
    fn emit(&self) -> u16 {
        let all_same = self.delta_sizes.iter().all(|&d| d == self.delta_sizes[0]);
        if all_same && self.delta_sizes.len() <= MAX_RUN_LENGTH {
            return Self::encode_run_length(self.delta_sizes[0], self.delta_sizes.len());
        }
        let has_large = self.delta_sizes.iter().any(|&d| d == 2);
        if !has_large && self.delta_sizes.len() <= MAX_ONE_BIT_CAPACITY {
            Self::encode_one_bit(&self.delta_sizes)
        } else {
            Self::encode_two_bit(&self.delta_sizes)
        }
    }

    fn encode_run_length(status: u8, run_length: usize) -> u16 {
        // T=0 (bit15), status (bits 14-13), run length (bits 12-0).
        ((status as u16) << 13) | (run_length as u16 & 0x1fff)
    }

    fn encode_one_bit(sizes: &[u8]) -> u16 {
        // TS=10 (bits 15-14), 14 bits, 1 = small delta received.
        let mut bits: u16 = 0;
        for (i, &d) in sizes.iter().enumerate().take(MAX_ONE_BIT_CAPACITY) {
            if d != 0 {
                bits |= 1 << (MAX_ONE_BIT_CAPACITY - 1 - i);
            }
        }
        (0b10 << 14) | bits
    }

    fn encode_two_bit(sizes: &[u8]) -> u16 {
        // TS=11 (bits 15-14), 7 x 2-bit statuses.
        let mut bits: u16 = 0;
        for (i, &d) in sizes.iter().enumerate().take(MAX_TWO_BIT_CAPACITY) {
            bits |= (d as u16 & 0b11) << (2 * (MAX_TWO_BIT_CAPACITY - 1 - i));
        }
        (0b11 << 14) | bits
    }

    fn decode(chunk: u16, max_size: usize, out: &mut Vec<u8>) {
        let top_bit = (chunk >> 15) & 1;
        if top_bit == 0 {
            let status = ((chunk >> 13) & 0b11) as u8;
            let run_length = (chunk & 0x1fff) as usize;
            for _ in 0..run_length.min(max_size) {
                out.push(status);
            }
            return;
        }
        let ts = (chunk >> 14) & 0b11;
        if ts == 0b10 {
            for i in 0..MAX_ONE_BIT_CAPACITY.min(max_size) {
                let bit = (chunk >> (MAX_ONE_BIT_CAPACITY - 1 - i)) & 1;
                out.push(if bit != 0 { 1 } else { 0 });
            }
        } else {
            for i in 0..MAX_TWO_BIT_CAPACITY.min(max_size) {
                let shift = 2 * (MAX_TWO_BIT_CAPACITY - 1 - i);
                out.push(((chunk >> shift) & 0b11) as u8);
            }
        }
    }
}

/// Transport-wide congestion control feedback packet (RTCP FMT=15, PT=205).
///
/// Built by the receive-side generator from `(seq, arrival_time)` pairs and
/// parsed by the send-side adapter. Encoding follows §6 exactly: base
/// sequence, 24-bit reference time in 64ms ticks, greedily-encoded status
/// chunks, then receive-delta bytes in sequence order.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportFeedback {
    pub sender_ssrc: u32,
    pub media_ssrc: u32,
    pub base_sequence: u16,
    /// Reference time, in 64ms ticks, signed 24-bit (stored widened).
    pub reference_time_ticks: i32,
    pub feedback_packet_count: u8,
    pub statuses: Vec<PacketStatus>,
}

impl TransportFeedback {
    /// Encode with a leading [`ControlType::TransportFeedback`] subtype
    /// byte, for embedding in a [`ControlBody`]-multiplexed stream.
    pub fn encode_as_control(&self) -> BytesMut {
        let mut buf = BytesMut::new();
        buf.put_u8(ControlType::TransportFeedback as u8);
        buf.extend_from_slice(&self.encode());
        buf
    }

    /// Encode into the RTCP payload described in §6 (after the common
    /// 4-byte RTCP header `V|P|FMT|PT|length`, which the transport layer
    /// that owns the RTCP session prepends).
    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(64 + self.statuses.len() * 2);
        buf.put_u32(self.sender_ssrc);
        buf.put_u32(self.media_ssrc);
        buf.put_u16(self.base_sequence);
        buf.put_u16(self.statuses.len() as u16);
        let ref_time_field = (self.reference_time_ticks as u32) & 0x00ff_ffff;
        buf.put_u32((ref_time_field << 8) | self.feedback_packet_count as u32);

        let mut chunk = LastChunk::default();
        let mut chunks: Vec<u16> = Vec::new();
        for status in &self.statuses {
            let delta_size = status.delta_size();
            if !chunk.can_add(delta_size) {
                chunks.push(chunk.emit());
                chunk.clear();
            }
            chunk.add(delta_size);
        }
        if !chunk.is_empty() {
            chunks.push(chunk.emit());
        }
        for c in &chunks {
            buf.put_u16(*c);
        }

        for status in &self.statuses {
            match status {
                PacketStatus::NotReceived => {}
                PacketStatus::SmallDelta(d) => buf.put_u8(*d),
                PacketStatus::LargeDelta(d) => buf.put_i16(*d),
            }
        }

        let pad = (4 - (buf.len() % 4)) % 4;
        for _ in 0..pad {
            buf.put_u8(0);
        }
        buf
    }

    /// Decode a feedback payload (without the common RTCP header). Rejects
    /// `status_count = 0` as invalid per the boundary behavior in §8.
    pub fn decode(buf: &mut impl Buf) -> Option<Self> {
        if buf.remaining() < 12 {
            return None;
        }
        let sender_ssrc = buf.get_u32();
        let media_ssrc = buf.get_u32();
        let base_sequence = buf.get_u16();
        let status_count = buf.get_u16() as usize;
        if status_count == 0 {
            return None;
        }
        let ref_and_count = buf.get_u32();
        let reference_time_ticks = ((ref_and_count >> 8) & 0x00ff_ffff) as i32;
        let feedback_packet_count = (ref_and_count & 0xff) as u8;

        let mut delta_sizes: Vec<u8> = Vec::with_capacity(status_count);
        while delta_sizes.len() < status_count {
            if buf.remaining() < 2 {
                return None;
            }
            let chunk = buf.get_u16();
            LastChunk::decode(chunk, status_count - delta_sizes.len(), &mut delta_sizes);
        }

        let mut statuses = Vec::with_capacity(status_count);
        for &size in &delta_sizes {
            let status = match size {
                0 => PacketStatus::NotReceived,
                1 => {
                    if !buf.has_remaining() {
                        return None;
                    }
                    PacketStatus::SmallDelta(buf.get_u8())
                }
                2 => {
                    if buf.remaining() < 2 {
                        return None;
                    }
                    PacketStatus::LargeDelta(buf.get_i16())
                }
                _ => return None,
            };
            statuses.push(status);
        }

        Some(TransportFeedback {
            sender_ssrc,
            media_ssrc,
            base_sequence,
            reference_time_ticks,
            feedback_packet_count,
            statuses,
        })
    }
}

// ─── Full Packet Serialization ──────────────────────────────────────────────

/// A fully serialized Strata packet (header + payload).
#[derive(Debug, Clone)]
pub struct Packet {
    pub header: PacketHeader,
    pub payload: Bytes,
}

impl Packet {
    /// Serialize the entire packet (header + payload) into a new `BytesMut`.
    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(self.header.encoded_len() + self.payload.len());
        self.header.encode(&mut buf);
        buf.extend_from_slice(&self.payload);
        buf
    }

    /// Decode a complete packet from raw bytes.
    pub fn decode(data: &mut impl Buf) -> Option<Self> {
        let header = PacketHeader::decode(data)?;
        let payload_len = header.payload_len as usize;
        if data.remaining() < payload_len {
            return None;
        }
        let payload = data.copy_to_bytes(payload_len);
        Some(Packet { header, payload })
    }

    /// Create a new data packet.
    pub fn new_data(sequence: u64, timestamp_us: u32, payload: Bytes) -> Self {
        Packet {
            header: PacketHeader::data(sequence, timestamp_us, payload.len() as u16),
            payload,
        }
    }
}

// ─── Decoded Control Packet ─────────────────────────────────────────────────

/// A decoded control packet with its typed body.
#[derive(Debug, Clone)]
pub enum ControlBody {
    Nack(NackPacket),
    Ping(PingPacket),
    Pong(PongPacket),
    TransportFeedback(TransportFeedback),
}

impl ControlBody {
    /// Decode a control body from a buffer. The first byte is the subtype.
    pub fn decode(buf: &mut impl Buf) -> Option<Self> {
        if !buf.has_remaining() {
            return None;
        }
        let subtype = buf.get_u8();
        let ct = ControlType::from_byte(subtype)?;
        match ct {
            ControlType::Nack => NackPacket::decode(buf).map(ControlBody::Nack),
            ControlType::Ping => PingPacket::decode(buf).map(ControlBody::Ping),
            ControlType::Pong => PongPacket::decode(buf).map(ControlBody::Pong),
            ControlType::TransportFeedback => {
                TransportFeedback::decode(buf).map(ControlBody::TransportFeedback)
            }
        }
    }
}
