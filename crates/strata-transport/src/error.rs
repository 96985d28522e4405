//! Error types and error-counting for the congestion-control core.
//!
//! Per the error handling design: malformed input, resource exhaustion, and
//! stale state are all recovered locally and never become a `Result::Err` —
//! they bump a counter in [`ErrorCounters`] and the caller continues.
//! `TransportError` is reserved for the two kinds that must surface:
//! configuration errors and invariant violations.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("config value out of range: {field} = {value}")]
    InvalidConfig { field: &'static str, value: String },

    #[error("internal invariant violated: {0}")]
    InvariantViolation(&'static str),
}

/// Counters for error classes that are recovered locally rather than
/// propagated. Exported via [`crate::stats`] for observability.
#[derive(Debug, Clone, Default)]
pub struct ErrorCounters {
    /// Truncated RTCP, bad chunk header, seq outside buffer range.
    pub malformed_input: u64,
    /// Packet buffer full, NACK list full.
    pub resource_exhaustion: u64,
    /// Feedback for an evicted sent record, seq beyond reorder window.
    pub stale_state: u64,
    /// Non-power-of-2 buffer size or similar, fell back to default.
    pub config_fallback: u64,
}

impl ErrorCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_malformed_input(&mut self) {
        self.malformed_input += 1;
        tracing::warn!(count = self.malformed_input, "malformed input dropped");
    }

    pub fn record_resource_exhaustion(&mut self) {
        self.resource_exhaustion += 1;
        tracing::warn!(
            count = self.resource_exhaustion,
            "resource exhausted, ejecting oldest"
        );
    }

    pub fn record_stale_state(&mut self) {
        self.stale_state += 1;
    }

    pub fn record_config_fallback(&mut self, field: &'static str) {
        self.config_fallback += 1;
        tracing::warn!(field, "config value invalid, falling back to default");
    }
}
