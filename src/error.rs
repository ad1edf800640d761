//! Error kinds per the core's error handling design.
//!
//! Per-packet rejection reasons are never propagated as `Result::Err` —
//! they're counted and logged at debug (see [`DiscardReason`]). Only
//! construction-time and malformed-wire-format errors are returned to
//! callers.

use thiserror::Error;

/// Top-level error returned from fallible public constructors and parsers.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// Bad configuration or parameters supplied at construction.
    #[error("type error: {reason}")]
    TypeError { reason: String },

    /// The remainder of a compound RTCP packet could not be parsed.
    #[error("malformed rtcp: {reason}")]
    MalformedRtcp { reason: String },

    /// An invariant was breached. Fatal in debug builds; callers in
    /// release builds should log and skip the offending operation.
    #[error("assertion violated: {reason}")]
    AssertionViolated { reason: String },

    /// A builder refused further input because a hard byte budget would
    /// be exceeded (e.g. the 1200-byte RTCP packet budget for TCC).
    #[error("resource exhausted: {reason}")]
    ResourceExhausted { reason: String },
}

impl CoreError {
    pub fn type_error(reason: impl Into<String>) -> Self {
        CoreError::TypeError { reason: reason.into() }
    }

    pub fn malformed_rtcp(reason: impl Into<String>) -> Self {
        CoreError::MalformedRtcp { reason: reason.into() }
    }

    pub fn assertion(reason: impl Into<String>) -> Self {
        CoreError::AssertionViolated { reason: reason.into() }
    }

    pub fn resource_exhausted(reason: impl Into<String>) -> Self {
        CoreError::ResourceExhausted { reason: reason.into() }
    }
}

/// Why a single packet was silently discarded. Counted by the owning
/// component, logged at debug, never surfaced as an `Err`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscardReason {
    NoMatchingProducer,
    UnsupportedPayloadType,
    AwaitingKeyFrame,
    EmptyPayload,
    DuplicateInBuffer,
    TooOld,
    CapacityExceeded,
    LayerExceedsTarget,
    Paused,
}

impl std::fmt::Display for DiscardReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DiscardReason::NoMatchingProducer => "no matching producer",
            DiscardReason::UnsupportedPayloadType => "unsupported payload type",
            DiscardReason::AwaitingKeyFrame => "awaiting key frame",
            DiscardReason::EmptyPayload => "empty payload",
            DiscardReason::DuplicateInBuffer => "duplicate in retransmission buffer",
            DiscardReason::TooOld => "packet too old",
            DiscardReason::CapacityExceeded => "capacity exceeded",
            DiscardReason::LayerExceedsTarget => "layer exceeds target",
            DiscardReason::Paused => "consumer paused",
        };
        f.write_str(s)
    }
}
