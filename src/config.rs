//! Tunable constants, pulled out of the original implementation's magic
//! numbers so callers (and tests) can override them instead of recompiling.

use serde::{Deserialize, Serialize};

/// Retransmission buffer sizing, per stream kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetransmissionConfig {
    pub max_items: u16,
    pub max_retransmission_delay_ms: u32,
}

impl RetransmissionConfig {
    pub const fn video() -> Self {
        RetransmissionConfig { max_items: 2500, max_retransmission_delay_ms: 2000 }
    }

    pub const fn audio() -> Self {
        RetransmissionConfig { max_items: 2500, max_retransmission_delay_ms: 1000 }
    }
}

/// Inactivity detection for `RtpStreamRecv`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InactivityConfig {
    pub timeout_ms: u32,
    pub dtx_timeout_ms: u32,
}

impl Default for InactivityConfig {
    fn default() -> Self {
        InactivityConfig { timeout_ms: 1500, dtx_timeout_ms: 5000 }
    }
}

/// Bitrate-allocation / layer-switching tunables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BweConfig {
    /// How long a producer stream must have been active before a consumer
    /// will provisionally move its target to it (`StreamMinActiveMs`).
    pub stream_min_active_ms: u32,
    /// How long after a BWE-forced downgrade a consumer refuses to
    /// upgrade again (`BweDowngradeConservativeMs`).
    pub bwe_downgrade_conservative_ms: u32,
    /// Minimum time active at the preferred layer before a downgrade is
    /// recorded as BWE-forced (used by `ApplyLayers`).
    pub min_active_before_downgrade_record_ms: u32,
    /// Max extra RTP-timestamp offset (in ms-equivalent) tolerated when
    /// switching spatial layers before giving up and using offset 1.
    pub max_ts_extra_offset_ms: u32,
    /// Assumed frame interval used to compute `MsOffset` (33ms == 30fps).
    pub assumed_frame_interval_ms: u32,
}

impl Default for BweConfig {
    fn default() -> Self {
        BweConfig {
            stream_min_active_ms: 2_000,
            bwe_downgrade_conservative_ms: 10_000,
            min_active_before_downgrade_record_ms: 8_000,
            max_ts_extra_offset_ms: 75,
            assumed_frame_interval_ms: 33,
        }
    }
}

/// NACK generator / retransmission timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NackConfig {
    /// Debounce window fallback when no RTT measurement is available yet.
    pub default_rtt_ms: u16,
    /// Number of candidate seqs considered per NACK item (pid + 16-bit bitmask).
    pub candidates_per_item: usize,
}

impl Default for NackConfig {
    fn default() -> Self {
        NackConfig { default_rtt_ms: 100, candidates_per_item: 17 }
    }
}

/// Maximum size, in bytes, of a single outgoing compound RTCP packet
/// (`maxRtcpLen` throughout §4.3).
pub const DEFAULT_MAX_RTCP_PACKET_LEN: usize = 1200;
