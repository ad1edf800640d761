//! Read-only snapshot structs exposed to callers for observability.
//! No I/O, no background collection — each is built on demand from the
//! live state of the stream/consumer it describes.
//!
//! Grounded on the `FillBufferStats`/`FillBufferScore` accessors of
//! `original_source/worker/src/RTC/{RtpStreamSend,RtpStreamRecv,Consumer}.cpp`,
//! narrowed to the fields this crate actually tracks.

use serde::Serialize;

use crate::stream_recv::RtpStreamRecv;
use crate::stream_send::RtpStreamSend;
use crate::time::Ms;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct StreamRecvStats {
    pub ssrc: u32,
    pub packet_count: u64,
    pub byte_count: u64,
    pub score: u8,
    pub jitter: f64,
    pub nack_count: u64,
    pub pli_count: u64,
    pub fir_count: u64,
    pub bitrate_bps: u32,
}

impl StreamRecvStats {
    pub fn snapshot(stream: &RtpStreamRecv, now: Ms) -> StreamRecvStats {
        StreamRecvStats {
            ssrc: stream.ssrc(),
            packet_count: stream.packet_count(),
            byte_count: stream.byte_count(),
            score: stream.score(),
            jitter: stream.jitter(),
            nack_count: stream.nack_count(),
            pli_count: stream.pli_count(),
            fir_count: stream.fir_count(),
            bitrate_bps: stream.bitrate(now),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct StreamSendStats {
    pub ssrc: u32,
    pub packet_count: u64,
    pub byte_count: u64,
    pub score: u8,
    pub rtt_ms: Option<u32>,
    pub nack_count: u64,
}

impl StreamSendStats {
    pub fn snapshot(stream: &RtpStreamSend) -> StreamSendStats {
        StreamSendStats {
            ssrc: stream.ssrc(),
            packet_count: stream.packet_count(),
            byte_count: stream.byte_count(),
            score: stream.score(),
            rtt_ms: stream.rtt_ms(),
            nack_count: stream.nack_count(),
        }
    }
}

/// One consumer's externally-visible state: its own send stream's stats
/// plus the layer it's currently forwarding (`None` for variants with no
/// layer concept, e.g. `PipeConsumer`).
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ConsumerStats {
    pub send: StreamSendStats,
    pub current_spatial_layer: Option<i16>,
    pub current_temporal_layer: Option<i16>,
    pub preferred_spatial_layer: Option<i16>,
    pub preferred_temporal_layer: Option<i16>,
    pub paused: bool,
}

impl ConsumerStats {
    pub fn new(
        send: StreamSendStats,
        current_spatial_layer: Option<i16>,
        current_temporal_layer: Option<i16>,
        preferred_spatial_layer: Option<i16>,
        preferred_temporal_layer: Option<i16>,
        paused: bool,
    ) -> ConsumerStats {
        ConsumerStats {
            send,
            current_spatial_layer,
            current_temporal_layer,
            preferred_spatial_layer,
            preferred_temporal_layer,
            paused,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::NackConfig;
    use crate::stream_send::RtpStreamSend;

    #[test]
    fn send_stats_reflect_stream_state() {
        let stream = RtpStreamSend::new(1, 90_000, 96, "cname", None, NackConfig::default());
        let stats = StreamSendStats::snapshot(&stream);
        assert_eq!(stats.ssrc, 1);
        assert_eq!(stats.packet_count, 0);
    }
}
