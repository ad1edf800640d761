//! `SimpleConsumer` — forwards a producer's single encoding unfiltered by
//! layer (§4.6). The only per-packet decisions are payload-type support,
//! an optional codec-level payload filter (Opus DTX drop), and the
//! seq-number continuity rewrite through its own `SeqManager`.
//!
//! Grounded on `original_source/worker/src/RTC/SimpleConsumer.cpp`.

use tracing::debug;

use crate::codecs::{Codec, EncodingContext};
use crate::packet::RtpPacket;
use crate::rtcp::{DlrrSubBlock, KeyFrameRequest, NackPacket, SdesChunk, SenderReport};
use crate::seq::Seq16;
use crate::stream_recv::RtpStreamRecv;
use crate::stream_send::RtpStreamSend;
use crate::time::Ms;

use super::Consumer;

/// Audio SimpleConsumers opt out of bitrate-priority participation
/// entirely — only video ones play the (degenerate, single-layer) BWE
/// game.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Audio,
    Video,
}

pub struct SimpleConsumer {
    rtp_stream: RtpStreamSend,
    seq_mgr: Seq16,
    ssrc: u32,
    payload_type: u8,
    codec: Option<Codec>,
    encoding_context: Option<EncodingContext>,
    key_frame_supported: bool,
    sync_required: bool,
    paused: bool,
    kind: MediaKind,
    priority: u8,
    managing_bitrate: bool,
}

impl SimpleConsumer {
    pub fn new(
        ssrc: u32,
        payload_type: u8,
        rtp_stream: RtpStreamSend,
        codec: Option<Codec>,
        key_frame_supported: bool,
        kind: MediaKind,
    ) -> SimpleConsumer {
        SimpleConsumer {
            rtp_stream,
            seq_mgr: Seq16::new(),
            ssrc,
            payload_type,
            codec,
            encoding_context: codec.map(|_| EncodingContext::default()),
            key_frame_supported,
            sync_required: true,
            paused: false,
            kind,
            priority: 1,
            managing_bitrate: false,
        }
    }

    fn is_active(&self) -> bool {
        !self.paused
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn pause(&mut self) {
        self.paused = true;
        self.rtp_stream.pause();
    }

    pub fn resume(&mut self) {
        self.paused = false;
        self.rtp_stream.resume();
        self.sync_required = true;
    }

    /// §4.6 `SendRtpPacket`: admits, rewrites and forwards one producer
    /// packet, or drops it (returning `None`) per the rules above.
    pub fn send_rtp_packet(&mut self, packet: &RtpPacket, now: Ms) -> Option<RtpPacket> {
        if self.paused {
            return None;
        }

        if packet.payload_type() != self.payload_type {
            debug!(payload_type = packet.payload_type(), "payload type not supported");
            return None;
        }

        let descriptor = self.codec.and_then(|codec| packet.payload_descriptor(codec));

        if let (Some(descriptor), Some(ctx)) = (&descriptor, &mut self.encoding_context) {
            let result = match descriptor {
                crate::codecs::PayloadDescriptor::Vp8(d) => d.process(ctx),
                crate::codecs::PayloadDescriptor::Vp9(d) => d.process(ctx, false),
                crate::codecs::PayloadDescriptor::H264(d) => d.process(ctx),
            };
            if !result.admitted {
                debug!(seq = packet.seq(), "discarding packet dropped by codec");
                self.seq_mgr.drop(packet.seq());
                return None;
            }
        }

        let is_key_frame = descriptor.as_ref().map(|d| d.is_key_frame()).unwrap_or(true);

        if self.sync_required && self.key_frame_supported && !is_key_frame {
            return None;
        }

        let is_sync_packet = self.sync_required;
        if is_sync_packet {
            self.seq_mgr.sync(packet.seq().wrapping_sub(1));
            self.sync_required = false;
        }

        let (seq, admitted) = self.seq_mgr.input(packet.seq());
        if !admitted {
            return None;
        }

        let out = packet.with_rewritten_header(self.ssrc, seq, packet.timestamp(), packet.payload_type());
        self.rtp_stream.receive_packet(out.clone(), now);
        Some(out)
    }

    pub fn receive_nack(&mut self, nack: &NackPacket, now: Ms) -> Vec<RtpPacket> {
        if self.paused {
            return Vec::new();
        }
        self.rtp_stream.receive_nack(nack, now)
    }

    pub fn get_rtcp_sender_report(&mut self, now: Ms) -> Option<SenderReport> {
        self.rtp_stream.get_rtcp_sender_report(now)
    }

    pub fn get_rtcp_sdes_chunk(&self) -> SdesChunk {
        self.rtp_stream.get_rtcp_sdes_chunk()
    }

    pub fn get_rtcp_xr_delay_since_last_rr(&self, now: Ms) -> Option<DlrrSubBlock> {
        self.rtp_stream.get_rtcp_xr_delay_since_last_rr(now)
    }

    pub fn request_key_frame(&self) -> Option<KeyFrameRequest> {
        None
    }

    pub fn ssrc(&self) -> u32 {
        self.ssrc
    }

    pub fn score(&self) -> u8 {
        self.rtp_stream.score()
    }

    pub fn stats(&self) -> crate::stats::ConsumerStats {
        crate::stats::ConsumerStats::new(
            crate::stats::StreamSendStats::snapshot(&self.rtp_stream),
            None,
            None,
            None,
            None,
            self.paused,
        )
    }
}

impl Consumer for SimpleConsumer {
    fn is_paused(&self) -> bool {
        self.paused
    }

    fn pause(&mut self) {
        self.paused = true;
        self.rtp_stream.pause();
    }

    fn resume(&mut self) {
        self.paused = false;
        self.rtp_stream.resume();
        self.sync_required = true;
    }

    fn get_bitrate_priority(&self) -> u8 {
        if self.kind != MediaKind::Video || !self.is_active() {
            0
        } else {
            self.priority
        }
    }

    /// §4.6 `IncreaseLayer`: a single-layer consumer has no layers to
    /// switch between, so this degenerates to reporting "I want whatever
    /// the producer is already sending" exactly once per allocation pass.
    fn increase_layer(
        &mut self,
        producer_streams: &[Option<&RtpStreamRecv>],
        bitrate: u32,
        _consider_loss: bool,
        now: Ms,
    ) -> u32 {
        if self.kind != MediaKind::Video || self.managing_bitrate {
            return 0;
        }
        self.managing_bitrate = true;

        let desired = producer_streams.first().and_then(|s| *s).map(|s| s.bitrate(now)).unwrap_or(0);
        desired.min(bitrate)
    }

    fn apply_layers(&mut self, _now: Ms) {
        self.managing_bitrate = false;
    }

    fn get_desired_bitrate(&self, producer_streams: &[Option<&RtpStreamRecv>], now: Ms) -> u32 {
        if self.kind != MediaKind::Video || !self.is_active() {
            return 0;
        }
        producer_streams.first().and_then(|s| *s).map(|s| s.bitrate(now)).unwrap_or(0)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::NackConfig;

    fn pkt(seq: u16, ts: u32, ssrc: u32) -> RtpPacket {
        let mut buf = vec![0u8; 12];
        buf[0] = 0x80;
        buf[1] = 96;
        buf[2..4].copy_from_slice(&seq.to_be_bytes());
        buf[4..8].copy_from_slice(&ts.to_be_bytes());
        buf[8..12].copy_from_slice(&ssrc.to_be_bytes());
        RtpPacket::parse(buf).unwrap()
    }

    fn consumer() -> SimpleConsumer {
        let stream = RtpStreamSend::new(2, 90_000, 96, "cname", None, NackConfig::default());
        SimpleConsumer::new(2, 96, stream, None, false, MediaKind::Audio)
    }

    #[test]
    fn first_packet_after_construction_syncs_and_rewrites_ssrc() {
        let mut consumer = consumer();
        let out = consumer.send_rtp_packet(&pkt(100, 0, 1), Ms(0)).unwrap();
        assert_eq!(out.ssrc(), 2);
        assert_eq!(out.seq(), 0);
    }

    #[test]
    fn subsequent_packets_stay_contiguous() {
        let mut consumer = consumer();
        let first = consumer.send_rtp_packet(&pkt(100, 0, 1), Ms(0)).unwrap();
        let second = consumer.send_rtp_packet(&pkt(101, 0, 1), Ms(1)).unwrap();
        assert_eq!(second.seq(), first.seq().wrapping_add(1));
    }

    #[test]
    fn unsupported_payload_type_is_dropped() {
        let mut consumer = consumer();
        let mut buf = vec![0u8; 12];
        buf[0] = 0x80;
        buf[1] = 97;
        let bad = RtpPacket::parse(buf).unwrap();
        assert!(consumer.send_rtp_packet(&bad, Ms(0)).is_none());
    }

    #[test]
    fn paused_consumer_drops_everything() {
        let mut consumer = consumer();
        consumer.pause();
        assert!(consumer.send_rtp_packet(&pkt(100, 0, 1), Ms(0)).is_none());
    }
}
