//! `PipeConsumer` — mirrors every one of a producer's RTP streams
//! one-for-one onto its own outgoing `RtpStreamSend`, unfiltered by
//! layer. Used for piping media between routers rather than to an
//! end-user endpoint that needs layer selection (§4.9, Non-goals note
//! in §4.7/§4.8 exclude this from layer-switching logic entirely).
//!
//! Grounded on `original_source/worker/src/RTC/PipeConsumer.cpp`.

use tracing::debug;

use crate::packet::RtpPacket;
use crate::rtcp::{DlrrSubBlock, NackPacket, SdesChunk, SenderReport};
use crate::seq::Seq16;
use crate::stream_send::RtpStreamSend;
use crate::time::Ms;

/// One outgoing mirror of a single producer stream.
struct PipeStream {
    rtp_stream: RtpStreamSend,
    seq_mgr: Seq16,
    ssrc: u32,
    sync_required: bool,
}

pub struct PipeConsumer {
    streams: Vec<PipeStream>,
    payload_type: u8,
    key_frame_supported: bool,
    paused: bool,
}

impl PipeConsumer {
    /// `streams` are supplied in producer-stream order: `streams[i]`
    /// mirrors the producer's i-th RTP stream onto `ssrcs[i]`.
    pub fn new(
        payload_type: u8,
        key_frame_supported: bool,
        streams: Vec<RtpStreamSend>,
    ) -> PipeConsumer {
        let streams = streams
            .into_iter()
            .map(|rtp_stream| {
                let ssrc = rtp_stream.ssrc();
                PipeStream { rtp_stream, seq_mgr: Seq16::new(), ssrc, sync_required: true }
            })
            .collect();
        PipeConsumer { streams, payload_type, key_frame_supported, paused: false }
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn pause(&mut self) {
        self.paused = true;
        for stream in &mut self.streams {
            stream.rtp_stream.pause();
        }
    }

    pub fn resume(&mut self) {
        self.paused = false;
        for stream in &mut self.streams {
            stream.rtp_stream.resume();
            stream.sync_required = true;
        }
    }

    /// §4.9 `SendRtpPacket`: forwards a packet on `stream_index`'s mirror
    /// unfiltered, save for the same sync/seq-continuity rules every
    /// consumer variant applies.
    pub fn send_rtp_packet(&mut self, packet: &RtpPacket, stream_index: usize, now: Ms) -> Option<RtpPacket> {
        if self.paused {
            return None;
        }
        if packet.payload_type() != self.payload_type {
            debug!(payload_type = packet.payload_type(), "payload type not supported");
            return None;
        }
        let stream = self.streams.get_mut(stream_index)?;

        if stream.sync_required && self.key_frame_supported && !packet.marker() {
            // PipeConsumer has no codec descriptor; lacking one, fall back
            // to the marker bit as the closest available frame-boundary
            // signal when a keyframe gate is requested.
            return None;
        }
        if packet.payload().is_empty() {
            stream.seq_mgr.drop(packet.seq());
            return None;
        }

        let is_sync_packet = stream.sync_required;
        if is_sync_packet {
            stream.seq_mgr.sync(packet.seq().wrapping_sub(1));
            stream.sync_required = false;
        }

        let (seq, admitted) = stream.seq_mgr.input(packet.seq());
        if !admitted {
            return None;
        }

        let out = packet.with_rewritten_header(stream.ssrc, seq, packet.timestamp(), packet.payload_type());
        stream.rtp_stream.receive_packet(out.clone(), now);
        Some(out)
    }

    pub fn receive_nack(&mut self, stream_index: usize, nack: &NackPacket, now: Ms) -> Vec<RtpPacket> {
        if self.paused {
            return Vec::new();
        }
        match self.streams.get_mut(stream_index) {
            Some(stream) => stream.rtp_stream.receive_nack(nack, now),
            None => Vec::new(),
        }
    }

    pub fn get_rtcp_sender_reports(&mut self, now: Ms) -> Vec<(u32, SenderReport)> {
        self.streams
            .iter_mut()
            .filter_map(|s| s.rtp_stream.get_rtcp_sender_report(now).map(|r| (s.ssrc, r)))
            .collect()
    }

    pub fn get_rtcp_sdes_chunks(&self) -> Vec<SdesChunk> {
        self.streams.iter().map(|s| s.rtp_stream.get_rtcp_sdes_chunk()).collect()
    }

    pub fn get_rtcp_xr_delay_since_last_rr(&self, stream_index: usize, now: Ms) -> Option<DlrrSubBlock> {
        self.streams.get(stream_index)?.rtp_stream.get_rtcp_xr_delay_since_last_rr(now)
    }

    pub fn ssrcs(&self) -> Vec<u32> {
        self.streams.iter().map(|s| s.ssrc).collect()
    }

    /// Worst score across every mirrored stream, the rough equivalent of
    /// a single consumer's score when a pipe fans out to several.
    pub fn score(&self) -> u8 {
        self.streams.iter().map(|s| s.rtp_stream.score()).min().unwrap_or(0)
    }

    /// One snapshot per mirrored stream — a pipe has no single layer or
    /// send stream to describe, unlike the other variants.
    pub fn stats(&self) -> Vec<crate::stats::ConsumerStats> {
        self.streams
            .iter()
            .map(|s| {
                crate::stats::ConsumerStats::new(
                    crate::stats::StreamSendStats::snapshot(&s.rtp_stream),
                    None,
                    None,
                    None,
                    None,
                    self.paused,
                )
            })
            .collect()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::NackConfig;

    fn pkt(seq: u16, ts: u32, ssrc: u32) -> RtpPacket {
        let mut buf = vec![0u8; 13];
        buf[0] = 0x80;
        buf[1] = 96;
        buf[2..4].copy_from_slice(&seq.to_be_bytes());
        buf[4..8].copy_from_slice(&ts.to_be_bytes());
        buf[8..12].copy_from_slice(&ssrc.to_be_bytes());
        buf[12] = 0x01;
        RtpPacket::parse(buf).unwrap()
    }

    fn consumer() -> PipeConsumer {
        let stream = RtpStreamSend::new(2, 90_000, 96, "cname", None, NackConfig::default());
        PipeConsumer::new(96, false, vec![stream])
    }

    #[test]
    fn forwards_with_rewritten_ssrc() {
        let mut consumer = consumer();
        let out = consumer.send_rtp_packet(&pkt(10, 0, 1), 0, Ms(0)).unwrap();
        assert_eq!(out.ssrc(), 2);
        assert_eq!(out.seq(), 0);
    }

    #[test]
    fn unknown_stream_index_is_ignored() {
        let mut consumer = consumer();
        assert!(consumer.send_rtp_packet(&pkt(10, 0, 1), 5, Ms(0)).is_none());
    }

    #[test]
    fn paused_consumer_drops_everything() {
        let mut consumer = consumer();
        consumer.pause();
        assert!(consumer.send_rtp_packet(&pkt(10, 0, 1), 0, Ms(0)).is_none());
    }
}
