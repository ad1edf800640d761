//! `SvcConsumer` — forwards a single producer encoding whose payload
//! descriptor carries its own spatial/temporal layer matrix (VP9 SVC),
//! letting the codec handler pick which packets belong to the target
//! layer instead of switching between sibling streams (§4.8).
//!
//! Grounded on `original_source/worker/src/RTC/SvcConsumer.cpp`.

use tracing::debug;

use crate::codecs::{Codec, EncodingContext};
use crate::config::BweConfig;
use crate::packet::RtpPacket;
use crate::rtcp::{DlrrSubBlock, NackPacket, SdesChunk, SenderReport};
use crate::seq::Seq16;
use crate::stream_recv::RtpStreamRecv;
use crate::stream_send::RtpStreamSend;
use crate::time::Ms;

use super::Consumer;

pub struct SvcConsumer {
    rtp_stream: RtpStreamSend,
    seq_mgr: Seq16,
    ssrc: u32,
    payload_type: u8,
    codec: Codec,
    encoding_context: EncodingContext,
    bwe: BweConfig,

    preferred_spatial_layer: i16,
    preferred_temporal_layer: i16,
    provisional_target_spatial_layer: i16,
    provisional_target_temporal_layer: i16,

    last_bwe_downgrade_at_ms: Option<Ms>,
    sync_required: bool,

    priority: u8,
    paused: bool,
}

impl SvcConsumer {
    pub fn new(
        ssrc: u32,
        payload_type: u8,
        codec: Codec,
        temporal_layers: u8,
        spatial_layers: u8,
        k_svc: bool,
        rtp_stream: RtpStreamSend,
        bwe: BweConfig,
    ) -> SvcConsumer {
        let preferred_spatial_layer = spatial_layers as i16 - 1;
        let preferred_temporal_layer = temporal_layers as i16 - 1;
        SvcConsumer {
            rtp_stream,
            seq_mgr: Seq16::new(),
            ssrc,
            payload_type,
            codec,
            encoding_context: EncodingContext { temporal_layers, k_svc, ..EncodingContext::default() },
            bwe,
            preferred_spatial_layer,
            preferred_temporal_layer,
            provisional_target_spatial_layer: -1,
            provisional_target_temporal_layer: -1,
            last_bwe_downgrade_at_ms: None,
            sync_required: true,
            priority: 1,
            paused: false,
        }
    }

    fn is_active(&self) -> bool {
        !self.paused
            && self.encoding_context.target_spatial_layer >= 0
            && self.encoding_context.target_temporal_layer >= 0
    }

    /// §4.8 `SendRtpPacket`.
    pub fn send_rtp_packet(&mut self, packet: &RtpPacket, now: Ms) -> Option<RtpPacket> {
        if !self.is_active() {
            return None;
        }
        if packet.payload_type() != self.payload_type {
            debug!(payload_type = packet.payload_type(), "payload type not supported");
            return None;
        }

        let descriptor = packet.payload_descriptor(self.codec)?;

        if self.sync_required && !descriptor.is_key_frame() {
            return None;
        }
        if packet.payload().is_empty() {
            self.seq_mgr.drop(packet.seq());
            return None;
        }

        let is_sync_packet = self.sync_required;
        if is_sync_packet {
            if descriptor.is_key_frame() {
                debug!("sync key frame received");
            }
            self.seq_mgr.sync(packet.seq().wrapping_sub(1));
            self.encoding_context.sync_required();
            self.sync_required = false;
        }

        let previous_spatial = self.encoding_context.current_spatial_layer;
        let previous_temporal = self.encoding_context.current_temporal_layer;

        let k_svc = self.encoding_context.k_svc;
        let result = match &descriptor {
            crate::codecs::PayloadDescriptor::Vp8(d) => d.process(&mut self.encoding_context),
            crate::codecs::PayloadDescriptor::Vp9(d) => d.process(&mut self.encoding_context, k_svc),
            crate::codecs::PayloadDescriptor::H264(d) => d.process(&mut self.encoding_context),
        };
        if !result.admitted {
            self.seq_mgr.drop(packet.seq());
            return None;
        }

        if previous_spatial != self.encoding_context.current_spatial_layer
            || previous_temporal != self.encoding_context.current_temporal_layer
        {
            debug!(
                spatial = self.encoding_context.current_spatial_layer,
                temporal = self.encoding_context.current_temporal_layer,
                "consumer layers changed"
            );
        }

        let (seq, admitted) = self.seq_mgr.input(packet.seq());
        if !admitted {
            return None;
        }

        let marker = result.marker || packet.marker();
        let mut out = packet.with_rewritten_header(self.ssrc, seq, packet.timestamp(), self.payload_type);
        if marker {
            out = out.with_marker(true);
        }
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

    pub fn set_target_spatial_layer(&mut self, layer: i16) {
        self.encoding_context.target_spatial_layer = layer;
    }

    pub fn set_target_temporal_layer(&mut self, layer: i16) {
        self.encoding_context.target_temporal_layer = layer;
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
            Some(self.encoding_context.current_spatial_layer),
            Some(self.encoding_context.current_temporal_layer),
            Some(self.preferred_spatial_layer),
            Some(self.preferred_temporal_layer),
            self.paused,
        )
    }
}

impl Consumer for SvcConsumer {
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
        if self.is_active() { self.priority } else { 0 }
    }

    /// §4.8 `IncreaseLayer`, operating on the single producer stream's
    /// (spatial, temporal) layer matrix rather than N sibling streams.
    fn increase_layer(
        &mut self,
        producer_streams: &[Option<&RtpStreamRecv>],
        bitrate: u32,
        consider_loss: bool,
        now: Ms,
    ) -> u32 {
        let Some(producer_stream) = producer_streams.first().and_then(|s| *s) else {
            return 0;
        };
        if producer_stream.score() == 0 {
            return 0;
        }

        if self.provisional_target_spatial_layer == self.preferred_spatial_layer
            && self.provisional_target_temporal_layer == self.preferred_temporal_layer
        {
            return 0;
        }

        let virtual_bitrate = if consider_loss {
            let loss_percentage = self.rtp_stream.loss_percentage();
            if loss_percentage < 2 {
                (bitrate as f64 * 1.08) as u32
            } else if loss_percentage > 10 {
                (bitrate as f64 * (1.0 - 0.5 * (loss_percentage as f64 / 100.0))) as u32
            } else {
                bitrate
            }
        } else {
            bitrate
        };

        let mut required_bitrate = 0u32;
        let mut chosen_spatial: i16 = 0;
        let mut chosen_temporal: i16 = 0;

        'outer: for s_idx in 0..producer_stream.spatial_layers() {
            let spatial_layer = s_idx as i16;

            if let Some(last) = self.last_bwe_downgrade_at_ms {
                if now.saturating_sub(last) < self.bwe.bwe_downgrade_conservative_ms as u64
                    && self.provisional_target_spatial_layer > -1
                    && spatial_layer > self.encoding_context.current_spatial_layer
                {
                    debug!(spatial_layer, "avoid upgrading due to recent bwe downgrade");
                    break 'outer;
                }
            }

            if spatial_layer < self.provisional_target_spatial_layer {
                continue;
            }

            for t_idx in 0..producer_stream.temporal_layers() {
                let temporal_layer = t_idx as i16;
                if spatial_layer == self.provisional_target_spatial_layer
                    && temporal_layer <= self.provisional_target_temporal_layer
                {
                    continue;
                }

                chosen_spatial = spatial_layer;
                chosen_temporal = temporal_layer;
                required_bitrate = producer_stream.layer_bitrate(now, s_idx, t_idx);

                if self.encoding_context.k_svc
                    && required_bitrate > 0
                    && t_idx == 0
                    && self.provisional_target_spatial_layer > -1
                    && spatial_layer > self.provisional_target_spatial_layer
                {
                    let provisional_bitrate = producer_stream.layer_bitrate(
                        now,
                        self.provisional_target_spatial_layer as u8,
                        self.provisional_target_temporal_layer.max(0) as u8,
                    );
                    required_bitrate =
                        if required_bitrate > provisional_bitrate { required_bitrate - provisional_bitrate } else { 1 };
                }

                if required_bitrate > 0 {
                    break 'outer;
                } else {
                    break;
                }
            }

            if spatial_layer >= self.preferred_spatial_layer {
                break;
            }
        }

        if required_bitrate == 0 {
            return 0;
        }
        if required_bitrate > virtual_bitrate {
            return 0;
        }

        self.provisional_target_spatial_layer = chosen_spatial;
        self.provisional_target_temporal_layer = chosen_temporal;

        if required_bitrate <= bitrate {
            required_bitrate
        } else {
            bitrate
        }
    }

    fn apply_layers(&mut self, now: Ms) {
        let provisional_spatial = self.provisional_target_spatial_layer;
        let provisional_temporal = self.provisional_target_temporal_layer;
        self.provisional_target_spatial_layer = -1;
        self.provisional_target_temporal_layer = -1;

        if !self.is_active() {
            return;
        }

        if provisional_spatial != self.encoding_context.target_spatial_layer
            || provisional_temporal != self.encoding_context.target_temporal_layer
        {
            let previous_current = self.encoding_context.current_spatial_layer;
            self.encoding_context.target_spatial_layer = provisional_spatial;
            self.encoding_context.target_temporal_layer = provisional_temporal;

            if self.rtp_stream.active_ms(now) > self.bwe.min_active_before_downgrade_record_ms as u64
                && self.encoding_context.target_spatial_layer < previous_current
                && previous_current <= self.preferred_spatial_layer
            {
                debug!(
                    from = previous_current,
                    to = self.encoding_context.target_spatial_layer,
                    "possible target spatial layer downgrade due to bwe limitation"
                );
                self.last_bwe_downgrade_at_ms = Some(now);
            }
        }
    }

    fn get_desired_bitrate(&self, producer_streams: &[Option<&RtpStreamRecv>], now: Ms) -> u32 {
        if !self.is_active() {
            return 0;
        }
        let Some(producer_stream) = producer_streams.first().and_then(|s| *s) else {
            return 0;
        };

        if self.encoding_context.k_svc {
            let mut desired = 0u32;
            for s_idx in (0..producer_stream.spatial_layers()).rev() {
                let candidate = producer_stream.spatial_layer_bitrate(now, s_idx);
                if candidate > desired {
                    desired = candidate;
                }
            }
            desired
        } else {
            producer_stream.bitrate(now)
        }
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
        buf[12] = 0xAA;
        RtpPacket::parse(buf).unwrap()
    }

    fn consumer() -> SvcConsumer {
        let stream = RtpStreamSend::new(2, 90_000, 96, "cname", None, NackConfig::default());
        let mut c = SvcConsumer::new(2, 96, Codec::H264, 1, 1, false, stream, BweConfig::default());
        c.set_target_spatial_layer(0);
        c.set_target_temporal_layer(0);
        c
    }

    #[test]
    fn inactive_without_target_layers_drops_everything() {
        let stream = RtpStreamSend::new(2, 90_000, 96, "cname", None, NackConfig::default());
        let mut c = SvcConsumer::new(2, 96, Codec::H264, 1, 1, false, stream, BweConfig::default());
        assert!(c.send_rtp_packet(&pkt(1, 0, 1), Ms(0)).is_none());
    }

    #[test]
    fn paused_consumer_drops_everything() {
        let mut c = consumer();
        c.pause();
        assert!(c.send_rtp_packet(&pkt(1, 0, 1), Ms(0)).is_none());
    }
}
