//! `SimulcastConsumer` — forwards one of several independently-encoded
//! producer spatial layers, switching between them on keyframe boundaries
//! and re-anchoring the outgoing RTP timestamp across the switch (§4.7).
//!
//! Grounded on `original_source/worker/src/RTC/SimulcastConsumer.cpp`.

use tracing::{debug, warn};

use crate::codecs::{Codec, EncodingContext};
use crate::config::BweConfig;
use crate::packet::RtpPacket;
use crate::rtcp::{DlrrSubBlock, NackPacket, SdesChunk, SenderReport};
use crate::seq::Seq16;
use crate::stream_recv::RtpStreamRecv;
use crate::stream_send::RtpStreamSend;
use crate::time::Ms;

use super::Consumer;

pub struct SimulcastConsumer {
    rtp_stream: RtpStreamSend,
    seq_mgr: Seq16,
    ssrc: u32,
    payload_type: u8,
    codec: Codec,
    encoding_context: EncodingContext,
    bwe: BweConfig,

    spatial_layers: u8,
    preferred_spatial_layer: i16,
    preferred_temporal_layer: i16,
    target_spatial_layer: i16,
    current_spatial_layer: i16,
    target_temporal_layer: i16,
    provisional_target_spatial_layer: i16,
    provisional_target_temporal_layer: i16,
    ts_reference_spatial_layer: u8,

    ts_offset: u32,
    key_frame_for_ts_offset_requested: bool,
    last_bwe_downgrade_at_ms: Option<Ms>,
    last_sent_packet_has_marker: bool,
    sync_required: bool,

    priority: u8,
    paused: bool,
}

impl SimulcastConsumer {
    pub fn new(
        ssrc: u32,
        payload_type: u8,
        codec: Codec,
        spatial_layers: u8,
        temporal_layers: u8,
        rtp_stream: RtpStreamSend,
        bwe: BweConfig,
    ) -> SimulcastConsumer {
        let preferred_spatial_layer = spatial_layers as i16 - 1;
        let preferred_temporal_layer = temporal_layers as i16 - 1;
        SimulcastConsumer {
            rtp_stream,
            seq_mgr: Seq16::new(),
            ssrc,
            payload_type,
            codec,
            encoding_context: EncodingContext { temporal_layers, ..EncodingContext::default() },
            bwe,
            spatial_layers,
            preferred_spatial_layer,
            preferred_temporal_layer,
            target_spatial_layer: -1,
            current_spatial_layer: -1,
            target_temporal_layer: -1,
            provisional_target_spatial_layer: -1,
            provisional_target_temporal_layer: -1,
            ts_reference_spatial_layer: 0,
            ts_offset: 0,
            key_frame_for_ts_offset_requested: false,
            last_bwe_downgrade_at_ms: None,
            last_sent_packet_has_marker: true,
            sync_required: true,
            priority: 1,
            paused: false,
        }
    }

    fn is_active(&self) -> bool {
        !self.paused && self.target_spatial_layer >= 0 && self.target_temporal_layer >= 0
    }

    /// §4.7 `SendRtpPacket`: admits, switches layer, re-anchors timestamp
    /// and forwards a packet from `packet_spatial_layer` of the producer.
    /// `producer_streams` is indexed by spatial layer.
    pub fn send_rtp_packet(
        &mut self,
        packet: &RtpPacket,
        packet_spatial_layer: u8,
        producer_streams: &[Option<&RtpStreamRecv>],
        now: Ms,
    ) -> Option<RtpPacket> {
        if !self.is_active() {
            return None;
        }
        if packet.payload_type() != self.payload_type {
            debug!(payload_type = packet.payload_type(), "payload type not supported");
            return None;
        }

        let descriptor = packet.payload_descriptor(self.codec)?;
        let is_key_frame = descriptor.is_key_frame();

        let mut should_switch = false;
        if self.current_spatial_layer != self.target_spatial_layer
            && packet_spatial_layer as i16 == self.target_spatial_layer
        {
            if !is_key_frame {
                return None;
            }
            should_switch = true;
            self.sync_required = true;
        } else if packet_spatial_layer as i16 != self.current_spatial_layer {
            return None;
        }

        if self.sync_required && !is_key_frame {
            return None;
        }

        let is_sync_packet = self.sync_required;
        if is_sync_packet {
            if is_key_frame {
                debug!("sync key frame received");
            }
            if !self.resync(packet, packet_spatial_layer, should_switch, producer_streams, now) {
                return None;
            }
        }

        if should_switch {
            self.current_spatial_layer = self.target_spatial_layer;
            self.encoding_context.target_temporal_layer = self.target_temporal_layer;
            self.encoding_context.current_temporal_layer = descriptor.temporal_layer() as i16;
            self.rtp_stream.reset_score(10);
        } else {
            let result = match &descriptor {
                crate::codecs::PayloadDescriptor::Vp8(d) => d.process(&mut self.encoding_context),
                crate::codecs::PayloadDescriptor::Vp9(d) => d.process(&mut self.encoding_context, false),
                crate::codecs::PayloadDescriptor::H264(d) => d.process(&mut self.encoding_context),
            };
            if !result.admitted {
                self.seq_mgr.drop(packet.seq());
                return None;
            }
        }

        let timestamp = packet.timestamp().wrapping_sub(self.ts_offset);
        let (seq, admitted) = self.seq_mgr.input(packet.seq());
        if !admitted {
            return None;
        }

        let out = packet.with_rewritten_header(self.ssrc, seq, timestamp, self.payload_type);
        self.rtp_stream.receive_packet(out.clone(), now);

        if self.seq_mgr.max_output() == seq as u64 {
            self.last_sent_packet_has_marker = out.marker();
        }

        Some(out)
    }

    /// Computes `tsOffset`, applies the "extra offset" fallback on a
    /// too-low switch timestamp, and resyncs the sequence manager. Returns
    /// `false` when the packet must be dropped and a key frame requested
    /// instead (the `tsOffset` gap is too large to paper over).
    fn resync(
        &mut self,
        packet: &RtpPacket,
        packet_spatial_layer: u8,
        should_switch: bool,
        producer_streams: &[Option<&RtpStreamRecv>],
        now: Ms,
    ) -> bool {
        let mut ts_offset = if packet_spatial_layer == self.ts_reference_spatial_layer {
            0u32
        } else {
            match self.ntp_anchored_offset(packet_spatial_layer, producer_streams) {
                Some(offset) => offset,
                None => 0,
            }
        };

        if should_switch && packet.timestamp().wrapping_sub(ts_offset) <= self.rtp_stream.max_packet_ts() {
            let clock_rate = self.rtp_stream.clock_rate() as i64;
            let max_ts_extra_offset = self.bwe.max_ts_extra_offset_ms as i64 * clock_rate / 1000;
            let ms_offset_ticks = self.bwe.assumed_frame_interval_ms as i64 * clock_rate / 1000;

            let mut ts_extra_offset = (self.rtp_stream.max_packet_ts() as i64
                - packet.timestamp() as i64
                + ts_offset as i64
                + ms_offset_ticks)
                .max(0);

            if self.key_frame_for_ts_offset_requested {
                if ts_extra_offset > max_ts_extra_offset {
                    warn!(ts_extra_offset, "giving up on proper stream switching, using minimal offset");
                    ts_extra_offset = 1;
                }
            } else if ts_extra_offset > max_ts_extra_offset {
                warn!(ts_extra_offset, "cannot switch stream, requesting key frame");
                self.key_frame_for_ts_offset_requested = true;
                return false;
            }

            if ts_extra_offset > 0 {
                debug!(ts_extra_offset, "rtp timestamp extra offset generated for stream switching");
                ts_offset = ts_offset.wrapping_sub(ts_extra_offset as u32);
            }
        }

        self.ts_offset = ts_offset;
        let skip = if self.last_sent_packet_has_marker { 1 } else { 2 };
        self.seq_mgr.sync(packet.seq().wrapping_sub(skip));
        self.encoding_context.sync_required();
        self.sync_required = false;
        self.key_frame_for_ts_offset_requested = false;
        true
    }

    fn ntp_anchored_offset(
        &self,
        packet_spatial_layer: u8,
        producer_streams: &[Option<&RtpStreamRecv>],
    ) -> Option<u32> {
        let reference = producer_streams.get(self.ts_reference_spatial_layer as usize)?.as_ref()?;
        let target = producer_streams.get(packet_spatial_layer as usize)?.as_ref()?;

        let ntp_ms1 = reference.sender_report_ntp_ms()?;
        let ts1 = reference.sender_report_rtp_ts();
        let ntp_ms2 = target.sender_report_ntp_ms()?;
        let ts2 = target.sender_report_rtp_ts();

        let diff_ms = ntp_ms2 as i64 - ntp_ms1 as i64;
        let diff_ts = diff_ms * reference.clock_rate() as i64 / 1000;
        let new_ts2 = (ts2 as i64 - diff_ts) as u32;

        Some(new_ts2.wrapping_sub(ts1))
    }

    pub fn set_target_spatial_layer(&mut self, layer: i16) {
        self.target_spatial_layer = layer;
    }

    pub fn set_target_temporal_layer(&mut self, layer: i16) {
        self.target_temporal_layer = layer;
    }

    pub fn current_spatial_layer(&self) -> i16 {
        self.current_spatial_layer
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

    /// Whether a keyframe should be requested on `target_spatial_layer`'s
    /// producer stream (either to switch, or to unstick a ts-offset
    /// impasse).
    pub fn key_frame_needed(&self) -> bool {
        self.target_spatial_layer != self.current_spatial_layer || self.key_frame_for_ts_offset_requested
    }

    pub fn target_spatial_layer(&self) -> i16 {
        self.target_spatial_layer
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
            Some(self.current_spatial_layer),
            Some(self.encoding_context.current_temporal_layer),
            Some(self.preferred_spatial_layer),
            Some(self.preferred_temporal_layer),
            self.paused,
        )
    }
}

impl Consumer for SimulcastConsumer {
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

    /// §4.7 `IncreaseLayer`.
    fn increase_layer(
        &mut self,
        producer_streams: &[Option<&RtpStreamRecv>],
        bitrate: u32,
        consider_loss: bool,
        now: Ms,
    ) -> u32 {
        if self.provisional_target_spatial_layer == self.preferred_spatial_layer
            && self.provisional_target_temporal_layer == self.preferred_temporal_layer
        {
            return 0;
        }

        let virtual_bitrate = if consider_loss {
            let loss_percentage = producer_streams
                .get(self.current_spatial_layer.max(0) as usize)
                .and_then(|s| *s)
                .map(|s| s.loss_percentage())
                .unwrap_or(0);
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

        'outer: for s_idx in 0..self.spatial_layers {
            let spatial_layer = s_idx as i16;

            if let Some(last) = self.last_bwe_downgrade_at_ms {
                if now.saturating_sub(last) < self.bwe.bwe_downgrade_conservative_ms as u64
                    && self.provisional_target_spatial_layer > -1
                    && spatial_layer > self.current_spatial_layer
                {
                    debug!(spatial_layer, "avoid upgrading due to recent bwe downgrade");
                    break 'outer;
                }
            }

            if spatial_layer < self.provisional_target_spatial_layer {
                continue;
            }

            let Some(producer_stream) = producer_streams.get(s_idx as usize).and_then(|s| *s) else {
                continue;
            };

            if spatial_layer != self.provisional_target_spatial_layer
                && self.provisional_target_spatial_layer != -1
                && producer_stream.active_ms(now) < self.bwe.stream_min_active_ms as u64
            {
                let provisional_active = producer_streams
                    .get(self.provisional_target_spatial_layer as usize)
                    .and_then(|s| *s)
                    .map(|s| s.active_ms(now))
                    .unwrap_or(0);
                if provisional_active >= self.bwe.stream_min_active_ms as u64 {
                    continue;
                }
            }

            chosen_spatial = spatial_layer;

            for t_idx in 0..producer_stream.temporal_layers() {
                let temporal_layer = t_idx as i16;
                if spatial_layer == self.provisional_target_spatial_layer
                    && temporal_layer <= self.provisional_target_temporal_layer
                {
                    continue;
                }

                chosen_temporal = temporal_layer;
                required_bitrate = producer_stream.layer_bitrate(now, 0, t_idx);

                if required_bitrate > 0
                    && t_idx == 0
                    && self.provisional_target_spatial_layer > -1
                    && spatial_layer > self.provisional_target_spatial_layer
                {
                    let provisional_bitrate = producer_streams
                        .get(self.provisional_target_spatial_layer as usize)
                        .and_then(|s| *s)
                        .map(|s| s.layer_bitrate(now, 0, self.provisional_target_temporal_layer.max(0) as u8))
                        .unwrap_or(0);
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

        if provisional_spatial != self.target_spatial_layer || provisional_temporal != self.target_temporal_layer {
            let was_current = self.current_spatial_layer;
            self.target_spatial_layer = provisional_spatial;
            self.target_temporal_layer = provisional_temporal;

            if self.rtp_stream.active_ms(now) > self.bwe.min_active_before_downgrade_record_ms as u64
                && self.target_spatial_layer < was_current
                && was_current <= self.preferred_spatial_layer
            {
                debug!(
                    from = was_current,
                    to = self.target_spatial_layer,
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
        let mut desired = 0u32;
        for stream in producer_streams.iter().rev().filter_map(|s| *s) {
            desired = stream.bitrate(now);
            if desired > 0 {
                break;
            }
        }
        desired
    }
}
