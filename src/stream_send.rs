//! `RtpStreamSend` — per-outgoing-encoding state: retransmission buffer,
//! NACK-driven resend, RR-derived RTT/score, and SR/SDES/XR emission
//! (§4.4).
//!
//! Grounded on `original_source/worker/src/RTC/RtpStreamSend.cpp`.

use tracing::{debug, warn};

use crate::config::{NackConfig, RetransmissionConfig};
use crate::packet::RtpPacket;
use crate::retransmission::RetransmissionBuffer;
use crate::rtcp::{DlrrSubBlock, NackPacket, ReportBlock, SdesChunk, SenderReport};
use crate::time::{CompactNtp, Ms};

/// RTX stream parameters, set once a consumer negotiates RTX support.
#[derive(Debug, Clone, Copy)]
pub struct RtxParams {
    pub payload_type: u8,
    pub ssrc: u32,
}

/// Running packet/byte counters, matched by the original's plain
/// `TransmissionCounter`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TransmissionCounter {
    packet_count: u64,
    byte_count: u64,
}

impl TransmissionCounter {
    fn update(&mut self, packet: &RtpPacket) {
        self.packet_count += 1;
        self.byte_count += packet.raw().len() as u64;
    }

    pub fn packet_count(&self) -> u64 {
        self.packet_count
    }

    pub fn byte_count(&self) -> u64 {
        self.byte_count
    }
}

pub struct RtpStreamSend {
    ssrc: u32,
    clock_rate: u32,
    payload_type: u8,
    cname: String,
    mid: Option<String>,

    rtx: Option<RtxParams>,
    rtx_seq: u16,

    retransmission: Option<RetransmissionBuffer>,
    nack_config: NackConfig,

    transmission: TransmissionCounter,
    max_packet_ts: u32,
    max_packet_ms: Ms,
    first_packet_ms: Option<Ms>,

    rtt_ms: u32,
    has_rtt: bool,
    packets_lost: u32,
    fraction_lost: u8,

    last_rr_received_ms: Option<Ms>,
    last_rr_compact_ntp: u32,

    last_sender_report_ntp_ms: Option<Ms>,
    last_sender_report_ts: u32,

    sent_prior_score: u64,
    lost_prior_score: u32,
    repaired_prior_score: u64,
    retransmitted_prior_score: u64,
    packets_repaired: u64,
    packets_retransmitted: u64,
    score: u8,

    nack_count: u64,
    nack_packet_count: u64,

    paused: bool,
}

impl RtpStreamSend {
    pub fn new(
        ssrc: u32,
        clock_rate: u32,
        payload_type: u8,
        cname: impl Into<String>,
        retransmission_config: Option<RetransmissionConfig>,
        nack_config: NackConfig,
    ) -> RtpStreamSend {
        RtpStreamSend {
            ssrc,
            clock_rate,
            payload_type,
            cname: cname.into(),
            mid: None,
            rtx: None,
            rtx_seq: 0,
            retransmission: retransmission_config.map(|cfg| RetransmissionBuffer::new(cfg, clock_rate)),
            nack_config,
            transmission: TransmissionCounter::default(),
            max_packet_ts: 0,
            max_packet_ms: Ms(0),
            first_packet_ms: None,
            rtt_ms: 0,
            has_rtt: false,
            packets_lost: 0,
            fraction_lost: 0,
            last_rr_received_ms: None,
            last_rr_compact_ntp: 0,
            last_sender_report_ntp_ms: None,
            last_sender_report_ts: 0,
            sent_prior_score: 0,
            lost_prior_score: 0,
            repaired_prior_score: 0,
            retransmitted_prior_score: 0,
            packets_repaired: 0,
            packets_retransmitted: 0,
            score: 10,
            nack_count: 0,
            nack_packet_count: 0,
            paused: false,
        }
    }

    pub fn set_rtx(&mut self, payload_type: u8, ssrc: u32) {
        self.rtx = Some(RtxParams { payload_type, ssrc });
    }

    pub fn set_mid(&mut self, mid: impl Into<String>) {
        self.mid = Some(mid.into());
    }

    pub fn has_rtx(&self) -> bool {
        self.rtx.is_some()
    }

    pub fn ssrc(&self) -> u32 {
        self.ssrc
    }

    pub fn score(&self) -> u8 {
        self.score
    }

    pub fn loss_percentage(&self) -> u8 {
        ((self.fraction_lost as u32 * 100) / 256) as u8
    }

    pub fn rtt_ms(&self) -> Option<u32> {
        self.has_rtt.then_some(self.rtt_ms)
    }

    /// Records the outgoing packet in the retransmission buffer (if NACK
    /// is enabled for this stream) and bumps transmission counters.
    pub fn receive_packet(&mut self, packet: RtpPacket, now: Ms) {
        if self.first_packet_ms.is_none() {
            self.first_packet_ms = Some(now);
        }
        if packet.timestamp() > self.max_packet_ts || self.transmission.packet_count() == 0 {
            self.max_packet_ts = packet.timestamp();
            self.max_packet_ms = now;
        }

        if let Some(buffer) = &mut self.retransmission {
            buffer.insert(packet.clone());
        }

        self.transmission.update(&packet);
    }

    /// §4.4 `ReceiveNack`: resolves each `{pid, blp}` item to its up-to-17
    /// candidate seqs, resends any not already resent within the last RTT
    /// ms, RTX-encoding on first resend. Returns the packets to emit, in
    /// candidate order.
    pub fn receive_nack(&mut self, nack: &NackPacket, now: Ms) -> Vec<RtpPacket> {
        self.nack_count += 1;
        let mut out = Vec::new();

        let rtt = if self.has_rtt { self.rtt_ms } else { self.nack_config.default_rtt_ms };

        let Some(buffer) = &mut self.retransmission else {
            warn!(ssrc = self.ssrc, "received nack but stream has no retransmission buffer");
            return out;
        };

        for item in &nack.items {
            self.nack_packet_count += item.seqs().len() as u64;

            for seq in item.seqs() {
                let Some(stored) = buffer.get(seq) else {
                    continue;
                };

                if let Some(resent_at) = stored.resent_at_ms {
                    if now.saturating_sub(resent_at) <= rtt as u64 {
                        debug!(seq, rtt, "ignoring retransmission resent within last rtt ms");
                        continue;
                    }
                }

                let first_resend = stored.sent_times == 0;
                let mut packet = stored.packet.clone();

                if let Some(rtx) = self.rtx {
                    self.rtx_seq = self.rtx_seq.wrapping_add(1);
                    packet = packet.rtx_encode(rtx.payload_type, rtx.ssrc, self.rtx_seq);
                }

                buffer.mark_resent(seq, now);
                self.packets_retransmitted += 1;
                if first_resend {
                    self.packets_repaired += 1;
                }

                out.push(packet);
            }
        }

        out
    }

    /// §4.4 `ReceiveRtcpReceiverReport`: recomputes RTT from compact-NTP
    /// `now - dlsr - lastSr`, then updates the delivery score.
    pub fn receive_rtcp_receiver_report(&mut self, block: &ReportBlock, now: Ms) {
        let now_compact = CompactNtp::from_ms(now);

        if let Some(rtt_ms) = block.round_trip_ms(now_compact) {
            self.rtt_ms = rtt_ms;
            self.has_rtt = true;
        }

        self.packets_lost = block.cumulative_lost.max(0) as u32;
        self.fraction_lost = block.fraction_lost;

        self.update_score();
    }

    fn update_score(&mut self) {
        let total_sent = self.transmission.packet_count();
        let sent = total_sent.saturating_sub(self.sent_prior_score);
        self.sent_prior_score = total_sent;

        let total_lost = self.packets_lost;
        let mut lost = if total_lost < self.lost_prior_score { 0 } else { total_lost - self.lost_prior_score };
        self.lost_prior_score = total_lost;

        let total_repaired = self.packets_repaired;
        let repaired_count = total_repaired.saturating_sub(self.repaired_prior_score);
        self.repaired_prior_score = total_repaired;

        let total_retransmitted = self.packets_retransmitted;
        let retransmitted = total_retransmitted.saturating_sub(self.retransmitted_prior_score);
        self.retransmitted_prior_score = total_retransmitted;

        if sent == 0 {
            self.score = 10;
            return;
        }

        if lost as u64 > sent {
            lost = sent as u32;
        }
        let mut repaired = repaired_count.min(lost as u64) as u32;
        if repaired as u64 > lost as u64 {
            repaired = lost;
        }

        let repaired_ratio = repaired as f64 / sent as f64;
        let mut repaired_weight = (1.0 / (repaired_ratio + 1.0)).powi(4);
        if retransmitted > 0 {
            repaired_weight *= repaired as f64 / retransmitted as f64;
        }

        let lost_adjusted = lost as f64 - repaired as f64 * repaired_weight;
        let delivered_ratio = (sent as f64 - lost_adjusted) / sent as f64;
        let score = (delivered_ratio.max(0.0).powi(4) * 10.0).round().clamp(0.0, 10.0) as u8;

        self.score = score;
    }

    /// §4.4 `GetRtcpSenderReport`: emits `None` if nothing has been sent
    /// yet, otherwise an SR whose RTP timestamp is extrapolated forward
    /// from the highest packet seen.
    pub fn get_rtcp_sender_report(&mut self, now: Ms) -> Option<SenderReport> {
        if self.transmission.packet_count() == 0 {
            return None;
        }

        let (ntp_sec, ntp_frac) = SenderReport::ntp_from_ms(now.0);
        let diff_ms = now.saturating_sub(self.max_packet_ms);
        let diff_ts = diff_ms * self.clock_rate as u64 / 1000;
        let rtp_timestamp = self.max_packet_ts.wrapping_add(diff_ts as u32);

        self.last_sender_report_ntp_ms = Some(now);
        self.last_sender_report_ts = rtp_timestamp;

        Some(SenderReport {
            ssrc: self.ssrc,
            ntp_sec,
            ntp_frac,
            rtp_timestamp,
            packet_count: self.transmission.packet_count() as u32,
            octet_count: self.transmission.byte_count() as u32,
            report_blocks: vec![],
        })
    }

    pub fn get_rtcp_sdes_chunk(&self) -> SdesChunk {
        SdesChunk::cname(self.ssrc, self.cname.clone())
    }

    /// Call when a Receiver Reference Time Report (XR block type 4) is
    /// received from the peer — out of this crate's wire-format scope
    /// (§1), so the caller hands in the already-parsed compact-NTP value.
    pub fn receive_rtcp_xr_rrtr(&mut self, compact_ntp: u32, now: Ms) {
        self.last_rr_received_ms = Some(now);
        self.last_rr_compact_ntp = compact_ntp;
    }

    /// §4.4 `GetRtcpXrDelaySinceLastRr`: `None` until a receiver reference
    /// time report has been seen.
    pub fn get_rtcp_xr_delay_since_last_rr(&self, now: Ms) -> Option<DlrrSubBlock> {
        let last_rr_received_ms = self.last_rr_received_ms?;
        let delay_ms = now.saturating_sub(last_rr_received_ms);
        let dlrr = ((delay_ms / 1000) as u32) << 16 | (((delay_ms % 1000) * 65536 / 1000) as u32);

        Some(DlrrSubBlock { ssrc: self.ssrc, last_rr: self.last_rr_compact_ntp, delay_since_last_rr: dlrr })
    }

    /// §4.4 `Pause`: drops buffered retransmittable packets.
    pub fn pause(&mut self) {
        self.paused = true;
        if let Some(buffer) = &mut self.retransmission {
            buffer.clear();
        }
    }

    pub fn resume(&mut self) {
        self.paused = false;
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn nack_count(&self) -> u64 {
        self.nack_count
    }

    pub fn nack_packet_count(&self) -> u64 {
        self.nack_packet_count
    }

    pub fn payload_type(&self) -> u8 {
        self.payload_type
    }

    pub fn max_packet_ts(&self) -> u32 {
        self.max_packet_ts
    }

    pub fn clock_rate(&self) -> u32 {
        self.clock_rate
    }

    /// Forces the score, bypassing the usual delivered-ratio computation —
    /// used when a consumer switches to a freshly-admitted layer and wants
    /// to start its reported score optimistic rather than carrying over
    /// the old layer's history.
    pub fn reset_score(&mut self, score: u8) {
        self.score = score;
        self.sent_prior_score = self.transmission.packet_count();
        self.lost_prior_score = self.packets_lost;
        self.repaired_prior_score = self.packets_repaired;
        self.retransmitted_prior_score = self.packets_retransmitted;
    }

    pub fn active_ms(&self, now: Ms) -> u64 {
        match self.first_packet_ms {
            Some(first) => now.saturating_sub(first),
            None => 0,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::RetransmissionConfig;

    fn pkt(seq: u16, ts: u32, ssrc: u32) -> RtpPacket {
        let mut buf = vec![0u8; 12];
        buf[0] = 0x80;
        buf[2..4].copy_from_slice(&seq.to_be_bytes());
        buf[4..8].copy_from_slice(&ts.to_be_bytes());
        buf[8..12].copy_from_slice(&ssrc.to_be_bytes());
        RtpPacket::parse(buf).unwrap()
    }

    #[test]
    fn no_sender_report_before_any_packet() {
        let mut stream = RtpStreamSend::new(1, 90_000, 96, "cname", None, NackConfig::default());
        assert!(stream.get_rtcp_sender_report(Ms(1000)).is_none());
    }

    #[test]
    fn sender_report_after_packet_extrapolates_timestamp() {
        let mut stream = RtpStreamSend::new(1, 90_000, 96, "cname", None, NackConfig::default());
        stream.receive_packet(pkt(1, 1000, 1), Ms(0));
        let sr = stream.get_rtcp_sender_report(Ms(100)).unwrap();
        assert_eq!(sr.rtp_timestamp, 1000 + (100 * 90_000 / 1000) as u32);
        assert_eq!(sr.packet_count, 1);
    }

    #[test]
    fn nack_without_retransmission_buffer_is_noop() {
        let mut stream = RtpStreamSend::new(1, 90_000, 96, "cname", None, NackConfig::default());
        let nack = NackPacket { sender_ssrc: 1, media_ssrc: 1, items: vec![crate::rtcp::NackItem { pid: 1, blp: 0 }] };
        let out = stream.receive_nack(&nack, Ms(0));
        assert!(out.is_empty());
    }

    #[test]
    fn s6_nack_resend_debounced_within_rtt() {
        let mut stream = RtpStreamSend::new(1, 90_000, 96, "cname", Some(RetransmissionConfig::video()), NackConfig::default());
        stream.receive_packet(pkt(10, 0, 1), Ms(0));
        stream.rtt_ms = 50;
        stream.has_rtt = true;

        let nack = NackPacket { sender_ssrc: 1, media_ssrc: 1, items: vec![crate::rtcp::NackItem { pid: 10, blp: 0 }] };
        let first = stream.receive_nack(&nack, Ms(100));
        assert_eq!(first.len(), 1);

        let second = stream.receive_nack(&nack, Ms(120)); // within 50ms rtt of the first resend
        assert!(second.is_empty());

        let third = stream.receive_nack(&nack, Ms(200)); // past the rtt window
        assert_eq!(third.len(), 1);
    }
}
