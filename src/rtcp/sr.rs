//! Sender Report (PT=200): NTP/RTP timestamp pair plus a sender's own
//! packet/octet counters, and the report blocks it carries.
//!
//! Grounded on `str0m`'s `SenderInfo` field layout
//! (`rtp_teacher_ref/src/rtcp/mod.rs`) and mediasoup's
//! `RtpStreamSend::GetRtcpSenderReport`.

use crate::error::CoreError;

use super::header::{self, PacketType, RtcpHeader};
use super::rr::ReportBlock;

pub const FIXED_LEN: usize = 20;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SenderReport {
    pub ssrc: u32,
    pub ntp_sec: u32,
    pub ntp_frac: u32,
    pub rtp_timestamp: u32,
    pub packet_count: u32,
    pub octet_count: u32,
    pub report_blocks: Vec<ReportBlock>,
}

impl SenderReport {
    pub fn wire_len(&self) -> usize {
        header::HEADER_LEN + FIXED_LEN + self.report_blocks.len() * ReportBlock::LEN
    }

    pub fn write(&self, buf: &mut [u8]) -> Result<usize, CoreError> {
        let len = self.wire_len();
        if buf.len() < len {
            return Err(CoreError::resource_exhausted("sender report does not fit in buffer"));
        }

        let header = RtcpHeader {
            padding: false,
            count_or_fmt: self.report_blocks.len() as u8,
            packet_type: PacketType::SenderReport,
            length: len,
        };
        header.write(buf);

        buf[4..8].copy_from_slice(&self.ssrc.to_be_bytes());
        buf[8..12].copy_from_slice(&self.ntp_sec.to_be_bytes());
        buf[12..16].copy_from_slice(&self.ntp_frac.to_be_bytes());
        buf[16..20].copy_from_slice(&self.rtp_timestamp.to_be_bytes());
        buf[20..24].copy_from_slice(&self.packet_count.to_be_bytes());
        buf[24..28].copy_from_slice(&self.octet_count.to_be_bytes());

        let mut offset = 28;
        for block in &self.report_blocks {
            block.write(&mut buf[offset..offset + ReportBlock::LEN]);
            offset += ReportBlock::LEN;
        }

        Ok(len)
    }

    pub fn parse(buf: &[u8]) -> Result<SenderReport, CoreError> {
        let header = RtcpHeader::parse(buf)?;
        if header.packet_type != PacketType::SenderReport {
            return Err(CoreError::malformed_rtcp("expected sender report packet type"));
        }
        if buf.len() < header::HEADER_LEN + FIXED_LEN {
            return Err(CoreError::malformed_rtcp("sender report shorter than fixed fields"));
        }

        let ssrc = u32::from_be_bytes(buf[4..8].try_into().unwrap());
        let ntp_sec = u32::from_be_bytes(buf[8..12].try_into().unwrap());
        let ntp_frac = u32::from_be_bytes(buf[12..16].try_into().unwrap());
        let rtp_timestamp = u32::from_be_bytes(buf[16..20].try_into().unwrap());
        let packet_count = u32::from_be_bytes(buf[20..24].try_into().unwrap());
        let octet_count = u32::from_be_bytes(buf[24..28].try_into().unwrap());

        let mut report_blocks = Vec::with_capacity(header.count_or_fmt as usize);
        let mut offset = 28;
        for _ in 0..header.count_or_fmt {
            if offset + ReportBlock::LEN > header.length {
                break;
            }
            report_blocks.push(ReportBlock::parse(&buf[offset..offset + ReportBlock::LEN])?);
            offset += ReportBlock::LEN;
        }

        Ok(SenderReport { ssrc, ntp_sec, ntp_frac, rtp_timestamp, packet_count, octet_count, report_blocks })
    }

    /// Builds the full 64-bit `(ntpSec, ntpFrac)` pair for `now`
    /// (milliseconds since the Unix epoch), 1900-epoch adjusted.
    pub fn ntp_from_ms(now_ms: u64) -> (u32, u32) {
        let sec = (now_ms / 1000 + 2_208_988_800) as u32;
        let remainder_ms = now_ms % 1000;
        let frac = (((remainder_ms as u64) << 32) / 1000) as u32;
        (sec, frac)
    }

    /// Inverse of [`Self::ntp_from_ms`]: recovers milliseconds since the
    /// Unix epoch from a full `(ntpSec, ntpFrac)` pair.
    pub fn ntp_to_ms(ntp_sec: u32, ntp_frac: u32) -> u64 {
        let sec_ms = (ntp_sec as u64).saturating_sub(2_208_988_800) * 1000;
        let frac_ms = ((ntp_frac as u64) * 1000) >> 32;
        sec_ms + frac_ms
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn round_trips_without_report_blocks() {
        let sr = SenderReport {
            ssrc: 0x1234,
            ntp_sec: 111,
            ntp_frac: 222,
            rtp_timestamp: 90_000,
            packet_count: 5,
            octet_count: 5000,
            report_blocks: vec![],
        };
        let mut buf = vec![0u8; sr.wire_len()];
        sr.write(&mut buf).unwrap();
        let parsed = SenderReport::parse(&buf).unwrap();
        assert_eq!(parsed, sr);
    }

    #[test]
    fn round_trips_with_report_block() {
        let sr = SenderReport {
            ssrc: 1,
            ntp_sec: 2,
            ntp_frac: 3,
            rtp_timestamp: 4,
            packet_count: 5,
            octet_count: 6,
            report_blocks: vec![ReportBlock {
                ssrc: 99,
                fraction_lost: 10,
                cumulative_lost: 42,
                highest_seq: 1000,
                jitter: 7,
                last_sr: 8,
                dlsr: 9,
            }],
        };
        let mut buf = vec![0u8; sr.wire_len()];
        sr.write(&mut buf).unwrap();
        let parsed = SenderReport::parse(&buf).unwrap();
        assert_eq!(parsed, sr);
    }
}
