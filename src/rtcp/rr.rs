//! Receiver Report (PT=201) and the report blocks shared with SR.
//!
//! Grounded on `str0m`'s `ReceiverReport`/report-block field layout and
//! mediasoup's `RtpStreamSend::ReceiveRtcpReceiverReport` RTT recovery.

use crate::error::CoreError;
use crate::time::CompactNtp;

use super::header::{self, PacketType, RtcpHeader};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReportBlock {
    pub ssrc: u32,
    pub fraction_lost: u8,
    /// Signed 24-bit cumulative count of packets lost.
    pub cumulative_lost: i32,
    pub highest_seq: u32,
    pub jitter: u32,
    pub last_sr: u32,
    pub dlsr: u32,
}

impl ReportBlock {
    pub const LEN: usize = 24;

    pub fn write(&self, buf: &mut [u8]) {
        buf[0..4].copy_from_slice(&self.ssrc.to_be_bytes());
        buf[4] = self.fraction_lost;
        let lost = (self.cumulative_lost & 0x00FF_FFFF) as u32;
        buf[5..8].copy_from_slice(&lost.to_be_bytes()[1..4]);
        buf[8..12].copy_from_slice(&self.highest_seq.to_be_bytes());
        buf[12..16].copy_from_slice(&self.jitter.to_be_bytes());
        buf[16..20].copy_from_slice(&self.last_sr.to_be_bytes());
        buf[20..24].copy_from_slice(&self.dlsr.to_be_bytes());
    }

    pub fn parse(buf: &[u8]) -> Result<ReportBlock, CoreError> {
        if buf.len() < Self::LEN {
            return Err(CoreError::malformed_rtcp("report block shorter than 24 bytes"));
        }
        let ssrc = u32::from_be_bytes(buf[0..4].try_into().unwrap());
        let fraction_lost = buf[4];
        let mut lost_bytes = [0u8; 4];
        lost_bytes[1..4].copy_from_slice(&buf[5..8]);
        let mut cumulative_lost = u32::from_be_bytes(lost_bytes) as i32;
        // sign-extend the 24-bit field
        if cumulative_lost & 0x0080_0000 != 0 {
            cumulative_lost |= -0x0100_0000i32;
        }
        let highest_seq = u32::from_be_bytes(buf[8..12].try_into().unwrap());
        let jitter = u32::from_be_bytes(buf[12..16].try_into().unwrap());
        let last_sr = u32::from_be_bytes(buf[16..20].try_into().unwrap());
        let dlsr = u32::from_be_bytes(buf[20..24].try_into().unwrap());

        Ok(ReportBlock { ssrc, fraction_lost, cumulative_lost, highest_seq, jitter, last_sr, dlsr })
    }

    /// RTT in milliseconds from `now - dlsr - lastSr`, all in compact-NTP
    /// units, per §4.4. Returns `None` when this block never saw an SR
    /// (`last_sr == 0`), matching the original's "no RTT yet" behavior.
    pub fn round_trip_ms(&self, now_compact_ntp: CompactNtp) -> Option<u32> {
        if self.last_sr == 0 {
            return None;
        }
        let rtt_compact = now_compact_ntp.0.wrapping_sub(self.dlsr).wrapping_sub(self.last_sr);
        // compact NTP units are 1/65536 sec; convert to ms.
        Some(((rtt_compact as u64 * 1000) >> 16) as u32)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiverReport {
    /// SSRC of the packet originator (often 0 in this crate's sender-only use).
    pub ssrc: u32,
    pub report_blocks: Vec<ReportBlock>,
}

impl ReceiverReport {
    pub fn wire_len(&self) -> usize {
        header::HEADER_LEN + 4 + self.report_blocks.len() * ReportBlock::LEN
    }

    pub fn write(&self, buf: &mut [u8]) -> Result<usize, CoreError> {
        let len = self.wire_len();
        if buf.len() < len {
            return Err(CoreError::resource_exhausted("receiver report does not fit in buffer"));
        }
        let header = RtcpHeader {
            padding: false,
            count_or_fmt: self.report_blocks.len() as u8,
            packet_type: PacketType::ReceiverReport,
            length: len,
        };
        header.write(buf);
        buf[4..8].copy_from_slice(&self.ssrc.to_be_bytes());

        let mut offset = 8;
        for block in &self.report_blocks {
            block.write(&mut buf[offset..offset + ReportBlock::LEN]);
            offset += ReportBlock::LEN;
        }
        Ok(len)
    }

    pub fn parse(buf: &[u8]) -> Result<ReceiverReport, CoreError> {
        let header = RtcpHeader::parse(buf)?;
        if header.packet_type != PacketType::ReceiverReport {
            return Err(CoreError::malformed_rtcp("expected receiver report packet type"));
        }
        if buf.len() < 8 {
            return Err(CoreError::malformed_rtcp("receiver report shorter than fixed fields"));
        }
        let ssrc = u32::from_be_bytes(buf[4..8].try_into().unwrap());

        let mut report_blocks = Vec::with_capacity(header.count_or_fmt as usize);
        let mut offset = 8;
        for _ in 0..header.count_or_fmt {
            if offset + ReportBlock::LEN > header.length {
                break;
            }
            report_blocks.push(ReportBlock::parse(&buf[offset..offset + ReportBlock::LEN])?);
            offset += ReportBlock::LEN;
        }

        Ok(ReceiverReport { ssrc, report_blocks })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn block() -> ReportBlock {
        ReportBlock { ssrc: 55, fraction_lost: 1, cumulative_lost: -5, highest_seq: 10_000, jitter: 3, last_sr: 111, dlsr: 222 }
    }

    #[test]
    fn round_trips_report_block_negative_lost() {
        let mut buf = [0u8; ReportBlock::LEN];
        let b = block();
        b.write(&mut buf);
        let parsed = ReportBlock::parse(&buf).unwrap();
        assert_eq!(parsed, b);
    }

    #[test]
    fn round_trips_receiver_report() {
        let rr = ReceiverReport { ssrc: 0, report_blocks: vec![block(), block()] };
        let mut buf = vec![0u8; rr.wire_len()];
        rr.write(&mut buf).unwrap();
        let parsed = ReceiverReport::parse(&buf).unwrap();
        assert_eq!(parsed, rr);
    }

    #[test]
    fn rtt_from_compact_ntp_delta() {
        let b = ReportBlock { ssrc: 1, fraction_lost: 0, cumulative_lost: 0, highest_seq: 0, jitter: 0, last_sr: 1000, dlsr: 500 };
        // now = last_sr + dlsr + 65536 (exactly 1 extra second of RTT)
        let now = CompactNtp(1000u32.wrapping_add(500).wrapping_add(65536));
        assert_eq!(b.round_trip_ms(now), Some(1000));
    }

    #[test]
    fn no_rtt_without_prior_sr() {
        let b = ReportBlock { ssrc: 1, fraction_lost: 0, cumulative_lost: 0, highest_seq: 0, jitter: 0, last_sr: 0, dlsr: 0 };
        assert_eq!(b.round_trip_ms(CompactNtp(123)), None);
    }
}
