//! Extended Report (PT=207): this crate only emits/parses the DLRR
//! report block (block type 5, RFC 3611 §4.5), used to carry the
//! "delay since last RR" sub-block a receiver echoes back in its own RR
//! so the sender of the DLRR block can recover an extra RTT sample.
//!
//! Grounded on mediasoup's `RtpStreamSend::GetRtcpXrDelaySinceLastRr` and
//! the `RtpStreamRecv` DLRR sibling (`RTC/RTCP/XrDelaySinceLastRr.cpp`).

use crate::error::CoreError;

use super::header::{self, PacketType, RtcpHeader};

const DLRR_BLOCK_TYPE: u8 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DlrrSubBlock {
    pub ssrc: u32,
    pub last_rr: u32,
    pub delay_since_last_rr: u32,
}

impl DlrrSubBlock {
    pub const LEN: usize = 12;

    fn write(&self, buf: &mut [u8]) {
        buf[0..4].copy_from_slice(&self.ssrc.to_be_bytes());
        buf[4..8].copy_from_slice(&self.last_rr.to_be_bytes());
        buf[8..12].copy_from_slice(&self.delay_since_last_rr.to_be_bytes());
    }

    fn parse(buf: &[u8]) -> Result<DlrrSubBlock, CoreError> {
        if buf.len() < Self::LEN {
            return Err(CoreError::malformed_rtcp("dlrr sub-block shorter than 12 bytes"));
        }
        Ok(DlrrSubBlock {
            ssrc: u32::from_be_bytes(buf[0..4].try_into().unwrap()),
            last_rr: u32::from_be_bytes(buf[4..8].try_into().unwrap()),
            delay_since_last_rr: u32::from_be_bytes(buf[8..12].try_into().unwrap()),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DlrrReport {
    pub originator_ssrc: u32,
    pub sub_blocks: Vec<DlrrSubBlock>,
}

impl DlrrReport {
    fn block_body_len(&self) -> usize {
        4 + self.sub_blocks.len() * DlrrSubBlock::LEN
    }

    pub fn wire_len(&self) -> usize {
        header::HEADER_LEN + 4 + self.block_body_len()
    }

    pub fn write(&self, buf: &mut [u8]) -> Result<usize, CoreError> {
        let len = self.wire_len();
        if buf.len() < len {
            return Err(CoreError::resource_exhausted("xr dlrr report does not fit in buffer"));
        }
        let header = RtcpHeader { padding: false, count_or_fmt: 0, packet_type: PacketType::ExtendedReport, length: len };
        header.write(buf);
        buf[4..8].copy_from_slice(&self.originator_ssrc.to_be_bytes());

        buf[8] = DLRR_BLOCK_TYPE;
        buf[9] = 0; // reserved
        let block_words = (self.block_body_len() / 4) as u16 - 1;
        buf[10..12].copy_from_slice(&block_words.to_be_bytes());

        let mut offset = 12;
        for sub in &self.sub_blocks {
            sub.write(&mut buf[offset..offset + DlrrSubBlock::LEN]);
            offset += DlrrSubBlock::LEN;
        }
        Ok(len)
    }

    pub fn parse(buf: &[u8]) -> Result<DlrrReport, CoreError> {
        let header = RtcpHeader::parse(buf)?;
        if header.packet_type != PacketType::ExtendedReport {
            return Err(CoreError::malformed_rtcp("expected xr packet type"));
        }
        if buf.len() < 12 {
            return Err(CoreError::malformed_rtcp("xr packet shorter than block header"));
        }
        let originator_ssrc = u32::from_be_bytes(buf[4..8].try_into().unwrap());
        if buf[8] != DLRR_BLOCK_TYPE {
            return Err(CoreError::malformed_rtcp("unsupported xr block type"));
        }
        let block_words = u16::from_be_bytes(buf[10..12].try_into().unwrap());
        let block_body_len = (block_words as usize + 1) * 4;

        let mut sub_blocks = Vec::new();
        let mut offset = 12;
        let end = (12 + block_body_len - 4).min(header.length);
        while offset + DlrrSubBlock::LEN <= end {
            sub_blocks.push(DlrrSubBlock::parse(&buf[offset..offset + DlrrSubBlock::LEN])?);
            offset += DlrrSubBlock::LEN;
        }

        Ok(DlrrReport { originator_ssrc, sub_blocks })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn round_trips_single_sub_block() {
        let report = DlrrReport {
            originator_ssrc: 10,
            sub_blocks: vec![DlrrSubBlock { ssrc: 20, last_rr: 30, delay_since_last_rr: 40 }],
        };
        let mut buf = vec![0u8; report.wire_len()];
        report.write(&mut buf).unwrap();
        let parsed = DlrrReport::parse(&buf).unwrap();
        assert_eq!(parsed, report);
    }
}
