//! Generic NACK (RTPFB, FMT=1, RFC 4585 §6.2.1): a sender SSRC, a media
//! SSRC, and a list of `{pid, blp}` items each covering up to 17 seqs
//! (the base `pid` plus up to 16 more flagged in the bitmask).
//!
//! Grounded on mediasoup's `FeedbackRtpNackPacket`/`NackItem` and
//! `str0m`'s `Nack` shape (`rtp_teacher_ref/src/rtcp/mod.rs`).

use crate::error::CoreError;

use super::header::{self, rtpfb_fmt, PacketType, RtcpHeader};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NackItem {
    pub pid: u16,
    pub blp: u16,
}

impl NackItem {
    /// The up-to-17 sequence numbers this item covers, in order.
    pub fn seqs(&self) -> Vec<u16> {
        let mut out = Vec::with_capacity(17);
        out.push(self.pid);
        for bit in 0..16 {
            if self.blp & (1 << bit) != 0 {
                out.push(self.pid.wrapping_add(bit + 1));
            }
        }
        out
    }

    /// Builds the minimal set of items covering `seqs` (must be sorted
    /// ascending, deduplicated) — greedy bucketing into 17-wide windows.
    pub fn from_seqs(seqs: &[u16]) -> Vec<NackItem> {
        let mut items = Vec::new();
        let mut iter = seqs.iter().copied().peekable();
        while let Some(pid) = iter.next() {
            let mut blp = 0u16;
            while let Some(&next) = iter.peek() {
                let delta = next.wrapping_sub(pid);
                if delta == 0 || delta > 16 {
                    break;
                }
                blp |= 1 << (delta - 1);
                iter.next();
            }
            items.push(NackItem { pid, blp });
        }
        items
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NackPacket {
    pub sender_ssrc: u32,
    pub media_ssrc: u32,
    pub items: Vec<NackItem>,
}

impl NackPacket {
    pub fn wire_len(&self) -> usize {
        header::HEADER_LEN + 8 + self.items.len() * 4
    }

    pub fn write(&self, buf: &mut [u8]) -> Result<usize, CoreError> {
        let len = self.wire_len();
        if buf.len() < len {
            return Err(CoreError::resource_exhausted("nack packet does not fit in buffer"));
        }
        let header = RtcpHeader {
            padding: false,
            count_or_fmt: rtpfb_fmt::NACK,
            packet_type: PacketType::RtpFeedback,
            length: len,
        };
        header.write(buf);
        buf[4..8].copy_from_slice(&self.sender_ssrc.to_be_bytes());
        buf[8..12].copy_from_slice(&self.media_ssrc.to_be_bytes());

        let mut offset = 12;
        for item in &self.items {
            buf[offset..offset + 2].copy_from_slice(&item.pid.to_be_bytes());
            buf[offset + 2..offset + 4].copy_from_slice(&item.blp.to_be_bytes());
            offset += 4;
        }
        Ok(len)
    }

    pub fn parse(buf: &[u8]) -> Result<NackPacket, CoreError> {
        let header = RtcpHeader::parse(buf)?;
        if header.packet_type != PacketType::RtpFeedback || header.count_or_fmt != rtpfb_fmt::NACK {
            return Err(CoreError::malformed_rtcp("expected nack packet (rtpfb fmt=1)"));
        }
        if buf.len() < 12 {
            return Err(CoreError::malformed_rtcp("nack packet shorter than fixed fields"));
        }
        let sender_ssrc = u32::from_be_bytes(buf[4..8].try_into().unwrap());
        let media_ssrc = u32::from_be_bytes(buf[8..12].try_into().unwrap());

        let mut items = Vec::new();
        let mut offset = 12;
        while offset + 4 <= header.length {
            let pid = u16::from_be_bytes(buf[offset..offset + 2].try_into().unwrap());
            let blp = u16::from_be_bytes(buf[offset + 2..offset + 4].try_into().unwrap());
            items.push(NackItem { pid, blp });
            offset += 4;
        }

        Ok(NackPacket { sender_ssrc, media_ssrc, items })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn seqs_from_pid_and_blp() {
        let item = NackItem { pid: 100, blp: 0b0000_0000_0000_0101 };
        assert_eq!(item.seqs(), vec![100, 101, 103]);
    }

    #[test]
    fn from_seqs_buckets_consecutive_gaps() {
        let seqs = [100u16, 101, 103, 120];
        let items = NackItem::from_seqs(&seqs);
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].pid, 100);
        assert_eq!(items[0].seqs(), vec![100, 101, 103]);
        assert_eq!(items[1].pid, 120);
    }

    #[test]
    fn round_trips_nack_packet() {
        let pkt = NackPacket {
            sender_ssrc: 1,
            media_ssrc: 2,
            items: NackItem::from_seqs(&[5, 6, 22]),
        };
        let mut buf = vec![0u8; pkt.wire_len()];
        pkt.write(&mut buf).unwrap();
        let parsed = NackPacket::parse(&buf).unwrap();
        assert_eq!(parsed, pkt);
    }
}
