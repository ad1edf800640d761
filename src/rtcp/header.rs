//! Generic 4-byte RTCP common header, shared by every packet type in
//! this module (RFC 3550 §6.4.1).
//!
//! Grounded on `str0m`'s `RtcpHeader` (`rtp_teacher_ref/src/rtcp/mod.rs`),
//! adapted to this crate's narrower packet type set.

use crate::error::CoreError;

/// RTCP packet type field (PT), RFC 3550/4585/3611.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketType {
    SenderReport = 200,
    ReceiverReport = 201,
    SourceDescription = 202,
    Goodbye = 203,
    RtpFeedback = 205,
    PayloadFeedback = 206,
    ExtendedReport = 207,
}

impl PacketType {
    pub fn from_u8(v: u8) -> Option<PacketType> {
        use PacketType::*;
        match v {
            200 => Some(SenderReport),
            201 => Some(ReceiverReport),
            202 => Some(SourceDescription),
            203 => Some(Goodbye),
            205 => Some(RtpFeedback),
            206 => Some(PayloadFeedback),
            207 => Some(ExtendedReport),
            _ => None,
        }
    }
}

/// RTP feedback (PT=205) FMT values this crate understands.
pub mod rtpfb_fmt {
    pub const NACK: u8 = 1;
    pub const TMMBR: u8 = 3;
    pub const TMMBN: u8 = 4;
    pub const SR_REQ: u8 = 5;
    pub const TLLEI: u8 = 7;
    pub const ECN: u8 = 8;
    pub const TCC: u8 = 15;
}

/// Payload-specific feedback (PT=206) FMT values this crate understands.
pub mod psfb_fmt {
    pub const PLI: u8 = 1;
    pub const SLI: u8 = 2;
    pub const FIR: u8 = 4;
    pub const REMB: u8 = 15;
}

#[derive(Debug, Clone, Copy)]
pub struct RtcpHeader {
    pub padding: bool,
    /// Either the reception report count (SR/RR), source count (SDES/BYE),
    /// or the feedback message type (RTPFB/PSFB) — the low 5 bits of byte 0.
    pub count_or_fmt: u8,
    pub packet_type: PacketType,
    /// Packet length in bytes, including this 4-byte header.
    pub length: usize,
}

impl RtcpHeader {
    pub fn parse(buf: &[u8]) -> Result<RtcpHeader, CoreError> {
        if buf.len() < 4 {
            return Err(CoreError::malformed_rtcp("rtcp header shorter than 4 bytes"));
        }
        let version = (buf[0] >> 6) & 0x03;
        if version != 2 {
            return Err(CoreError::malformed_rtcp("rtcp version is not 2"));
        }
        let padding = buf[0] & 0x20 != 0;
        let count_or_fmt = buf[0] & 0x1F;
        let packet_type = PacketType::from_u8(buf[1])
            .ok_or_else(|| CoreError::malformed_rtcp("unrecognized rtcp packet type"))?;
        let words = u16::from_be_bytes([buf[2], buf[3]]);
        let length = (words as usize + 1) * 4;
        if buf.len() < length {
            return Err(CoreError::malformed_rtcp("rtcp packet shorter than declared length"));
        }

        Ok(RtcpHeader { padding, count_or_fmt, packet_type, length })
    }

    /// Writes the 4-byte header at `buf[0..4]`. `length` must already be
    /// set to the full packet length in bytes and be a multiple of 4.
    pub fn write(&self, buf: &mut [u8]) {
        debug_assert!(self.length % 4 == 0, "rtcp length must be a multiple of 4");
        buf[0] = 0b1000_0000 | (u8::from(self.padding) << 5) | (self.count_or_fmt & 0x1F);
        buf[1] = self.packet_type as u8;
        let words = (self.length / 4) as u16 - 1;
        buf[2..4].copy_from_slice(&words.to_be_bytes());
    }
}

pub const HEADER_LEN: usize = 4;

pub fn pad_to_word(len: usize) -> usize {
    (len + 3) & !3
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn round_trips_header() {
        let h = RtcpHeader { padding: false, count_or_fmt: 1, packet_type: PacketType::RtpFeedback, length: 20 };
        let mut buf = [0u8; 4];
        h.write(&mut buf);
        let mut full = vec![0u8; 20];
        full[0..4].copy_from_slice(&buf);
        let parsed = RtcpHeader::parse(&full).unwrap();
        assert_eq!(parsed.count_or_fmt, 1);
        assert_eq!(parsed.packet_type, PacketType::RtpFeedback);
        assert_eq!(parsed.length, 20);
    }

    #[test]
    fn rejects_bad_version() {
        let buf = [0x00, 200, 0, 1];
        assert!(RtcpHeader::parse(&buf).is_err());
    }
}
