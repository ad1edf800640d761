//! RTCP wire formats this core emits or consumes: SR, RR, SDES, generic
//! NACK, transport-wide congestion control feedback, and the XR DLRR
//! sub-report. PLI/FIR/BYE are represented as thin request enums rather
//! than their own modules, since this core never needs to parse their
//! (empty) bodies beyond the common header.
//!
//! Grounded on `str0m`'s `rtp/src/rtcp/mod.rs` (`RtcpHeader`/`RtcpType`
//! shape, kept in-workspace at `rtp_teacher_ref/` during the build) for
//! the byte-level style, and `original_source/worker/src/RTC/RTCP/**`
//! for wire semantics.

pub mod header;
pub mod nack;
pub mod rr;
pub mod sdes;
pub mod sr;
pub mod twcc;
pub mod xr;

pub use header::{psfb_fmt, rtpfb_fmt, PacketType, RtcpHeader};
pub use nack::{NackItem, NackPacket};
pub use rr::{ReceiverReport, ReportBlock};
pub use sdes::{SdesChunk, SdesItem, SdesType};
pub use sr::SenderReport;
pub use xr::{DlrrReport, DlrrSubBlock};

use crate::error::CoreError;

/// A payload-specific feedback request this core can emit: PLI (picture
/// loss indication) or FIR (full intra request), both single-SSRC,
/// body-less beyond the common header (RFC 4585 §6.3.1, RFC 5104 §4.3.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyFrameRequest {
    Pli { sender_ssrc: u32, media_ssrc: u32 },
    Fir { sender_ssrc: u32, media_ssrc: u32, seq_nr: u8 },
}

impl KeyFrameRequest {
    pub fn wire_len(&self) -> usize {
        match self {
            KeyFrameRequest::Pli { .. } => header::HEADER_LEN + 8,
            KeyFrameRequest::Fir { .. } => header::HEADER_LEN + 8 + 8,
        }
    }

    pub fn write(&self, buf: &mut [u8]) -> Result<usize, CoreError> {
        let len = self.wire_len();
        if buf.len() < len {
            return Err(CoreError::resource_exhausted("key frame request does not fit in buffer"));
        }
        match self {
            KeyFrameRequest::Pli { sender_ssrc, media_ssrc } => {
                let h = RtcpHeader { padding: false, count_or_fmt: psfb_fmt::PLI, packet_type: PacketType::PayloadFeedback, length: len };
                h.write(buf);
                buf[4..8].copy_from_slice(&sender_ssrc.to_be_bytes());
                buf[8..12].copy_from_slice(&media_ssrc.to_be_bytes());
            }
            KeyFrameRequest::Fir { sender_ssrc, media_ssrc, seq_nr } => {
                let h = RtcpHeader { padding: false, count_or_fmt: psfb_fmt::FIR, packet_type: PacketType::PayloadFeedback, length: len };
                h.write(buf);
                buf[4..8].copy_from_slice(&sender_ssrc.to_be_bytes());
                buf[8..12].copy_from_slice(&media_ssrc.to_be_bytes());
                buf[12..16].copy_from_slice(&media_ssrc.to_be_bytes());
                buf[16] = *seq_nr;
                buf[17] = 0;
                buf[18] = 0;
                buf[19] = 0;
            }
        }
        Ok(len)
    }

    /// Parses a single PSFB packet whose header has already been
    /// identified as PLI or FIR by `header.count_or_fmt`.
    pub fn parse(buf: &[u8]) -> Result<KeyFrameRequest, CoreError> {
        let header = RtcpHeader::parse(buf)?;
        if header.packet_type != PacketType::PayloadFeedback {
            return Err(CoreError::malformed_rtcp("expected payload-specific feedback packet"));
        }
        if buf.len() < 12 {
            return Err(CoreError::malformed_rtcp("psfb packet shorter than fixed fields"));
        }
        let sender_ssrc = u32::from_be_bytes(buf[4..8].try_into().unwrap());
        let media_ssrc = u32::from_be_bytes(buf[8..12].try_into().unwrap());

        match header.count_or_fmt {
            psfb_fmt::PLI => Ok(KeyFrameRequest::Pli { sender_ssrc, media_ssrc }),
            psfb_fmt::FIR => {
                if buf.len() < 17 {
                    return Err(CoreError::malformed_rtcp("fir packet missing seq_nr field"));
                }
                Ok(KeyFrameRequest::Fir { sender_ssrc, media_ssrc, seq_nr: buf[16] })
            }
            _ => Err(CoreError::malformed_rtcp("unsupported psfb fmt")),
        }
    }
}

/// BYE (PT=203): a list of leaving SSRCs, no reason string support
/// (never emitted by this core; parsed only to recognize transport
/// teardown signals from a peer).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Goodbye {
    pub ssrcs: Vec<u32>,
}

impl Goodbye {
    pub fn parse(buf: &[u8]) -> Result<Goodbye, CoreError> {
        let header = RtcpHeader::parse(buf)?;
        if header.packet_type != PacketType::Goodbye {
            return Err(CoreError::malformed_rtcp("expected goodbye packet type"));
        }
        let mut ssrcs = Vec::with_capacity(header.count_or_fmt as usize);
        let mut offset = 4;
        for _ in 0..header.count_or_fmt {
            if offset + 4 > header.length {
                break;
            }
            ssrcs.push(u32::from_be_bytes(buf[offset..offset + 4].try_into().unwrap()));
            offset += 4;
        }
        Ok(Goodbye { ssrcs })
    }
}

/// Walks a buffer containing one or more compound RTCP packets back to
/// back (RFC 3550 §6.1), yielding each packet's raw slice.
pub fn split_compound(mut buf: &[u8]) -> impl Iterator<Item = &[u8]> {
    std::iter::from_fn(move || {
        if buf.is_empty() {
            return None;
        }
        match RtcpHeader::parse(buf) {
            Ok(header) => {
                let (packet, rest) = buf.split_at(header.length.min(buf.len()));
                buf = rest;
                Some(packet)
            }
            Err(_) => {
                buf = &[];
                None
            }
        }
    })
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn round_trips_pli() {
        let req = KeyFrameRequest::Pli { sender_ssrc: 1, media_ssrc: 2 };
        let mut buf = vec![0u8; req.wire_len()];
        req.write(&mut buf).unwrap();
        assert_eq!(KeyFrameRequest::parse(&buf).unwrap(), req);
    }

    #[test]
    fn round_trips_fir() {
        let req = KeyFrameRequest::Fir { sender_ssrc: 1, media_ssrc: 2, seq_nr: 5 };
        let mut buf = vec![0u8; req.wire_len()];
        req.write(&mut buf).unwrap();
        assert_eq!(KeyFrameRequest::parse(&buf).unwrap(), req);
    }

    #[test]
    fn splits_compound_packet() {
        let pli = KeyFrameRequest::Pli { sender_ssrc: 1, media_ssrc: 2 };
        let mut first = vec![0u8; pli.wire_len()];
        pli.write(&mut first).unwrap();

        let rr = ReceiverReport { ssrc: 0, report_blocks: vec![] };
        let mut second = vec![0u8; rr.wire_len()];
        rr.write(&mut second).unwrap();

        let mut combined = first.clone();
        combined.extend_from_slice(&second);

        let parts: Vec<&[u8]> = split_compound(&combined).collect();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0], &first[..]);
        assert_eq!(parts[1], &second[..]);
    }
}
