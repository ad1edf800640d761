//! RTP packet parsing: RFC 3550 fixed header plus RFC 8285 one-byte/
//! two-byte extension headers, and the lazily-parsed payload descriptor
//! view used by the codec handlers (§3, §6).

use std::sync::Arc;

use crate::codecs::PayloadDescriptor;

/// RTP header extension IDs the core cares about (§6).
#[derive(Debug, Clone, Copy, Default)]
pub struct ExtensionIds {
    pub mid: Option<u8>,
    pub rid: Option<u8>,
    pub repaired_rid: Option<u8>,
    pub abs_send_time: Option<u8>,
    pub transport_cc: Option<u8>,
    pub frame_marking: Option<u8>,
}

/// Parsed RTP header extension value, keyed by the negotiated extension id.
#[derive(Debug, Clone)]
struct ExtensionValue {
    id: u8,
    data: Vec<u8>,
}

/// A reference-counted RTP packet: a shared buffer plus a parsed view of
/// the header fields the core operates on.
///
/// Reference-counted because the same packet may sit in one or more
/// retransmission buffers and be emitted immediately (§3).
#[derive(Debug, Clone)]
pub struct RtpPacket {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    buf: Vec<u8>,
    payload_offset: usize,
    padding_len: usize,
    ssrc: u32,
    seq: u16,
    timestamp: u32,
    marker: bool,
    payload_type: u8,
    extensions: Vec<ExtensionValue>,
}

impl RtpPacket {
    /// Parses a raw RTP packet. Returns `None` if the buffer is too short
    /// or carries an unsupported RTP version.
    pub fn parse(buf: Vec<u8>) -> Option<RtpPacket> {
        if buf.len() < 12 {
            return None;
        }
        let version = buf[0] >> 6;
        if version != 2 {
            return None;
        }
        let has_padding = buf[0] & 0b0010_0000 != 0;
        let has_extension = buf[0] & 0b0001_0000 != 0;
        let csrc_count = (buf[0] & 0x0F) as usize;
        let marker = buf[1] & 0b1000_0000 != 0;
        let payload_type = buf[1] & 0b0111_1111;
        let seq = u16::from_be_bytes([buf[2], buf[3]]);
        let timestamp = u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]);
        let ssrc = u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]);

        let mut offset = 12 + csrc_count * 4;
        if offset > buf.len() {
            return None;
        }

        let mut extensions = Vec::new();

        if has_extension {
            if offset + 4 > buf.len() {
                return None;
            }
            let profile = u16::from_be_bytes([buf[offset], buf[offset + 1]]);
            let ext_len_words = u16::from_be_bytes([buf[offset + 2], buf[offset + 3]]) as usize;
            offset += 4;
            let ext_end = offset + ext_len_words * 4;
            if ext_end > buf.len() {
                return None;
            }

            match profile {
                // One-byte header extensions (RFC 8285).
                0xBEDE => {
                    let mut i = offset;
                    while i < ext_end {
                        let b = buf[i];
                        if b == 0 {
                            i += 1; // padding
                            continue;
                        }
                        let id = b >> 4;
                        let len = (b & 0x0F) as usize + 1;
                        i += 1;
                        if id == 15 || i + len > ext_end {
                            break;
                        }
                        extensions.push(ExtensionValue { id, data: buf[i..i + len].to_vec() });
                        i += len;
                    }
                }
                // Two-byte header extensions.
                p if (p & 0xFFF0) == 0x1000 => {
                    let mut i = offset;
                    while i + 2 <= ext_end {
                        let id = buf[i];
                        let len = buf[i + 1] as usize;
                        i += 2;
                        if id == 0 {
                            continue;
                        }
                        if i + len > ext_end {
                            break;
                        }
                        extensions.push(ExtensionValue { id, data: buf[i..i + len].to_vec() });
                        i += len;
                    }
                }
                _ => {}
            }

            offset = ext_end;
        }

        let padding_len = if has_padding {
            match buf.last() {
                Some(&p) if (p as usize) <= buf.len() - offset => p as usize,
                _ => return None,
            }
        } else {
            0
        };

        Some(RtpPacket {
            inner: Arc::new(Inner {
                buf,
                payload_offset: offset,
                padding_len,
                ssrc,
                seq,
                timestamp,
                marker,
                payload_type,
                extensions,
            }),
        })
    }

    pub fn ssrc(&self) -> u32 {
        self.inner.ssrc
    }

    pub fn seq(&self) -> u16 {
        self.inner.seq
    }

    pub fn timestamp(&self) -> u32 {
        self.inner.timestamp
    }

    pub fn marker(&self) -> bool {
        self.inner.marker
    }

    pub fn payload_type(&self) -> u8 {
        self.inner.payload_type
    }

    pub fn payload(&self) -> &[u8] {
        let end = self.inner.buf.len() - self.inner.padding_len;
        &self.inner.buf[self.inner.payload_offset..end]
    }

    pub fn raw(&self) -> &[u8] {
        &self.inner.buf
    }

    fn extension(&self, id: Option<u8>) -> Option<&[u8]> {
        let id = id?;
        self.inner
            .extensions
            .iter()
            .find(|e| e.id == id)
            .map(|e| e.data.as_slice())
    }

    pub fn mid(&self, ids: &ExtensionIds) -> Option<&str> {
        self.extension(ids.mid).and_then(|d| std::str::from_utf8(d).ok())
    }

    pub fn rid(&self, ids: &ExtensionIds) -> Option<&str> {
        self.extension(ids.rid).and_then(|d| std::str::from_utf8(d).ok())
    }

    pub fn abs_send_time(&self, ids: &ExtensionIds) -> Option<u32> {
        let d = self.extension(ids.abs_send_time)?;
        if d.len() < 3 {
            return None;
        }
        Some(u32::from_be_bytes([0, d[0], d[1], d[2]]))
    }

    /// Transport-wide sequence number carried in the
    /// `transport-wide-cc-01` extension.
    pub fn transport_wide_seq(&self, ids: &ExtensionIds) -> Option<u16> {
        let d = self.extension(ids.transport_cc)?;
        if d.len() < 2 {
            return None;
        }
        Some(u16::from_be_bytes([d[0], d[1]]))
    }

    /// Rewrites the SSRC field in a freshly cloned copy of this packet's
    /// buffer, returning a new `RtpPacket`. Used by consumers when
    /// forwarding to rewrite header fields for the outgoing stream.
    pub fn with_rewritten_header(&self, ssrc: u32, seq: u16, timestamp: u32, payload_type: u8) -> RtpPacket {
        let mut buf = self.inner.buf.clone();
        buf[1] = (buf[1] & 0b1000_0000) | (payload_type & 0x7F);
        buf[2..4].copy_from_slice(&seq.to_be_bytes());
        buf[4..8].copy_from_slice(&timestamp.to_be_bytes());
        buf[8..12].copy_from_slice(&ssrc.to_be_bytes());
        RtpPacket {
            inner: Arc::new(Inner {
                buf,
                payload_offset: self.inner.payload_offset,
                padding_len: self.inner.padding_len,
                ssrc,
                seq,
                timestamp,
                marker: self.inner.marker,
                payload_type,
                extensions: self.inner.extensions.clone(),
            }),
        }
    }

    /// Rewrites the marker bit in a freshly cloned copy of this packet's
    /// buffer. Used by codec handlers that recompute the marker bit from
    /// the payload descriptor (e.g. VP9's end-of-frame flag) rather than
    /// trusting the producer's own bit.
    pub fn with_marker(&self, marker: bool) -> RtpPacket {
        let mut buf = self.inner.buf.clone();
        buf[1] = (buf[1] & 0x7F) | (if marker { 0x80 } else { 0 });
        RtpPacket {
            inner: Arc::new(Inner {
                buf,
                payload_offset: self.inner.payload_offset,
                padding_len: self.inner.padding_len,
                ssrc: self.inner.ssrc,
                seq: self.inner.seq,
                timestamp: self.inner.timestamp,
                marker,
                payload_type: self.inner.payload_type,
                extensions: self.inner.extensions.clone(),
            }),
        }
    }

    /// RFC 4588: prepends the original 16-bit sequence number to the
    /// payload and rewrites SSRC/payload-type/sequence for the RTX stream.
    pub fn rtx_encode(&self, rtx_payload_type: u8, rtx_ssrc: u32, rtx_seq: u16) -> RtpPacket {
        let mut buf = Vec::with_capacity(self.inner.buf.len() + 2);
        buf.extend_from_slice(&self.inner.buf[..self.inner.payload_offset]);
        buf.extend_from_slice(&self.inner.seq.to_be_bytes());
        buf.extend_from_slice(self.payload());

        buf[1] = (buf[1] & 0b1000_0000) | (rtx_payload_type & 0x7F);
        buf[2..4].copy_from_slice(&rtx_seq.to_be_bytes());
        buf[8..12].copy_from_slice(&rtx_ssrc.to_be_bytes());

        RtpPacket {
            inner: Arc::new(Inner {
                payload_offset: self.inner.payload_offset,
                padding_len: 0,
                ssrc: rtx_ssrc,
                seq: rtx_seq,
                timestamp: self.inner.timestamp,
                marker: self.inner.marker,
                payload_type: rtx_payload_type,
                extensions: self.inner.extensions.clone(),
                buf,
            }),
        }
    }

    /// Decodes an RFC 4588 RTX payload back into the original sequence
    /// number and de-wrapped media payload.
    pub fn rtx_decode(&self) -> Option<(u16, &[u8])> {
        let payload = self.payload();
        if payload.len() < 2 {
            return None;
        }
        let original_seq = u16::from_be_bytes([payload[0], payload[1]]);
        Some((original_seq, &payload[2..]))
    }

    /// Parses this packet's payload descriptor for the given codec. The
    /// descriptor is computed lazily and not cached, matching the
    /// "lazily-parsed" characterization in §3 — callers that need it more
    /// than once should cache the result themselves.
    pub fn payload_descriptor(&self, codec: crate::codecs::Codec) -> Option<PayloadDescriptor> {
        crate::codecs::parse_descriptor(codec, self.payload())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn minimal_rtp(seq: u16, ts: u32, ssrc: u32, pt: u8, marker: bool, payload: &[u8]) -> Vec<u8> {
        let mut buf = vec![0u8; 12 + payload.len()];
        buf[0] = 0x80; // version 2, no padding, no extension, no csrc
        buf[1] = (if marker { 0x80 } else { 0 }) | (pt & 0x7F);
        buf[2..4].copy_from_slice(&seq.to_be_bytes());
        buf[4..8].copy_from_slice(&ts.to_be_bytes());
        buf[8..12].copy_from_slice(&ssrc.to_be_bytes());
        buf[12..].copy_from_slice(payload);
        buf
    }

    #[test]
    fn parses_basic_fields() {
        let raw = minimal_rtp(100, 9000, 0xdead_beef, 96, true, &[1, 2, 3]);
        let pkt = RtpPacket::parse(raw).unwrap();
        assert_eq!(pkt.seq(), 100);
        assert_eq!(pkt.timestamp(), 9000);
        assert_eq!(pkt.ssrc(), 0xdead_beef);
        assert_eq!(pkt.payload_type(), 96);
        assert!(pkt.marker());
        assert_eq!(pkt.payload(), &[1, 2, 3]);
    }

    #[test]
    fn parses_one_byte_extensions() {
        let mut buf = vec![0u8; 12];
        buf[0] = 0x90; // version 2, extension bit set
        buf[1] = 96;
        buf[2..4].copy_from_slice(&1u16.to_be_bytes());
        buf[4..8].copy_from_slice(&1000u32.to_be_bytes());
        buf[8..12].copy_from_slice(&1u32.to_be_bytes());

        // extension header: profile 0xBEDE, length 1 word
        buf.extend_from_slice(&0xBEDEu16.to_be_bytes());
        buf.extend_from_slice(&1u16.to_be_bytes());
        // one element: id=1, len=2 (value "ab")
        buf.push((1 << 4) | (2 - 1));
        buf.extend_from_slice(b"ab");
        buf.push(0); // pad to 4-byte word boundary
        buf.extend_from_slice(&[9, 9, 9]);

        let pkt = RtpPacket::parse(buf).unwrap();
        let ids = ExtensionIds { mid: Some(1), ..Default::default() };
        assert_eq!(pkt.mid(&ids), Some("ab"));
        assert_eq!(pkt.payload(), &[9, 9, 9]);
    }

    #[test]
    fn rtx_round_trip() {
        let raw = minimal_rtp(500, 1000, 42, 96, false, &[10, 20, 30]);
        let pkt = RtpPacket::parse(raw).unwrap();
        let rtx = pkt.rtx_encode(97, 4242, 7);
        assert_eq!(rtx.ssrc(), 4242);
        assert_eq!(rtx.seq(), 7);
        assert_eq!(rtx.payload_type(), 97);

        let (orig_seq, payload) = rtx.rtx_decode().unwrap();
        assert_eq!(orig_seq, 500);
        assert_eq!(payload, &[10, 20, 30]);
    }
}
