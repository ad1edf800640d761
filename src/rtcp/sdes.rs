//! Source Description (PT=202): one chunk per SSRC, each a sequence of
//! typed, length-prefixed text items terminated by a null byte and
//! padded to a 32-bit boundary.
//!
//! Grounded on mediasoup's `RtpStreamSend::GetRtcpSdesChunk` (CNAME-only
//! emission) and `str0m`'s `sdes` chunk/item shape referenced from
//! `rtp_teacher_ref/src/rtcp/mod.rs`.

use crate::error::CoreError;

use super::header::{self, PacketType, RtcpHeader};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdesType {
    Cname = 1,
    Name = 2,
    Email = 3,
    Phone = 4,
    Loc = 5,
    Tool = 6,
    Note = 7,
}

impl SdesType {
    fn from_u8(v: u8) -> Option<SdesType> {
        use SdesType::*;
        match v {
            1 => Some(Cname),
            2 => Some(Name),
            3 => Some(Email),
            4 => Some(Phone),
            5 => Some(Loc),
            6 => Some(Tool),
            7 => Some(Note),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SdesItem {
    pub kind: SdesType,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SdesChunk {
    pub ssrc: u32,
    pub items: Vec<SdesItem>,
}

impl SdesChunk {
    pub fn cname(ssrc: u32, cname: impl Into<String>) -> SdesChunk {
        SdesChunk { ssrc, items: vec![SdesItem { kind: SdesType::Cname, value: cname.into() }] }
    }

    fn body_len(&self) -> usize {
        let mut len = 4; // ssrc
        for item in &self.items {
            len += 2 + item.value.len(); // type + length + text
        }
        len += 1; // null terminator
        header::pad_to_word(len)
    }

    pub fn wire_len(&self) -> usize {
        header::HEADER_LEN + self.body_len()
    }

    pub fn write(&self, buf: &mut [u8]) -> Result<usize, CoreError> {
        let len = self.wire_len();
        if buf.len() < len {
            return Err(CoreError::resource_exhausted("sdes chunk does not fit in buffer"));
        }
        let header = RtcpHeader { padding: false, count_or_fmt: 1, packet_type: PacketType::SourceDescription, length: len };
        header.write(buf);

        buf[4..8].copy_from_slice(&self.ssrc.to_be_bytes());
        let mut offset = 8;
        for item in &self.items {
            buf[offset] = item.kind as u8;
            buf[offset + 1] = item.value.len() as u8;
            buf[offset + 2..offset + 2 + item.value.len()].copy_from_slice(item.value.as_bytes());
            offset += 2 + item.value.len();
        }
        buf[offset] = 0; // terminator
        offset += 1;
        for b in &mut buf[offset..len] {
            *b = 0;
        }

        Ok(len)
    }

    pub fn parse(buf: &[u8]) -> Result<SdesChunk, CoreError> {
        let header = RtcpHeader::parse(buf)?;
        if header.packet_type != PacketType::SourceDescription {
            return Err(CoreError::malformed_rtcp("expected sdes packet type"));
        }
        if buf.len() < 8 {
            return Err(CoreError::malformed_rtcp("sdes chunk shorter than ssrc field"));
        }
        let ssrc = u32::from_be_bytes(buf[4..8].try_into().unwrap());

        let mut items = Vec::new();
        let mut offset = 8;
        loop {
            if offset >= header.length {
                break;
            }
            let kind_byte = buf[offset];
            if kind_byte == 0 {
                break;
            }
            let kind = SdesType::from_u8(kind_byte)
                .ok_or_else(|| CoreError::malformed_rtcp("unknown sdes item type"))?;
            if offset + 2 > header.length {
                return Err(CoreError::malformed_rtcp("sdes item length field out of bounds"));
            }
            let item_len = buf[offset + 1] as usize;
            if offset + 2 + item_len > header.length {
                return Err(CoreError::malformed_rtcp("sdes item text out of bounds"));
            }
            let value = String::from_utf8_lossy(&buf[offset + 2..offset + 2 + item_len]).into_owned();
            items.push(SdesItem { kind, value });
            offset += 2 + item_len;
        }

        Ok(SdesChunk { ssrc, items })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn round_trips_cname_chunk() {
        let chunk = SdesChunk::cname(42, "abc123");
        let mut buf = vec![0u8; chunk.wire_len()];
        chunk.write(&mut buf).unwrap();
        assert_eq!(buf.len() % 4, 0);
        let parsed = SdesChunk::parse(&buf).unwrap();
        assert_eq!(parsed, chunk);
    }

    #[test]
    fn round_trips_multiple_items() {
        let chunk = SdesChunk {
            ssrc: 7,
            items: vec![
                SdesItem { kind: SdesType::Cname, value: "x".into() },
                SdesItem { kind: SdesType::Tool, value: "sfu-forward-core".into() },
            ],
        };
        let mut buf = vec![0u8; chunk.wire_len()];
        chunk.write(&mut buf).unwrap();
        let parsed = SdesChunk::parse(&buf).unwrap();
        assert_eq!(parsed, chunk);
    }
}
