//! VP8 payload descriptor (RFC 7741) parsing and layer-admission.
//!
//! Grounded on `original_source/worker/src/RTC/Codecs/VP8.cpp`.

use tracing::{debug, warn};

use super::{EncodingContext, ProcessResult};

#[derive(Debug, Clone, Default)]
pub struct Descriptor {
    pub extended: bool,
    pub non_reference: bool,
    pub start: bool,
    pub partition_index: u8,
    pub has_picture_id: bool,
    pub picture_id: u16,
    pub one_byte_picture_id: bool,
    pub two_byte_picture_id: bool,
    pub has_tl0_picture_index: bool,
    pub tl0_picture_index: u8,
    pub has_tl_index: bool,
    pub tl_index: u8,
    pub y: bool,
    pub key_index: u8,
    pub is_key_frame: bool,
}

impl Descriptor {
    pub fn parse(data: &[u8]) -> Option<Descriptor> {
        if data.is_empty() {
            debug!("vp8: ignoring empty payload");
            return None;
        }

        let mut d = Descriptor::default();
        let mut offset = 0usize;
        let byte = data[offset];

        d.extended = (byte >> 7) & 0x01 != 0;
        d.non_reference = (byte >> 5) & 0x01 != 0;
        d.start = (byte >> 4) & 0x01 != 0;
        d.partition_index = byte & 0x07;

        if !d.extended {
            debug!("vp8: ignoring non-extended payload");
            return None;
        }

        offset += 1;
        if data.len() < offset + 1 {
            return None;
        }
        let byte = data[offset];
        let i_bit = (byte >> 7) & 0x01 != 0;
        let l_bit = (byte >> 6) & 0x01 != 0;
        let t_bit = (byte >> 5) & 0x01 != 0;
        let k_bit = (byte >> 4) & 0x01 != 0;

        if i_bit {
            offset += 1;
            if data.len() < offset + 1 {
                return None;
            }
            let byte = data[offset];
            if (byte >> 7) & 0x01 != 0 {
                offset += 1;
                if data.len() < offset + 1 {
                    return None;
                }
                d.two_byte_picture_id = true;
                d.picture_id = ((byte & 0x7F) as u16) << 8;
                d.picture_id += data[offset] as u16;
            } else {
                d.one_byte_picture_id = true;
                d.picture_id = (byte & 0x7F) as u16;
            }
            d.has_picture_id = true;
        }

        if l_bit {
            offset += 1;
            if data.len() < offset + 1 {
                return None;
            }
            d.has_tl0_picture_index = true;
            d.tl0_picture_index = data[offset];
        }

        if t_bit || k_bit {
            offset += 1;
            if data.len() < offset + 1 {
                return None;
            }
            let byte = data[offset];
            d.has_tl_index = true;
            d.tl_index = (byte >> 6) & 0x03;
            d.y = (byte >> 5) & 0x01 != 0;
            d.key_index = byte & 0x1F;
        }

        offset += 1;
        if data.len() >= offset + 1 && d.start && d.partition_index == 0 && (data[offset] & 0x01) == 0 {
            d.is_key_frame = true;
        }

        Some(d)
    }

    /// Mirrors `VP8::PayloadDescriptorHandler::Process`: decides
    /// admission against the encoding context's target temporal layer,
    /// and requires the `y` (layer-sync) bit set to upgrade.
    pub fn process(&self, ctx: &mut EncodingContext) -> ProcessResult {
        assert!(ctx.target_temporal_layer >= 0, "target temporal layer cannot be -1");

        if ctx.temporal_layers > 1 && !self.has_tl_index {
            warn!("vp8: stream has >1 temporal layers but payload lacks TL index");
        }

        if ctx.sync_required && self.has_picture_id && self.has_tl0_picture_index {
            ctx.picture_id_manager.sync(self.picture_id.wrapping_sub(1));
            ctx.tl0_picture_index_manager.sync(self.tl0_picture_index.wrapping_sub(1));
            ctx.sync_required = false;
        }

        if self.has_picture_id
            && self.has_tl_index
            && self.has_tl0_picture_index
            && !ctx.picture_id_manager.is_lower(self.picture_id as u64, ctx.picture_id_manager.max_input())
        {
            if self.tl_index as i16 > ctx.target_temporal_layer {
                ctx.picture_id_manager.drop(self.picture_id);
                if self.tl_index == 0 {
                    ctx.tl0_picture_index_manager.drop(self.tl0_picture_index);
                }
                return ProcessResult { admitted: false, marker: false };
            } else if self.tl_index as i16 > ctx.current_temporal_layer && !self.y {
                ctx.picture_id_manager.drop(self.picture_id);
                if self.tl_index == 0 {
                    ctx.tl0_picture_index_manager.drop(self.tl0_picture_index);
                }
                return ProcessResult { admitted: false, marker: false };
            }
        }

        if self.tl_index as i16 > ctx.current_temporal_layer {
            ctx.current_temporal_layer = self.tl_index as i16;
        }

        ProcessResult { admitted: true, marker: false }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn rejects_empty_payload() {
        assert!(Descriptor::parse(&[]).is_none());
    }

    #[test]
    fn rejects_non_extended() {
        assert!(Descriptor::parse(&[0x00]).is_none());
    }

    #[test]
    fn parses_keyframe_with_two_byte_picture_id() {
        // byte0: extended=1, nonref=0, start=1, partition=0 -> 0b1001_0000
        // byte1: I=1,L=0,T=0,K=0 -> 0x80
        // byte2: M=1 (two-byte marker) | high 7 bits of pictureId
        // byte3: low 8 bits of pictureId
        // byte4: vp8 payload header first byte, P bit (bit0) = 0 => keyframe
        let data = [0b1001_0000, 0x80, 0x80 | 0x02, 0x34, 0b1111_1110];
        let d = Descriptor::parse(&data).unwrap();
        assert!(d.extended);
        assert!(d.start);
        assert!(d.has_picture_id);
        assert!(d.two_byte_picture_id);
        assert_eq!(d.picture_id, (0x02u16 << 8) | 0x34);
        assert!(d.is_key_frame);
    }
}
