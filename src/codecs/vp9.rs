//! VP9 payload descriptor (draft-ietf-payload-vp9-06) parsing, covering
//! the flexible-mode fields the core needs for K-SVC/full-SVC admission.
//!
//! Grounded on `original_source/worker/include/RTC/Codecs/VP9.hpp` (wire
//! layout) and spec §4.10 (admission rules).

use super::{EncodingContext, ProcessResult};

#[derive(Debug, Clone, Default)]
pub struct Descriptor {
    pub picture_id: u16,
    pub has_picture_id: bool,
    pub temporal_id: u8,
    pub spatial_id: u8,
    pub inter_layer_dependency: bool,
    pub end_of_frame: bool,
    /// "D" bit: inter-picture predicted layer frame.
    pub inter_picture_predicted: bool,
    pub is_key_frame: bool,
    pub tl0_picture_index: u8,
    pub has_tl0_picture_index: bool,
}

impl Descriptor {
    pub fn parse(data: &[u8]) -> Option<Descriptor> {
        if data.is_empty() {
            return None;
        }

        let mut d = Descriptor::default();
        let byte0 = data[0];
        let i_bit = (byte0 >> 7) & 0x01 != 0;
        let p_bit = (byte0 >> 6) & 0x01 != 0;
        let l_bit = (byte0 >> 5) & 0x01 != 0;
        let f_bit = (byte0 >> 4) & 0x01 != 0;
        let b_bit = (byte0 >> 3) & 0x01 != 0;
        let e_bit = (byte0 >> 2) & 0x01 != 0;

        d.inter_picture_predicted = p_bit;
        d.end_of_frame = e_bit;
        d.is_key_frame = b_bit && !p_bit;

        let mut offset = 1usize;

        if i_bit {
            if data.len() < offset + 1 {
                return None;
            }
            let byte = data[offset];
            if (byte >> 7) & 0x01 != 0 {
                // extended (15-bit) picture id
                if data.len() < offset + 2 {
                    return None;
                }
                d.picture_id = (((byte & 0x7F) as u16) << 8) | data[offset + 1] as u16;
                offset += 2;
            } else {
                d.picture_id = (byte & 0x7F) as u16;
                offset += 1;
            }
            d.has_picture_id = true;
        }

        if l_bit {
            if data.len() < offset + 1 {
                return None;
            }
            let byte = data[offset];
            d.temporal_id = (byte >> 5) & 0x07;
            d.inter_layer_dependency = (byte >> 4) & 0x01 != 0;
            d.spatial_id = (byte >> 1) & 0x07;
            offset += 1;

            // Non-flexible mode carries TL0PICIDX right after the L byte.
            if !f_bit {
                if data.len() < offset + 1 {
                    return None;
                }
                d.has_tl0_picture_index = true;
                d.tl0_picture_index = data[offset];
            }
        }

        Some(d)
    }

    /// K-SVC: drop inter-layer packets whose spatial index differs from
    /// the current one unless this is a keyframe. Full-SVC: downgrade is
    /// allowed on any end-of-frame packet belonging to the target layer.
    pub fn process(&self, ctx: &mut EncodingContext, k_svc: bool) -> ProcessResult {
        if self.spatial_id as i16 > ctx.target_spatial_layer {
            return ProcessResult { admitted: false, marker: false };
        }

        if k_svc && self.spatial_id as i16 != ctx.current_spatial_layer && !self.is_key_frame {
            return ProcessResult { admitted: false, marker: false };
        }

        if self.temporal_id as i16 > ctx.target_temporal_layer {
            return ProcessResult { admitted: false, marker: false };
        }

        if ctx.current_spatial_layer != ctx.target_spatial_layer {
            if self.is_key_frame && self.spatial_id as i16 == ctx.target_spatial_layer {
                ctx.current_spatial_layer = ctx.target_spatial_layer;
            } else if !k_svc && self.end_of_frame && self.spatial_id as i16 == ctx.target_spatial_layer {
                ctx.current_spatial_layer = ctx.target_spatial_layer;
            } else if self.spatial_id as i16 != ctx.current_spatial_layer {
                return ProcessResult { admitted: false, marker: false };
            }
        }

        let marker = self.end_of_frame && self.spatial_id as i16 == ctx.current_spatial_layer;

        if self.temporal_id as i16 > ctx.current_temporal_layer {
            ctx.current_temporal_layer = self.temporal_id as i16;
        }

        ProcessResult { admitted: true, marker }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parses_flexible_mode_with_layer_indices() {
        // byte0: I=1 P=0 L=1 F=1 B=1 E=0 -> 0b1011_1000
        // byte1 (picture id, short form): M=0, pid=5
        // byte2 (L byte): TID=2 U=0 SID=2 D=0 -> 0b010_0_010_0
        let data = [0b1011_1000, 0x05, 0b0100_0100];
        let d = Descriptor::parse(&data).unwrap();
        assert!(d.has_picture_id);
        assert_eq!(d.picture_id, 5);
        assert_eq!(d.temporal_id, 2);
        assert_eq!(d.spatial_id, 2);
        assert!(d.is_key_frame);
    }
}
