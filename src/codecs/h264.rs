//! H264 payload descriptor. The frame-marking RTP header extension
//! (§6) is preferred for layer/keyframe detection; this module exposes
//! the normalized descriptor that either source feeds into.
//!
//! Grounded on `original_source/worker/include/RTC/Codecs/H264.hpp` and
//! `H264_SVC.hpp`, simplified to the fields the consumer layer-selection
//! state machines (§4.7, §4.8) actually read.

use super::{EncodingContext, ProcessResult};

/// NAL unit types that signal a keyframe (IDR) when parsed directly out
/// of the payload, used as a fallback when frame-marking is absent.
const NAL_TYPE_IDR: u8 = 5;
const NAL_TYPE_STAP_A: u8 = 24;
const NAL_TYPE_FU_A: u8 = 28;

#[derive(Debug, Clone, Default)]
pub struct Descriptor {
    pub spatial_layer: u8,
    pub temporal_layer: u8,
    pub is_key_frame: bool,
    /// Set when built from the frame-marking extension rather than from
    /// payload inspection.
    pub from_frame_marking: bool,
}

impl Descriptor {
    /// Fallback path: inspect the NAL header to guess keyframe-ness when
    /// no frame-marking extension was present. Spatial/temporal layers
    /// default to 0 since single-layer H264 carries no such signal.
    pub fn parse(data: &[u8]) -> Option<Descriptor> {
        if data.is_empty() {
            return None;
        }

        let nal_type = data[0] & 0x1F;
        let is_key_frame = match nal_type {
            NAL_TYPE_IDR => true,
            NAL_TYPE_STAP_A => data.get(1).map(|b| (b & 0x1F) == NAL_TYPE_IDR).unwrap_or(false),
            NAL_TYPE_FU_A => {
                // FU-A indicator: start bit in the FU header (data[1] bit 7),
                // original NAL type in the low 5 bits of the FU header.
                data.len() > 1 && (data[1] & 0x80) != 0 && (data[1] & 0x1F) == NAL_TYPE_IDR
            }
            _ => false,
        };

        Some(Descriptor { spatial_layer: 0, temporal_layer: 0, is_key_frame, from_frame_marking: false })
    }

    /// Builds a descriptor from the frame-marking RTP extension payload:
    /// `{start, end, independent, discardable, base, tid, lid, tl0picidx}`.
    /// Layout per `draft-ietf-avtext-framemarking`.
    pub fn from_frame_marking(data: &[u8]) -> Option<Descriptor> {
        if data.len() < 2 {
            return None;
        }
        let byte0 = data[0];
        let independent = (byte0 >> 6) & 0x01 != 0;
        let tid = byte0 & 0x07;
        let lid = data[1];

        Some(Descriptor {
            spatial_layer: lid,
            temporal_layer: tid,
            is_key_frame: independent,
            from_frame_marking: true,
        })
    }

    pub fn process(&self, ctx: &mut EncodingContext) -> ProcessResult {
        if self.spatial_layer as i16 > ctx.target_spatial_layer && ctx.target_spatial_layer >= 0 {
            return ProcessResult { admitted: false, marker: false };
        }
        if self.temporal_layer as i16 > ctx.target_temporal_layer {
            return ProcessResult { admitted: false, marker: false };
        }
        if self.temporal_layer as i16 > ctx.current_temporal_layer {
            ctx.current_temporal_layer = self.temporal_layer as i16;
        }
        ProcessResult { admitted: true, marker: false }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn detects_idr_nal() {
        let data = [0x65, 0x88, 0x00];
        let d = Descriptor::parse(&data).unwrap();
        assert!(d.is_key_frame);
    }

    #[test]
    fn frame_marking_layer_fields() {
        let data = [0b1000_0010, 1];
        let d = Descriptor::from_frame_marking(&data).unwrap();
        assert!(d.is_key_frame);
        assert_eq!(d.temporal_layer, 2);
        assert_eq!(d.spatial_layer, 1);
    }
}
