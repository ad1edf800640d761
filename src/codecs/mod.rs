//! Codec payload descriptor handlers (§4.10).
//!
//! Each supported codec parses a typed descriptor out of the RTP payload
//! and, through [`PayloadDescriptorHandler::process`], decides whether an
//! incoming packet is admitted to the target layer and mutates the
//! payload in place to keep the decoder's picture-id/tl0-idx continuity
//! across dropped packets.
//!
//! Grounded on `original_source/worker/src/RTC/Codecs/{VP8,VP9,H264}.cpp`.

pub mod h264;
pub mod vp8;
pub mod vp9;

use crate::seq::{Seq15, Seq8};

/// Which codec's payload descriptor to interpret.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Codec {
    Vp8,
    Vp9,
    H264,
}

/// A parsed, codec-specific payload descriptor view. Each codec's own
/// descriptor is an opaque payload here; consumers recover the typed
/// variant through `descriptor.as_vp8()` etc., or simply read the
/// normalized layer/keyframe fields shared across all codecs.
#[derive(Debug, Clone)]
pub enum PayloadDescriptor {
    Vp8(vp8::Descriptor),
    Vp9(vp9::Descriptor),
    H264(h264::Descriptor),
}

impl PayloadDescriptor {
    pub fn spatial_layer(&self) -> u8 {
        match self {
            PayloadDescriptor::Vp8(_) => 0,
            PayloadDescriptor::Vp9(d) => d.spatial_id,
            PayloadDescriptor::H264(d) => d.spatial_layer,
        }
    }

    pub fn temporal_layer(&self) -> u8 {
        match self {
            PayloadDescriptor::Vp8(d) => d.tl_index,
            PayloadDescriptor::Vp9(d) => d.temporal_id,
            PayloadDescriptor::H264(d) => d.temporal_layer,
        }
    }

    pub fn is_key_frame(&self) -> bool {
        match self {
            PayloadDescriptor::Vp8(d) => d.is_key_frame,
            PayloadDescriptor::Vp9(d) => d.is_key_frame,
            PayloadDescriptor::H264(d) => d.is_key_frame,
        }
    }

    pub fn end_of_frame(&self) -> bool {
        match self {
            PayloadDescriptor::Vp8(_) => true,
            PayloadDescriptor::Vp9(d) => d.end_of_frame,
            PayloadDescriptor::H264(_) => true,
        }
    }
}

pub fn parse_descriptor(codec: Codec, payload: &[u8]) -> Option<PayloadDescriptor> {
    match codec {
        Codec::Vp8 => vp8::Descriptor::parse(payload).map(PayloadDescriptor::Vp8),
        Codec::Vp9 => vp9::Descriptor::parse(payload).map(PayloadDescriptor::Vp9),
        Codec::H264 => h264::Descriptor::parse(payload).map(PayloadDescriptor::H264),
    }
}

/// Per-consumer encoding context shared by the codec handlers: target/
/// current temporal layer plus the picture-id/TL0PICIDX sequence
/// managers that keep forwarded streams continuous across drops.
#[derive(Debug)]
pub struct EncodingContext {
    pub target_temporal_layer: i16,
    pub current_temporal_layer: i16,
    pub target_spatial_layer: i16,
    pub current_spatial_layer: i16,
    pub temporal_layers: u8,
    pub sync_required: bool,
    pub picture_id_manager: Seq15,
    pub tl0_picture_index_manager: Seq8,
    /// Whether the producer's VP9 encoding is K-SVC (only the base
    /// temporal layer of a non-active spatial layer is forwarded by the
    /// encoder, so a spatial upgrade needs its own keyframe).
    pub k_svc: bool,
}

impl Default for EncodingContext {
    fn default() -> Self {
        EncodingContext {
            target_temporal_layer: -1,
            current_temporal_layer: -1,
            target_spatial_layer: -1,
            current_spatial_layer: -1,
            temporal_layers: 1,
            sync_required: true,
            picture_id_manager: Seq15::new(),
            tl0_picture_index_manager: Seq8::new(),
            k_svc: false,
        }
    }
}

impl EncodingContext {
    pub fn sync_required(&mut self) {
        self.sync_required = true;
    }
}

/// Outcome of running a payload descriptor handler over one packet.
pub struct ProcessResult {
    pub admitted: bool,
    pub marker: bool,
}
