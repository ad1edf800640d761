//! `Consumer` — the per-peer forwarding state for one outgoing encoding
//! (or set of simulcast/SVC encodings) of a producer's media (§4.6–§4.9,
//! §9).
//!
//! The four concrete shapes (`SimpleConsumer`, `SimulcastConsumer`,
//! `SvcConsumer`, `PipeConsumer`) share the bitrate-participation contract
//! captured by the [`Consumer`] trait below, but differ enough in their
//! packet-admission inputs (how many producer streams they read from, and
//! what picks which one) that forwarding a packet is an inherent method
//! per struct rather than part of the object-safe trait — mirrors §9's
//! "composition over deep inheritance" note: each variant holds its own
//! layer state and its own `RtpStreamSend`, and the trait only covers the
//! capability set `BitrateAllocator` actually needs to treat them
//! uniformly.
//!
//! Grounded on `original_source/worker/include/RTC/Consumer.hpp` for the
//! shared contract shape, and the four `{Simple,Simulcast,Svc,Pipe}Consumer.cpp`
//! files for the per-variant behavior.

pub mod pipe;
pub mod simple;
pub mod simulcast;
pub mod svc;

pub use pipe::PipeConsumer;
pub use simple::{MediaKind, SimpleConsumer};
pub use simulcast::SimulcastConsumer;
pub use svc::SvcConsumer;

use crate::stream_recv::RtpStreamRecv;
use crate::time::Ms;

/// The bitrate-participation capability set `BitrateAllocator` (§4.11)
/// drives uniformly across every consumer variant. `producer_streams` is
/// indexed by spatial layer, `None` for layers the producer hasn't
/// started sending yet — ownership of those streams lives with the
/// producer side, not the consumer, so every call borrows them for its
/// duration rather than the consumer holding its own handles (§9's
/// "arena-indexing" resolution to the cyclic-ownership risk).
pub trait Consumer {
    fn is_paused(&self) -> bool;
    fn pause(&mut self);
    fn resume(&mut self);

    /// `0` when inactive (paused or no layers requested yet).
    fn get_bitrate_priority(&self) -> u8;

    /// Provisionally raises this consumer's target layer if
    /// `producer_streams` can support it within `bitrate` (or
    /// `virtualBitrate` when `consider_loss` widens/narrows it per this
    /// consumer's own send-stream loss). Returns the bitrate consumed by
    /// the provisional upgrade, `0` if none was made.
    fn increase_layer(
        &mut self,
        producer_streams: &[Option<&RtpStreamRecv>],
        bitrate: u32,
        consider_loss: bool,
        now: Ms,
    ) -> u32;

    /// Commits the provisional target set by `increase_layer` calls made
    /// since the last `apply_layers`.
    fn apply_layers(&mut self, now: Ms);

    fn get_desired_bitrate(&self, producer_streams: &[Option<&RtpStreamRecv>], now: Ms) -> u32;
}
