//! Send-side core of a selective forwarding unit: turns one producer's
//! incoming RTP streams into the outgoing RTP each consumer receives,
//! without owning a socket, a clock, or a thread.
//!
//! Sans-IO: every operation takes an explicit [`time::Ms`] from the
//! caller and returns data for the caller to put on the wire. Nothing in
//! this crate calls `Instant::now()`, spawns a task, or blocks.

pub mod allocator;
pub mod codecs;
pub mod config;
pub mod consumer;
pub mod error;
pub mod packet;
pub mod retransmission;
pub mod rtcp;
pub mod seq;
pub mod stats;
pub mod stream_recv;
pub mod stream_send;
pub mod time;
