//! Transport-wide Congestion Control feedback (RTPFB, FMT=15,
//! `draft-holmer-rmcat-transport-wide-cc-extensions-01`): the builder
//! accumulates per-packet arrival statuses under a byte budget and a
//! pre-base reservation scheme; parsing is the inverse.
//!
//! Grounded on `original_source/worker/src/RTC/RTCP/FeedbackRtpTransport.cpp`,
//! formalized per the five-step algorithm this crate documents in
//! SPEC_FULL.md §4.3 rather than the source's literal (partly dead)
//! branches — see DESIGN.md's Open Question entry.

use crate::error::CoreError;
use crate::seq::SeqManager;

use super::header::{self, rtpfb_fmt, PacketType, RtcpHeader};

pub const FIXED_HEADER_LEN: usize = 8;
const MAX_MISSING_PACKETS: u32 = (1 << 13) - 1;
const MAX_PACKET_DELTA_TICKS: u32 = (1 << 16) - 1;
const MAX_RUN_LENGTH: u32 = (1 << 13) - 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    NotReceived,
    SmallDelta,
    LargeDelta,
}

impl Status {
    fn bits(self) -> u16 {
        match self {
            Status::NotReceived => 0,
            Status::SmallDelta => 1,
            Status::LargeDelta => 2,
        }
    }

    fn from_bits(bits: u16) -> Status {
        match bits {
            0 => Status::NotReceived,
            1 => Status::SmallDelta,
            _ => Status::LargeDelta,
        }
    }
}

/// One parsed/to-be-serialized packet status entry, with its delta in
/// quarter-millisecond ticks (`None` for `NotReceived`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketStatus {
    pub seq: u16,
    pub status: Status,
    pub delta_ticks: Option<i32>,
}

/// Accumulates packet arrival statuses into run-length/vector chunks
/// under a byte budget, following `AddPacket`'s pre-base reservation
/// scheme (§4.3 step 1-2).
pub struct Builder {
    fb_pkt_count: u8,

    has_pre_base: bool,
    pre_base_seq: u16,
    pre_ref_time_ms: u64,

    has_base: bool,
    base_seq: u16,
    ref_time_ms: u64,

    has_last: bool,
    last_seq: u16,
    last_timestamp_ms: u64,

    packet_status_count: u32,
    chunks: Vec<u16>,
    deltas: Vec<i32>,

    pending: Vec<Status>,
    pending_homogeneous: bool,
}

impl Builder {
    pub fn new(fb_pkt_count: u8) -> Builder {
        Builder {
            fb_pkt_count,
            has_pre_base: false,
            pre_base_seq: 0,
            pre_ref_time_ms: 0,
            has_base: false,
            base_seq: 0,
            ref_time_ms: 0,
            has_last: false,
            last_seq: 0,
            last_timestamp_ms: 0,
            packet_status_count: 0,
            chunks: Vec::new(),
            deltas: Vec::new(),
            pending: Vec::new(),
            pending_homogeneous: true,
        }
    }

    pub fn is_full(&self) -> bool {
        self.packet_status_count >= (1 << 16) - 1
    }

    fn delta_ticks(from_ms: u64, to_ms: u64) -> i64 {
        (to_ms as i64 - from_ms as i64) * 1000 / 250
    }

    fn delta_fits(from_ms: u64, to_ms: u64) -> bool {
        let d = Self::delta_ticks(from_ms, to_ms);
        d >= 0 && (d as u32) <= MAX_PACKET_DELTA_TICKS
    }

    /// Current serialized size estimate, used by the byte-budget check.
    fn current_size(&self) -> usize {
        header::HEADER_LEN + 8 + FIXED_HEADER_LEN
            + self.chunks.len() * 2
            + ((self.pending.len() + 6) / 7) * 2 // worst case: pending flushes as vector chunk(s)
            + self.deltas.iter().map(|d| if *d >= 0 && *d <= 255 { 1 } else { 2 }).sum::<usize>()
    }

    fn fits_budget(&self, max_rtcp_len: usize) -> bool {
        let mut size = self.current_size();
        size += 2; // one more chunk, worst case
        size += 2 * 7; // worst case 7 large deltas
        size = header::pad_to_word(size);
        size <= max_rtcp_len
    }

    fn push_status(&mut self, status: Status) {
        if self.pending_homogeneous
            && !self.pending.is_empty()
            && self.pending.len() as u32 >= 7
            && self.pending[0] != status
        {
            self.flush_run(self.pending[0], self.pending.len() as u32);
            self.pending.clear();
            self.pending_homogeneous = true;
        }

        if self.pending.is_empty() {
            self.pending_homogeneous = true;
        } else if status != self.pending[0] {
            self.pending_homogeneous = false;
        }
        self.pending.push(status);
        self.packet_status_count += 1;

        if self.pending.len() == 7 && !self.pending_homogeneous {
            self.flush_vector(&self.pending.clone());
            self.pending.clear();
        }
    }

    fn flush_run(&mut self, status: Status, mut count: u32) {
        while count > 0 {
            let chunk_count = count.min(MAX_RUN_LENGTH);
            let word = 0x0000 | (status.bits() << 13) | (chunk_count as u16 & 0x1FFF);
            self.chunks.push(word);
            count -= chunk_count;
        }
    }

    fn flush_vector(&mut self, statuses: &[Status]) {
        debug_assert_eq!(statuses.len(), 7);
        let mut word: u16 = 0x8000 | (0x01 << 14);
        for (i, s) in statuses.iter().enumerate() {
            word |= s.bits() << (2 * (7 - 1 - i));
        }
        self.chunks.push(word);
    }

    fn fill_chunk(&mut self, prev_seq: u16, seq: u16, ts_ms: u64, prev_ts_ms: u64) {
        let missing = seq.wrapping_sub(prev_seq).wrapping_sub(1) as u32;
        for _ in 0..missing {
            self.push_status(Status::NotReceived);
        }

        let delta = if ts_ms == prev_ts_ms { 0 } else { Self::delta_ticks(prev_ts_ms, ts_ms) };
        let status = if delta <= 255 { Status::SmallDelta } else { Status::LargeDelta };
        self.push_status(status);
        self.deltas.push(delta as i32);
    }

    /// §4.3 step 1-3: returns `true` if accepted (including pre-base
    /// reservation/replacement), `false` if rejected by a missing-count,
    /// delta or byte-budget check (caller must flush and start fresh).
    pub fn add_packet(&mut self, seq: u16, timestamp_ms: u64, max_rtcp_len: usize) -> bool {
        if !self.has_pre_base {
            self.has_pre_base = true;
            self.pre_base_seq = seq;
            self.pre_ref_time_ms = timestamp_ms;
            return true;
        }

        if !self.has_base {
            if seq != self.pre_base_seq.wrapping_add(1) {
                self.pre_base_seq = seq;
                self.pre_ref_time_ms = timestamp_ms;
                return true;
            }
            if !Self::delta_fits(self.pre_ref_time_ms, timestamp_ms) {
                self.pre_base_seq = seq;
                self.pre_ref_time_ms = timestamp_ms;
                return true;
            }

            self.has_base = true;
            self.base_seq = self.pre_base_seq;
            self.ref_time_ms = self.pre_ref_time_ms;
            // The base packet itself needs its own status entry (delta 0
            // against ref_time_ms, which is its own arrival time) before
            // the transition entry for `seq`.
            self.push_status(Status::SmallDelta);
            self.deltas.push(0);
            self.fill_chunk(self.pre_base_seq, seq, timestamp_ms, self.pre_ref_time_ms);
        } else {
            let last_seq = self.last_seq;
            if seq_lower_than(seq, last_seq) {
                return true;
            }
            let missing = seq.wrapping_sub(last_seq).wrapping_sub(1) as u32;
            if missing > MAX_MISSING_PACKETS {
                return false;
            }
            if !Self::delta_fits(self.last_timestamp_ms, timestamp_ms) {
                return false;
            }
            if !self.fits_budget(max_rtcp_len) {
                return false;
            }
            self.fill_chunk(last_seq, seq, timestamp_ms, self.last_timestamp_ms);
        }

        self.has_last = true;
        self.last_seq = seq;
        self.last_timestamp_ms = timestamp_ms;
        true
    }

    /// Flushes pending entries as one or more run-length chunks (never a
    /// vector chunk: this mirrors the original's final-flush behavior),
    /// then writes the full TCC feedback packet, RTCP-header included.
    pub fn serialize(mut self, buf: &mut [u8], sender_ssrc: u32, media_ssrc: u32) -> Result<usize, CoreError> {
        if !self.pending.is_empty() {
            if self.pending_homogeneous {
                let status = self.pending[0];
                let count = self.pending.len() as u32;
                self.flush_run(status, count);
            } else {
                let mut run_status = self.pending[0];
                let mut run_count = 0u32;
                let pending = std::mem::take(&mut self.pending);
                for status in pending {
                    if status == run_status {
                        run_count += 1;
                    } else {
                        self.flush_run(run_status, run_count);
                        run_status = status;
                        run_count = 1;
                    }
                }
                self.flush_run(run_status, run_count);
            }
        }

        let body_len = FIXED_HEADER_LEN + self.chunks.len() * 2 + self.deltas.iter().map(|d| if *d >= 0 && *d <= 255 { 1 } else { 2 }).sum::<usize>();
        let unpadded = header::HEADER_LEN + 8 + body_len;
        let len = header::pad_to_word(unpadded);

        if buf.len() < len {
            return Err(CoreError::resource_exhausted("tcc feedback packet does not fit in buffer"));
        }

        let header = RtcpHeader { padding: false, count_or_fmt: rtpfb_fmt::TCC, packet_type: PacketType::RtpFeedback, length: len };
        header.write(buf);
        buf[4..8].copy_from_slice(&sender_ssrc.to_be_bytes());
        buf[8..12].copy_from_slice(&media_ssrc.to_be_bytes());

        buf[12..14].copy_from_slice(&self.base_seq.to_be_bytes());
        buf[14..16].copy_from_slice(&(self.packet_status_count as u16).to_be_bytes());
        let ref_time_units = (self.ref_time_ms / 64) as u32 & 0x00FF_FFFF;
        buf[16..19].copy_from_slice(&ref_time_units.to_be_bytes()[1..4]);
        buf[19] = self.fb_pkt_count;

        let mut offset = 20;
        for chunk in &self.chunks {
            buf[offset..offset + 2].copy_from_slice(&chunk.to_be_bytes());
            offset += 2;
        }
        for delta in &self.deltas {
            if *delta >= 0 && *delta <= 255 {
                buf[offset] = *delta as u8;
                offset += 1;
            } else {
                buf[offset..offset + 2].copy_from_slice(&(*delta as u16).to_be_bytes());
                offset += 2;
            }
        }
        for b in &mut buf[offset..len] {
            *b = 0;
        }

        Ok(len)
    }
}

fn seq_lower_than(a: u16, b: u16) -> bool {
    SeqManager::<u16, 16>::seq_lower_than(a, b, 1 << 16)
}

/// Parsed view of a TCC feedback packet: fixed header fields plus the
/// flattened `(seq, status, delta)` entries, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Feedback {
    pub sender_ssrc: u32,
    pub media_ssrc: u32,
    pub base_seq: u16,
    pub packet_status_count: u16,
    pub ref_time_ms: u64,
    pub fb_pkt_count: u8,
    pub statuses: Vec<PacketStatus>,
}

pub fn parse(buf: &[u8]) -> Result<Feedback, CoreError> {
    let header = RtcpHeader::parse(buf)?;
    if header.packet_type != PacketType::RtpFeedback || header.count_or_fmt != rtpfb_fmt::TCC {
        return Err(CoreError::malformed_rtcp("expected tcc packet (rtpfb fmt=15)"));
    }
    if buf.len() < 12 + FIXED_HEADER_LEN {
        return Err(CoreError::malformed_rtcp("tcc packet shorter than fixed fields"));
    }

    let sender_ssrc = u32::from_be_bytes(buf[4..8].try_into().unwrap());
    let media_ssrc = u32::from_be_bytes(buf[8..12].try_into().unwrap());
    let base_seq = u16::from_be_bytes(buf[12..14].try_into().unwrap());
    let packet_status_count = u16::from_be_bytes(buf[14..16].try_into().unwrap());
    let mut ref_time_bytes = [0u8; 4];
    ref_time_bytes[1..4].copy_from_slice(&buf[16..19]);
    let ref_time_ms = (u32::from_be_bytes(ref_time_bytes) as u64) * 64;
    let fb_pkt_count = buf[19];

    let mut offset = 20;
    let mut statuses_bits: Vec<Status> = Vec::with_capacity(packet_status_count as usize);

    while statuses_bits.len() < packet_status_count as usize {
        if offset + 2 > header.length {
            return Err(CoreError::malformed_rtcp("tcc packet truncated while reading chunks"));
        }
        let word = u16::from_be_bytes(buf[offset..offset + 2].try_into().unwrap());
        offset += 2;

        if word & 0x8000 == 0 {
            // run-length chunk
            let status = Status::from_bits((word >> 13) & 0x03);
            let count = (word & 0x1FFF) as usize;
            for _ in 0..count {
                if statuses_bits.len() >= packet_status_count as usize {
                    break;
                }
                statuses_bits.push(status);
            }
        } else {
            // 2-bit vector chunk: 7 statuses, MSB-first
            for i in 0..7 {
                if statuses_bits.len() >= packet_status_count as usize {
                    break;
                }
                let bits = (word >> (2 * (7 - 1 - i))) & 0x03;
                statuses_bits.push(Status::from_bits(bits));
            }
        }
    }

    let mut statuses = Vec::with_capacity(statuses_bits.len());
    let mut seq = base_seq;
    for status in statuses_bits {
        let delta_ticks = match status {
            Status::NotReceived => None,
            Status::SmallDelta => {
                if offset + 1 > header.length {
                    return Err(CoreError::malformed_rtcp("tcc packet truncated while reading small delta"));
                }
                let v = buf[offset] as i32;
                offset += 1;
                Some(v)
            }
            Status::LargeDelta => {
                if offset + 2 > header.length {
                    return Err(CoreError::malformed_rtcp("tcc packet truncated while reading large delta"));
                }
                let v = i16::from_be_bytes(buf[offset..offset + 2].try_into().unwrap()) as i32;
                offset += 2;
                Some(v)
            }
        };
        statuses.push(PacketStatus { seq, status, delta_ticks });
        seq = seq.wrapping_add(1);
    }

    Ok(Feedback { sender_ssrc, media_ssrc, base_seq, packet_status_count, ref_time_ms, fb_pkt_count, statuses })
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn s4_single_run_length() {
        let mut b = Builder::new(0);
        let ref_time = 10_000_000u64;
        for i in 0..15u16 {
            assert!(b.add_packet(1000 + i, ref_time + i as u64, 1200));
        }
        let mut buf = vec![0u8; 1200];
        let len = b.serialize(&mut buf, 1, 2).unwrap();
        buf.truncate(len);
        assert_eq!(len % 4, 0);

        let fb = parse(&buf).unwrap();
        assert_eq!(fb.base_seq, 1000);
        assert_eq!(fb.packet_status_count, 15);
        assert_eq!(fb.statuses.len(), 15);
        for (i, s) in fb.statuses.iter().enumerate() {
            assert_eq!(s.seq, 1000 + i as u16);
            assert_eq!(s.status, Status::SmallDelta);
            // The base packet's own entry (index 0) is measured against
            // ref_time_ms, which is its own arrival time, so its delta is 0;
            // every later packet is measured against its predecessor, 1ms
            // (4 ticks) earlier.
            let expected = if i == 0 { 0 } else { 4 };
            assert_eq!(s.delta_ticks, Some(expected));
        }
    }

    #[test]
    fn s5_mixed_losses() {
        let mut b = Builder::new(0);
        let base_time = 0u64;
        let present: Vec<u16> = vec![1000, 1001, 1002, 1015, 1016, 1017];
        for seq in &present {
            assert!(b.add_packet(*seq, base_time + *seq as u64, 1200));
        }
        let mut buf = vec![0u8; 1200];
        let len = b.serialize(&mut buf, 1, 2).unwrap();
        buf.truncate(len);

        let fb = parse(&buf).unwrap();
        assert_eq!(fb.packet_status_count, 18);
        assert_eq!(fb.statuses.len(), 18);
        for i in 0..3 {
            assert_eq!(fb.statuses[i].status, Status::SmallDelta);
        }
        for i in 3..15 {
            assert_eq!(fb.statuses[i].status, Status::NotReceived);
        }
        for i in 15..18 {
            assert_eq!(fb.statuses[i].status, Status::SmallDelta);
        }
    }

    #[test]
    fn round_trip_through_parse_is_stable() {
        let mut b = Builder::new(3);
        for i in 0..40u16 {
            let ts = (i as u64) * 3;
            b.add_packet(500 + i, ts, 1200);
        }
        let mut buf = vec![0u8; 1200];
        let len = b.serialize(&mut buf, 9, 10).unwrap();
        buf.truncate(len);
        let fb = parse(&buf).unwrap();
        assert_eq!(fb.fb_pkt_count, 3);
        assert_eq!(fb.base_seq, 500);
        assert_eq!(fb.packet_status_count, 40);
    }

    #[test]
    fn rejects_when_budget_too_small() {
        let mut b = Builder::new(0);
        assert!(b.add_packet(1, 0, 20));
        assert!(b.add_packet(2, 1, 20));
        // Tiny budget: further packets should eventually get rejected.
        let mut rejected = false;
        for i in 3..200u16 {
            if !b.add_packet(i, i as u64, 20) {
                rejected = true;
                break;
            }
        }
        assert!(rejected);
    }
}
