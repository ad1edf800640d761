//! `BitrateAllocator` (§4.11) — spreads one transport's available
//! outgoing bitrate across its consumers by priority, letting each try
//! one more layer at a time until the budget stops moving, then
//! committing every consumer's provisional target layer.
//!
//! Grounded on `original_source/worker/src/RTC/Transport.cpp`'s
//! `DistributeAvailableOutgoingBitrate`.

use crate::consumer::Consumer;
use crate::stream_recv::RtpStreamRecv;
use crate::time::Ms;

/// Which bandwidth estimator produced `available_bitrate` — REMB's
/// receiver-side estimate folds in this transport's own loss, so its
/// consumers get to scale their ask by `considerLoss`; transport-cc's
/// sender-side estimate already accounts for loss and does not.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BweType {
    TransportCc,
    Remb,
}

/// One consumer's participation in an allocation pass: the trait object
/// plus the producer stream(s) its `increase_layer`/`get_desired_bitrate`
/// calls need, borrowed for the pass's duration.
pub struct Entry<'a> {
    pub consumer: &'a mut dyn Consumer,
    pub producer_streams: &'a [Option<&'a RtpStreamRecv>],
}

/// §4.11's loop. Returns the unused remainder of `available_bitrate`.
///
/// Consumers with `get_bitrate_priority() == 0` (paused, or no layers
/// requested yet) are skipped entirely — they neither consume budget nor
/// get `apply_layers` called, mirroring the original's priority multimap
/// only ever containing active consumers. Tie-breaking between consumers
/// at equal priority follows insertion order within `entries` rather than
/// `std::multimap`'s reverse-iteration order over a single priority
/// bucket — an implementation detail with no effect on the total bitrate
/// converged to, only on which same-priority consumer gets the first
/// crack at a given layer.
pub fn distribute_available_bitrate(
    entries: &mut [Entry<'_>],
    available_bitrate: u32,
    bwe_type: BweType,
    now: Ms,
) -> u32 {
    let mut order: Vec<usize> = (0..entries.len())
        .filter(|&i| entries[i].consumer.get_bitrate_priority() > 0)
        .collect();
    order.sort_by_key(|&i| std::cmp::Reverse(entries[i].consumer.get_bitrate_priority()));

    if order.is_empty() {
        return available_bitrate;
    }

    let consider_loss = bwe_type == BweType::Remb;
    let mut available = available_bitrate;
    let mut base_allocation = true;

    while available > 0 {
        let previous_available = available;

        for &idx in &order {
            let priority = entries[idx].consumer.get_bitrate_priority();
            let passes = if base_allocation { 1 } else { priority };

            for _ in 0..passes {
                let entry = &mut entries[idx];
                let used = entry.consumer.increase_layer(entry.producer_streams, available, consider_loss, now);
                debug_assert!(used <= available, "consumer used more bitrate than available");
                available = available.saturating_sub(used);

                if used == 0 {
                    break;
                }
            }
        }

        if available == previous_available {
            break;
        }
        base_allocation = false;
    }

    for &idx in &order {
        entries[idx].consumer.apply_layers(now);
    }

    available
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::codecs::Codec;
    use crate::config::{BweConfig, NackConfig};
    use crate::consumer::SimulcastConsumer;
    use crate::stream_recv::RtpStreamRecvParams;
    use crate::stream_send::RtpStreamSend;

    fn recv_stream(spatial_layers: u8, temporal_layers: u8) -> RtpStreamRecv {
        let params = RtpStreamRecvParams { spatial_layers, temporal_layers, ..RtpStreamRecvParams::default() };
        RtpStreamRecv::new(params, NackConfig::default())
    }

    #[test]
    fn no_active_consumers_returns_full_budget() {
        let stream = RtpStreamSend::new(2, 90_000, 96, "cname", None, NackConfig::default());
        let mut consumer =
            SimulcastConsumer::new(2, 96, Codec::Vp8, 1, 1, stream, BweConfig::default());
        let producer = recv_stream(1, 1);
        let producer_streams = [Some(&producer)];
        let mut entries = vec![Entry { consumer: &mut consumer, producer_streams: &producer_streams }];

        let remaining = distribute_available_bitrate(&mut entries, 100_000, BweType::TransportCc, Ms(0));
        assert_eq!(remaining, 100_000);
    }
}
