//! Bounded drop-oldest queues carrying raw MIDI between callback and consumer threads.

use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam_queue::ArrayQueue;
use tracing::trace;

use crate::clock::MidiClock;
use crate::{MessageDirection, MidiMessage};

/// Snapshot of queue occupancy and overflow counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelStats {
    pub inbound_pending: usize,
    pub outbound_pending: usize,
    pub inbound_dropped: u64,
    pub outbound_dropped: u64,
}

/// Lock-free ring that overwrites its oldest entry when full.
///
/// Backed by [`ArrayQueue`], so producers and consumers on any thread only
/// touch atomics and never block.
struct MessageRing {
    queue: ArrayQueue<MidiMessage>,
    dropped: AtomicU64,
}

impl MessageRing {
    fn new(capacity: usize) -> Self {
        Self {
            queue: ArrayQueue::new(capacity.max(1)),
            dropped: AtomicU64::new(0),
        }
    }

    #[inline]
    fn push(&self, message: MidiMessage) {
        if let Some(displaced) = self.queue.force_push(message) {
            let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            trace!(
                direction = ?displaced.direction(),
                dropped = total,
                "midi queue full; dropped oldest message"
            );
        }
    }

    #[inline]
    fn pop(&self) -> Option<MidiMessage> {
        self.queue.pop()
    }

    fn clear(&self) {
        while self.queue.pop().is_some() {}
    }
}

/// Iterator over the messages that were pending when the drain started.
///
/// Messages pushed while draining are left for the next drain.
pub struct Drain<'a> {
    ring: &'a MessageRing,
    remaining: usize,
}

impl Iterator for Drain<'_> {
    type Item = MidiMessage;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        let next = self.ring.pop();
        if next.is_none() {
            self.remaining = 0;
        }
        next
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.remaining))
    }
}

/// Pair of bounded queues, one per direction, with their own drop counters.
pub struct MessageChannel {
    inbound: MessageRing,
    outbound: MessageRing,
    clock: MidiClock,
}

impl MessageChannel {
    /// Create a channel; capacities below one are raised to one.
    pub fn new(inbound_capacity: usize, outbound_capacity: usize) -> Self {
        Self {
            inbound: MessageRing::new(inbound_capacity),
            outbound: MessageRing::new(outbound_capacity),
            clock: MidiClock::process(),
        }
    }

    /// Queue bytes received from a device. Never blocks; drops the oldest message when full.
    pub fn push_inbound(&self, bytes: &[u8]) {
        self.push(MessageDirection::Inbound, bytes);
    }

    /// Queue bytes destined for a device. Never blocks; drops the oldest message when full.
    pub fn push_outbound(&self, bytes: &[u8]) {
        self.push(MessageDirection::Outbound, bytes);
    }

    /// Oldest pending inbound message.
    pub fn pop_inbound(&self) -> Option<MidiMessage> {
        self.inbound.pop()
    }

    /// Oldest pending outbound message.
    pub fn pop_outbound(&self) -> Option<MidiMessage> {
        self.outbound.pop()
    }

    /// Take every inbound message queued so far, oldest first.
    pub fn drain_inbound(&self) -> Drain<'_> {
        Drain {
            ring: &self.inbound,
            remaining: self.inbound.queue.len(),
        }
    }

    /// Take every outbound message queued so far, oldest first.
    pub fn drain_outbound(&self) -> Drain<'_> {
        Drain {
            ring: &self.outbound,
            remaining: self.outbound.queue.len(),
        }
    }

    /// Pending counts and overflow drops for both directions.
    pub fn stats(&self) -> ChannelStats {
        ChannelStats {
            inbound_pending: self.inbound.queue.len(),
            outbound_pending: self.outbound.queue.len(),
            inbound_dropped: self.inbound.dropped.load(Ordering::Relaxed),
            outbound_dropped: self.outbound.dropped.load(Ordering::Relaxed),
        }
    }

    /// Maximum number of inbound messages held before the oldest is dropped.
    pub fn inbound_capacity(&self) -> usize {
        self.inbound.queue.capacity()
    }

    /// Maximum number of outbound messages held before the oldest is dropped.
    pub fn outbound_capacity(&self) -> usize {
        self.outbound.queue.capacity()
    }

    /// Discard pending messages in both directions. Counters are kept.
    pub fn clear(&self) {
        self.inbound.clear();
        self.outbound.clear();
    }

    #[inline]
    fn push(&self, direction: MessageDirection, bytes: &[u8]) {
        if bytes.is_empty() {
            trace!(?direction, "ignoring empty midi payload");
            return;
        }
        let message = MidiMessage::new(bytes, direction, self.clock.now());
        match direction {
            MessageDirection::Inbound => self.inbound.push(message),
            MessageDirection::Outbound => self.outbound.push(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;

    fn payloads(messages: impl Iterator<Item = MidiMessage>) -> Vec<Vec<u8>> {
        messages.map(MidiMessage::into_bytes).collect()
    }

    #[test]
    fn drain_returns_messages_in_push_order() {
        let channel = MessageChannel::new(8, 8);
        for note in 60..65u8 {
            channel.push_inbound(&[0x90, note, 100]);
        }
        let drained = payloads(channel.drain_inbound());
        let expected: Vec<Vec<u8>> = (60..65u8).map(|note| vec![0x90, note, 100]).collect();
        assert_eq!(drained, expected);
        assert_eq!(channel.drain_inbound().count(), 0);
    }

    #[test]
    fn overflow_drops_the_oldest() {
        let channel = MessageChannel::new(4, 4);
        for value in 0..5u8 {
            channel.push_outbound(&[0xB0, 7, value]);
        }
        let drained = payloads(channel.drain_outbound());
        assert_eq!(
            drained,
            vec![vec![0xB0, 7, 1], vec![0xB0, 7, 2], vec![0xB0, 7, 3], vec![0xB0, 7, 4]]
        );
        let stats = channel.stats();
        assert_eq!(stats.outbound_dropped, 1);
        assert_eq!(stats.inbound_dropped, 0);
    }

    #[test]
    fn directions_are_independent() {
        let channel = MessageChannel::new(2, 2);
        channel.push_inbound(&[0x90, 60, 1]);
        channel.push_outbound(&[0x80, 60, 0]);
        let inbound = channel.pop_inbound().unwrap();
        let outbound = channel.pop_outbound().unwrap();
        assert_eq!(inbound.direction(), MessageDirection::Inbound);
        assert_eq!(outbound.direction(), MessageDirection::Outbound);
        assert!(channel.pop_inbound().is_none());
        assert!(channel.pop_outbound().is_none());
    }

    #[test]
    fn timestamps_follow_push_order() {
        let channel = MessageChannel::new(16, 1);
        for _ in 0..16 {
            channel.push_inbound(&[0xF8]);
        }
        let stamps: Vec<_> = channel.drain_inbound().map(|m| m.timestamp()).collect();
        assert!(stamps.windows(2).all(|pair| pair[0] <= pair[1]));
    }

    #[test]
    fn empty_payloads_are_ignored() {
        let channel = MessageChannel::new(2, 2);
        channel.push_inbound(&[]);
        assert_eq!(channel.stats().inbound_pending, 0);
    }

    #[test]
    fn drain_does_not_chase_new_messages() {
        let channel = MessageChannel::new(8, 8);
        channel.push_inbound(&[1]);
        channel.push_inbound(&[2]);
        let mut drain = channel.drain_inbound();
        assert_eq!(drain.next().unwrap().bytes(), &[1]);
        channel.push_inbound(&[3]);
        assert_eq!(drain.next().unwrap().bytes(), &[2]);
        assert!(drain.next().is_none());
        assert_eq!(channel.pop_inbound().unwrap().bytes(), &[3]);
    }

    #[test]
    fn zero_capacity_is_clamped() {
        let channel = MessageChannel::new(0, 0);
        assert_eq!(channel.inbound_capacity(), 1);
        channel.push_inbound(&[1]);
        channel.push_inbound(&[2]);
        assert_eq!(payloads(channel.drain_inbound()), vec![vec![2]]);
        assert_eq!(channel.stats().inbound_dropped, 1);
    }

    #[test]
    fn single_producer_order_survives_concurrency() {
        let channel = Arc::new(MessageChannel::new(4096, 1));
        let producer = {
            let channel = Arc::clone(&channel);
            thread::spawn(move || {
                for i in 0..2_000u16 {
                    let [hi, lo] = i.to_be_bytes();
                    channel.push_inbound(&[hi, lo]);
                }
            })
        };

        let mut received = Vec::new();
        while received.len() < 2_000 {
            for message in channel.drain_inbound() {
                let bytes = message.bytes();
                received.push(u16::from_be_bytes([bytes[0], bytes[1]]));
            }
        }
        producer.join().unwrap();

        assert!(received.windows(2).all(|pair| pair[0] < pair[1]));
        assert_eq!(channel.stats().inbound_dropped, 0);
    }
}
