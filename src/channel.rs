//! Wait-free trigger hand-off from the network thread to the audio thread
//!
//! A fixed-capacity single-producer/single-consumer ring buffer of
//! oscillator indices. Neither end blocks or allocates. A full queue drops
//! the newest event: triggers are transient stimuli, not commands.

use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Default number of queued trigger events
pub const DEFAULT_CAPACITY: usize = 512;

/// Create a connected sender/receiver pair holding up to `capacity` events
pub fn trigger_channel(capacity: usize) -> (TriggerSender, TriggerReceiver) {
    let capacity = capacity.max(1);
    let (producer, consumer) = HeapRb::<u16>::new(capacity).split();
    let dropped = Arc::new(AtomicU64::new(0));

    (
        TriggerSender {
            producer,
            dropped: dropped.clone(),
            capacity,
        },
        TriggerReceiver { consumer, dropped },
    )
}

/// Producer end, owned by the network thread
pub struct TriggerSender {
    producer: HeapProd<u16>,
    dropped: Arc<AtomicU64>,
    capacity: usize,
}

impl TriggerSender {
    /// Queue a trigger for oscillator `index`.
    ///
    /// Returns `false` when the queue was full and the event was dropped.
    pub fn push(&mut self, index: u16) -> bool {
        match self.producer.try_push(index) {
            Ok(()) => true,
            Err(_) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of events that can still be queued
    pub fn vacant(&self) -> usize {
        self.producer.vacant_len()
    }
}

/// Consumer end, owned by the audio thread
pub struct TriggerReceiver {
    consumer: HeapCons<u16>,
    dropped: Arc<AtomicU64>,
}

impl TriggerReceiver {
    pub fn try_pop(&mut self) -> Option<u16> {
        self.consumer.try_pop()
    }

    /// Move up to `max` queued events into `out`.
    ///
    /// Does not allocate as long as `out` has spare capacity for them.
    pub fn drain_into(&mut self, out: &mut Vec<u16>, max: usize) -> usize {
        let mut taken = 0;
        while taken < max {
            match self.consumer.try_pop() {
                Some(index) => {
                    out.push(index);
                    taken += 1;
                }
                None => break,
            }
        }
        taken
    }

    /// Events currently waiting in the queue
    pub fn pending(&self) -> usize {
        self.consumer.occupied_len()
    }

    /// Total events dropped by the sender because the queue was full
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_fifo_order() {
        let (mut tx, mut rx) = trigger_channel(8);
        for i in 0..8 {
            assert!(tx.push(i));
        }
        let popped: Vec<u16> = std::iter::from_fn(|| rx.try_pop()).collect();
        assert_eq!(popped, (0..8).collect::<Vec<u16>>());
        assert_eq!(rx.try_pop(), None);
    }

    #[test]
    fn test_overflow_drops_newest() {
        let (mut tx, mut rx) = trigger_channel(4);
        for i in 0..4 {
            assert!(tx.push(i));
        }
        assert!(!tx.push(100));
        assert!(!tx.push(101));
        assert_eq!(rx.dropped(), 2);

        let popped: Vec<u16> = std::iter::from_fn(|| rx.try_pop()).collect();
        assert_eq!(popped, vec![0, 1, 2, 3]);

        // Space frees up again after draining
        assert!(tx.push(7));
        assert_eq!(rx.try_pop(), Some(7));
    }

    #[test]
    fn test_drain_respects_cap() {
        let (mut tx, mut rx) = trigger_channel(16);
        for i in 0..10 {
            tx.push(i);
        }

        let mut out = Vec::with_capacity(16);
        assert_eq!(rx.drain_into(&mut out, 4), 4);
        assert_eq!(out, vec![0, 1, 2, 3]);
        assert_eq!(rx.pending(), 6);

        out.clear();
        assert_eq!(rx.drain_into(&mut out, 100), 6);
        assert_eq!(out, vec![4, 5, 6, 7, 8, 9]);
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let (mut tx, mut rx) = trigger_channel(0);
        assert_eq!(tx.capacity(), 1);
        assert!(tx.push(1));
        assert!(!tx.push(2));
        assert_eq!(rx.try_pop(), Some(1));
    }

    #[test]
    fn test_cross_thread_delivery() {
        let (mut tx, mut rx) = trigger_channel(64);

        let producer = thread::spawn(move || {
            let mut sent = 0u16;
            while sent < 1000 {
                if tx.push(sent) {
                    sent += 1;
                } else {
                    thread::yield_now();
                }
            }
        });

        let mut expected = 0u16;
        while expected < 1000 {
            if let Some(index) = rx.try_pop() {
                assert_eq!(index, expected);
                expected += 1;
            } else {
                thread::yield_now();
            }
        }

        producer.join().unwrap();
    }
}
