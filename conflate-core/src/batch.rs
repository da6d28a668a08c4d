// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Fixed-capacity conflation buffer for samples sharing one key.
//!
//! Producers race to reserve slots with [`Batch::try_append`]; the single aggregation thread
//! claims the batch with [`Batch::seal_and_drain`]. The protocol uses two counters:
//!
//! - `reserved` counts slots handed out to producers. Sealing swaps it to a sentinel above
//!   [`BATCH_CAPACITY`], after which every reservation fails.
//! - `committed` counts slot writes that have completed.
//!
//! A producer may have reserved a slot but not yet written it when the batch is sealed. The
//! consumer spins until `committed` catches up with the reservation count it observed. The spin is
//! bounded by the number of producers that were inside `try_append` at the moment of the seal.
//!
//! # Single consumer
//!
//! Sealing and draining is only sound with exactly one consumer per batch, calling
//! [`Batch::seal_and_drain`] once. Two concurrent drains would both decode the same slots and
//! double count them. [`Batch::reset`] takes `&mut self`, so recycling requires exclusive ownership
//! (for a shared batch, `Arc::get_mut`).

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use crossbeam_utils::Backoff;

use crate::{AggregateMetric, AggregationKey, LatencyHistogram, Sample};

/// Number of samples one batch can hold
pub const BATCH_CAPACITY: usize = 64;

const SEALED: usize = usize::MAX;

/// Conflates up to [`BATCH_CAPACITY`] samples for one [`AggregationKey`].
pub struct Batch {
    key: AggregationKey,
    reserved: AtomicUsize,
    committed: AtomicUsize,
    slots: [AtomicU64; BATCH_CAPACITY],
}

impl Batch {
    /// Create an empty batch for `key`
    pub fn new(key: AggregationKey) -> Self {
        Self {
            key,
            reserved: AtomicUsize::new(0),
            committed: AtomicUsize::new(0),
            slots: [const { AtomicU64::new(0) }; BATCH_CAPACITY],
        }
    }

    /// Key whose samples this batch holds
    pub fn key(&self) -> &AggregationKey {
        &self.key
    }

    /// Reuse this batch for `key`, discarding any previous contents and unsealing it.
    pub fn reset(&mut self, key: AggregationKey) {
        self.key = key;
        *self.reserved.get_mut() = 0;
        *self.committed.get_mut() = 0;
    }

    /// Try to add a sample.
    ///
    /// Returns `false` without touching the batch when it is full or sealed; the caller needs a
    /// different batch. Never blocks or allocates.
    pub fn try_append(&self, sample: Sample) -> bool {
        let mut current = self.reserved.load(Ordering::Acquire);
        let slot = loop {
            if current >= BATCH_CAPACITY {
                return false;
            }
            match self.reserved.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(slot) => break slot,
                Err(actual) => current = actual,
            }
        };
        self.slots[slot].store(sample.encode(), Ordering::Relaxed);
        // publishes the slot write to the consumer's acquire load of `committed`
        self.committed.fetch_add(1, Ordering::Release);
        true
    }

    /// Seal the batch against further appends and fold every committed sample into `metric`.
    ///
    /// Returns the number of samples drained. Draining a batch that is already sealed drains
    /// nothing.
    pub fn seal_and_drain<H: LatencyHistogram>(&self, metric: &mut AggregateMetric<H>) -> usize {
        let reserved = self.seal();
        for slot in &self.slots[..reserved] {
            metric.record(Sample::decode(slot.load(Ordering::Relaxed)));
        }
        reserved
    }

    /// Seal the batch against further appends without reading it.
    ///
    /// Returns the number of samples the batch holds, all of them committed, or 0 if it was
    /// already sealed. The same single-consumer rule as [`Batch::seal_and_drain`] applies.
    pub fn seal(&self) -> usize {
        let reserved = self.reserved.swap(SEALED, Ordering::AcqRel);
        if reserved == SEALED {
            return 0;
        }
        let reserved = reserved.min(BATCH_CAPACITY);

        // a producer that won a reservation before the swap may still be writing its slot
        let backoff = Backoff::new();
        let mut committed = self.committed.load(Ordering::Acquire);
        while committed < reserved {
            backoff.snooze();
            committed = self.committed.load(Ordering::Acquire);
        }
        debug_assert_eq!(committed, reserved, "more slots committed than reserved");
        reserved
    }

    /// True once [`Batch::seal_and_drain`] has claimed this batch
    pub fn is_sealed(&self) -> bool {
        self.reserved.load(Ordering::Acquire) == SEALED
    }

    /// Number of completed slot writes
    pub fn committed(&self) -> usize {
        self.committed.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for Batch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Batch")
            .field("key", &self.key)
            .field("sealed", &self.is_sealed())
            .field("committed", &self.committed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{Arc, Barrier},
        thread,
        time::Duration,
    };

    use assert2::check;

    use super::*;
    use crate::ExactHistogram;

    fn key() -> AggregationKey {
        AggregationKey::new("GET /", "web", "http.request", "web", 200)
    }

    #[test]
    fn rejects_appends_beyond_capacity() {
        let batch = Batch::new(key());
        for i in 0..BATCH_CAPACITY as u64 {
            check!(batch.try_append(Sample::ok(Duration::from_nanos(i + 1))));
        }
        check!(!batch.try_append(Sample::ok(Duration::from_nanos(1000))));
        check!(!batch.try_append(Sample::error(Duration::from_nanos(1000))));
        check!(batch.committed() == BATCH_CAPACITY);

        let mut metric = AggregateMetric::<ExactHistogram>::default();
        check!(batch.seal_and_drain(&mut metric) == BATCH_CAPACITY);
        check!(metric.hit_count() == BATCH_CAPACITY as u64);
        check!(metric.error_count() == 0);
        // 1 + 2 + ... + 64, nothing from the rejected appends
        check!(metric.duration_nanos() == 64 * 65 / 2);
    }

    #[test]
    fn sealed_batch_is_never_resurrected() {
        let batch = Batch::new(key());
        check!(batch.try_append(Sample::ok(Duration::from_millis(1))));

        let mut metric = AggregateMetric::<ExactHistogram>::default();
        check!(batch.seal_and_drain(&mut metric) == 1);
        check!(batch.is_sealed());
        check!(!batch.try_append(Sample::ok(Duration::from_millis(1))));

        // a second drain must not double count
        check!(batch.seal_and_drain(&mut metric) == 0);
        check!(metric.hit_count() == 1);
    }

    #[test]
    fn seal_counts_without_draining() {
        let batch = Batch::new(key());
        check!(batch.try_append(Sample::ok(Duration::from_millis(1))));
        check!(batch.try_append(Sample::error(Duration::from_millis(1))));
        check!(batch.seal() == 2);
        check!(!batch.try_append(Sample::ok(Duration::from_millis(1))));

        let mut metric = AggregateMetric::<ExactHistogram>::default();
        check!(batch.seal() == 0);
        check!(batch.seal_and_drain(&mut metric) == 0);
        check!(metric.hit_count() == 0);
    }

    #[test]
    fn empty_batch_drains_nothing() {
        let batch = Batch::new(key());
        let mut metric = AggregateMetric::<ExactHistogram>::default();
        check!(batch.seal_and_drain(&mut metric) == 0);
        check!(metric.hit_count() == 0);
    }

    #[test]
    fn reset_unseals_for_a_new_key() {
        let mut batch = Batch::new(key());
        check!(batch.try_append(Sample::ok(Duration::from_millis(1))));
        let mut metric = AggregateMetric::<ExactHistogram>::default();
        batch.seal_and_drain(&mut metric);

        let other = AggregationKey::new("GET /other", "web", "http.request", "web", 200);
        batch.reset(other.clone());
        check!(batch.key() == &other);
        check!(!batch.is_sealed());
        check!(batch.committed() == 0);
        check!(batch.try_append(Sample::error(Duration::from_millis(2))));

        let mut metric = AggregateMetric::<ExactHistogram>::default();
        check!(batch.seal_and_drain(&mut metric) == 1);
        check!(metric.error_count() == 1);
    }

    #[test]
    fn concurrent_appends_are_counted_exactly_once() {
        for _ in 0..50 {
            let batch = Arc::new(Batch::new(key()));
            let threads = 32;
            let per_thread = 2;
            let barrier = Arc::new(Barrier::new(threads));

            let handles: Vec<_> = (0..threads)
                .map(|t| {
                    let batch = Arc::clone(&batch);
                    let barrier = Arc::clone(&barrier);
                    thread::spawn(move || {
                        barrier.wait();
                        for i in 0..per_thread {
                            let nanos = (t * per_thread + i + 1) as u64;
                            let sample = if nanos % 3 == 0 {
                                Sample::error(Duration::from_nanos(nanos))
                            } else {
                                Sample::ok(Duration::from_nanos(nanos))
                            };
                            assert!(batch.try_append(sample));
                        }
                    })
                })
                .collect();
            for handle in handles {
                handle.join().unwrap();
            }

            let mut metric = AggregateMetric::<ExactHistogram>::default();
            check!(batch.seal_and_drain(&mut metric) == BATCH_CAPACITY);
            check!(metric.hit_count() == 64);
            check!(metric.error_count() == (1..=64).filter(|n| n % 3 == 0).count() as u64);
            check!(metric.duration_nanos() == (1..=64u64).sum::<u64>());
        }
    }

    #[test]
    fn drain_racing_producers_loses_nothing_it_accepted() {
        for _ in 0..50 {
            let batch = Arc::new(Batch::new(key()));
            let threads = 16;
            let barrier = Arc::new(Barrier::new(threads + 1));

            let handles: Vec<_> = (0..threads)
                .map(|_| {
                    let batch = Arc::clone(&batch);
                    let barrier = Arc::clone(&barrier);
                    thread::spawn(move || {
                        barrier.wait();
                        let mut accepted = 0u64;
                        for _ in 0..8 {
                            if batch.try_append(Sample::ok(Duration::from_nanos(1))) {
                                accepted += 1;
                            }
                        }
                        accepted
                    })
                })
                .collect();

            barrier.wait();
            let mut metric = AggregateMetric::<ExactHistogram>::default();
            let drained = batch.seal_and_drain(&mut metric) as u64;
            let accepted: u64 = handles.into_iter().map(|h| h.join().unwrap()).sum();

            check!(drained == accepted);
            check!(metric.hit_count() == accepted);
            check!(metric.duration_nanos() == accepted);
        }
    }
}
