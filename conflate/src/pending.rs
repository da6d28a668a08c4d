// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Producer-side bookkeeping: the batch currently advertised for each key, and a bounded pool of
//! drained batches waiting to be reused.

use std::sync::Arc;

use ahash::RandomState;
use conflate_core::{AggregationKey, Batch, Sample};
use crossbeam_queue::ArrayQueue;
use dashmap::DashMap;

pub(crate) struct BatchRegistry {
    // Entries are replaced, never locked for the duration of an append. A sealed batch may stay
    // advertised until the next producer for that key notices and replaces it.
    pending: DashMap<AggregationKey, Arc<Batch>, RandomState>,
    pool: ArrayQueue<Arc<Batch>>,
}

impl BatchRegistry {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            pending: DashMap::with_capacity_and_hasher(capacity * 4 / 3, RandomState::new()),
            pool: ArrayQueue::new(capacity),
        }
    }

    /// Append to the batch advertised for `key`. Returns `false` if there is none, or it is full or
    /// sealed.
    pub(crate) fn append_pending(&self, key: &AggregationKey, sample: Sample) -> bool {
        let Some(batch) = self.pending.get(key).map(|entry| Arc::clone(entry.value())) else {
            return false;
        };
        batch.try_append(sample)
    }

    /// A batch for `key` that no other thread can see yet, reused from the pool when possible.
    pub(crate) fn acquire(&self, key: AggregationKey) -> Arc<Batch> {
        while let Some(mut batch) = self.pool.pop() {
            if let Some(exclusive) = Arc::get_mut(&mut batch) {
                exclusive.reset(key);
                return batch;
            }
        }
        Arc::new(Batch::new(key))
    }

    /// Advertise `batch` as the live batch for its key, replacing whatever was there.
    pub(crate) fn advertise(&self, batch: &Arc<Batch>) {
        self.pending.insert(batch.key().clone(), Arc::clone(batch));
    }

    /// Stop advertising `batch`, unless a newer batch has already replaced it.
    pub(crate) fn retract(&self, batch: &Arc<Batch>) {
        self.pending
            .remove_if(batch.key(), |_, current| Arc::ptr_eq(current, batch));
    }

    /// Return a drained batch to the pool.
    ///
    /// Only a batch nobody else references is pooled. A producer that read the batch from the
    /// pending table just before it was retracted still holds a reference; pooling it then would
    /// let that producer's failed append race with the batch's next owner after `reset`.
    pub(crate) fn recycle(&self, mut batch: Arc<Batch>) {
        if Arc::get_mut(&mut batch).is_some() {
            // a full pool drops the batch
            let _ = self.pool.push(batch);
        }
    }

    pub(crate) fn clear(&self) {
        self.pending.clear();
        while self.pool.pop().is_some() {}
    }

    pub(crate) fn pending_len(&self) -> usize {
        self.pending.len()
    }

    #[cfg(test)]
    pub(crate) fn pooled_len(&self) -> usize {
        self.pool.len()
    }
}
