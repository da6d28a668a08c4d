// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Bounded map of per-key aggregates, owned by the aggregation thread.

use conflate_core::{AggregateMetric, AggregationKey, Batch, LatencyHistogram};
use hashbrown::HashMap;
use lru_slab::LruSlab;

struct Slot<H> {
    metric: AggregateMetric<H>,
    // position in the recency list
    token: u32,
}

/// Map from key to aggregate holding at most `capacity` keys.
///
/// Inserting a key into a full map evicts the least recently merged key and discards its
/// aggregate. That loss is accepted; it is counted in [`Aggregates::evictions`]. Merging and
/// evicting are constant time.
pub(crate) struct Aggregates<H> {
    entries: HashMap<AggregationKey, Slot<H>>,
    recency: LruSlab<AggregationKey>,
    capacity: usize,
    evictions: u64,
}

/// Outcome of [`Aggregates::merge`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Merged {
    pub(crate) samples: usize,
    pub(crate) evicted: bool,
}

// grows on demand past this
const PREALLOCATED_SLOTS: usize = 1 << 16;

fn recency_list(capacity: usize) -> LruSlab<AggregationKey> {
    LruSlab::with_capacity(capacity.min(PREALLOCATED_SLOTS) as u32)
}

impl<H: LatencyHistogram + Default> Aggregates<H> {
    pub(crate) fn new(capacity: usize) -> Self {
        assert!(capacity > 0);
        Self {
            entries: HashMap::with_capacity(capacity),
            recency: recency_list(capacity),
            capacity,
            evictions: 0,
        }
    }

    /// Seal `batch` and merge it into the aggregate for its key.
    pub(crate) fn merge(&mut self, batch: &Batch) -> Merged {
        let key = batch.key();
        if let Some(slot) = self.entries.get_mut(key) {
            // marks the key most recently used
            let _ = self.recency.get_mut(slot.token);
            return Merged {
                samples: slot.metric.merge(batch),
                evicted: false,
            };
        }

        // the evicted aggregate's histogram storage is reused for the new key
        let (mut metric, evicted) = match self.evict_if_full() {
            Some(mut metric) => {
                metric.clear();
                (metric, true)
            }
            None => (AggregateMetric::default(), false),
        };
        let samples = metric.merge(batch);
        let token = self.recency.insert(key.clone());
        self.entries.insert(key.clone(), Slot { metric, token });
        Merged { samples, evicted }
    }

    fn evict_if_full(&mut self) -> Option<AggregateMetric<H>> {
        if self.entries.len() < self.capacity {
            return None;
        }
        let token = self.recency.lru()?;
        let victim = self.recency.remove(token);
        let slot = self.entries.remove(&victim)?;
        self.evictions += 1;
        Some(slot.metric)
    }

    /// Drop keys that saw no samples since they were last cleared
    pub(crate) fn expunge_stale(&mut self) {
        let recency = &mut self.recency;
        self.entries.retain(|_, slot| {
            let live = slot.metric.hit_count() > 0;
            if !live {
                recency.remove(slot.token);
            }
            live
        });
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = (&AggregationKey, &mut AggregateMetric<H>)> {
        self.entries
            .iter_mut()
            .map(|(key, slot)| (key, &mut slot.metric))
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
        self.recency = recency_list(self.capacity);
    }

    pub(crate) fn evictions(&self) -> u64 {
        self.evictions
    }

    #[cfg(test)]
    pub(crate) fn get(&self, key: &AggregationKey) -> Option<&AggregateMetric<H>> {
        self.entries.get(key).map(|slot| &slot.metric)
    }

    #[cfg(test)]
    fn recency_len(&self) -> usize {
        self.recency.len() as usize
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use assert2::check;
    use conflate_core::{ExactHistogram, Sample};

    use super::*;

    fn key(resource: &'static str) -> AggregationKey {
        AggregationKey::new(resource, "web", "http.request", "web", 200)
    }

    fn batch_of(resource: &'static str, samples: usize) -> Batch {
        let batch = Batch::new(key(resource));
        for _ in 0..samples {
            assert!(batch.try_append(Sample::ok(Duration::from_millis(1))));
        }
        batch
    }

    #[test]
    fn merges_batches_for_the_same_key() {
        let mut aggregates = Aggregates::<ExactHistogram>::new(4);
        check!(aggregates.merge(&batch_of("a", 3)).samples == 3);
        check!(aggregates.merge(&batch_of("a", 2)).samples == 2);
        check!(aggregates.len() == 1);
        check!(aggregates.get(&key("a")).map(|m| m.hit_count()) == Some(5));
    }

    #[test]
    fn evicts_the_least_recently_merged_key() {
        let mut aggregates = Aggregates::<ExactHistogram>::new(2);
        aggregates.merge(&batch_of("a", 1));
        aggregates.merge(&batch_of("b", 1));
        // touch "a" so "b" is the oldest
        aggregates.merge(&batch_of("a", 1));

        let merged = aggregates.merge(&batch_of("c", 1));
        check!(merged.evicted);
        check!(aggregates.len() == 2);
        check!(aggregates.evictions() == 1);
        check!(aggregates.get(&key("b")).is_none());
        check!(aggregates.get(&key("a")).map(|m| m.hit_count()) == Some(2));
        check!(aggregates.get(&key("c")).map(|m| m.hit_count()) == Some(1));
    }

    #[test]
    fn existing_keys_never_evict() {
        let mut aggregates = Aggregates::<ExactHistogram>::new(1);
        aggregates.merge(&batch_of("a", 1));
        check!(!aggregates.merge(&batch_of("a", 1)).evicted);
        check!(aggregates.evictions() == 0);
    }

    #[test]
    fn expunge_removes_only_idle_keys() {
        let mut aggregates = Aggregates::<ExactHistogram>::new(4);
        aggregates.merge(&batch_of("a", 1));
        aggregates.merge(&batch_of("b", 1));
        for (_, metric) in aggregates.iter_mut() {
            metric.clear();
        }
        aggregates.merge(&batch_of("b", 1));

        aggregates.expunge_stale();
        check!(aggregates.len() == 1);
        check!(aggregates.get(&key("b")).is_some());
    }

    #[test]
    fn evicted_storage_is_reused_empty() {
        let mut aggregates = Aggregates::<ExactHistogram>::new(1);
        aggregates.merge(&batch_of("a", 5));
        aggregates.merge(&batch_of("b", 2));
        let b = aggregates.get(&key("b")).unwrap();
        check!(b.hit_count() == 2);
        check!(b.ok_latencies().values().len() == 2);
    }

    #[test]
    fn recency_tracks_entries_through_churn() {
        const CAPACITY: usize = 8;
        let resources = [
            "a", "b", "c", "d", "e", "f", "g", "h", "i", "j", "k", "l", "m", "n", "o", "p",
        ];
        let mut aggregates = Aggregates::<ExactHistogram>::new(CAPACITY);
        // most recently merged last
        let mut model: Vec<&'static str> = Vec::new();
        let mut state = 7u64;

        for round in 0..2_000 {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            let resource = resources[(state >> 33) as usize % resources.len()];

            let merged = aggregates.merge(&batch_of(resource, 1));
            let known = model.iter().position(|r| *r == resource);
            match known {
                Some(at) => {
                    model.remove(at);
                }
                None if model.len() == CAPACITY => {
                    check!(merged.evicted);
                    let victim = model.remove(0);
                    check!(aggregates.get(&key(victim)).is_none());
                }
                None => {
                    check!(!merged.evicted);
                }
            }
            model.push(resource);

            if round % 97 == 0 {
                // a report: clear everything, then keep only what gets merged again
                for (_, metric) in aggregates.iter_mut() {
                    metric.clear();
                }
                let survivor = model[model.len() - 1];
                aggregates.merge(&batch_of(survivor, 1));
                aggregates.expunge_stale();
                model.clear();
                model.push(survivor);
            }

            check!(aggregates.len() == model.len());
            check!(aggregates.recency_len() == model.len());
        }
        check!(model.iter().copied().all(|r| aggregates.get(&key(r)).is_some()));
    }

    #[test]
    fn clear_resets_recency() {
        let mut aggregates = Aggregates::<ExactHistogram>::new(2);
        aggregates.merge(&batch_of("a", 1));
        aggregates.merge(&batch_of("b", 1));
        aggregates.clear();
        check!(aggregates.is_empty());
        check!(aggregates.recency_len() == 0);

        check!(!aggregates.merge(&batch_of("c", 1)).evicted);
        check!(!aggregates.merge(&batch_of("d", 1)).evicted);
        check!(aggregates.merge(&batch_of("e", 1)).evicted);
        check!(aggregates.get(&key("c")).is_none());
    }
}
