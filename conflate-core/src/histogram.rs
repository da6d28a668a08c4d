// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Latency histograms held by each [`AggregateMetric`](crate::AggregateMetric).
//!
//! The engine treats histograms as opaque: it only records values, clears them between windows,
//! and hands them to the [`MetricWriter`](crate::MetricWriter), which may call
//! [`LatencyHistogram::serialize`].
//!
//! Two implementations are provided:
//!
//! - [`ExponentialHistogram`] (default) buckets values exponentially with ~6.25% relative error
//!   and fixed memory.
//! - [`ExactHistogram`] keeps every value. Memory grows with the number of samples, so it is
//!   meant for tests and low-volume keys.

use histogram::Config;
use smallvec::SmallVec;

/// Histogram of latencies in nanoseconds
pub trait LatencyHistogram: Send {
    /// Record one value
    fn accept(&mut self, value: u64);

    /// Remove all values without releasing the backing storage
    fn clear(&mut self);

    /// Encode the histogram for the wire
    fn serialize(&self) -> Vec<u8>;
}

/// Exponential bucketing histogram using the histogram crate.
///
/// This uses 976 buckets and supports values from 0 to u64::MAX, with a 4-bit mantissa
/// precision (16 buckets per order of magnitude, ~6.25% error).
pub struct ExponentialHistogram {
    inner: histogram::Histogram,
}

impl ExponentialHistogram {
    /// Create an empty histogram with the default configuration
    pub fn new() -> Self {
        Self {
            inner: histogram::Histogram::with_config(&default_histogram_config()),
        }
    }

    /// Number of recorded values
    pub fn count(&self) -> u64 {
        self.inner.as_slice().iter().sum()
    }

    /// Non-empty buckets as `(lowest value, highest value, count)`, in ascending order
    pub fn buckets(&self) -> impl Iterator<Item = (u64, u64, u64)> + '_ {
        self.inner
            .iter()
            .filter(|bucket| bucket.count() > 0)
            .map(|bucket| {
                let range = bucket.range();
                (*range.start(), *range.end(), bucket.count())
            })
    }
}

impl Default for ExponentialHistogram {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for ExponentialHistogram {
    fn clone(&self) -> Self {
        let mut inner = histogram::Histogram::with_config(&default_histogram_config());
        inner.as_mut_slice().copy_from_slice(self.inner.as_slice());
        Self { inner }
    }
}

impl std::fmt::Debug for ExponentialHistogram {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExponentialHistogram")
            .field("count", &self.count())
            .finish()
    }
}

fn default_histogram_config() -> Config {
    Config::new(4, 64).expect("known good")
}

impl LatencyHistogram for ExponentialHistogram {
    fn accept(&mut self, value: u64) {
        // every u64 fits the default configuration
        self.inner.increment(value).ok();
    }

    fn clear(&mut self) {
        self.inner.as_mut_slice().fill(0);
    }

    /// Non-empty buckets as little-endian `(lowest, highest, count)` triples, preceded by the
    /// number of triples as a little-endian `u32`.
    fn serialize(&self) -> Vec<u8> {
        let buckets: Vec<_> = self.buckets().collect();
        let mut out = Vec::with_capacity(4 + buckets.len() * 24);
        out.extend_from_slice(&(buckets.len() as u32).to_le_bytes());
        for (low, high, count) in buckets {
            out.extend_from_slice(&low.to_le_bytes());
            out.extend_from_slice(&high.to_le_bytes());
            out.extend_from_slice(&count.to_le_bytes());
        }
        out
    }
}

/// Histogram that keeps every recorded value.
///
/// Uses a `SmallVec` so the first eight values of a window do not allocate.
#[derive(Clone, Debug, Default)]
pub struct ExactHistogram {
    values: SmallVec<[u64; 8]>,
}

impl ExactHistogram {
    /// Create an empty histogram
    pub fn new() -> Self {
        Self::default()
    }

    /// Recorded values in insertion order
    pub fn values(&self) -> &[u64] {
        &self.values
    }

    /// Recorded values in ascending order
    pub fn sorted_values(&self) -> Vec<u64> {
        let mut values = self.values.to_vec();
        values.sort_unstable();
        values
    }

    /// True when nothing was recorded
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl LatencyHistogram for ExactHistogram {
    fn accept(&mut self, value: u64) {
        self.values.push(value);
    }

    fn clear(&mut self) {
        self.values.clear();
    }

    /// Sorted values as little-endian `u64`s
    fn serialize(&self) -> Vec<u8> {
        self.sorted_values()
            .into_iter()
            .flat_map(u64::to_le_bytes)
            .collect()
    }
}
