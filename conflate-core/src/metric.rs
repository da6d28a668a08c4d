// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Per-key accumulator for one reporting window

use std::time::Duration;

use crate::{Batch, ExponentialHistogram, LatencyHistogram, Sample};

/// Running totals for one [`AggregationKey`](crate::AggregationKey) within a reporting window.
///
/// Owned by the aggregation thread and never shared. [`AggregateMetric::clear`] resets the counts
/// but keeps the histogram storage, so one instance is reused window after window.
#[derive(Clone, Debug, Default)]
pub struct AggregateMetric<H = ExponentialHistogram> {
    hit_count: u64,
    error_count: u64,
    top_level_count: u64,
    duration_nanos: u64,
    ok_latencies: H,
    error_latencies: H,
}

impl<H: LatencyHistogram> AggregateMetric<H> {
    /// Create an empty accumulator
    pub fn new() -> Self
    where
        H: Default,
    {
        Self::default()
    }

    /// Seal `batch` and fold its samples in. Returns the number of samples merged.
    pub fn merge(&mut self, batch: &Batch) -> usize {
        batch.seal_and_drain(self)
    }

    /// Fold a single sample in
    pub fn record(&mut self, sample: Sample) {
        self.hit_count += 1;
        if sample.is_error {
            self.error_count += 1;
            self.error_latencies.accept(sample.duration_nanos);
        } else {
            self.ok_latencies.accept(sample.duration_nanos);
        }
        if sample.is_top_level {
            self.top_level_count += 1;
        }
        self.duration_nanos = self.duration_nanos.saturating_add(sample.duration_nanos);
    }

    /// Zero the counts and empty both histograms, keeping their storage
    pub fn clear(&mut self) {
        self.hit_count = 0;
        self.error_count = 0;
        self.top_level_count = 0;
        self.duration_nanos = 0;
        self.ok_latencies.clear();
        self.error_latencies.clear();
    }

    /// Samples recorded this window
    pub fn hit_count(&self) -> u64 {
        self.hit_count
    }

    /// Error samples recorded this window
    pub fn error_count(&self) -> u64 {
        self.error_count
    }

    /// Top-level samples recorded this window
    pub fn top_level_count(&self) -> u64 {
        self.top_level_count
    }

    /// Sum of all durations, in nanoseconds
    pub fn duration_nanos(&self) -> u64 {
        self.duration_nanos
    }

    /// Sum of all durations
    pub fn duration(&self) -> Duration {
        Duration::from_nanos(self.duration_nanos)
    }

    /// Latencies of successful samples
    pub fn ok_latencies(&self) -> &H {
        &self.ok_latencies
    }

    /// Latencies of error samples
    pub fn error_latencies(&self) -> &H {
        &self.error_latencies
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use assert2::check;

    use super::*;
    use crate::{AggregationKey, ExactHistogram};

    #[test]
    fn splits_latencies_by_outcome() {
        let mut metric = AggregateMetric::<ExactHistogram>::new();
        metric.record(Sample::ok(Duration::from_millis(10)).top_level());
        metric.record(Sample::error(Duration::from_millis(5)));

        check!(metric.hit_count() == 2);
        check!(metric.error_count() == 1);
        check!(metric.top_level_count() == 1);
        check!(metric.duration() == Duration::from_millis(15));
        check!(metric.ok_latencies().values() == [10_000_000]);
        check!(metric.error_latencies().values() == [5_000_000]);
    }

    #[test]
    fn cleared_metric_stays_empty_until_new_samples() {
        let mut metric = AggregateMetric::<ExactHistogram>::new();
        metric.record(Sample::error(Duration::from_millis(5)).top_level());
        metric.clear();

        for _ in 0..3 {
            check!(metric.hit_count() == 0);
            check!(metric.error_count() == 0);
            check!(metric.top_level_count() == 0);
            check!(metric.duration_nanos() == 0);
            check!(metric.ok_latencies().is_empty());
            check!(metric.error_latencies().is_empty());
            metric.clear();
        }

        metric.record(Sample::ok(Duration::from_millis(1)));
        check!(metric.hit_count() == 1);
    }

    #[test]
    fn merge_drains_a_batch() {
        let batch = Batch::new(AggregationKey::new("r", "s", "o", "", 0));
        check!(batch.try_append(Sample::ok(Duration::from_millis(3))));
        check!(batch.try_append(Sample::ok(Duration::from_millis(4)).top_level()));

        let mut metric = AggregateMetric::<ExactHistogram>::new();
        check!(metric.merge(&batch) == 2);
        check!(metric.hit_count() == 2);
        check!(metric.top_level_count() == 1);
        check!(batch.is_sealed());
    }
}
