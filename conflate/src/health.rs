// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Callbacks reporting on the engine's own health.
//!
//! Loss in this engine is intentional (full queue, LRU eviction) and never surfaces as an error,
//! so these callbacks are the only way to see how much is being lost.

use std::sync::atomic::{AtomicU64, Ordering};

/// Receives health signals. Every method defaults to doing nothing.
///
/// Methods are called from producer threads, the aggregation thread and the sink's event thread,
/// so implementations must be cheap and must not block.
pub trait HealthMetrics: Send + Sync {
    /// The sink reported the outcome of a transport attempt
    fn on_payload_sent(&self) {}

    /// The collector does not support stats; the engine disabled itself
    fn on_downgraded(&self) {}

    /// The sink reported a bad payload or a transport error
    fn on_error_received(&self) {}

    /// `samples` were dropped because the queue was full
    fn on_publish_dropped(&self, samples: usize) {
        let _ = samples;
    }

    /// A key's aggregate was evicted to stay within `max_aggregates`
    fn on_aggregate_evicted(&self) {}

    /// A bucket of `metric_count` entries was handed to the writer
    fn on_bucket_reported(&self, metric_count: usize) {
        let _ = metric_count;
    }

    /// The writer failed to finish a bucket
    fn on_bucket_write_failed(&self) {}
}

/// Ignores every signal
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopHealthMetrics;

impl HealthMetrics for NoopHealthMetrics {}

/// Counts every signal
#[derive(Debug, Default)]
pub struct CountingHealthMetrics {
    payloads_sent: AtomicU64,
    downgrades: AtomicU64,
    errors_received: AtomicU64,
    publishes_dropped: AtomicU64,
    aggregates_evicted: AtomicU64,
    buckets_reported: AtomicU64,
    metrics_reported: AtomicU64,
    bucket_write_failures: AtomicU64,
}

impl CountingHealthMetrics {
    /// Create zeroed counters
    pub fn new() -> Self {
        Self::default()
    }

    /// Sink events observed
    pub fn payloads_sent(&self) -> u64 {
        self.payloads_sent.load(Ordering::Relaxed)
    }

    /// Downgrade events observed
    pub fn downgrades(&self) -> u64 {
        self.downgrades.load(Ordering::Relaxed)
    }

    /// Bad payload and transport error events observed
    pub fn errors_received(&self) -> u64 {
        self.errors_received.load(Ordering::Relaxed)
    }

    /// Samples dropped on a full queue, including those that raced into a batch that could not be
    /// queued
    pub fn publishes_dropped(&self) -> u64 {
        self.publishes_dropped.load(Ordering::Relaxed)
    }

    /// Aggregates evicted by the LRU bound
    pub fn aggregates_evicted(&self) -> u64 {
        self.aggregates_evicted.load(Ordering::Relaxed)
    }

    /// Buckets handed to the writer
    pub fn buckets_reported(&self) -> u64 {
        self.buckets_reported.load(Ordering::Relaxed)
    }

    /// Entries across all buckets handed to the writer
    pub fn metrics_reported(&self) -> u64 {
        self.metrics_reported.load(Ordering::Relaxed)
    }

    /// Buckets the writer failed to finish
    pub fn bucket_write_failures(&self) -> u64 {
        self.bucket_write_failures.load(Ordering::Relaxed)
    }
}

impl HealthMetrics for CountingHealthMetrics {
    fn on_payload_sent(&self) {
        self.payloads_sent.fetch_add(1, Ordering::Relaxed);
    }

    fn on_downgraded(&self) {
        self.downgrades.fetch_add(1, Ordering::Relaxed);
    }

    fn on_error_received(&self) {
        self.errors_received.fetch_add(1, Ordering::Relaxed);
    }

    fn on_publish_dropped(&self, samples: usize) {
        self.publishes_dropped.fetch_add(samples as u64, Ordering::Relaxed);
    }

    fn on_aggregate_evicted(&self) {
        self.aggregates_evicted.fetch_add(1, Ordering::Relaxed);
    }

    fn on_bucket_reported(&self, metric_count: usize) {
        self.buckets_reported.fetch_add(1, Ordering::Relaxed);
        self.metrics_reported
            .fetch_add(metric_count as u64, Ordering::Relaxed);
    }

    fn on_bucket_write_failed(&self) {
        self.bucket_write_failures.fetch_add(1, Ordering::Relaxed);
    }
}
