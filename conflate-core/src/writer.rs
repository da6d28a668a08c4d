// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The interface buckets are written through

use std::{
    io,
    time::{Duration, SystemTime},
};

use crate::{AggregateMetric, AggregationKey};

/// Receives finished stats buckets from the aggregation thread.
///
/// For every reporting window with data, the aggregation thread calls
/// [`MetricWriter::start_bucket`], then [`MetricWriter::add`] once per distinct key, then
/// [`MetricWriter::finish_bucket`]. Aggregates are cleared right after `add` returns, so
/// implementations must copy or serialize what they need before returning.
///
/// The writer owns serialization and transport. `finish_bucket` runs on the aggregation thread and
/// may block on IO; it never runs on a producer thread.
pub trait MetricWriter<H> {
    /// Begin a bucket of `metric_count` entries covering `duration` starting at `start`
    fn start_bucket(&mut self, metric_count: usize, start: SystemTime, duration: Duration);

    /// Add one entry to the open bucket
    fn add(&mut self, key: &AggregationKey, aggregate: &AggregateMetric<H>);

    /// Close the open bucket and hand it to the transport.
    ///
    /// An error is logged by the engine; the next bucket is written as usual.
    fn finish_bucket(&mut self) -> io::Result<()>;
}

impl<H, W: MetricWriter<H> + ?Sized> MetricWriter<H> for Box<W> {
    fn start_bucket(&mut self, metric_count: usize, start: SystemTime, duration: Duration) {
        (**self).start_bucket(metric_count, start, duration)
    }

    fn add(&mut self, key: &AggregationKey, aggregate: &AggregateMetric<H>) {
        (**self).add(key, aggregate)
    }

    fn finish_bucket(&mut self) -> io::Result<()> {
        (**self).finish_bucket()
    }
}
