// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

#![deny(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! Core types for conflating span completion samples into periodic stats buckets.
//!
//! This crate holds the pieces that are shared between producers, the aggregation thread and the
//! collaborators that consume its output:
//!
//! - [`AggregationKey`] identifies one line of a bucket
//! - [`Sample`] is one completed operation, packed into a single `u64` word
//! - [`Batch`] conflates up to [`BATCH_CAPACITY`] samples for one key
//! - [`AggregateMetric`] accumulates samples for one key over a reporting window
//! - [`MetricWriter`], [`Sink`] and [`LatencyHistogram`] are implemented by collaborators

pub mod batch;
pub mod histogram;
pub mod key;
pub mod metric;
pub mod sample;
pub mod sink;
#[cfg(feature = "test-util")]
pub mod test_util;
pub mod writer;

pub use batch::{BATCH_CAPACITY, Batch};
pub use histogram::{ExactHistogram, ExponentialHistogram, LatencyHistogram};
pub use key::AggregationKey;
pub use metric::AggregateMetric;
pub use sample::Sample;
pub use sink::{EventListener, Sink, SinkEvent};
pub use writer::MetricWriter;
