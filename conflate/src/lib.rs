// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

#![deny(missing_docs)]
//! Conflation engine for span completion stats.
//!
//! Application threads [`publish`](ConflationEngine::publish) one [`Sample`] per finished
//! operation. Samples sharing an [`AggregationKey`] are coalesced into batches without locks, a
//! single background thread folds the batches into per-key aggregates, and every reporting
//! interval the aggregates are handed to a [`MetricWriter`] as one bucket.
//!
//! Producers never block. Under pressure the engine drops data rather than slowing the
//! application down, and reports what it dropped through [`HealthMetrics`](health::HealthMetrics).
//!
//! When the collector says it does not know this telemetry endpoint (a
//! [`SinkEvent::Downgraded`]), the engine turns itself off for the rest of the process.

mod aggregates;
mod aggregator;
pub mod config;
mod engine;
pub mod health;
mod pending;
mod rate_limit;
mod shared;

pub use engine::{ConflationEngine, ConflationEngineBuilder, ReportWait};

pub use conflate_clock::Clock;
pub use conflate_core::{
    AggregateMetric, AggregationKey, EventListener, ExactHistogram, ExponentialHistogram,
    LatencyHistogram, MetricWriter, Sample, Sink, SinkEvent,
};
