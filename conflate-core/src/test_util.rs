// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Test doubles for the writer and sink collaborators.
//!
//! ```
//! use conflate_core::{AggregateMetric, AggregationKey, ExactHistogram, MetricWriter, Sample};
//! use conflate_core::test_util::RecordingWriter;
//! use std::time::{Duration, UNIX_EPOCH};
//!
//! let writer = RecordingWriter::<ExactHistogram>::new();
//! let mut handle = writer.clone();
//! let mut metric = AggregateMetric::<ExactHistogram>::new();
//! metric.record(Sample::ok(Duration::from_millis(1)));
//!
//! handle.start_bucket(1, UNIX_EPOCH, Duration::from_secs(10));
//! handle.add(&AggregationKey::new("r", "s", "o", "", 0), &metric);
//! handle.finish_bucket().unwrap();
//!
//! assert_eq!(writer.buckets()[0].entries.len(), 1);
//! ```

use std::{
    io,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, SystemTime},
};

use crate::{
    AggregateMetric, AggregationKey, EventListener, LatencyHistogram, MetricWriter, Sink,
    SinkEvent,
};

/// A bucket captured by [`RecordingWriter`]
#[derive(Clone, Debug)]
pub struct RecordedBucket<H> {
    /// Entry count announced by `start_bucket`
    pub metric_count: usize,
    /// Wall-clock start of the bucket
    pub start: SystemTime,
    /// Length of the bucket
    pub duration: Duration,
    /// Copies of every entry added, in the order they were added
    pub entries: Vec<(AggregationKey, AggregateMetric<H>)>,
    /// `finish_bucket` was called
    pub finished: bool,
}

impl<H> RecordedBucket<H> {
    /// Find the entry for `key`
    pub fn entry(&self, key: &AggregationKey) -> Option<&AggregateMetric<H>> {
        self.entries
            .iter()
            .find_map(|(k, metric)| (k == key).then_some(metric))
    }
}

struct Recorded<H> {
    buckets: Vec<RecordedBucket<H>>,
    open: Option<RecordedBucket<H>>,
}

/// [`MetricWriter`] that keeps a copy of every bucket. Clones share the same recording.
pub struct RecordingWriter<H> {
    recorded: Arc<Mutex<Recorded<H>>>,
    fail_finish: Arc<AtomicBool>,
}

impl<H> Clone for RecordingWriter<H> {
    fn clone(&self) -> Self {
        Self {
            recorded: Arc::clone(&self.recorded),
            fail_finish: Arc::clone(&self.fail_finish),
        }
    }
}

impl<H> Default for RecordingWriter<H> {
    fn default() -> Self {
        Self {
            recorded: Arc::new(Mutex::new(Recorded {
                buckets: Vec::new(),
                open: None,
            })),
            fail_finish: Arc::new(AtomicBool::new(false)),
        }
    }
}

impl<H: Clone> RecordingWriter<H> {
    /// Create an empty recording
    pub fn new() -> Self {
        Self::default()
    }

    /// Every finished bucket so far
    pub fn buckets(&self) -> Vec<RecordedBucket<H>> {
        self.recorded.lock().unwrap().buckets.clone()
    }

    /// Make `finish_bucket` return an IO error while `fail` is true. The bucket is still recorded.
    pub fn fail_finish(&self, fail: bool) {
        self.fail_finish.store(fail, Ordering::Relaxed);
    }
}

impl<H: LatencyHistogram + Clone> MetricWriter<H> for RecordingWriter<H> {
    fn start_bucket(&mut self, metric_count: usize, start: SystemTime, duration: Duration) {
        let mut recorded = self.recorded.lock().unwrap();
        assert!(recorded.open.is_none(), "bucket started twice");
        recorded.open = Some(RecordedBucket {
            metric_count,
            start,
            duration,
            entries: Vec::with_capacity(metric_count),
            finished: false,
        });
    }

    fn add(&mut self, key: &AggregationKey, aggregate: &AggregateMetric<H>) {
        let mut recorded = self.recorded.lock().unwrap();
        let bucket = recorded.open.as_mut().expect("add outside of a bucket");
        bucket.entries.push((key.clone(), aggregate.clone()));
    }

    fn finish_bucket(&mut self) -> io::Result<()> {
        let mut recorded = self.recorded.lock().unwrap();
        let mut bucket = recorded.open.take().expect("finish without a bucket");
        bucket.finished = true;
        recorded.buckets.push(bucket);
        if self.fail_finish.load(Ordering::Relaxed) {
            return Err(io::Error::other("injected finish failure"));
        }
        Ok(())
    }
}

/// [`Sink`] that records payloads and lets tests fire events at registered listeners
#[derive(Clone, Default)]
pub struct TestSink {
    listeners: Arc<Mutex<Vec<Arc<dyn EventListener>>>>,
    payloads: Arc<Mutex<Vec<(usize, Vec<u8>)>>>,
}

impl TestSink {
    /// Create a sink with no listeners
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver `event` to every registered listener
    pub fn emit(&self, event: SinkEvent, message: &str) {
        let listeners = self.listeners.lock().unwrap().clone();
        for listener in listeners {
            listener.on_event(event, message);
        }
    }

    /// Number of registered listeners
    pub fn listener_count(&self) -> usize {
        self.listeners.lock().unwrap().len()
    }

    /// Payloads passed to [`Sink::accept`]
    pub fn payloads(&self) -> Vec<(usize, Vec<u8>)> {
        self.payloads.lock().unwrap().clone()
    }
}

impl Sink for TestSink {
    fn register(&self, listener: Arc<dyn EventListener>) {
        self.listeners.lock().unwrap().push(listener);
    }

    fn accept(&self, message_count: usize, payload: &[u8]) {
        self.payloads
            .lock()
            .unwrap()
            .push((message_count, payload.to_vec()));
    }
}
