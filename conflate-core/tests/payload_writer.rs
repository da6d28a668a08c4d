// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! A transport-facing writer built only from the public interfaces.

use std::{
    io,
    sync::Arc,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use assert2::{check, let_assert};
use conflate_core::{
    AggregateMetric, AggregationKey, Batch, ExactHistogram, LatencyHistogram, MetricWriter,
    Sample, Sink, test_util::TestSink,
};

/// Writes one line per entry and hands the bucket to a [`Sink`]
struct LineWriter<S> {
    sink: Arc<S>,
    header: String,
    lines: Vec<String>,
}

impl<S: Sink> LineWriter<S> {
    fn new(sink: Arc<S>) -> Self {
        Self {
            sink,
            header: String::new(),
            lines: Vec::new(),
        }
    }
}

impl<S: Sink, H: LatencyHistogram> MetricWriter<H> for LineWriter<S> {
    fn start_bucket(&mut self, metric_count: usize, start: SystemTime, duration: Duration) {
        let start = start.duration_since(UNIX_EPOCH).unwrap_or_default();
        self.header = format!("{} {} {}", start.as_secs(), duration.as_secs(), metric_count);
        self.lines.clear();
    }

    fn add(&mut self, key: &AggregationKey, aggregate: &AggregateMetric<H>) {
        self.lines.push(format!(
            "{}|{}|{}|{} hits={} errors={} top={} nanos={} ok={}B",
            key.service(),
            key.operation(),
            key.resource(),
            key.http_status_code(),
            aggregate.hit_count(),
            aggregate.error_count(),
            aggregate.top_level_count(),
            aggregate.duration_nanos(),
            aggregate.ok_latencies().serialize().len(),
        ));
    }

    fn finish_bucket(&mut self) -> io::Result<()> {
        if self.lines.is_empty() {
            return Err(io::Error::other("empty bucket"));
        }
        let mut payload = self.header.clone();
        for line in &self.lines {
            payload.push('\n');
            payload.push_str(line);
        }
        self.sink.accept(self.lines.len(), payload.as_bytes());
        Ok(())
    }
}

#[test]
fn batches_drain_through_a_writer_into_a_sink() {
    let key = AggregationKey::new("GET /health", "api", "http.request", "web", 204);
    let batch = Batch::new(key.clone());
    check!(batch.try_append(Sample::ok(Duration::from_nanos(300)).top_level()));
    check!(batch.try_append(Sample::ok(Duration::from_nanos(200))));
    check!(batch.try_append(Sample::error(Duration::from_nanos(100))));

    let mut metric = AggregateMetric::<ExactHistogram>::new();
    check!(metric.merge(&batch) == 3);
    check!(!batch.try_append(Sample::ok(Duration::from_nanos(1))));

    let sink = Arc::new(TestSink::new());
    let mut writer: Box<dyn MetricWriter<ExactHistogram>> = Box::new(LineWriter::new(sink.clone()));
    writer.start_bucket(1, UNIX_EPOCH + Duration::from_secs(1_700_000_000), Duration::from_secs(10));
    writer.add(&key, &metric);
    writer.finish_bucket().unwrap();

    let payloads = sink.payloads();
    let_assert!([(count, payload)] = payloads.as_slice());
    check!(*count == 1);
    check!(
        std::str::from_utf8(payload).unwrap()
            == "1700000000 10 1\napi|http.request|GET /health|204 hits=3 errors=1 top=1 nanos=600 ok=16B"
    );
}

#[test]
fn writer_errors_surface_to_the_caller() {
    let sink = Arc::new(TestSink::new());
    let mut writer = LineWriter::new(sink.clone());
    MetricWriter::<ExactHistogram>::start_bucket(&mut writer, 0, UNIX_EPOCH, Duration::ZERO);
    let_assert!(Err(err) = MetricWriter::<ExactHistogram>::finish_bucket(&mut writer));
    check!(err.to_string() == "empty bucket");
    check!(sink.payloads().is_empty());
}
