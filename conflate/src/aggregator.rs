// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The single consumer: drains batches into aggregates and writes a bucket per reporting window.

use std::{
    sync::Arc,
    time::{Duration, Instant, SystemTime},
};

use conflate_clock::Clock;
use conflate_core::{Batch, LatencyHistogram, MetricWriter};
use crossbeam_utils::sync::Parker;

use crate::{
    aggregates::Aggregates,
    rate_limit::rate_limited,
    shared::{InboxItem, Shared},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    Exit,
}

struct ExitGuard(Arc<Shared>);

impl Drop for ExitGuard {
    fn drop(&mut self) {
        self.0.set_running(false);
        self.0.fail_pending_reports();
        if std::thread::panicking() {
            tracing::error!("span stats aggregator panicked, stats are no longer reported");
        }
    }
}

pub(crate) struct AggregatorSettings {
    pub(crate) name: String,
    pub(crate) max_aggregates: usize,
    pub(crate) reporting_interval: Duration,
    pub(crate) poll_interval: Duration,
    pub(crate) clock: Clock,
}

pub(crate) struct Aggregator<H> {
    name: String,
    writer: Box<dyn MetricWriter<H> + Send>,
    shared: Arc<Shared>,
    aggregates: Aggregates<H>,
    clock: Clock,
    reporting_interval: Duration,
    poll_interval: Duration,
    parker: Parker,
    // a batch was merged since the last report
    dirty: bool,
    // Wall-clock start of the next bucket. Advanced by monotonic elapsed time, never resampled,
    // so consecutive buckets tile without gaps or overlaps.
    bucket_start: SystemTime,
    window_start: Instant,
}

impl<H: LatencyHistogram + Default> Aggregator<H> {
    pub(crate) fn new(
        settings: AggregatorSettings,
        writer: Box<dyn MetricWriter<H> + Send>,
        shared: Arc<Shared>,
        parker: Parker,
    ) -> Self {
        let bucket_start = settings.clock.wall_time();
        let window_start = settings.clock.instant();
        Self {
            name: settings.name,
            writer,
            shared,
            aggregates: Aggregates::new(settings.max_aggregates),
            clock: settings.clock,
            reporting_interval: settings.reporting_interval,
            poll_interval: settings.poll_interval,
            parker,
            dirty: false,
            bucket_start,
            window_start,
        }
    }

    pub(crate) fn run(mut self) {
        let span = tracing::span!(tracing::Level::TRACE, "span stats aggregator", engine = %self.name);
        let _enter = span.enter();

        // runs on unwind too, so a panicking writer cannot strand report requests
        let _exit = ExitGuard(Arc::clone(&self.shared));

        self.bucket_start = self.clock.wall_time();
        self.window_start = self.clock.instant();
        tracing::debug!("started span stats aggregator");

        while self.poll() == Flow::Continue {}

        tracing::debug!("span stats aggregator exited");
    }

    fn poll(&mut self) -> Flow {
        if self.shared.is_disabled() {
            self.aggregates.clear();
            return Flow::Exit;
        }

        match self.shared.inbox.pop() {
            Some(InboxItem::Batch(batch)) => self.merge(batch),
            Some(InboxItem::Report(done)) => {
                self.report();
                if let Some(done) = done {
                    let _ = done.send(true);
                }
            }
            Some(InboxItem::Stop) => {
                self.report();
                return Flow::Exit;
            }
            None => {
                if self.shared.is_shutting_down() {
                    self.report();
                    return Flow::Exit;
                }
                self.parker.park_timeout(self.poll_interval);
            }
        }

        if self.clock.elapsed_since(self.window_start) >= self.reporting_interval {
            self.report();
        }
        Flow::Continue
    }

    fn merge(&mut self, batch: Arc<Batch>) {
        // producers stop finding it from here on, unless it was already replaced
        self.shared.batches.retract(&batch);
        let merged = self.aggregates.merge(&batch);
        if merged.evicted {
            self.shared.health.on_aggregate_evicted();
        }
        self.dirty = true;
        self.shared.batches.recycle(batch);
    }

    fn report(&mut self) {
        let now = self.clock.instant();
        let elapsed = now.saturating_duration_since(self.window_start);
        let start = self.bucket_start;
        self.bucket_start = start.checked_add(elapsed).unwrap_or(start);
        self.window_start = now;

        if !std::mem::take(&mut self.dirty) {
            tracing::trace!("skipped span stats reporting because no points have changed");
            return;
        }
        self.aggregates.expunge_stale();
        if self.aggregates.is_empty() {
            return;
        }

        let metric_count = self.aggregates.len();
        self.writer.start_bucket(metric_count, start, elapsed);
        for (key, metric) in self.aggregates.iter_mut() {
            self.writer.add(key, metric);
            metric.clear();
        }
        // may block on IO
        match self.writer.finish_bucket() {
            Ok(()) => {
                self.shared.health.on_bucket_reported(metric_count);
                tracing::debug!(
                    metric_count,
                    evictions = self.aggregates.evictions(),
                    "reported span stats bucket"
                );
            }
            Err(err) => {
                self.shared.health.on_bucket_write_failed();
                rate_limited!(Duration::from_secs(1), |suppressed| tracing::warn!(
                    ?err,
                    suppressed,
                    "couldn't finish span stats bucket"
                ));
            }
        }
    }
}
