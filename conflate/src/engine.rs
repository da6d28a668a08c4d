// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use std::{
    borrow::Cow,
    io,
    sync::{Arc, Mutex, PoisonError},
    thread,
    time::Duration,
};

use conflate_clock::Clock;
use conflate_core::{
    AggregationKey, EventListener, ExponentialHistogram, LatencyHistogram, MetricWriter, Sample,
    Sink, SinkEvent, sample::MAX_DURATION_NANOS,
};
use crossbeam_utils::sync::Parker;
use tokio::sync::oneshot;

use crate::{
    aggregator::{Aggregator, AggregatorSettings},
    config::{ConfigError, ConflationConfig},
    health::{HealthMetrics, NoopHealthMetrics},
    rate_limit::rate_limited,
    shared::{InboxItem, Shared},
};

const REPORT_ATTEMPTS: usize = 10;
const FORCE_REPORT_RETRY: Duration = Duration::from_millis(10);

/// Builder for [`ConflationEngine`]
pub struct ConflationEngineBuilder {
    max_pending: usize,
    max_aggregates: usize,
    reporting_interval: Duration,
    poll_interval: Duration,
    thread_name: String,
    clock: Clock,
    health: Arc<dyn HealthMetrics>,
    sink: Option<Arc<dyn Sink>>,
}

impl Default for ConflationEngineBuilder {
    fn default() -> Self {
        let config = ConflationConfig::default();
        Self {
            max_pending: config.max_pending,
            max_aggregates: config.max_aggregates,
            reporting_interval: config.reporting_interval(),
            poll_interval: Duration::from_millis(100),
            thread_name: "span-stats-aggregator".into(),
            clock: Clock::System,
            health: Arc::new(NoopHealthMetrics),
            sink: None,
        }
    }
}

impl ConflationEngineBuilder {
    /// Builder with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from a [`ConflationConfig`], rejecting unusable settings.
    pub fn from_config(config: &ConflationConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::new()
            .max_pending(config.max_pending)
            .max_aggregates(config.max_aggregates)
            .reporting_interval(config.reporting_interval()))
    }

    /// Sets the capacity of the queue feeding the aggregation thread, and of the batch pool.
    ///
    /// Defaults to 2048. When the queue is full, samples that need a new batch are dropped.
    pub fn max_pending(mut self, max_pending: usize) -> Self {
        assert!(max_pending > 0);
        self.max_pending = max_pending;
        self
    }

    /// Sets the maximum number of distinct keys aggregated between two reports.
    ///
    /// Defaults to 2048. Beyond it, the least recently updated key is evicted and its data lost.
    pub fn max_aggregates(mut self, max_aggregates: usize) -> Self {
        assert!(max_aggregates > 0);
        self.max_aggregates = max_aggregates;
        self
    }

    /// Sets the length of a reporting window. Defaults to 10 seconds.
    pub fn reporting_interval(mut self, reporting_interval: Duration) -> Self {
        assert!(
            reporting_interval > Duration::ZERO,
            "reporting_interval must not be zero"
        );
        self.reporting_interval = reporting_interval;
        self
    }

    /// Sets how long the aggregation thread sleeps on an empty queue before checking whether a
    /// report is due. Defaults to 100 milliseconds.
    pub fn poll_interval(mut self, poll_interval: Duration) -> Self {
        assert!(
            poll_interval > Duration::ZERO,
            "poll_interval must not be zero"
        );
        self.poll_interval = poll_interval;
        self
    }

    /// Thread name assigned to the aggregation thread, also used in its tracing span.
    pub fn thread_name(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        assert!(!name.is_empty());
        self.thread_name = name;
        self
    }

    /// Time source for bucket timestamps and reporting deadlines
    pub fn clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Receiver for the engine's own health signals
    pub fn health_metrics(mut self, health: Arc<dyn HealthMetrics>) -> Self {
        self.health = health;
        self
    }

    /// Sink whose events the engine subscribes to on [`ConflationEngine::start`]
    pub fn sink(mut self, sink: Arc<dyn Sink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Build an engine that hands its buckets to `writer`. Nothing runs until
    /// [`ConflationEngine::start`].
    pub fn build<H>(self, writer: impl MetricWriter<H> + Send + 'static) -> ConflationEngine<H>
    where
        H: LatencyHistogram + Default + 'static,
    {
        let parker = Parker::new();
        let shared = Arc::new(Shared::new(
            self.max_pending,
            self.health,
            parker.unparker().clone(),
        ));
        let aggregator = Aggregator::new(
            AggregatorSettings {
                name: self.thread_name.clone(),
                max_aggregates: self.max_aggregates,
                reporting_interval: self.reporting_interval,
                poll_interval: self.poll_interval,
                clock: self.clock,
            },
            Box::new(writer),
            Arc::clone(&shared),
            parker,
        );
        ConflationEngine {
            shared,
            worker: Mutex::new(Worker::Idle(aggregator)),
            sink: self.sink,
            thread_name: self.thread_name,
        }
    }
}

enum Worker<H> {
    Idle(Aggregator<H>),
    Running(thread::JoinHandle<()>),
    Stopped,
}

/// Conflates span completion samples into periodic stats buckets.
///
/// Producers call [`ConflationEngine::publish`] from any thread; it never blocks and never fails.
/// Samples for the same key are appended to a shared [`Batch`](conflate_core::Batch) while one is
/// live, so the common case costs one map lookup and one atomic increment. A dedicated thread
/// merges batches into per-key aggregates and hands a bucket to the [`MetricWriter`] every
/// reporting interval.
///
/// Loss is accepted over blocking: a sample needing a new batch while the queue is full is
/// dropped, and keys beyond `max_aggregates` are evicted. Both are counted through
/// [`HealthMetrics`].
///
/// ```
/// use conflate::ConflationEngineBuilder;
/// use conflate_core::{AggregationKey, ExactHistogram, Sample, test_util::RecordingWriter};
/// use std::time::Duration;
///
/// let writer = RecordingWriter::<ExactHistogram>::new();
/// let engine = ConflationEngineBuilder::new().build(writer.clone());
/// engine.start().unwrap();
///
/// let key = AggregationKey::new("GET /users", "web", "http.request", "web", 200);
/// engine.publish(key.clone(), Sample::ok(Duration::from_millis(10)));
/// assert!(engine.force_report().wait());
///
/// let buckets = writer.buckets();
/// assert_eq!(buckets[0].entry(&key).unwrap().hit_count(), 1);
/// engine.stop();
/// ```
pub struct ConflationEngine<H = ExponentialHistogram> {
    shared: Arc<Shared>,
    worker: Mutex<Worker<H>>,
    sink: Option<Arc<dyn Sink>>,
    thread_name: String,
}

impl<H: LatencyHistogram + Default + 'static> ConflationEngine<H> {
    /// Spawn the aggregation thread and subscribe to sink events. Calling it again, or after
    /// [`ConflationEngine::stop`], does nothing.
    pub fn start(&self) -> io::Result<()> {
        let mut worker = self.worker.lock().unwrap_or_else(PoisonError::into_inner);
        let aggregator = match std::mem::replace(&mut *worker, Worker::Stopped) {
            Worker::Idle(aggregator) => aggregator,
            other => {
                *worker = other;
                return Ok(());
            }
        };

        self.shared.set_running(true);
        let handle = thread::Builder::new()
            .name(self.thread_name.clone())
            .spawn(move || aggregator.run());
        let handle = match handle {
            Ok(handle) => handle,
            Err(err) => {
                self.shared.set_running(false);
                return Err(err);
            }
        };
        *worker = Worker::Running(handle);

        if let Some(sink) = &self.sink {
            sink.register(self.event_listener());
        }
        tracing::debug!(thread = %self.thread_name, "started span stats engine");
        Ok(())
    }
}

impl<H> ConflationEngine<H> {
    /// Record one completed operation under `key`.
    pub fn publish(&self, key: AggregationKey, sample: Sample) {
        let shared = &*self.shared;
        if shared.is_disabled() {
            return;
        }
        // fast path: a live batch for this key has room
        if shared.batches.append_pending(&key, sample) {
            return;
        }

        // Nobody else can see this batch yet, so the append cannot fail. It has to be advertised
        // before it is queued, or the consumer could retract it before it was ever advertised.
        let batch = shared.batches.acquire(key);
        let appended = batch.try_append(sample);
        debug_assert!(appended, "exclusive append to a fresh batch failed");
        shared.batches.advertise(&batch);

        if let Err(InboxItem::Batch(batch)) = shared.inbox.push(InboxItem::Batch(batch)) {
            // Other producers may have appended through the advertisement before the retract.
            // Sealing turns their later appends away and counts what they got in.
            shared.batches.retract(&batch);
            let dropped = batch.seal();
            shared.batches.recycle(batch);
            shared.health.on_publish_dropped(dropped);
            rate_limited!(Duration::from_secs(1), |suppressed| tracing::warn!(
                suppressed,
                "span stats queue is full, stats will be missing"
            ));
            return;
        }
        shared.unparker.unpark();
    }

    /// Record one completed operation from its raw parts.
    ///
    /// Equivalent to building an [`AggregationKey`] and a [`Sample`] and calling
    /// [`ConflationEngine::publish`]. Durations above [`MAX_DURATION_NANOS`] saturate.
    #[allow(clippy::too_many_arguments)]
    pub fn publish_span(
        &self,
        resource: impl Into<Cow<'static, str>>,
        service: impl Into<Cow<'static, str>>,
        operation: impl Into<Cow<'static, str>>,
        span_type: impl Into<Cow<'static, str>>,
        http_status_code: u16,
        is_error: bool,
        is_top_level: bool,
        duration_nanos: u64,
    ) {
        let key = AggregationKey::new(resource, service, operation, span_type, http_status_code);
        let sample = Sample {
            duration_nanos: duration_nanos.min(MAX_DURATION_NANOS),
            is_error,
            is_top_level,
        };
        self.publish(key, sample);
    }

    /// Ask for a report without waiting for it. Returns `false` if the request could not be
    /// queued.
    pub fn report(&self) -> bool {
        if self.shared.is_disabled() {
            return false;
        }
        for _ in 0..REPORT_ATTEMPTS {
            if self.shared.inbox.push(InboxItem::Report(None)).is_ok() {
                self.shared.unparker.unpark();
                return true;
            }
        }
        tracing::debug!("skipped span stats reporting because the queue is full");
        false
    }

    /// Ask for a report and get a handle resolving once it has been written.
    ///
    /// Waits for queue space while the engine is running. Resolves to `false` when the engine is
    /// disabled, not running, or stops before reaching the request.
    pub fn force_report(&self) -> ReportWait {
        if self.shared.is_disabled() || !self.shared.is_running() {
            return ReportWait::ready(false);
        }
        let (done, wait) = oneshot::channel();
        let mut request = InboxItem::Report(Some(done));
        loop {
            match self.shared.inbox.push(request) {
                Ok(()) => {
                    if !self.shared.can_serve_reports() {
                        // the aggregation thread is gone and may have drained before the push
                        self.shared.fail_pending_reports();
                    }
                    self.shared.unparker.unpark();
                    return ReportWait::pending(wait);
                }
                Err(rejected) => {
                    if self.shared.is_disabled() || !self.shared.is_running() {
                        return ReportWait::ready(false);
                    }
                    request = rejected;
                    thread::sleep(FORCE_REPORT_RETRY);
                }
            }
        }
    }

    /// Queue the terminal marker and wait for the aggregation thread's final report.
    pub fn stop(&self) {
        let mut worker = self.worker.lock().unwrap_or_else(PoisonError::into_inner);
        let Worker::Running(handle) = std::mem::replace(&mut *worker, Worker::Stopped) else {
            return;
        };

        self.shared.begin_shutdown();
        if self.shared.inbox.push(InboxItem::Stop).is_err() {
            tracing::debug!("span stats queue is full, stopping once it is drained");
        }
        self.shared.unparker.unpark();

        tracing::info!("awaiting span stats aggregator shutdown");
        if handle.join().is_err() {
            tracing::error!("span stats aggregator panicked");
        }
        tracing::info!("span stats aggregator shut down");
    }

    /// Listener that reacts to sink events. Registered automatically with the builder's sink.
    pub fn event_listener(&self) -> Arc<dyn EventListener> {
        self.shared.clone()
    }

    /// False once the collector signalled a downgrade. There is no way back.
    pub fn is_enabled(&self) -> bool {
        !self.shared.is_disabled()
    }

    /// True while the aggregation thread is alive
    pub fn is_running(&self) -> bool {
        self.shared.is_running()
    }

    /// Items waiting for the aggregation thread
    pub fn queue_len(&self) -> usize {
        self.shared.inbox.len()
    }

    /// Keys that currently have a live batch
    pub fn pending_batches(&self) -> usize {
        self.shared.batches.pending_len()
    }
}

impl<H: Send> EventListener for ConflationEngine<H> {
    fn on_event(&self, event: SinkEvent, message: &str) {
        self.shared.on_event(event, message);
    }
}

impl<H> Drop for ConflationEngine<H> {
    fn drop(&mut self) {
        self.stop();
    }
}

enum ReportState {
    Ready(bool),
    Pending(oneshot::Receiver<bool>),
}

/// Completion of a [`ConflationEngine::force_report`] request
pub struct ReportWait(ReportState);

impl ReportWait {
    fn ready(reported: bool) -> Self {
        Self(ReportState::Ready(reported))
    }

    fn pending(receiver: oneshot::Receiver<bool>) -> Self {
        Self(ReportState::Pending(receiver))
    }

    /// Block until the report ran. Must not be called from within an async runtime; use
    /// [`ReportWait::wait_async`] there.
    pub fn wait(self) -> bool {
        match self.0 {
            ReportState::Ready(reported) => reported,
            ReportState::Pending(receiver) => receiver.blocking_recv().unwrap_or(false),
        }
    }

    /// Wait for the report without blocking the thread
    pub async fn wait_async(self) -> bool {
        match self.0 {
            ReportState::Ready(reported) => reported,
            ReportState::Pending(receiver) => receiver.await.unwrap_or(false),
        }
    }
}
