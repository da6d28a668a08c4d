// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use std::sync::{
    Arc,
    atomic::{self, AtomicBool, Ordering},
};

use conflate_core::{Batch, EventListener, SinkEvent};
use crossbeam_queue::ArrayQueue;
use crossbeam_utils::sync::Unparker;
use tokio::sync::oneshot;

use crate::{health::HealthMetrics, pending::BatchRegistry};

/// Work handed to the aggregation thread
pub(crate) enum InboxItem {
    Batch(Arc<Batch>),
    /// Report now; the sender, if any, learns whether the report ran
    Report(Option<oneshot::Sender<bool>>),
    /// Final report, then exit
    Stop,
}

/// State shared between producers, the aggregation thread and the sink's event thread
pub(crate) struct Shared {
    pub(crate) inbox: ArrayQueue<InboxItem>,
    pub(crate) batches: BatchRegistry,
    pub(crate) health: Arc<dyn HealthMetrics>,
    // wakes the aggregation thread out of its idle wait
    pub(crate) unparker: Unparker,
    disabled: AtomicBool,
    shutting_down: AtomicBool,
    running: AtomicBool,
}

impl Shared {
    pub(crate) fn new(capacity: usize, health: Arc<dyn HealthMetrics>, unparker: Unparker) -> Self {
        Self {
            inbox: ArrayQueue::new(capacity),
            batches: BatchRegistry::new(capacity),
            health,
            unparker,
            disabled: AtomicBool::new(false),
            shutting_down: AtomicBool::new(false),
            running: AtomicBool::new(false),
        }
    }

    pub(crate) fn is_disabled(&self) -> bool {
        self.disabled.load(Ordering::Acquire)
    }

    pub(crate) fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Acquire)
    }

    pub(crate) fn begin_shutdown(&self) {
        self.shutting_down.store(true, Ordering::Release);
        self.unparker.unpark();
    }

    pub(crate) fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub(crate) fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::SeqCst);
    }

    /// Whether a report request queued just now can still be served. Paired with the fence in
    /// `fail_pending_reports`: either this sees the aggregation thread gone, or that
    /// drain sees the request.
    pub(crate) fn can_serve_reports(&self) -> bool {
        atomic::fence(Ordering::SeqCst);
        !self.is_disabled() && self.is_running()
    }

    /// Answer `false` to every queued report request. Only valid once nothing consumes the inbox.
    pub(crate) fn fail_pending_reports(&self) {
        atomic::fence(Ordering::SeqCst);
        while let Some(item) = self.inbox.pop() {
            if let InboxItem::Report(Some(done)) = item {
                let _ = done.send(false);
            }
        }
    }

    /// Enter degraded mode for the rest of the process lifetime.
    ///
    /// The aggregation thread notices the flag, drops its aggregates and exits without reporting.
    pub(crate) fn disable(&self) {
        if self.disabled.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::debug!("disabling span stats computation because the collector was downgraded");
        self.unparker.unpark();
        self.fail_pending_reports();
        self.batches.clear();
    }
}

impl EventListener for Shared {
    fn on_event(&self, event: SinkEvent, message: &str) {
        self.health.on_payload_sent();
        match event {
            SinkEvent::Downgraded => {
                tracing::debug!("collector downgrade was detected");
                self.disable();
                self.health.on_downgraded();
            }
            SinkEvent::BadPayload => {
                tracing::debug!(detail = message, "bad stats payload sent to the collector");
                self.health.on_error_received();
            }
            SinkEvent::Error => {
                tracing::debug!(detail = message, "collector errored receiving stats payload");
                self.health.on_error_received();
            }
            SinkEvent::Ok => {}
        }
    }
}
