// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Transport collaborator and the events it reports back

use std::{fmt, sync::Arc};

/// Outcome of one attempt to deliver a payload to the collector
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SinkEvent {
    /// The payload was accepted
    Ok,
    /// The collector rejected the payload as malformed
    BadPayload,
    /// The collector does not support the stats endpoint
    Downgraded,
    /// The transport failed
    Error,
}

impl fmt::Display for SinkEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Ok => "ok",
            Self::BadPayload => "bad payload",
            Self::Downgraded => "downgraded",
            Self::Error => "error",
        })
    }
}

/// Observes the outcome of every transport attempt
pub trait EventListener: Send + Sync {
    /// Called once per transport attempt
    fn on_event(&self, event: SinkEvent, message: &str);
}

/// Delivers serialized buckets to the collector.
///
/// Retries, buffering and backoff are the sink's own business. The engine only registers a
/// listener so it can react to [`SinkEvent::Downgraded`].
pub trait Sink: Send + Sync {
    /// Subscribe to transport outcomes
    fn register(&self, listener: Arc<dyn EventListener>);

    /// Send a payload holding `message_count` messages
    fn accept(&self, message_count: usize, payload: &[u8]);
}
