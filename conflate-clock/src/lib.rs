// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

#![deny(missing_docs)]

//! Time sources for the conflate metrics engine.
//!
//! The aggregation loop needs two clocks: a monotonic one to decide when a reporting window has
//! elapsed, and a wall clock to stamp the very first bucket. Both are read through a [`Clock`] so
//! tests can drive them by hand.

use std::{
    fmt::Debug,
    sync::Arc,
    time::{Duration, Instant, SystemTime},
};

/// Module containing fake clocks for testing
///
/// To enable this module, you must enable the `test-util` feature.
#[cfg(feature = "test-util")]
pub mod fakes;

/// Trait for providing custom time sources
pub trait Time: Send + Sync + Debug {
    /// Get the current wall-clock time
    fn now(&self) -> SystemTime;

    /// Get the current monotonic instant
    fn instant(&self) -> Instant;
}

/// Wall-clock and monotonic time, either from the operating system or from a custom [`Time`].
#[derive(Clone, Default)]
pub enum Clock {
    /// Use [`SystemTime::now`] and [`Instant::now`]
    #[default]
    System,
    /// Use a custom time source
    Custom(Arc<dyn Time>),
}

impl Debug for Clock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::System => write!(f, "Clock::System"),
            Self::Custom(_) => write!(f, "Clock::Custom(...)"),
        }
    }
}

impl Clock {
    /// Create a clock backed by a custom time source
    ///
    /// ```
    /// use conflate_clock::{Clock, fakes::ManualClock};
    /// use std::time::UNIX_EPOCH;
    ///
    /// let clock = Clock::custom(ManualClock::at_time(UNIX_EPOCH));
    /// assert_eq!(clock.wall_time(), UNIX_EPOCH);
    /// ```
    pub fn custom(time: impl Time + 'static) -> Self {
        Self::Custom(Arc::new(time))
    }

    /// Current wall-clock time
    pub fn wall_time(&self) -> SystemTime {
        match self {
            Self::System => SystemTime::now(),
            Self::Custom(time) => time.now(),
        }
    }

    /// Current monotonic instant
    pub fn instant(&self) -> Instant {
        match self {
            Self::System => Instant::now(),
            Self::Custom(time) => time.instant(),
        }
    }

    /// Monotonic time elapsed since `start`, saturating at zero.
    pub fn elapsed_since(&self, start: Instant) -> Duration {
        self.instant().saturating_duration_since(start)
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, UNIX_EPOCH};

    use assert2::check;

    use crate::{Clock, fakes::ManualClock};

    #[test]
    fn system_clock_moves_forward() {
        let clock = Clock::System;
        let start = clock.instant();
        check!(clock.elapsed_since(start) < Duration::from_secs(60));
        check!(clock.wall_time() > UNIX_EPOCH);
    }

    #[test]
    fn custom_clock_is_shared_between_clones() {
        let manual = ManualClock::at_time(UNIX_EPOCH);
        let clock = Clock::custom(manual.clone());
        let other = clock.clone();
        let start = clock.instant();

        manual.advance(Duration::from_secs(3));

        check!(other.elapsed_since(start) == Duration::from_secs(3));
        check!(other.wall_time() == UNIX_EPOCH + Duration::from_secs(3));
    }

    #[test]
    fn elapsed_saturates_for_future_instants() {
        let manual = ManualClock::at_time(UNIX_EPOCH);
        let clock = Clock::custom(manual.clone());
        let future = clock.instant() + Duration::from_secs(1);
        check!(clock.elapsed_since(future) == Duration::ZERO);
    }
}
