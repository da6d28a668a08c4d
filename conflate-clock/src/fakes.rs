// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use std::{
    sync::{Arc, Mutex},
    time::{Duration, Instant, SystemTime},
};

use crate::Time;

#[derive(Debug)]
struct Readings {
    wall: SystemTime,
    instant: Instant,
}

/// Clock that only moves when told to.
///
/// Clones share the same readings, so a test can keep one handle and hand another to the code under
/// test. The wall clock and the monotonic clock can be moved independently, which is how tests
/// simulate NTP corrections or a stalled thread.
#[derive(Debug, Clone)]
pub struct ManualClock(Arc<Mutex<Readings>>);

impl ManualClock {
    /// Create a clock whose wall time starts at `time`.
    ///
    /// ```
    /// use conflate_clock::{Clock, fakes::ManualClock};
    /// use std::time::UNIX_EPOCH;
    ///
    /// let clock = Clock::custom(ManualClock::at_time(UNIX_EPOCH));
    /// assert_eq!(clock.wall_time(), UNIX_EPOCH);
    /// ```
    pub fn at_time(time: impl Into<SystemTime>) -> Self {
        Self(Arc::new(Mutex::new(Readings {
            wall: time.into(),
            instant: Instant::now(),
        })))
    }

    /// Move both clocks forward by `elapsed`.
    pub fn advance(&self, elapsed: Duration) {
        let mut readings = self.0.lock().unwrap();
        readings.wall += elapsed;
        readings.instant += elapsed;
    }

    /// Move only the monotonic clock forward, as if the wall clock had been stepped back by the
    /// same amount while time passed.
    pub fn advance_monotonic(&self, elapsed: Duration) {
        self.0.lock().unwrap().instant += elapsed;
    }

    /// Jump the wall clock to `time` without touching the monotonic clock.
    ///
    /// ```
    /// use conflate_clock::{Clock, fakes::ManualClock};
    /// use std::time::{Duration, UNIX_EPOCH};
    ///
    /// let manual = ManualClock::at_time(UNIX_EPOCH);
    /// let clock = Clock::custom(manual.clone());
    /// let start = clock.instant();
    ///
    /// manual.set_wall_time(UNIX_EPOCH + Duration::from_secs(3600));
    /// assert_eq!(clock.elapsed_since(start), Duration::ZERO);
    /// ```
    pub fn set_wall_time(&self, time: impl Into<SystemTime>) {
        self.0.lock().unwrap().wall = time.into();
    }
}

impl Time for ManualClock {
    fn now(&self) -> SystemTime {
        self.0.lock().unwrap().wall
    }

    fn instant(&self) -> Instant {
        self.0.lock().unwrap().instant
    }
}
