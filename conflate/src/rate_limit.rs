// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use std::{
    sync::OnceLock,
    time::{Duration, Instant},
};

// only pub(crate) so that the macro calls can all use the same epoch static
#[doc(hidden)]
pub(crate) fn time_since_arbitrary_epoch() -> Duration {
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    Instant::now().duration_since(*EPOCH.get_or_init(Instant::now))
}

/// `rate_limited!(interval, |suppressed| expr)` evaluates `expr` at most once every `interval` across all threads,
/// binding `suppressed` to the number of calls skipped since the last evaluation.
///
/// Producers hit the drop paths at the application's request rate, so an unthrottled log line there would flood the
/// application logs. The suppressed count keeps the volume of the dropped data visible.
///
/// Rate limiting applies per macro call site.
macro_rules! rate_limited {
    ($interval:expr, |$suppressed:ident| $call:expr) => {{
        use std::sync::atomic::{AtomicU64, Ordering};
        static NEXT_CALL: AtomicU64 = AtomicU64::new(u64::MIN);
        static SUPPRESSED: AtomicU64 = AtomicU64::new(0);
        let interval: std::time::Duration = $interval;
        assert!(
            interval >= std::time::Duration::from_secs(1),
            "only second-level granularity supported for rate limiting"
        );

        let time = $crate::rate_limit::time_since_arbitrary_epoch();
        let next = NEXT_CALL.load(Ordering::Relaxed);
        let due = next <= time.as_secs() && {
            let new_next = time
                .checked_add(interval)
                .unwrap_or(std::time::Duration::MAX)
                .as_secs();
            NEXT_CALL
                .compare_exchange(next, new_next, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
        };
        if due {
            let $suppressed = SUPPRESSED.swap(0, Ordering::Relaxed);
            $call;
        } else {
            SUPPRESSED.fetch_add(1, Ordering::Relaxed);
        }
    }};
}
pub(crate) use rate_limited;
