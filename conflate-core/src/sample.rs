// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Single-word encoding of a completed operation.
//!
//! A sample is stored in a batch slot as one `u64` so it can be published with a single atomic
//! store. The top two bits carry flags and the remaining 62 bits carry the duration:
//!
//! ```text
//!  63        62          61 ..................................... 0
//! [error] [top-level] [            duration in nanoseconds         ]
//! ```
//!
//! Durations that do not fit in 62 bits (about 146 years) saturate to [`MAX_DURATION_NANOS`].

use std::time::Duration;

/// Flag bit set when the operation ended in error
pub const ERROR_FLAG: u64 = 1 << 63;
/// Flag bit set when the operation is the root of its service's trace segment
pub const TOP_LEVEL_FLAG: u64 = 1 << 62;
/// Largest duration that can be encoded without touching the flag bits
pub const MAX_DURATION_NANOS: u64 = TOP_LEVEL_FLAG - 1;

/// One completed operation as seen by the conflation engine
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Sample {
    /// Duration in nanoseconds
    pub duration_nanos: u64,
    /// The operation ended in error
    pub is_error: bool,
    /// The operation was a top-level span
    pub is_top_level: bool,
}

impl Sample {
    /// A successful sample
    pub fn ok(duration: Duration) -> Self {
        Self {
            duration_nanos: saturating_nanos(duration),
            is_error: false,
            is_top_level: false,
        }
    }

    /// A failed sample
    pub fn error(duration: Duration) -> Self {
        Self {
            is_error: true,
            ..Self::ok(duration)
        }
    }

    /// Mark this sample as top-level
    pub fn top_level(self) -> Self {
        Self {
            is_top_level: true,
            ..self
        }
    }

    /// Pack the sample into a slot word.
    pub fn encode(self) -> u64 {
        let mut word = self.duration_nanos.min(MAX_DURATION_NANOS);
        if self.is_error {
            word |= ERROR_FLAG;
        }
        if self.is_top_level {
            word |= TOP_LEVEL_FLAG;
        }
        word
    }

    /// Unpack a slot word written by [`Sample::encode`].
    pub fn decode(word: u64) -> Self {
        Self {
            duration_nanos: word & MAX_DURATION_NANOS,
            is_error: word & ERROR_FLAG != 0,
            is_top_level: word & TOP_LEVEL_FLAG != 0,
        }
    }
}

fn saturating_nanos(duration: Duration) -> u64 {
    u64::try_from(duration.as_nanos())
        .unwrap_or(u64::MAX)
        .min(MAX_DURATION_NANOS)
}
