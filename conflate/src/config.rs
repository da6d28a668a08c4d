// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Configuration loaded from data, e.g. a tracer configuration file

use std::{fmt, time::Duration};

use serde::Deserialize;

/// Unit of [`ConflationConfig::reporting_interval`]
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TimeUnit {
    /// Nanoseconds
    Nanoseconds,
    /// Microseconds
    Microseconds,
    /// Milliseconds
    Milliseconds,
    /// Seconds
    Seconds,
    /// Minutes
    Minutes,
}

impl TimeUnit {
    /// `value` of this unit as a [`Duration`], saturating on overflow
    pub fn duration(self, value: u64) -> Duration {
        match self {
            Self::Nanoseconds => Duration::from_nanos(value),
            Self::Microseconds => Duration::from_micros(value),
            Self::Milliseconds => Duration::from_millis(value),
            Self::Seconds => Duration::from_secs(value),
            Self::Minutes => Duration::from_secs(value.saturating_mul(60)),
        }
    }
}

/// Engine settings.
///
/// Every field has a default, so an empty document is a valid configuration:
///
/// ```
/// use conflate::config::{ConflationConfig, TimeUnit};
/// use std::time::Duration;
///
/// let config: ConflationConfig = serde_json::from_str(r#"{
///     "max_pending": 512,
///     "reporting_interval": 500,
///     "reporting_interval_unit": "milliseconds"
/// }"#).unwrap();
/// assert_eq!(config.max_pending, 512);
/// assert_eq!(config.max_aggregates, 2048);
/// assert_eq!(config.reporting_interval(), Duration::from_millis(500));
/// ```
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct ConflationConfig {
    /// Capacity of the queue feeding the aggregation thread, and of the batch pool
    pub max_pending: usize,
    /// Maximum number of distinct keys held between reports; least recently used keys are evicted
    pub max_aggregates: usize,
    /// Time between reports, in `reporting_interval_unit`
    pub reporting_interval: u64,
    /// Unit of `reporting_interval`
    pub reporting_interval_unit: TimeUnit,
}

impl Default for ConflationConfig {
    fn default() -> Self {
        Self {
            max_pending: 2048,
            max_aggregates: 2048,
            reporting_interval: 10,
            reporting_interval_unit: TimeUnit::Seconds,
        }
    }
}

impl ConflationConfig {
    /// Time between reports
    pub fn reporting_interval(&self) -> Duration {
        self.reporting_interval_unit.duration(self.reporting_interval)
    }

    /// Check that every setting is usable
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_pending == 0 {
            return Err(ConfigError::ZeroCapacity("max_pending"));
        }
        if self.max_aggregates == 0 {
            return Err(ConfigError::ZeroCapacity("max_aggregates"));
        }
        if self.reporting_interval().is_zero() {
            return Err(ConfigError::ZeroReportingInterval);
        }
        Ok(())
    }
}

/// A [`ConflationConfig`] that cannot be used
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A capacity setting was zero
    ZeroCapacity(&'static str),
    /// The reporting interval was zero
    ZeroReportingInterval,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ZeroCapacity(field) => write!(f, "{field} must be greater than zero"),
            Self::ZeroReportingInterval => f.write_str("reporting_interval must be greater than zero"),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use assert2::check;
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(TimeUnit::Nanoseconds, Duration::from_nanos(7))]
    #[case(TimeUnit::Microseconds, Duration::from_micros(7))]
    #[case(TimeUnit::Milliseconds, Duration::from_millis(7))]
    #[case(TimeUnit::Seconds, Duration::from_secs(7))]
    #[case(TimeUnit::Minutes, Duration::from_secs(420))]
    fn units_convert(#[case] unit: TimeUnit, #[case] expected: Duration) {
        check!(unit.duration(7) == expected);
    }

    #[test]
    fn empty_document_is_default() {
        let config: ConflationConfig = serde_json::from_str("{}").unwrap();
        check!(config == ConflationConfig::default());
        check!(config.reporting_interval() == Duration::from_secs(10));
        check!(config.validate().is_ok());
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let parsed = serde_json::from_str::<ConflationConfig>(r#"{"max_pendng": 1}"#);
        check!(parsed.is_err());
    }

    #[rstest]
    #[case(r#"{"max_pending": 0}"#, ConfigError::ZeroCapacity("max_pending"))]
    #[case(r#"{"max_aggregates": 0}"#, ConfigError::ZeroCapacity("max_aggregates"))]
    #[case(r#"{"reporting_interval": 0}"#, ConfigError::ZeroReportingInterval)]
    fn unusable_settings_are_reported(#[case] document: &str, #[case] expected: ConfigError) {
        let config: ConflationConfig = serde_json::from_str(document).unwrap();
        check!(config.validate() == Err(expected));
    }
}
