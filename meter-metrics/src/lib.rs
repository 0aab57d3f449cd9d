//! Metric protocol of the meter pipeline.
//!
//! A metric is identified by its name and [`MetricType`]. Counters carry an integer delta that is
//! summed on the collector, gauges carry a float that replaces the previous value.
//!
//! On the wire, metrics travel as [`MetricExchange`] objects:
//!
//! ```json
//! {"id": "PollCount", "type": "counter", "delta": 5}
//! {"id": "Alloc", "type": "gauge", "value": 11.23}
//! ```
//!
//! Inside the collector they are converted into validated [`Record`]s, keyed by [`RecordId`].
#![warn(missing_docs)]

mod exchange;
mod record;
mod value;

pub use crate::exchange::*;
pub use crate::record::*;
pub use crate::value::*;

/// Reasons a metric is rejected.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// The metric name is empty.
    #[error("metric name is empty")]
    EmptyName,
    /// The metric name contains characters other than ASCII letters and digits.
    #[error("invalid metric name {0:?}")]
    InvalidName(String),
    /// The metric type is empty.
    #[error("metric type is empty")]
    EmptyKind,
    /// The metric type is neither `counter` nor `gauge`.
    #[error("invalid metric type {0:?}")]
    InvalidKind(String),
    /// The payload lacks the field required by its type.
    #[error("missing {field} for {kind} {name:?}")]
    MissingValue {
        /// The metric name.
        name: String,
        /// The metric type.
        kind: MetricType,
        /// The name of the missing field, `delta` or `value`.
        field: &'static str,
    },
    /// The value does not parse for the metric type.
    #[error("invalid {kind} value {value:?}")]
    InvalidValue {
        /// The metric type.
        kind: MetricType,
        /// The rejected raw value.
        value: String,
    },
}

/// Validates a metric name: non-empty, ASCII letters and digits only.
pub fn validate_name(name: &str) -> Result<(), ValidationError> {
    if name.is_empty() {
        return Err(ValidationError::EmptyName);
    }

    if !name.bytes().all(|b| b.is_ascii_alphanumeric()) {
        return Err(ValidationError::InvalidName(name.to_owned()));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_names() {
        assert!(validate_name("Alloc").is_ok());
        assert!(validate_name("CPUutilization1").is_ok());
        assert!(validate_name("42").is_ok());
    }

    #[test]
    fn test_invalid_names() {
        assert_eq!(validate_name(""), Err(ValidationError::EmptyName));
        for name in ["poll count", "poll_count", "poll-count", "Zähler", "a/b"] {
            assert_eq!(
                validate_name(name),
                Err(ValidationError::InvalidName(name.to_owned()))
            );
        }
    }
}
