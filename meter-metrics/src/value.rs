use std::fmt;
use std::str::FromStr;

use crate::ValidationError;

/// The type of a metric, which determines how values are aggregated.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MetricType {
    /// Integer deltas that are summed.
    Counter,
    /// Float values where the last write wins.
    Gauge,
}

impl MetricType {
    /// Returns the wire name of this type.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Counter => "counter",
            Self::Gauge => "gauge",
        }
    }
}

impl fmt::Display for MetricType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetricType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "counter" => Ok(Self::Counter),
            "gauge" => Ok(Self::Gauge),
            "" => Err(ValidationError::EmptyKind),
            other => Err(ValidationError::InvalidKind(other.to_owned())),
        }
    }
}

meter_common::impl_str_serde!(MetricType, "counter or gauge");

/// The value of a metric.
///
/// The variant fixes the metric type for the lifetime of the value.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum MetricValue {
    /// A counter delta or accumulated total.
    Counter(i64),
    /// The current reading of a gauge.
    Gauge(f64),
}

impl MetricValue {
    /// Returns the metric type of this value.
    pub fn ty(&self) -> MetricType {
        match self {
            Self::Counter(_) => MetricType::Counter,
            Self::Gauge(_) => MetricType::Gauge,
        }
    }

    /// Parses a raw string into a value of the given type.
    ///
    /// Counters accept signed 64-bit integers, gauges accept finite floats.
    pub fn parse(ty: MetricType, raw: &str) -> Result<Self, ValidationError> {
        let invalid = || ValidationError::InvalidValue {
            kind: ty,
            value: raw.to_owned(),
        };

        match ty {
            MetricType::Counter => raw.trim().parse().map(Self::Counter).map_err(|_| invalid()),
            MetricType::Gauge => match raw.trim().parse::<f64>() {
                Ok(value) if value.is_finite() => Ok(Self::Gauge(value)),
                _ => Err(invalid()),
            },
        }
    }

    /// Merges an incoming value into this one.
    ///
    /// Counters add up, saturating at the integer bounds. Gauges take the incoming value. Values of
    /// different types are never merged, the incoming value replaces the existing one.
    pub fn merge(&mut self, incoming: MetricValue) {
        match (self, incoming) {
            (Self::Counter(total), Self::Counter(delta)) => *total = total.saturating_add(delta),
            (this, other) => *this = other,
        }
    }
}

/// Renders the canonical string form.
///
/// Gauges use the shortest representation that parses back to the same float, so `11.23` stays
/// `11.23` and `22.0` renders as `22`.
impl fmt::Display for MetricValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Counter(value) => write!(f, "{value}"),
            Self::Gauge(value) => write!(f, "{value}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;

    use super::*;

    #[test]
    fn test_parse_type() {
        assert_eq!("counter".parse::<MetricType>(), Ok(MetricType::Counter));
        assert_eq!("gauge".parse::<MetricType>(), Ok(MetricType::Gauge));
        assert_eq!("".parse::<MetricType>(), Err(ValidationError::EmptyKind));
        assert_eq!(
            "Counter".parse::<MetricType>(),
            Err(ValidationError::InvalidKind("Counter".to_owned()))
        );
    }

    #[test]
    fn test_parse_value() {
        assert_eq!(
            MetricValue::parse(MetricType::Counter, "42").unwrap(),
            MetricValue::Counter(42)
        );
        assert_eq!(
            MetricValue::parse(MetricType::Counter, "-7").unwrap(),
            MetricValue::Counter(-7)
        );
        assert_eq!(
            MetricValue::parse(MetricType::Gauge, "11.23").unwrap(),
            MetricValue::Gauge(11.23)
        );
        assert_eq!(
            MetricValue::parse(MetricType::Gauge, "5").unwrap(),
            MetricValue::Gauge(5.0)
        );
    }

    #[test]
    fn test_parse_invalid_value() {
        for (ty, raw) in [
            (MetricType::Counter, "1.5"),
            (MetricType::Counter, "none"),
            (MetricType::Counter, ""),
            (MetricType::Gauge, "abc"),
            (MetricType::Gauge, "NaN"),
            (MetricType::Gauge, "inf"),
        ] {
            assert_eq!(
                MetricValue::parse(ty, raw),
                Err(ValidationError::InvalidValue {
                    kind: ty,
                    value: raw.to_owned()
                })
            );
        }
    }

    #[test]
    fn test_canonical_string() {
        assert_eq!(MetricValue::Counter(84).to_string(), "84");
        assert_eq!(MetricValue::Gauge(11.23).to_string(), "11.23");
        assert_eq!(MetricValue::Gauge(22.0).to_string(), "22");
        assert_eq!(MetricValue::Gauge(-0.5).to_string(), "-0.5");
        assert_eq!(MetricValue::Gauge(0.1 + 0.2).to_string(), "0.30000000000000004");
    }

    #[test]
    fn test_merge_counter() {
        let mut value = MetricValue::Counter(10);
        value.merge(MetricValue::Counter(10));
        assert_eq!(value, MetricValue::Counter(20));

        value.merge(MetricValue::Counter(i64::MAX));
        assert_eq!(value, MetricValue::Counter(i64::MAX));
    }

    #[test]
    fn test_merge_gauge() {
        let mut value = MetricValue::Gauge(11.23);
        value.merge(MetricValue::Gauge(22.0));
        assert_eq!(value, MetricValue::Gauge(22.0));
    }
}
