use serde::{Deserialize, Serialize};

use crate::{MetricType, MetricValue, Record, RecordId, ValidationError, validate_name};

/// The wire representation of a metric.
///
/// Exactly one of `delta` and `value` is populated, depending on `type`. The same shape is used
/// for lookups, where both are absent.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricExchange {
    /// The metric name.
    pub id: String,
    /// The metric type, `counter` or `gauge`.
    #[serde(rename = "type")]
    pub kind: String,
    /// The counter delta.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta: Option<i64>,
    /// The gauge value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
}

impl MetricExchange {
    /// Builds an exchange object from a raw name, type and value string.
    pub fn parse(name: &str, kind: &str, raw: &str) -> Result<Self, ValidationError> {
        let record = Record::parse(kind, name, raw)?;
        Ok(Self::from(&record))
    }

    /// Builds a lookup query without a value.
    pub fn query(name: impl Into<String>, kind: MetricType) -> Self {
        Self {
            id: name.into(),
            kind: kind.to_string(),
            ..Default::default()
        }
    }

    /// Returns the storage key addressed by this object.
    pub fn record_id(&self) -> RecordId {
        RecordId::new(&self.id, &self.kind)
    }

    /// Validates the name and type without looking at the value.
    pub fn validate_key(&self) -> Result<MetricType, ValidationError> {
        validate_name(&self.id)?;
        self.kind.parse()
    }
}

impl TryFrom<MetricExchange> for Record {
    type Error = ValidationError;

    fn try_from(exchange: MetricExchange) -> Result<Self, Self::Error> {
        let kind = exchange.validate_key()?;

        let missing = |field| ValidationError::MissingValue {
            name: exchange.id.clone(),
            kind,
            field,
        };

        let value = match kind {
            MetricType::Counter => {
                MetricValue::Counter(exchange.delta.ok_or_else(|| missing("delta"))?)
            }
            MetricType::Gauge => {
                let value = exchange.value.ok_or_else(|| missing("value"))?;
                if !value.is_finite() {
                    return Err(ValidationError::InvalidValue {
                        kind,
                        value: value.to_string(),
                    });
                }
                MetricValue::Gauge(value)
            }
        };

        Record::new(exchange.id, value)
    }
}

impl From<&Record> for MetricExchange {
    fn from(record: &Record) -> Self {
        let (delta, value) = match record.value() {
            MetricValue::Counter(delta) => (Some(delta), None),
            MetricValue::Gauge(value) => (None, Some(value)),
        };

        Self {
            id: record.name().to_owned(),
            kind: record.ty().to_string(),
            delta,
            value,
        }
    }
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;

    use super::*;

    #[test]
    fn test_serialize_counter() {
        let exchange = MetricExchange::from(&Record::counter("PollCount", 5).unwrap());
        insta::assert_json_snapshot!(exchange, @r###"
        {
          "id": "PollCount",
          "type": "counter",
          "delta": 5
        }
        "###);
    }

    #[test]
    fn test_serialize_gauge() {
        let exchange = MetricExchange::from(&Record::gauge("Alloc", 11.23).unwrap());
        assert_eq!(
            serde_json::to_string(&exchange).unwrap(),
            r#"{"id":"Alloc","type":"gauge","value":11.23}"#
        );
    }

    #[test]
    fn test_into_record() {
        let exchange: MetricExchange =
            serde_json::from_str(r#"{"id":"Alloc","type":"gauge","value":11.23}"#).unwrap();
        assert_eq!(
            Record::try_from(exchange).unwrap(),
            Record::gauge("Alloc", 11.23).unwrap()
        );
    }

    #[test]
    fn test_missing_value() {
        let exchange: MetricExchange =
            serde_json::from_str(r#"{"id":"PollCount","type":"counter","value":1.0}"#).unwrap();
        assert_eq!(
            Record::try_from(exchange).unwrap_err(),
            ValidationError::MissingValue {
                name: "PollCount".to_owned(),
                kind: MetricType::Counter,
                field: "delta",
            }
        );
    }

    #[test]
    fn test_unknown_type() {
        let exchange: MetricExchange =
            serde_json::from_str(r#"{"id":"Foo","type":"unknown","delta":1}"#).unwrap();
        assert_eq!(
            Record::try_from(exchange).unwrap_err(),
            ValidationError::InvalidKind("unknown".to_owned())
        );
    }

    #[test]
    fn test_parse_raw() {
        assert_eq!(
            MetricExchange::parse("RandomValue", "gauge", "0.25").unwrap(),
            MetricExchange {
                id: "RandomValue".to_owned(),
                kind: "gauge".to_owned(),
                delta: None,
                value: Some(0.25),
            }
        );
        assert!(MetricExchange::parse("RandomValue", "gauge", "x").is_err());
    }

    #[test]
    fn test_query() {
        let query = MetricExchange::query("PollCount", MetricType::Counter);
        assert_eq!(query.record_id().as_str(), "PollCount_counter");
        assert_eq!(
            serde_json::to_string(&query).unwrap(),
            r#"{"id":"PollCount","type":"counter"}"#
        );
    }
}
