use std::borrow::Borrow;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::{MetricType, MetricValue, ValidationError, validate_name};

/// The storage key of a metric: `<name>_<type>`.
///
/// An id built from an empty name or an empty type is itself empty. The empty id means "no
/// identity" and is never written to storage.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(String);

impl RecordId {
    /// Builds an id from raw name and type strings.
    pub fn new(name: &str, kind: &str) -> Self {
        if name.is_empty() || kind.is_empty() {
            return Self::default();
        }

        Self(format!("{name}_{kind}"))
    }

    /// Returns `true` for the "no identity" id.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for RecordId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// A validated metric with its value.
#[derive(Clone, Debug, PartialEq)]
pub struct Record {
    name: String,
    value: MetricValue,
}

impl Record {
    /// Creates a record after validating the name.
    pub fn new(name: impl Into<String>, value: MetricValue) -> Result<Self, ValidationError> {
        let name = name.into();
        validate_name(&name)?;
        Ok(Self { name, value })
    }

    /// Shorthand for a counter record.
    pub fn counter(name: impl Into<String>, delta: i64) -> Result<Self, ValidationError> {
        Self::new(name, MetricValue::Counter(delta))
    }

    /// Shorthand for a gauge record.
    pub fn gauge(name: impl Into<String>, value: f64) -> Result<Self, ValidationError> {
        Self::new(name, MetricValue::Gauge(value))
    }

    /// Parses a record from the raw triple used in URLs: type, name and value.
    pub fn parse(kind: &str, name: &str, raw: &str) -> Result<Self, ValidationError> {
        let kind: MetricType = kind.parse()?;
        validate_name(name)?;
        let value = MetricValue::parse(kind, raw)?;
        Ok(Self {
            name: name.to_owned(),
            value,
        })
    }

    /// The metric name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The metric type.
    pub fn ty(&self) -> MetricType {
        self.value.ty()
    }

    /// The metric value.
    pub fn value(&self) -> MetricValue {
        self.value
    }

    /// The storage key of this record.
    pub fn id(&self) -> RecordId {
        RecordId::new(&self.name, self.ty().as_str())
    }

    /// Returns a copy of this record holding another value of the same type.
    pub fn with_value(&self, value: MetricValue) -> Self {
        Self {
            name: self.name.clone(),
            value,
        }
    }
}

/// Snapshot representation: the value is kept as its canonical string.
#[derive(Serialize, Deserialize)]
struct RecordRepr<'a> {
    name: std::borrow::Cow<'a, str>,
    kind: MetricType,
    value: std::borrow::Cow<'a, str>,
}

impl Serialize for Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        RecordRepr {
            name: self.name.as_str().into(),
            kind: self.ty(),
            value: self.value.to_string().into(),
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Record {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let repr = RecordRepr::deserialize(deserializer)?;
        let value = MetricValue::parse(repr.kind, &repr.value).map_err(serde::de::Error::custom)?;
        Record::new(repr.name.into_owned(), value).map_err(serde::de::Error::custom)
    }
}
