use meter_metrics::{MetricExchange, Record, ValidationError};

/// A single metric on the wire.
#[derive(Clone, PartialEq, prost::Message)]
pub struct Metric {
    /// The metric name.
    #[prost(string, tag = "1")]
    pub id: String,
    /// The metric type, `counter` or `gauge`.
    #[prost(string, tag = "2")]
    pub r#type: String,
    /// The counter delta.
    #[prost(int64, optional, tag = "3")]
    pub delta: Option<i64>,
    /// The gauge value.
    #[prost(double, optional, tag = "4")]
    pub value: Option<f64>,
}

/// A batch of metrics to aggregate.
#[derive(Clone, PartialEq, prost::Message)]
pub struct BatchUpdateRequest {
    #[prost(message, repeated, tag = "1")]
    pub metrics: Vec<Metric>,
}

/// An encrypted [`BatchUpdateRequest`].
#[derive(Clone, PartialEq, prost::Message)]
pub struct BatchUpdateEncryptedRequest {
    /// The framed RSA ciphertext of the protobuf encoded request.
    #[prost(bytes = "vec", tag = "1")]
    pub encrypted_data: Vec<u8>,
}

/// The aggregated state of every metric in a batch.
#[derive(Clone, PartialEq, prost::Message)]
pub struct BatchUpdateResponse {
    #[prost(message, repeated, tag = "1")]
    pub metrics: Vec<Metric>,
}

#[derive(Clone, Copy, PartialEq, prost::Message)]
pub struct PingRequest {}

#[derive(Clone, Copy, PartialEq, prost::Message)]
pub struct PingResponse {}

impl From<MetricExchange> for Metric {
    fn from(exchange: MetricExchange) -> Self {
        Self {
            id: exchange.id,
            r#type: exchange.kind,
            delta: exchange.delta,
            value: exchange.value,
        }
    }
}

impl From<Metric> for MetricExchange {
    fn from(metric: Metric) -> Self {
        Self {
            id: metric.id,
            kind: metric.r#type,
            delta: metric.delta,
            value: metric.value,
        }
    }
}

impl From<&Record> for Metric {
    fn from(record: &Record) -> Self {
        MetricExchange::from(record).into()
    }
}

impl TryFrom<Metric> for Record {
    type Error = ValidationError;

    fn try_from(metric: Metric) -> Result<Self, Self::Error> {
        Record::try_from(MetricExchange::from(metric))
    }
}

impl BatchUpdateRequest {
    /// Creates a request carrying all records.
    pub fn from_records(records: &[Record]) -> Self {
        Self {
            metrics: records.iter().map(Metric::from).collect(),
        }
    }

    /// Validates every metric of the request.
    ///
    /// Fails on the first invalid metric, in which case nothing should be aggregated.
    pub fn into_records(self) -> Result<Vec<Record>, ValidationError> {
        self.metrics.into_iter().map(Record::try_from).collect()
    }
}
