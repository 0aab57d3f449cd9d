//! Delivery of metric payloads to the collector.

use async_trait::async_trait;
use meter_metrics::MetricExchange;

mod grpc;
mod http;

pub use self::grpc::*;
pub use self::http::*;

/// A unit of delivery.
#[derive(Clone, Debug, PartialEq)]
pub enum Envelope {
    /// A single metric, sent to `POST /update`.
    Metric(MetricExchange),
    /// A batch of metrics, sent to `POST /updates` or the batch RPC.
    Batch(Vec<MetricExchange>),
}

impl Envelope {
    /// Returns all metrics in this envelope.
    pub fn metrics(&self) -> &[MetricExchange] {
        match self {
            Self::Metric(metric) => std::slice::from_ref(metric),
            Self::Batch(metrics) => metrics,
        }
    }

    /// Returns the number of metrics in this envelope.
    pub fn len(&self) -> usize {
        self.metrics().len()
    }

    /// Returns `true` if the envelope carries no metrics.
    pub fn is_empty(&self) -> bool {
        self.metrics().is_empty()
    }
}

/// Error raised while preparing or sending a payload.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The payload could not be serialized.
    #[error("failed to serialize payload")]
    Encode(#[from] serde_json::Error),

    /// The payload could not be compressed.
    #[error("failed to compress payload")]
    Compress(#[source] std::io::Error),

    /// The payload could not be encrypted.
    #[error(transparent)]
    Encrypt(#[from] meter_auth::EncryptError),

    /// The HTTP request failed before a response was received.
    #[error("failed to send request")]
    Send(#[from] reqwest::Error),

    /// The collector responded with an error status.
    #[error("collector responded with status {0}")]
    Status(reqwest::StatusCode),

    /// The RPC failed.
    #[error("rpc failed")]
    Rpc(#[from] tonic::Status),
}

/// Outcome of a failed delivery.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    /// The collector could not be reached. The delivery may succeed later.
    #[error("delivery failed temporarily")]
    Retriable(#[source] TransportError),

    /// The payload was rejected or could not be built. Retrying will not help.
    #[error("delivery failed")]
    Fatal(#[source] TransportError),

    /// The agent shut down while waiting for a retry.
    #[error("delivery canceled by shutdown")]
    Canceled,
}

impl DeliveryError {
    /// Creates a retriable error.
    pub fn retriable(source: impl Into<TransportError>) -> Self {
        Self::Retriable(source.into())
    }

    /// Creates a fatal error.
    pub fn fatal(source: impl Into<TransportError>) -> Self {
        Self::Fatal(source.into())
    }

    /// Returns `true` if the delivery should be attempted again.
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::Retriable(_))
    }
}

/// A way to deliver envelopes to the collector.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Delivers one envelope. Called again with the same envelope on retriable errors.
    async fn deliver(&self, envelope: &Envelope) -> Result<(), DeliveryError>;
}

/// Determines the local address used to reach the collector.
///
/// No packets are sent, connecting a UDP socket only selects the route.
pub fn outbound_ip(address: &str) -> Option<std::net::IpAddr> {
    let url = reqwest::Url::parse(address).ok()?;
    let host = url.host_str()?;
    let port = url.port_or_known_default()?;

    let socket = std::net::UdpSocket::bind(("0.0.0.0", 0)).ok()?;
    socket.connect((host, port)).ok()?;
    socket.local_addr().ok().map(|addr| addr.ip())
}
