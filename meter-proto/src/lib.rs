//! Protobuf messages and gRPC services of the meter pipeline.
//!
//! The messages, such as [`Metric`], are declared by hand and mirror
//! `proto/meter.proto`. Client and server stubs for the `meter.v1.Metrics` and `meter.v1.Health`
//! services are generated at build time without invoking `protoc`:
//!
//! - [`metrics_client::MetricsClient`] and [`metrics_server::MetricsServer`]
//! - [`health_client::HealthClient`] and [`health_server::HealthServer`]
//!
//! Every RPC may carry the HMAC of its protobuf encoded payload in the [`SIGNATURE_METADATA`]
//! metadata entry.

mod messages;

pub use self::messages::*;

/// Metadata key carrying the payload signature of an RPC.
pub const SIGNATURE_METADATA: &str = "hashsha256";

/// Metadata key carrying the client address, checked against the trusted subnet.
pub const REAL_IP_METADATA: &str = "x-real-ip";

include!(concat!(env!("OUT_DIR"), "/meter.v1.Metrics.rs"));
include!(concat!(env!("OUT_DIR"), "/meter.v1.Health.rs"));
