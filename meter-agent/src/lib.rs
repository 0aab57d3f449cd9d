//! The agent of the meter pipeline.
//!
//! The agent samples host and process statistics with a [`SystemSampler`] on the poll interval
//! and reports the latest sample on the report interval. Reports are buffered by the
//! [`Exporter`], which hands them to a pool of delivery workers through a bounded queue.
//!
//! Delivery goes through a [`Transport`]:
//!
//! - [`HttpTransport`] posts gzip compressed JSON to `/update` or `/updates`.
//! - [`GrpcTransport`] calls `meter.v1.Metrics/BatchUpdate` or its encrypted variant.
//!
//! Payloads are optionally encrypted with the collector's public key and signed with the shared
//! secret. Failed deliveries are retried on a fixed schedule and dropped afterwards, so every
//! report is delivered at most once.
#![warn(missing_docs)]

mod agent;
mod exporter;
mod sampler;
mod transport;

pub use self::agent::*;
pub use self::exporter::*;
pub use self::sampler::*;
pub use self::transport::*;
