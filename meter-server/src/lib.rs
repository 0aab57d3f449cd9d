//! The collector of the meter pipeline.
//!
//! The collector accepts metrics over HTTP and gRPC, folds them into the configured
//! [storage](meter_storage::Storage) and serves the aggregated values back.
//!
//! # Ingestion
//!
//! Every payload is processed in the same order:
//!
//!  1. If a shared secret is configured and the payload carries a `HashSHA256` signature, the
//!     signature is verified over the raw bytes. Payloads without a signature are accepted.
//!  2. If a private key is configured, the payload is decrypted.
//!  3. The `Content-Encoding` is removed.
//!  4. All metrics are parsed and validated. A single invalid metric rejects the whole batch.
//!  5. The metrics are merged by the [`Aggregator`](services::Aggregator): counters are summed,
//!     gauges replace the stored value.
//!
//! # Endpoints
//!
//! | Route                              | Description                                  |
//! |------------------------------------|----------------------------------------------|
//! | `POST /update/{kind}/{name}/{v}`   | Store a single value, echo the stored value  |
//! | `POST /update`                     | Store a JSON metric, echo the stored metric  |
//! | `POST /updates`                    | Store a JSON batch, echo the stored metrics  |
//! | `GET /value/{kind}/{name}`         | Read a value as text                         |
//! | `POST /value`                      | Read a metric as JSON                        |
//! | `GET /ping`                        | Storage health                               |
//!
//! The gRPC services `meter.v1.Metrics` and `meter.v1.Health` mirror the batch and health
//! endpoints.
#![warn(missing_docs)]

mod endpoints;
mod grpc;
mod ingest;
mod middlewares;
mod server;
mod service;
mod services;
mod utils;

#[cfg(test)]
mod testutils;

pub use self::grpc::{HealthService, MetricsService, SubnetInterceptor, grpc_services};
pub use self::ingest::{Ingest, IngestError};
pub use self::server::{ServerError, make_app, serve};
pub use self::service::{ServiceError, ServiceState};
pub use self::services::{Aggregator, Health, check_health};
pub use self::utils::ApiErrorResponse;
