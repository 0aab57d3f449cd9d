//! Configuration for the meter collector and agent.
//!
//! Configuration is read from `config.yml` inside a config folder and can be overridden through
//! [`OverridableConfig`], which the CLI fills from command line flags and environment variables.
//!
//! ```yaml
//! server:
//!   http_addr: 0.0.0.0:8080
//!   grpc_addr: 0.0.0.0:3200
//!   trusted_subnet: 10.0.0.0/8
//! storage:
//!   file_path: /var/lib/meter/metrics.json
//!   store_interval: 300
//! auth:
//!   key: a-long-shared-secret
//! agent:
//!   address: http://collector:8080
//!   transport: grpc
//! logging:
//!   level: debug
//! ```
#![warn(missing_docs)]

mod config;

pub use crate::config::*;
