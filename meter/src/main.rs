//! The meter pipeline: a push-model metrics collector and its reporting agent.
//!
//! The agent samples host and process statistics and reports them to the collector over HTTP or
//! gRPC. The collector validates and aggregates the reports and keeps them in memory, in a
//! snapshot file or in a SQLite database.
//!
//! # Usage
//!
//! ```text
//! meter [-c CONFIG] server [--address ADDR] [--grpc-address ADDR] ...
//! meter [-c CONFIG] agent [--address URL] [--transport http|grpc] ...
//! meter keys generate --out DIR [--bits N]
//! meter [-c CONFIG] config show [--format yaml|debug]
//! ```
//!
//! Every setting can be given in `config.yml` inside the config folder, as an environment
//! variable, or as a command line flag. Flags take precedence over environment variables, which
//! take precedence over the file.
//!
//! # Workspace Crates
//!
//!  - `meter`: Main entry point and command line interface.
//!  - `meter-agent`: Sampling, batching and delivery of metrics.
//!  - `meter-auth`: Payload signatures and RSA encryption.
//!  - `meter-common`: Payload compression and retry schedules.
//!  - `meter-config`: Static configuration for the CLI, collector and agent.
//!  - `meter-log`: Logging setup.
//!  - `meter-metrics`: Metric types, validation and the JSON exchange format.
//!  - `meter-proto`: gRPC messages and services.
//!  - `meter-server`: HTTP and gRPC endpoints of the collector.
//!  - `meter-storage`: Storage backends.

mod cli;
mod cliapp;
mod setup;

use std::process;

pub fn main() {
    let exit_code = match cli::execute() {
        Ok(()) => 0,
        Err(err) => {
            meter_log::ensure_error(&err);
            1
        }
    };

    process::exit(exit_code);
}
