//! Logging facade for the meter agent and collector.
//!
//! # Setup
//!
//! Logging is enabled by calling [`init`] (feature `init`) with a [`LogConfig`]. The configuration
//! implements `serde` traits, so it is usually read from the `logging` section of the config file.
//!
//! ```ignore
//! let config = meter_log::LogConfig {
//!     format: meter_log::LogFormat::Json,
//!     ..Default::default()
//! };
//!
//! meter_log::init(&config);
//! ```
//!
//! # Logging
//!
//! The five macros [`error!`], [`warn!`], [`info!`], [`debug!`] and [`trace!`] are re-exported
//! from `tracing`. They accept structured fields in front of the message:
//!
//! ```
//! meter_log::info!(records = 12, "stored batch");
//! ```
//!
//! ## Conventions
//!
//! Log messages start lowercase and end without punctuation. Identifiers such as request ids or
//! metric ids go into fields rather than the message. Levels:
//!
//! - [`error!`] for bugs and failed operations that lose data.
//! - [`warn!`] for undesirable but handled behavior.
//! - [`info!`] for lifecycle messages relevant to operators.
//! - [`debug!`] for per-request details.
//! - [`trace!`] for everything else.
//!
//! ## Logging Error Types
//!
//! Errors are attached as the `error` field, which prints the full source chain:
//!
//! ```
//! use std::error::Error;
//! use std::io;
//!
//! let error = io::Error::other("disk full");
//! meter_log::error!(error = &error as &dyn Error, "failed to dump snapshot");
//! ```
//!
//! Use [`LogError`] to render an error chain into the message itself.
//!
//! # Testing
//!
//! Unit tests call [`init_test!`] (feature `test`) to capture the logs of the calling crate:
//!
//! ```ignore
//! #[test]
//! fn test_something() {
//!     meter_log::init_test!();
//! }
//! ```

#![warn(missing_docs)]

mod config;
pub use config::*;

#[cfg(feature = "init")]
mod setup;
#[cfg(feature = "init")]
pub use setup::*;

#[cfg(feature = "test")]
mod test;
#[cfg(feature = "test")]
pub use test::*;

mod utils;
pub use utils::*;

#[doc(inline)]
pub use tracing::{debug, error, info, info_span, trace, warn};
