//! Middlewares for the HTTP server.
//!
//! This module exposes tower [layers](tower::Layer) and middleware functions registered on the
//! [`Router`](axum::Router) in [`make_app`](crate::server::make_app).

mod handle_panic;
mod signature;
mod trace;
mod trusted_subnet;

pub use self::handle_panic::*;
pub use self::signature::*;
pub use self::trace::*;
pub use self::trusted_subnet::*;
