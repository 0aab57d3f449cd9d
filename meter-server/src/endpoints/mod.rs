//! Web server endpoints.
//!
//! This module contains implementations for all supported collector endpoints.

mod health_check;
mod update;
mod value;

use axum::Router;
use axum::routing::{get, post};

use crate::service::ServiceState;

/// Returns the router with all collector routes.
pub fn routes() -> Router<ServiceState> {
    Router::new()
        .route("/update", post(update::handle_json))
        .route("/update/{kind}/{name}/{value}", post(update::handle_plain))
        .route("/updates", post(update::handle_batch))
        .route("/updates/", post(update::handle_batch))
        .route("/value", post(value::handle_json))
        .route("/value/", post(value::handle_json))
        .route("/value/{kind}/{name}", get(value::handle_plain))
        .route("/ping", get(health_check::handle))
}
