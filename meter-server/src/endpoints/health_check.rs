//! A simple health check endpoint for the collector.

use axum::extract::State;
use axum::http::StatusCode;

use crate::service::ServiceState;
use crate::services::{Health, check_health};

/// `GET /ping`, reports whether the storage is reachable.
pub async fn handle(State(state): State<ServiceState>) -> StatusCode {
    match check_health(state.storage()).await {
        Health::Healthy => StatusCode::OK,
        Health::Unsupported => StatusCode::NOT_IMPLEMENTED,
        Health::Unhealthy => StatusCode::INTERNAL_SERVER_ERROR,
    }
}
