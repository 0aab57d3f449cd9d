use std::net::IpAddr;

use axum::extract::{Request, State};
use axum::http::{HeaderName, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::service::ServiceState;
use crate::utils::ApiErrorResponse;

/// Header naming the original client address.
pub static REAL_IP: HeaderName = HeaderName::from_static("x-real-ip");

/// Rejects requests whose `X-Real-IP` is missing or outside the trusted subnet.
///
/// Does nothing if no trusted subnet is configured.
pub async fn trusted_subnet(
    State(state): State<ServiceState>,
    request: Request,
    next: Next,
) -> Response {
    let Some(subnet) = state.config().trusted_subnet() else {
        return next.run(request).await;
    };

    let client = request
        .headers()
        .get(&REAL_IP)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<IpAddr>().ok());

    match client {
        Some(ip) if subnet.contains(ip) => next.run(request).await,
        _ => {
            meter_log::debug!(client = ?client, "rejected request outside of trusted subnet");
            (
                StatusCode::FORBIDDEN,
                ApiErrorResponse::with_detail("client address is not trusted"),
            )
                .into_response()
        }
    }
}
