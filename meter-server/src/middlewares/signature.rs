use std::error::Error;

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::ingest::SIGNATURE;
use crate::service::ServiceState;

fn is_json(response: &Response) -> bool {
    response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with("application/json"))
}

/// Signs JSON response bodies with the shared secret.
///
/// Must run inside the compression layer so that the signature covers the uncompressed body.
pub async fn sign_response(
    State(state): State<ServiceState>,
    request: Request,
    next: Next,
) -> Response {
    let response = next.run(request).await;

    let Some(signer) = state.signer() else {
        return response;
    };

    if !is_json(&response) {
        return response;
    }

    let (mut parts, body) = response.into_parts();
    let bytes = match axum::body::to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(error) => {
            meter_log::error!(
                error = &error as &dyn Error,
                "failed to buffer response body",
            );
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    if let Ok(value) = HeaderValue::from_str(&signer.sign(&bytes)) {
        parts.headers.insert(SIGNATURE.clone(), value);
    }

    Response::from_parts(parts, Body::from(bytes))
}
