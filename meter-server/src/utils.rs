use std::error::Error;
use std::fmt;

use axum::Json;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};

/// An error response from an api.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiErrorResponse {
    #[serde(default)]
    detail: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    causes: Vec<String>,
}

impl ApiErrorResponse {
    /// Creates an error response with a detail message.
    pub fn with_detail<S: AsRef<str>>(s: S) -> Self {
        Self {
            detail: Some(s.as_ref().to_owned()),
            causes: Vec::new(),
        }
    }

    /// Creates an error response from an error and its chain of sources.
    pub fn from_error<E: Error + ?Sized>(error: &E) -> Self {
        let detail = Some(error.to_string());

        let mut causes = Vec::new();
        let mut source = error.source();
        while let Some(s) = source {
            let cause = s.to_string();
            if detail.as_deref() != Some(cause.as_str()) && !causes.contains(&cause) {
                causes.push(cause);
            }
            source = s.source();
        }

        Self { detail, causes }
    }

    /// Returns the main error message.
    pub fn detail(&self) -> Option<&str> {
        self.detail.as_deref()
    }
}

impl fmt::Display for ApiErrorResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.detail {
            Some(ref detail) => write!(f, "{detail}"),
            None => write!(f, "no error details"),
        }
    }
}

impl IntoResponse for ApiErrorResponse {
    fn into_response(self) -> Response {
        Json(self).into_response()
    }
}
