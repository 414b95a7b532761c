pub mod health;
pub mod identity;
pub mod volumes;
pub mod watch;

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use pkg_state::StoreError;
use serde::Serialize;

/// Error returned by resource handlers.
#[derive(Debug)]
pub struct ApiError(StoreError);

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        Self(e)
    }
}

#[derive(Serialize)]
struct ErrorBody {
    code: u16,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            StoreError::NotFound(_) => StatusCode::NOT_FOUND,
            StoreError::AlreadyExists(_) | StoreError::Conflict(_) => StatusCode::CONFLICT,
            StoreError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            StoreError::Serialization(_) | StoreError::Backend(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        tracing::warn!("Request failed: {}", self.0);
        let body = ErrorBody {
            code: status.as_u16(),
            message: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}
