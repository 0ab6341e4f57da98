//! Maps [`gate_core::StoreError`] (and request-validation failures) onto the
//! exact HTTP status/body contract the broker's wire protocol promises.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use gate_core::StoreError;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("invalid request")]
    InvalidRequest,

    #[error("lock not found")]
    NotFound,

    #[error("owner mismatch")]
    OwnerMismatch,

    #[error("acquire timed out")]
    Timeout,

    #[error(transparent)]
    Store(StoreError),
}

pub type ApiResult<T> = Result<T, ApiError>;

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            // An owner mismatch is always a 403, never a bare store-backend
            // passthrough; route it through the dedicated variant instead of
            // matching on the wrapped `StoreError` again at the response layer.
            StoreError::PermissionDenied(_) => ApiError::OwnerMismatch,
            other => ApiError::Store(other),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            ApiError::InvalidRequest => (StatusCode::BAD_REQUEST, json!({"error": "invalid request"})),
            ApiError::NotFound => (StatusCode::NOT_FOUND, json!({"error": "lock not found"})),
            ApiError::OwnerMismatch => (StatusCode::FORBIDDEN, json!({"error": "owner mismatch"})),
            ApiError::Timeout => (StatusCode::REQUEST_TIMEOUT, json!({"status": "timeout"})),
            ApiError::Store(StoreError::InvalidArgument(msg)) => {
                (StatusCode::BAD_REQUEST, json!({"error": msg}))
            }
            ApiError::Store(StoreError::NotFound(_)) => {
                (StatusCode::NOT_FOUND, json!({"error": "lock not found"}))
            }
            ApiError::Store(StoreError::HoldCapExceeded(_)) => {
                (StatusCode::NOT_FOUND, json!({"error": "lock not found"}))
            }
            ApiError::Store(StoreError::PermissionDenied(_)) => {
                // Unreachable via `?`/`From`, which redirects this case to
                // `ApiError::OwnerMismatch` above; kept so the match stays
                // exhaustive if `StoreError` grows another variant.
                (StatusCode::FORBIDDEN, json!({"error": "owner mismatch"}))
            }
            ApiError::Store(StoreError::Backend(e)) => {
                tracing::error!(error = %e, "lock store backend error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({"error": "internal error"}),
                )
            }
        };
        (status, Json(body)).into_response()
    }
}
