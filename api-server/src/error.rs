//! Maps `orchestrator_core::Error` onto HTTP responses. The teacher's
//! handlers return a bare `(StatusCode, String)` tuple per call site
//! (`routes::project`); this crate centralizes the same mapping once so
//! every route shares it via `?` instead of repeating the match.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use orchestrator_core::Error as CoreError;
use serde_json::json;

pub struct ApiError(pub CoreError);

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            CoreError::Validation(_) => StatusCode::BAD_REQUEST,
            CoreError::Authorization(_) => StatusCode::FORBIDDEN,
            CoreError::NotFound(_) => StatusCode::NOT_FOUND,
            CoreError::Conflict(_) => StatusCode::CONFLICT,
            CoreError::Transient(_) => StatusCode::SERVICE_UNAVAILABLE,
            CoreError::Permanent(_) => StatusCode::UNPROCESSABLE_ENTITY,
            CoreError::Internal(_) | CoreError::Io(_) | CoreError::Serialization(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
