use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use modelops::ModelError;
use serde::Serialize;

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

/// Handler error rendered as `{"error": ...}` with a status code.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self { status: StatusCode::BAD_REQUEST, message: message.into() }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self { status: StatusCode::NOT_FOUND, message: message.into() }
    }
}

impl From<ModelError> for ApiError {
    fn from(e: ModelError) -> Self {
        let status = match &e {
            ModelError::Library(_) | ModelError::LibraryNotReady => StatusCode::SERVICE_UNAVAILABLE,
            ModelError::FeatureDisabled => StatusCode::NOT_FOUND,
            ModelError::NoSession => StatusCode::CONFLICT,
            ModelError::Factory { .. }
            | ModelError::Engine(_)
            | ModelError::Inference(_)
            | ModelError::InvalidOutput(_) => StatusCode::BAD_GATEWAY,
            ModelError::Abandoned { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self { status, message: e.to_string() }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(ErrorBody { error: self.message })).into_response()
    }
}
