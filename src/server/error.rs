//! Maps application errors to HTTP responses.

use axum::{
    extract::rejection::{JsonRejection, PathRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::{debug, error};

use crate::error::ExplorerError;

/// Error returned by handlers; renders as `{"error": "..."}`.
#[derive(Debug)]
pub struct ApiError(pub ExplorerError);

#[derive(Serialize)]
struct JsonErrorResponse {
    error: String,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            ExplorerError::UnknownConnectionId(_) | ExplorerError::BadRequest(_) => {
                StatusCode::BAD_REQUEST
            }
            ExplorerError::NotFound(_) => StatusCode::NOT_FOUND,
            ExplorerError::Dial(_) => StatusCode::BAD_GATEWAY,
            ExplorerError::UnsupportedDsn(_)
            | ExplorerError::Query(_)
            | ExplorerError::Config(_)
            | ExplorerError::Persistence(_)
            | ExplorerError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = self.0.to_string();

        if status.is_server_error() {
            error!("Returning error: {message} with status code: {status}");
        } else {
            debug!("Returning error: {message} with status code: {status}");
        }
        (status, Json(JsonErrorResponse { error: message })).into_response()
    }
}

impl From<ExplorerError> for ApiError {
    fn from(value: ExplorerError) -> Self {
        Self(value)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(value: JsonRejection) -> Self {
        Self(ExplorerError::bad_request(value.body_text()))
    }
}

impl From<PathRejection> for ApiError {
    fn from(value: PathRejection) -> Self {
        Self(ExplorerError::bad_request(value.body_text()))
    }
}

impl From<QueryRejection> for ApiError {
    fn from(value: QueryRejection) -> Self {
        Self(ExplorerError::bad_request(value.body_text()))
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;
