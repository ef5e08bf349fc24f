use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use tracing::{error, warn};

use crate::error::Text2SqlError;

/// Handler error carrying a domain error; renders as `{kind, message}`.
#[derive(Debug)]
pub struct ApiError(pub Text2SqlError);

impl From<Text2SqlError> for ApiError {
    fn from(e: Text2SqlError) -> Self {
        ApiError(e)
    }
}

pub fn status_for(err: &Text2SqlError) -> StatusCode {
    match err {
        e if e.is_invalid_input() => StatusCode::BAD_REQUEST,
        Text2SqlError::NoExamplesProvided { .. }
        | Text2SqlError::PromptTypeNotFound(_)
        | Text2SqlError::Config(_) => StatusCode::BAD_REQUEST,
        Text2SqlError::InvalidDatabasePath(_) => StatusCode::NOT_FOUND,
        Text2SqlError::ApiFailure { .. } => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        if status.is_server_error() {
            error!("Request failed: {}", self.0);
        } else {
            warn!("Request rejected: {}", self.0);
        }
        (status, Json(self.0.to_body())).into_response()
    }
}
