use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use strider_core::{CrawlerError, ErrorKind};

use crate::dto::ErrorResponse;

/// Wrapper so we can implement `IntoResponse` for `CrawlerError`.
#[derive(Debug)]
pub struct ApiError(pub CrawlerError);

impl From<CrawlerError> for ApiError {
    fn from(err: CrawlerError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_type) = match &self.0 {
            // lifecycle transition refused by the status machine
            CrawlerError::Domain {
                kind: ErrorKind::Scheduler,
                ..
            } => (StatusCode::CONFLICT, "invalid_state"),
            CrawlerError::IllegalParameter(_) => (StatusCode::BAD_REQUEST, "illegal_parameter"),
            CrawlerError::ModuleNotFound(_) => (StatusCode::SERVICE_UNAVAILABLE, "module_not_found"),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        };

        let body = ErrorResponse::new(error_type, self.0.to_string());
        (status, axum::Json(body)).into_response()
    }
}
