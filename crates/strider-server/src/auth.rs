use std::sync::Arc;

use axum::extract::State;
use axum::http::{Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use subtle::ConstantTimeEq;

use crate::dto::ErrorResponse;
use crate::state::AppState;

/// Middleware that validates `Authorization: Bearer <token>` against the configured API key.
///
/// Without a configured key the protected endpoints answer 403.
pub async fn require_api_key(
    State(state): State<Arc<AppState>>,
    request: Request<axum::body::Body>,
    next: Next,
) -> Response {
    let Some(api_key) = state.api_key.as_deref() else {
        let body = ErrorResponse::new(
            "forbidden",
            "Control endpoints are disabled: no API key configured",
        );
        return (StatusCode::FORBIDDEN, axum::Json(body)).into_response();
    };

    let authenticated = request
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|header| header.strip_prefix("Bearer "))
        .is_some_and(|token| bool::from(token.as_bytes().ct_eq(api_key.as_bytes())));

    if !authenticated {
        let body = ErrorResponse::new(
            "unauthorized",
            "Missing or invalid Authorization header. Expected: Bearer <api_key>",
        );
        return (StatusCode::UNAUTHORIZED, axum::Json(body)).into_response();
    }

    next.run(request).await
}
