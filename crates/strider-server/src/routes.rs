use std::sync::Arc;

use axum::extract::State;
use axum::middleware;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};

use crate::auth::require_api_key;
use crate::dto::{HealthResponse, IdleResponse, StatusResponse};
use crate::error::ApiError;
use crate::state::AppState;

/// Build the full router with all routes and middleware.
pub fn router(state: Arc<AppState>) -> Router {
    let api = Router::new()
        .route("/v1/status", get(status))
        .route("/v1/summary", get(summary))
        .route("/v1/idle", get(idle))
        .route("/v1/stop", post(stop))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            require_api_key,
        ));

    let public = Router::new().route("/health", get(health));

    public.merge(api).with_state(state)
}

pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy",
        scheduler: state.scheduler.status().to_string(),
    })
}

pub async fn status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(StatusResponse {
        status: state.scheduler.status().to_string(),
    })
}

pub async fn summary(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.scheduler.summary())
}

pub async fn idle(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(IdleResponse {
        idle: state.scheduler.idle(),
        status: state.scheduler.status().to_string(),
    })
}

pub async fn stop(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, ApiError> {
    state.scheduler.stop()?;
    tracing::info!("Scheduler stopped through the API");
    Ok(Json(StatusResponse {
        status: state.scheduler.status().to_string(),
    }))
}
