use strider_core::Scheduler;

/// Shared application state, available to all route handlers via `State<Arc<AppState>>`.
pub struct AppState {
    pub scheduler: Scheduler,
    /// Bearer token protecting the `/v1` endpoints (None = those endpoints are disabled).
    pub api_key: Option<String>,
}
