use std::sync::Arc;

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;

use crate::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub timestamp: String,
    /// Whether the calendar account is currently initialized.
    pub account_online: bool,
}

pub async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let response = HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
        account_online: state.runtime.is_initialized().await,
    };

    (StatusCode::OK, Json(response))
}

#[cfg(test)]
mod tests {
    use crate::routes::test_support::{request, test_app};
    use axum::http::StatusCode;

    #[tokio::test]
    async fn health_reports_account_state() {
        let (app, _state) = test_app().await;
        let (status, body) = request(&app, "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["account_online"], false);
    }
}
