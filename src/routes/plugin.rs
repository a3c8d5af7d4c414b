use std::sync::Arc;

use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;

use crate::db::{PluginPrefsRepository, DEBUG_LOGGING_KEY};
use crate::error::AppResult;
use crate::services::runtime::RuntimeStatus;
use crate::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/status", get(get_status))
        .route("/debug/toggle", post(toggle_debug))
}

#[derive(Debug, Serialize)]
pub struct PluginStatusResponse {
    #[serde(flatten)]
    pub runtime: RuntimeStatus,
    pub debug: bool,
    pub poll_interval_seconds: u64,
}

#[derive(Debug, Serialize)]
pub struct DebugResponse {
    pub debug: bool,
}

async fn get_status(State(state): State<Arc<AppState>>) -> Json<PluginStatusResponse> {
    Json(PluginStatusResponse {
        runtime: state.runtime.status().await,
        debug: state.log_control.is_debug(),
        poll_interval_seconds: state.config.scheduler.tick_seconds,
    })
}

/// Flip debug logging and remember the choice across restarts.
async fn toggle_debug(State(state): State<Arc<AppState>>) -> AppResult<Json<DebugResponse>> {
    let debug = !state.log_control.is_debug();
    state.log_control.set_debug(debug)?;
    PluginPrefsRepository::set_flag(&state.db, DEBUG_LOGGING_KEY, debug).await?;
    Ok(Json(DebugResponse { debug }))
}
