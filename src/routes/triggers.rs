use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::db::models::{TriggerExecution, TriggerRule, TriggerRuleInput, ValidTriggerRule};
use crate::db::{
    CalendarDeviceRepository, FiredTriggerRepository, TriggerExecutionRepository,
    TriggerRuleRepository,
};
use crate::error::{AppError, AppResult};
use crate::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_triggers).post(create_trigger))
        .route("/:id", axum::routing::put(update_trigger).delete(delete_trigger))
        .route("/:id/history", get(get_history))
        .route("/:id/executions", get(list_executions))
}

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct TriggerResponse {
    #[serde(flatten)]
    pub rule: TriggerRule,
    pub running: bool,
}

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub trigger_id: i64,
    pub event_ids: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct ExecutionsQuery {
    pub limit: Option<i64>,
}

async fn find_rule(state: &AppState, id: i64) -> AppResult<TriggerRule> {
    let record = TriggerRuleRepository::find_by_id(&state.db, id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Trigger {} not found", id)))?;
    TriggerRule::try_from(record)
}

/// Validate the body and make sure its target device exists.
async fn validated(state: &AppState, input: TriggerRuleInput) -> AppResult<ValidTriggerRule> {
    let valid = input.validate()?;
    if CalendarDeviceRepository::find_by_id(&state.db, valid.device_id)
        .await?
        .is_none()
    {
        return Err(AppError::Validation(format!(
            "device_id: Unknown calendar device {}",
            valid.device_id
        )));
    }
    Ok(valid)
}

async fn respond(state: &AppState, rule: TriggerRule) -> TriggerResponse {
    let running = state.runtime.running_triggers().await.contains(&rule.id);
    TriggerResponse { rule, running }
}

// ============================================================================
// Handlers
// ============================================================================

async fn list_triggers(
    State(state): State<Arc<AppState>>,
) -> AppResult<Json<Vec<TriggerResponse>>> {
    let running = state.runtime.running_triggers().await;
    let mut triggers = Vec::new();
    for record in TriggerRuleRepository::list_all(&state.db).await? {
        let rule = TriggerRule::try_from(record)?;
        let running = running.contains(&rule.id);
        triggers.push(TriggerResponse { rule, running });
    }
    Ok(Json(triggers))
}

async fn create_trigger(
    State(state): State<Arc<AppState>>,
    Json(body): Json<TriggerRuleInput>,
) -> AppResult<(StatusCode, Json<TriggerResponse>)> {
    let valid = validated(&state, body).await?;
    let record = TriggerRuleRepository::create(&state.db, &valid).await?;
    let rule = TriggerRule::try_from(record)?;

    state.runtime.trigger_start(rule.clone()).await?;
    tracing::info!("Created trigger \"{}\"", rule.name);

    Ok((StatusCode::CREATED, Json(respond(&state, rule).await)))
}

/// Replace a trigger wholesale; its worker is restarted with the new rule.
async fn update_trigger(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(body): Json<TriggerRuleInput>,
) -> AppResult<Json<TriggerResponse>> {
    let valid = validated(&state, body).await?;
    let record = TriggerRuleRepository::replace(&state.db, id, &valid)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Trigger {} not found", id)))?;
    let rule = TriggerRule::try_from(record)?;

    state.runtime.trigger_start(rule.clone()).await?;

    Ok(Json(respond(&state, rule).await))
}

async fn delete_trigger(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> AppResult<StatusCode> {
    state.runtime.trigger_stop(id).await?;
    if !TriggerRuleRepository::delete(&state.db, id).await? {
        return Err(AppError::NotFound(format!("Trigger {} not found", id)));
    }
    Ok(StatusCode::NO_CONTENT)
}

async fn get_history(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> AppResult<Json<HistoryResponse>> {
    let rule = find_rule(&state, id).await?;
    let event_ids = FiredTriggerRepository::load(&state.db, rule.id).await?;
    Ok(Json(HistoryResponse {
        trigger_id: rule.id,
        event_ids,
    }))
}

async fn list_executions(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Query(query): Query<ExecutionsQuery>,
) -> AppResult<Json<Vec<TriggerExecution>>> {
    let rule = find_rule(&state, id).await?;
    let limit = query.limit.unwrap_or(50).clamp(1, 500);
    let executions = TriggerExecutionRepository::list_for_trigger(&state.db, rule.id, limit).await?;
    Ok(Json(executions))
}
