use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::db::models::{CalendarDeviceRecord, CreateCalendarDevice};
use crate::db::{CalendarDeviceRepository, TriggerRuleRepository};
use crate::error::{AppError, AppResult};
use crate::services::calendar::{CalendarEvent, EventCache};
use crate::services::provider::CalendarListEntry;
use crate::AppState;

pub fn calendars_router() -> Router<Arc<AppState>> {
    Router::new().route("/", get(list_calendars))
}

pub fn devices_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_devices).post(create_device))
        .route("/:id", get(get_device).delete(delete_device))
        .route("/:id/refresh", post(refresh_device))
}

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct DeviceResponse {
    pub id: i64,
    pub name: String,
    pub calendar_id: String,
    pub event_count: usize,
    pub last_download: Option<DateTime<Utc>>,
    pub online: bool,
}

impl DeviceResponse {
    fn new(record: &CalendarDeviceRecord, cache: &EventCache) -> Self {
        DeviceResponse {
            id: record.id,
            name: record.name.clone(),
            calendar_id: record.calendar_id.clone(),
            event_count: cache.event_count,
            last_download: cache.last_download,
            online: cache.online,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct DeviceDetailResponse {
    #[serde(flatten)]
    pub device: DeviceResponse,
    pub events: BTreeMap<String, CalendarEvent>,
}

async fn find_device(state: &AppState, id: i64) -> AppResult<CalendarDeviceRecord> {
    CalendarDeviceRepository::find_by_id(&state.db, id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Calendar device {} not found", id)))
}

// ============================================================================
// Handlers
// ============================================================================

/// Calendars visible to the authorized account, as of the last list refresh.
async fn list_calendars(
    State(state): State<Arc<AppState>>,
) -> AppResult<Json<Vec<CalendarListEntry>>> {
    if !state.runtime.is_initialized().await {
        return Err(AppError::Authorization(
            "Calendar account is offline".to_string(),
        ));
    }
    Ok(Json(state.runtime.calendars().await))
}

async fn list_devices(State(state): State<Arc<AppState>>) -> AppResult<Json<Vec<DeviceResponse>>> {
    let records = CalendarDeviceRepository::list_all(&state.db).await?;
    let mut devices = Vec::with_capacity(records.len());
    for record in &records {
        devices.push(DeviceResponse::new(record, &record.event_cache()?));
    }
    Ok(Json(devices))
}

async fn create_device(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateCalendarDevice>,
) -> AppResult<(StatusCode, Json<DeviceResponse>)> {
    let (name, calendar_id) = body.validate()?;
    let record = CalendarDeviceRepository::create(&state.db, &name, &calendar_id).await?;
    state.runtime.device_start(record.device()).await;

    let cache = record.event_cache()?;
    Ok((StatusCode::CREATED, Json(DeviceResponse::new(&record, &cache))))
}

async fn get_device(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> AppResult<Json<DeviceDetailResponse>> {
    let record = find_device(&state, id).await?;
    let cache = record.event_cache()?;
    Ok(Json(DeviceDetailResponse {
        device: DeviceResponse::new(&record, &cache),
        events: cache.events,
    }))
}

/// Stop the device and every trigger targeting it, then delete them.
async fn delete_device(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> AppResult<StatusCode> {
    find_device(&state, id).await?;

    for trigger in TriggerRuleRepository::find_by_device(&state.db, id).await? {
        state.runtime.trigger_stop(trigger.id).await?;
    }
    state.runtime.device_stop(id).await;
    CalendarDeviceRepository::delete(&state.db, id).await?;

    Ok(StatusCode::NO_CONTENT)
}

/// Refresh the device now and mark its triggers for re-evaluation.
async fn refresh_device(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> AppResult<Json<DeviceResponse>> {
    let record = find_device(&state, id).await?;
    let cache = state.runtime.refresh_device(id, Utc::now()).await?;
    Ok(Json(DeviceResponse::new(&record, &cache)))
}
