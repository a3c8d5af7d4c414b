use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::error::{AppError, AppResult};
use crate::services::calendar::{CalendarDevice, EventCache};

// ============================================================================
// Calendar Device Models
// ============================================================================

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct CalendarDeviceRecord {
    pub id: i64,
    pub name: String,
    pub calendar_id: String,
    /// JSON map of event ID to cached event.
    pub event_data: String,
    pub event_count: i64,
    pub last_download: Option<DateTime<Utc>>,
    pub online: bool,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl CalendarDeviceRecord {
    pub fn device(&self) -> CalendarDevice {
        CalendarDevice {
            id: self.id,
            name: self.name.clone(),
            calendar_id: self.calendar_id.clone(),
        }
    }

    pub fn event_cache(&self) -> AppResult<EventCache> {
        Ok(EventCache {
            events: serde_json::from_str(&self.event_data)?,
            event_count: usize::try_from(self.event_count).unwrap_or_default(),
            last_download: self.last_download,
            online: self.online,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateCalendarDevice {
    pub name: Option<String>,
    pub calendar_id: Option<String>,
}

impl CreateCalendarDevice {
    /// Returns `(name, calendar_id)`; a device without a calendar ID is rejected.
    pub fn validate(self) -> AppResult<(String, String)> {
        let calendar_id = self
            .calendar_id
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| AppError::Validation("calendar_id: Required".to_string()))?;

        let name = self
            .name
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| calendar_id.clone());

        Ok((name, calendar_id))
    }
}
