//! Calendar data provider seam.
//!
//! The scheduler only ever talks to a remote calendar through these traits, so the
//! HTTP adapter in `services::google` can be swapped for a test double.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AppResult;
use crate::services::calendar::FetchedEvent;

/// One entry of the account's calendar list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarListEntry {
    pub id: String,
    pub summary: String,
}

#[async_trait]
pub trait CalendarProvider: Send + Sync {
    /// All calendars visible to the authorized account.
    async fn list_calendars(&self) -> AppResult<Vec<CalendarListEntry>>;

    /// Events of one calendar overlapping `[time_min, time_max]`, recurring events
    /// expanded into single instances.
    async fn list_events(
        &self,
        calendar_id: &str,
        time_min: DateTime<Utc>,
        time_max: DateTime<Utc>,
    ) -> AppResult<Vec<FetchedEvent>>;
}

/// Produces an initialized provider, or an authorization error when no valid
/// credentials are available.
#[async_trait]
pub trait CalendarConnector: Send + Sync {
    async fn connect(&self) -> AppResult<Arc<dyn CalendarProvider>>;
}
