use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::error::AppResult;
use crate::services::host::DeviceStateStore;
use crate::services::provider::CalendarProvider;

/// A cached calendar event. Field names follow the provider's wire names so the
/// persisted document stays readable next to the API response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarEvent {
    /// Timestamp (with or without offset) or date-only string for all-day events.
    pub start: String,
    pub end: String,
    pub summary: String,
    pub description: String,
    pub status: String,
    pub kind: String,
    #[serde(rename = "htmlLink")]
    pub html_link: String,
    pub updated: String,
    #[serde(rename = "iCalUID")]
    pub ical_uid: String,
}

impl CalendarEvent {
    /// Text fields are stored lowercased so matching is case-insensitive.
    pub fn normalized(mut self) -> Self {
        self.summary = self.summary.to_lowercase();
        self.description = self.description.to_lowercase();
        self
    }
}

/// An event as returned by one fetch, keyed by the provider-assigned ID.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedEvent {
    pub id: String,
    pub event: CalendarEvent,
}

/// Complete mirror of one calendar's fetch window, plus download metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventCache {
    pub events: BTreeMap<String, CalendarEvent>,
    pub event_count: usize,
    pub last_download: Option<DateTime<Utc>>,
    pub online: bool,
}

impl EventCache {
    pub fn contains(&self, event_id: &str) -> bool {
        self.events.contains_key(event_id)
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

/// Merge a complete fetch batch into `previous`, producing the next cache.
///
/// New IDs are inserted, known IDs are overwritten wholesale and IDs missing from
/// the batch are dropped. The result is a new object; `previous` is never touched,
/// so readers holding it keep a consistent view.
pub fn reconcile(
    previous: &EventCache,
    batch: Vec<FetchedEvent>,
    fetched_at: DateTime<Utc>,
) -> EventCache {
    let mut events = previous.events.clone();
    let mut seen: HashSet<String> = HashSet::with_capacity(batch.len());

    for fetched in batch {
        seen.insert(fetched.id.clone());
        events.insert(fetched.id, fetched.event.normalized());
    }

    events.retain(|id, _| seen.contains(id));

    EventCache {
        event_count: events.len(),
        events,
        last_download: Some(fetched_at),
        online: true,
    }
}

/// Result of a failed fetch: cached events and metadata are kept, only the online
/// flag drops.
pub fn mark_offline(previous: &EventCache) -> EventCache {
    EventCache {
        online: false,
        ..previous.clone()
    }
}

/// Time range requested from the provider on every refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchWindow {
    pub look_back: Duration,
    pub look_ahead: Duration,
}

impl FetchWindow {
    pub fn from_days(look_back_days: i64, look_ahead_days: i64) -> Self {
        FetchWindow {
            look_back: Duration::days(look_back_days),
            look_ahead: Duration::days(look_ahead_days),
        }
    }

    pub fn bounds(&self, now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
        (now - self.look_back, now + self.look_ahead)
    }
}

impl Default for FetchWindow {
    fn default() -> Self {
        FetchWindow::from_days(7, 30)
    }
}

/// A configured calendar device: one remote calendar mirrored into one cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalendarDevice {
    pub id: i64,
    pub name: String,
    pub calendar_id: String,
}

impl CalendarDevice {
    /// Fetch the window around `now` and reconcile it into the stored cache.
    ///
    /// The cache is persisted after every attempt. On a fetch failure the stored
    /// events are left as they were, the device goes offline and the error is
    /// returned to the caller.
    pub async fn refresh(
        &self,
        provider: &dyn CalendarProvider,
        store: &dyn DeviceStateStore,
        window: FetchWindow,
        now: DateTime<Utc>,
    ) -> AppResult<EventCache> {
        let previous = store.load_event_cache(self.id).await?;
        let (time_min, time_max) = window.bounds(now);

        match provider
            .list_events(&self.calendar_id, time_min, time_max)
            .await
        {
            Ok(batch) => {
                let next = reconcile(&previous, batch, Utc::now());
                store.save_event_cache(self.id, &next).await?;
                info!(
                    "Successfully updated calendar device \"{}\" ({} events)",
                    self.name, next.event_count
                );
                Ok(next)
            }
            Err(e) => {
                error!("Failed to update calendar device \"{}\": {}", self.name, e);
                let offline = mark_offline(&previous);
                if let Err(save_err) = store.save_event_cache(self.id, &offline).await {
                    error!(
                        "Failed to persist offline state for calendar device \"{}\": {:?}",
                        self.name, save_err
                    );
                }
                Err(e)
            }
        }
    }
}
