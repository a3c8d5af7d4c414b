//! In-memory stand-ins for the host and the calendar provider, shared by the
//! service tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::db::models::{SearchField, TimeField, TriggerRule};
use crate::error::{AppError, AppResult};
use crate::services::calendar::{CalendarEvent, EventCache, FetchedEvent};
use crate::services::evaluator::FiredTriggerHistory;
use crate::services::host::{DeviceStateStore, TriggerExecutor};
use crate::services::provider::{CalendarConnector, CalendarListEntry, CalendarProvider};

pub fn event(summary: &str, start: &str) -> CalendarEvent {
    CalendarEvent {
        start: start.to_string(),
        end: start.to_string(),
        summary: summary.to_lowercase(),
        status: "confirmed".to_string(),
        kind: "calendar#event".to_string(),
        ..Default::default()
    }
}

/// A fetched event keeps the provider's original casing.
pub fn fetched(id: &str, summary: &str, start: &str) -> FetchedEvent {
    let mut ev = event(summary, start);
    ev.summary = summary.to_string();
    FetchedEvent {
        id: id.to_string(),
        event: ev,
    }
}

pub fn rule(id: i64, phrase: &str, offset_minutes: i64) -> TriggerRule {
    TriggerRule {
        id,
        name: format!("rule {id}"),
        device_id: 1,
        search_phrase: phrase.to_lowercase(),
        search_field: SearchField::Summary,
        offset_minutes,
        time_field: TimeField::Start,
        variable_name: None,
        action_url: None,
        enabled: true,
    }
}

#[derive(Default)]
struct HostState {
    caches: HashMap<i64, EventCache>,
    histories: HashMap<i64, FiredTriggerHistory>,
    variables: HashMap<String, String>,
    executions: Vec<(i64, String)>,
    cache_loads: usize,
    history_saves: usize,
}

#[derive(Default)]
pub struct InMemoryHost {
    state: Mutex<HostState>,
    fail_executions: AtomicBool,
}

impl InMemoryHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a variable so `set_variable` may write it.
    pub fn with_variable(self, name: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .variables
            .insert(name.to_string(), String::new());
        self
    }

    pub fn seed_cache(&self, device_id: i64, cache: EventCache) {
        self.state.lock().unwrap().caches.insert(device_id, cache);
    }

    pub fn seed_history(&self, trigger_id: i64, history: FiredTriggerHistory) {
        self.state
            .lock()
            .unwrap()
            .histories
            .insert(trigger_id, history);
    }

    pub fn cache(&self, device_id: i64) -> EventCache {
        self.state
            .lock()
            .unwrap()
            .caches
            .get(&device_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn history(&self, trigger_id: i64) -> FiredTriggerHistory {
        self.state
            .lock()
            .unwrap()
            .histories
            .get(&trigger_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn variable(&self, name: &str) -> Option<String> {
        self.state
            .lock()
            .unwrap()
            .variables
            .get(name)
            .filter(|v| !v.is_empty())
            .cloned()
    }

    pub fn executions(&self) -> Vec<(i64, String)> {
        self.state.lock().unwrap().executions.clone()
    }

    pub fn cache_loads(&self) -> usize {
        self.state.lock().unwrap().cache_loads
    }

    pub fn history_saves(&self) -> usize {
        self.state.lock().unwrap().history_saves
    }

    pub fn fail_executions(&self, fail: bool) {
        self.fail_executions.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl DeviceStateStore for InMemoryHost {
    async fn load_event_cache(&self, device_id: i64) -> AppResult<EventCache> {
        let mut state = self.state.lock().unwrap();
        state.cache_loads += 1;
        Ok(state.caches.get(&device_id).cloned().unwrap_or_default())
    }

    async fn save_event_cache(&self, device_id: i64, cache: &EventCache) -> AppResult<()> {
        self.state
            .lock()
            .unwrap()
            .caches
            .insert(device_id, cache.clone());
        Ok(())
    }

    async fn load_fired_history(&self, trigger_id: i64) -> AppResult<FiredTriggerHistory> {
        Ok(self.history(trigger_id))
    }

    async fn save_fired_history(
        &self,
        trigger_id: i64,
        history: &FiredTriggerHistory,
    ) -> AppResult<()> {
        let mut state = self.state.lock().unwrap();
        state.history_saves += 1;
        state.histories.insert(trigger_id, history.clone());
        Ok(())
    }
}

#[async_trait]
impl TriggerExecutor for InMemoryHost {
    async fn execute_trigger(
        &self,
        rule: &TriggerRule,
        event_id: &str,
        _event: &CalendarEvent,
    ) -> AppResult<()> {
        if self.fail_executions.load(Ordering::SeqCst) {
            return Err(AppError::ServiceUnavailable("action failed".to_string()));
        }
        self.state
            .lock()
            .unwrap()
            .executions
            .push((rule.id, event_id.to_string()));
        Ok(())
    }

    async fn set_variable(&self, name: &str, value: &str) -> AppResult<()> {
        let mut state = self.state.lock().unwrap();
        match state.variables.get_mut(name) {
            Some(slot) => {
                *slot = value.to_string();
                Ok(())
            }
            None => Err(AppError::VariableWrite(format!(
                "Variable \"{}\" does not exist",
                name
            ))),
        }
    }
}

/// Failure a `StaticProvider` reproduces on every call.
#[derive(Debug, Clone)]
enum Failure {
    Remote(String),
    Auth(String),
}

impl Failure {
    fn from_error(err: AppError) -> Self {
        match err {
            AppError::Authorization(msg) => Failure::Auth(msg),
            other => Failure::Remote(other.to_string()),
        }
    }

    fn to_error(&self) -> AppError {
        match self {
            Failure::Remote(msg) => AppError::RemoteFetch(msg.clone()),
            Failure::Auth(msg) => AppError::Authorization(msg.clone()),
        }
    }
}

#[derive(Default)]
struct ProviderState {
    events: HashMap<String, Vec<FetchedEvent>>,
    default_events: Vec<FetchedEvent>,
    calendars: Vec<CalendarListEntry>,
    failure: Option<Failure>,
    requested: Vec<String>,
    calendar_list_calls: usize,
}

/// Provider returning canned data. Events set per calendar win over the default set.
#[derive(Default)]
pub struct StaticProvider {
    state: Mutex<ProviderState>,
}

impl StaticProvider {
    pub fn with_events(events: Vec<FetchedEvent>) -> Self {
        let provider = Self::default();
        provider.state.lock().unwrap().default_events = events;
        provider
    }

    pub fn failing(err: AppError) -> Self {
        let provider = Self::default();
        provider.set_failure(Some(err));
        provider
    }

    pub fn with_calendars(self, calendars: &[(&str, &str)]) -> Self {
        self.state.lock().unwrap().calendars = calendars
            .iter()
            .map(|(id, summary)| CalendarListEntry {
                id: id.to_string(),
                summary: summary.to_string(),
            })
            .collect();
        self
    }

    pub fn set_calendar_events(&self, calendar_id: &str, events: Vec<FetchedEvent>) {
        self.state
            .lock()
            .unwrap()
            .events
            .insert(calendar_id.to_string(), events);
    }

    pub fn set_failure(&self, err: Option<AppError>) {
        self.state.lock().unwrap().failure = err.map(Failure::from_error);
    }

    pub fn requested_calendars(&self) -> Vec<String> {
        self.state.lock().unwrap().requested.clone()
    }

    pub fn calendar_list_calls(&self) -> usize {
        self.state.lock().unwrap().calendar_list_calls
    }
}

#[async_trait]
impl CalendarProvider for StaticProvider {
    async fn list_calendars(&self) -> AppResult<Vec<CalendarListEntry>> {
        let mut state = self.state.lock().unwrap();
        state.calendar_list_calls += 1;
        if let Some(failure) = &state.failure {
            return Err(failure.to_error());
        }
        Ok(state.calendars.clone())
    }

    async fn list_events(
        &self,
        calendar_id: &str,
        _time_min: DateTime<Utc>,
        _time_max: DateTime<Utc>,
    ) -> AppResult<Vec<FetchedEvent>> {
        let mut state = self.state.lock().unwrap();
        state.requested.push(calendar_id.to_string());
        if let Some(failure) = &state.failure {
            return Err(failure.to_error());
        }
        Ok(state
            .events
            .get(calendar_id)
            .cloned()
            .unwrap_or_else(|| state.default_events.clone()))
    }
}

/// Connector handing out a shared `StaticProvider` once authorized.
pub struct StaticConnector {
    provider: Arc<StaticProvider>,
    authorized: AtomicBool,
    attempts: AtomicUsize,
    delay: Mutex<Option<std::time::Duration>>,
    attempted_at: Mutex<Vec<tokio::time::Instant>>,
}

impl StaticConnector {
    pub fn new(provider: Arc<StaticProvider>, authorized: bool) -> Self {
        StaticConnector {
            provider,
            authorized: AtomicBool::new(authorized),
            attempts: AtomicUsize::new(0),
            delay: Mutex::new(None),
            attempted_at: Mutex::new(Vec::new()),
        }
    }

    /// Make every `connect` take `delay` before answering.
    pub fn set_delay(&self, delay: std::time::Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    /// Tokio clock readings at the start of each `connect`.
    pub fn attempted_at(&self) -> Vec<tokio::time::Instant> {
        self.attempted_at.lock().unwrap().clone()
    }

    pub fn set_authorized(&self, authorized: bool) {
        self.authorized.store(authorized, Ordering::SeqCst);
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CalendarConnector for StaticConnector {
    async fn connect(&self) -> AppResult<Arc<dyn CalendarProvider>> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        self.attempted_at
            .lock()
            .unwrap()
            .push(tokio::time::Instant::now());
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if !self.authorized.load(Ordering::SeqCst) {
            return Err(AppError::Authorization("no stored credential".to_string()));
        }
        Ok(self.provider.clone())
    }
}
