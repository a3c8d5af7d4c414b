//! Cooperative poll loop driving the whole plugin.
//!
//! Each tick runs, in order: provider initialization (rate limited after a
//! failure), calendar list refresh, refresh of stale devices, and an evaluation
//! signal to every running trigger. The loop then sleeps for whatever is left of
//! the tick.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::SchedulerConfig;
use crate::services::provider::CalendarConnector;
use crate::services::runtime::PluginRuntime;

#[derive(Debug, Clone, Copy)]
pub struct SchedulerSettings {
    pub tick: Duration,
    pub auth_retry: chrono::Duration,
    pub calendar_refresh: chrono::Duration,
    pub device_max_age: chrono::Duration,
}

impl SchedulerSettings {
    pub fn from_config(config: &SchedulerConfig) -> Self {
        SchedulerSettings {
            tick: Duration::from_secs(config.tick_seconds),
            auth_retry: chrono::Duration::minutes(config.auth_retry_minutes as i64),
            calendar_refresh: chrono::Duration::hours(config.calendar_list_refresh_hours as i64),
            device_max_age: chrono::Duration::minutes(config.device_refresh_minutes as i64),
        }
    }
}

/// What one tick did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub init_attempted: bool,
    pub initialized: bool,
    pub calendars_refreshed: bool,
    pub devices_refreshed: Vec<i64>,
    pub devices_failed: Vec<i64>,
    pub triggers_signalled: usize,
}

pub struct PollScheduler {
    runtime: Arc<PluginRuntime>,
    connector: Arc<dyn CalendarConnector>,
    settings: SchedulerSettings,
    last_auth_attempt: Option<DateTime<Utc>>,
    last_calendar_refresh: Option<DateTime<Utc>>,
}

impl PollScheduler {
    pub fn new(
        runtime: Arc<PluginRuntime>,
        connector: Arc<dyn CalendarConnector>,
        settings: SchedulerSettings,
    ) -> Self {
        PollScheduler {
            runtime,
            connector,
            settings,
            last_auth_attempt: None,
            last_calendar_refresh: None,
        }
    }

    fn due(last: Option<DateTime<Utc>>, now: DateTime<Utc>, every: chrono::Duration) -> bool {
        last.map_or(true, |at| now - at >= every)
    }

    pub async fn tick(&mut self, now: DateTime<Utc>) -> TickReport {
        let mut report = TickReport::default();

        if !self.runtime.is_initialized().await
            && Self::due(self.last_auth_attempt, now, self.settings.auth_retry)
        {
            report.init_attempted = true;
            self.last_auth_attempt = Some(now);
            match self.connector.connect().await {
                Ok(provider) => {
                    info!("Calendar account initialized");
                    self.runtime.set_provider(Some(provider)).await;
                    self.last_calendar_refresh = None;
                }
                Err(e) => warn!(
                    "Calendar account initialization failed, retrying in {} minutes: {}",
                    self.settings.auth_retry.num_minutes(),
                    e
                ),
            }
        }

        if let Some(provider) = self.runtime.provider().await {
            if Self::due(self.last_calendar_refresh, now, self.settings.calendar_refresh) {
                match provider.list_calendars().await {
                    Ok(calendars) => {
                        info!("Loaded {} available calendars", calendars.len());
                        self.runtime.set_calendars(calendars).await;
                        self.last_calendar_refresh = Some(now);
                        report.calendars_refreshed = true;
                    }
                    Err(e) if e.is_authorization() => {
                        warn!("Calendar list rejected credentials: {}", e);
                        self.runtime.set_provider(None).await;
                        self.last_auth_attempt = Some(now);
                    }
                    Err(e) => warn!("Failed to load calendar list: {}", e),
                }
            }
        }

        if self.runtime.is_initialized().await {
            for device_id in self
                .runtime
                .devices_due(now, self.settings.device_max_age)
                .await
            {
                match self.runtime.refresh_device(device_id, now).await {
                    Ok(_) => report.devices_refreshed.push(device_id),
                    Err(e) => {
                        report.devices_failed.push(device_id);
                        if e.is_authorization() {
                            self.last_auth_attempt = Some(now);
                            break;
                        }
                    }
                }
            }
        }

        report.initialized = self.runtime.is_initialized().await;
        report.triggers_signalled = self.runtime.signal_all().await;
        report
    }

    /// Tick until a shutdown signal arrives.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            "Poll scheduler started (tick every {}s)",
            self.settings.tick.as_secs()
        );

        loop {
            let started = Instant::now();
            let report = self.tick(Utc::now()).await;
            debug!("Scheduler tick: {:?}", report);

            let remaining = self.settings.tick.saturating_sub(started.elapsed());
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("Poll scheduler shutting down");
                    break;
                }
                _ = tokio::time::sleep(remaining) => {}
            }
        }
    }
}
