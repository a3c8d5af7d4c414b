//! Registry of running calendar devices and trigger workers.
//!
//! Devices and triggers are started and stopped through lifecycle hooks invoked at
//! startup and by the admin API. The scheduler drives everything else through the
//! runtime: which devices are due, refreshing them, and signalling triggers.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::config::SchedulerConfig;
use crate::db::models::TriggerRule;
use crate::error::{AppError, AppResult};
use crate::services::calendar::{CalendarDevice, EventCache, FetchWindow};
use crate::services::evaluator::{FiredTriggerHistory, LocalZone, TriggerEvaluator};
use crate::services::host::{DeviceStateStore, TriggerExecutor};
use crate::services::provider::{CalendarListEntry, CalendarProvider};
use crate::services::trigger_worker::{TriggerHandle, WorkerContext};

#[derive(Debug, Clone, Copy)]
pub struct RuntimeSettings {
    pub queue_wait: Duration,
    pub window: FetchWindow,
    pub evaluator: TriggerEvaluator,
}

impl RuntimeSettings {
    pub fn from_config(config: &SchedulerConfig) -> Self {
        RuntimeSettings {
            queue_wait: Duration::from_secs(config.queue_wait_seconds),
            window: FetchWindow::from_days(config.look_back_days, config.look_ahead_days),
            evaluator: TriggerEvaluator::new(config.too_late_minutes, LocalZone::System),
        }
    }
}

struct DeviceEntry {
    device: CalendarDevice,
    last_success: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeviceStatus {
    pub id: i64,
    pub name: String,
    pub calendar_id: String,
    pub last_success: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RuntimeStatus {
    pub initialized: bool,
    pub calendars: usize,
    pub devices: Vec<DeviceStatus>,
    pub triggers: Vec<i64>,
}

pub struct PluginRuntime {
    store: Arc<dyn DeviceStateStore>,
    executor: Arc<dyn TriggerExecutor>,
    settings: RuntimeSettings,
    devices: RwLock<HashMap<i64, DeviceEntry>>,
    triggers: Mutex<HashMap<i64, TriggerHandle>>,
    provider: RwLock<Option<Arc<dyn CalendarProvider>>>,
    calendars: RwLock<Vec<CalendarListEntry>>,
}

impl PluginRuntime {
    pub fn new(
        store: Arc<dyn DeviceStateStore>,
        executor: Arc<dyn TriggerExecutor>,
        settings: RuntimeSettings,
    ) -> Self {
        PluginRuntime {
            store,
            executor,
            settings,
            devices: RwLock::new(HashMap::new()),
            triggers: Mutex::new(HashMap::new()),
            provider: RwLock::new(None),
            calendars: RwLock::new(Vec::new()),
        }
    }

    fn worker_context(&self) -> WorkerContext {
        WorkerContext {
            store: self.store.clone(),
            executor: self.executor.clone(),
            evaluator: self.settings.evaluator,
            queue_wait: self.settings.queue_wait,
        }
    }

    // ------------------------------------------------------------------
    // Provider
    // ------------------------------------------------------------------

    pub async fn set_provider(&self, provider: Option<Arc<dyn CalendarProvider>>) {
        *self.provider.write().await = provider;
    }

    pub async fn provider(&self) -> Option<Arc<dyn CalendarProvider>> {
        self.provider.read().await.clone()
    }

    pub async fn is_initialized(&self) -> bool {
        self.provider.read().await.is_some()
    }

    pub async fn set_calendars(&self, calendars: Vec<CalendarListEntry>) {
        *self.calendars.write().await = calendars;
    }

    pub async fn calendars(&self) -> Vec<CalendarListEntry> {
        self.calendars.read().await.clone()
    }

    // ------------------------------------------------------------------
    // Devices
    // ------------------------------------------------------------------

    /// Register a device. It is refreshed on the next scheduler tick.
    pub async fn device_start(&self, device: CalendarDevice) {
        info!(
            "Starting calendar device \"{}\" ({})",
            device.name, device.calendar_id
        );
        self.devices.write().await.insert(
            device.id,
            DeviceEntry {
                device,
                last_success: None,
            },
        );
    }

    pub async fn device_stop(&self, device_id: i64) -> bool {
        match self.devices.write().await.remove(&device_id) {
            Some(entry) => {
                info!("Stopped calendar device \"{}\"", entry.device.name);
                true
            }
            None => false,
        }
    }

    /// Running devices whose last successful refresh is older than `max_age`, or
    /// that were never refreshed.
    pub async fn devices_due(&self, now: DateTime<Utc>, max_age: chrono::Duration) -> Vec<i64> {
        let devices = self.devices.read().await;
        let mut due: Vec<i64> = devices
            .iter()
            .filter(|(_, entry)| match entry.last_success {
                Some(at) => now - at > max_age,
                None => true,
            })
            .map(|(id, _)| *id)
            .collect();
        due.sort_unstable();
        due
    }

    /// Fetch and merge one device, then mark its triggers dirty.
    ///
    /// An authorization failure drops the provider so the scheduler re-initializes.
    pub async fn refresh_device(&self, device_id: i64, now: DateTime<Utc>) -> AppResult<EventCache> {
        let device = self
            .devices
            .read()
            .await
            .get(&device_id)
            .map(|entry| entry.device.clone())
            .ok_or_else(|| {
                AppError::NotFound(format!("Calendar device {} is not running", device_id))
            })?;

        let provider = self.provider().await.ok_or_else(|| {
            AppError::Authorization("Calendar account is not initialized".to_string())
        })?;

        let result = device
            .refresh(provider.as_ref(), self.store.as_ref(), self.settings.window, now)
            .await;

        match &result {
            Ok(_) => {
                if let Some(entry) = self.devices.write().await.get_mut(&device_id) {
                    entry.last_success = Some(now);
                }
            }
            Err(e) if e.is_authorization() => {
                warn!("Calendar authorization lost while refreshing \"{}\"", device.name);
                self.set_provider(None).await;
            }
            Err(_) => {}
        }

        self.mark_device_triggers_dirty(device_id).await;
        result
    }

    // ------------------------------------------------------------------
    // Triggers
    // ------------------------------------------------------------------

    /// Start a worker for `rule`, replacing any worker already running for its ID.
    /// Disabled rules are only stopped.
    pub async fn trigger_start(&self, rule: TriggerRule) -> AppResult<()> {
        self.trigger_stop(rule.id).await?;

        if !rule.enabled {
            debug!("Trigger \"{}\" is disabled, not starting", rule.name);
            return Ok(());
        }

        let history = self.store.load_fired_history(rule.id).await?;
        let handle = TriggerHandle::spawn(rule, history, self.worker_context());
        handle.queue_evaluation();

        let previous = self.triggers.lock().await.insert(handle.rule().id, handle);
        if let Some(previous) = previous {
            // Lost a race with a concurrent start for the same rule.
            let id = previous.rule().id;
            self.persist_stopped(id, previous.stop().await).await;
        }
        Ok(())
    }

    /// Stop the worker for `trigger_id` and persist its history.
    /// Returns `false` if no worker was running.
    pub async fn trigger_stop(&self, trigger_id: i64) -> AppResult<bool> {
        let Some(handle) = self.triggers.lock().await.remove(&trigger_id) else {
            return Ok(false);
        };
        let history = handle.stop().await?;
        self.store.save_fired_history(trigger_id, &history).await?;
        Ok(true)
    }

    pub async fn running_triggers(&self) -> Vec<i64> {
        let mut ids: Vec<i64> = self.triggers.lock().await.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub async fn mark_device_triggers_dirty(&self, device_id: i64) {
        for handle in self.triggers.lock().await.values() {
            if handle.rule().device_id == device_id {
                handle.mark_dirty();
            }
        }
    }

    /// Ask every running trigger to evaluate. Returns how many were signalled.
    pub async fn signal_all(&self) -> usize {
        let triggers = self.triggers.lock().await;
        let mut signalled = 0;
        for handle in triggers.values() {
            if handle.queue_evaluation() {
                signalled += 1;
            } else {
                warn!("Trigger \"{}\" worker is no longer running", handle.rule().name);
            }
        }
        signalled
    }

    async fn persist_stopped(&self, trigger_id: i64, stopped: AppResult<FiredTriggerHistory>) {
        match stopped {
            Ok(history) => {
                if let Err(e) = self.store.save_fired_history(trigger_id, &history).await {
                    error!("Failed to persist history of trigger {}: {}", trigger_id, e);
                }
            }
            Err(e) => error!("{}", e),
        }
    }

    /// Stop every worker, waiting for each, and flush their histories.
    pub async fn shutdown(&self) {
        let handles: Vec<(i64, TriggerHandle)> = self.triggers.lock().await.drain().collect();
        info!("Stopping {} trigger workers", handles.len());

        let stopped = join_all(
            handles
                .into_iter()
                .map(|(id, handle)| async move { (id, handle.stop().await) }),
        )
        .await;

        for (id, result) in stopped {
            self.persist_stopped(id, result).await;
        }

        self.devices.write().await.clear();
        self.set_provider(None).await;
    }

    pub async fn status(&self) -> RuntimeStatus {
        let mut devices: Vec<DeviceStatus> = self
            .devices
            .read()
            .await
            .values()
            .map(|entry| DeviceStatus {
                id: entry.device.id,
                name: entry.device.name.clone(),
                calendar_id: entry.device.calendar_id.clone(),
                last_success: entry.last_success,
            })
            .collect();
        devices.sort_by_key(|d| d.id);

        RuntimeStatus {
            initialized: self.is_initialized().await,
            calendars: self.calendars.read().await.len(),
            devices,
            triggers: self.running_triggers().await,
        }
    }
}
