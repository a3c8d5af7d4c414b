//! Initialization helpers for the application:
//! - database connection + migrations
//! - restoring configured devices and triggers into the runtime
//! - spawning the poll scheduler

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::db::models::TriggerRule;
use crate::db::{CalendarDeviceRepository, TriggerRuleRepository};
use crate::services::provider::CalendarConnector;
use crate::services::runtime::PluginRuntime;
use crate::services::scheduler::{PollScheduler, SchedulerSettings};

/// Open the SQLite pool and run migrations.
///
/// The parent directory of the database file is created when missing.
pub async fn init_db(config: &Config) -> Result<sqlx::SqlitePool> {
    let db_url = &config.database.url;
    let db_path = db_url
        .strip_prefix("sqlite://")
        .or_else(|| db_url.strip_prefix("sqlite:"))
        .unwrap_or(db_url);
    let db_file_path = Path::new(db_path);
    tracing::info!("Opening database: {}", db_file_path.display());

    if let Some(parent) = db_file_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| {
                anyhow::anyhow!(
                    "Failed to create database directory {}: {}",
                    parent.display(),
                    e
                )
            })?;
        }
    }

    let connect_options = sqlx::sqlite::SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .foreign_keys(true);

    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(config.database.max_connections)
        .connect_with(connect_options)
        .await?;

    tracing::info!("Running database migrations");
    sqlx::migrate!("./migrations").run(&pool).await?;

    Ok(pool)
}

/// Start every stored device and every enabled trigger.
///
/// A trigger that fails to start is logged and skipped.
pub async fn restore_runtime(pool: &sqlx::SqlitePool, runtime: &PluginRuntime) -> Result<()> {
    let devices = CalendarDeviceRepository::list_all(pool).await?;
    for record in &devices {
        runtime.device_start(record.device()).await;
    }

    let mut started = 0usize;
    for record in TriggerRuleRepository::list_all(pool).await? {
        let rule = match TriggerRule::try_from(record) {
            Ok(rule) => rule,
            Err(e) => {
                tracing::warn!("Skipping invalid stored trigger: {}", e);
                continue;
            }
        };
        if !rule.enabled {
            continue;
        }
        let name = rule.name.clone();
        match runtime.trigger_start(rule).await {
            Ok(()) => started += 1,
            Err(e) => tracing::warn!("Failed to start trigger \"{}\": {}", name, e),
        }
    }

    tracing::info!(
        "Restored {} calendar devices and {} triggers",
        devices.len(),
        started
    );
    Ok(())
}

/// Spawn the poll scheduler. It exits when `shutdown` fires.
pub fn spawn_scheduler(
    config: &Config,
    runtime: Arc<PluginRuntime>,
    connector: Arc<dyn CalendarConnector>,
    shutdown: &broadcast::Sender<()>,
) -> JoinHandle<()> {
    let scheduler = PollScheduler::new(
        runtime,
        connector,
        SchedulerSettings::from_config(&config.scheduler),
    );
    let shutdown_rx = shutdown.subscribe();
    tokio::spawn(scheduler.run(shutdown_rx))
}
