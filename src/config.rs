use std::env;
use std::ops::RangeInclusive;
use std::str::FromStr;

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub google: GoogleConfig,
    pub scheduler: SchedulerConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GoogleConfig {
    /// Base URL of the Calendar v3 API. Overridable so tests and proxies can stand in.
    pub api_base_url: String,
    /// JSON file holding an already authorized access token.
    pub credentials_path: String,
    pub request_timeout_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    /// Length of one scheduler tick.
    pub tick_seconds: u64,
    /// Minimum spacing between initialization attempts after a failure.
    pub auth_retry_minutes: u64,
    /// How often the list of available calendars is refreshed.
    pub calendar_list_refresh_hours: u64,
    /// How old a device's last successful download may get before it is refreshed.
    pub device_refresh_minutes: u64,
    /// Bounded wait of a trigger worker on its inbox.
    pub queue_wait_seconds: u64,
    pub look_back_days: i64,
    pub look_ahead_days: i64,
    /// Firing window after `fire_at`; events older than this are never fired.
    pub too_late_minutes: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub debug: bool,
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_flag(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(v) => match v.to_lowercase().as_str() {
            "1" | "true" | "yes" => true,
            "0" | "false" | "no" => false,
            _ => default,
        },
        Err(_) => default,
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let defaults = Config::default();

        let config = Config {
            server: ServerConfig {
                host: env::var("HOST").unwrap_or(defaults.server.host),
                port: env::var("PORT")
                    .unwrap_or_else(|_| "8080".to_string())
                    .parse()
                    .map_err(|_| ConfigError::InvalidValue("PORT".to_string()))?,
            },
            database: DatabaseConfig {
                url: env::var("DATABASE_URL").unwrap_or(defaults.database.url),
                max_connections: env_or(
                    "DATABASE_MAX_CONNECTIONS",
                    defaults.database.max_connections,
                ),
            },
            google: GoogleConfig {
                api_base_url: env::var("GOOGLE_API_BASE_URL")
                    .unwrap_or(defaults.google.api_base_url),
                credentials_path: env::var("GOOGLE_CREDENTIALS_PATH")
                    .unwrap_or(defaults.google.credentials_path),
                request_timeout_seconds: env_or(
                    "GOOGLE_REQUEST_TIMEOUT_SECONDS",
                    defaults.google.request_timeout_seconds,
                ),
            },
            scheduler: SchedulerConfig {
                tick_seconds: env_or("SCHEDULER_TICK_SECONDS", defaults.scheduler.tick_seconds),
                auth_retry_minutes: env_or(
                    "SCHEDULER_AUTH_RETRY_MINUTES",
                    defaults.scheduler.auth_retry_minutes,
                ),
                calendar_list_refresh_hours: env_or(
                    "SCHEDULER_CALENDAR_LIST_REFRESH_HOURS",
                    defaults.scheduler.calendar_list_refresh_hours,
                ),
                device_refresh_minutes: env_or(
                    "DEVICE_REFRESH_MINUTES",
                    defaults.scheduler.device_refresh_minutes,
                ),
                queue_wait_seconds: env_or(
                    "TRIGGER_QUEUE_WAIT_SECONDS",
                    defaults.scheduler.queue_wait_seconds,
                ),
                look_back_days: env_or("EVENT_LOOK_BACK_DAYS", defaults.scheduler.look_back_days),
                look_ahead_days: env_or(
                    "EVENT_LOOK_AHEAD_DAYS",
                    defaults.scheduler.look_ahead_days,
                ),
                too_late_minutes: env_or(
                    "TRIGGER_TOO_LATE_MINUTES",
                    defaults.scheduler.too_late_minutes,
                ),
            },
            logging: LoggingConfig {
                debug: env_flag("DEBUG_LOGGING", defaults.logging.debug),
            },
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let scheduler = &self.scheduler;
        check_range("SCHEDULER_TICK_SECONDS", scheduler.tick_seconds, 1..=DAY_SECONDS)?;
        check_range(
            "SCHEDULER_AUTH_RETRY_MINUTES",
            scheduler.auth_retry_minutes,
            0..=MONTH_MINUTES,
        )?;
        check_range(
            "SCHEDULER_CALENDAR_LIST_REFRESH_HOURS",
            scheduler.calendar_list_refresh_hours,
            1..=MONTH_MINUTES / 60,
        )?;
        check_range(
            "DEVICE_REFRESH_MINUTES",
            scheduler.device_refresh_minutes,
            0..=MONTH_MINUTES,
        )?;
        check_range(
            "TRIGGER_QUEUE_WAIT_SECONDS",
            scheduler.queue_wait_seconds,
            1..=DAY_SECONDS,
        )?;
        check_range("EVENT_LOOK_BACK_DAYS", scheduler.look_back_days, 0..=MAX_WINDOW_DAYS)?;
        check_range("EVENT_LOOK_AHEAD_DAYS", scheduler.look_ahead_days, 1..=MAX_WINDOW_DAYS)?;
        check_range(
            "TRIGGER_TOO_LATE_MINUTES",
            scheduler.too_late_minutes,
            0..=MONTH_MINUTES as i64,
        )?;
        check_range(
            "GOOGLE_REQUEST_TIMEOUT_SECONDS",
            self.google.request_timeout_seconds,
            1..=DAY_SECONDS,
        )?;
        url::Url::parse(&self.google.api_base_url)
            .map_err(|_| ConfigError::InvalidValue("GOOGLE_API_BASE_URL".to_string()))?;
        Ok(())
    }
}

const DAY_SECONDS: u64 = 24 * 60 * 60;
const MONTH_MINUTES: u64 = 31 * 24 * 60;
const MAX_WINDOW_DAYS: i64 = 3660;

fn check_range<T: PartialOrd>(
    key: &str,
    value: T,
    range: RangeInclusive<T>,
) -> Result<(), ConfigError> {
    if range.contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::InvalidValue(key.to_string()))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(String),
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8080,
            },
            database: DatabaseConfig {
                url: "sqlite://data/calendar_triggers.db".to_string(),
                max_connections: 5,
            },
            google: GoogleConfig {
                api_base_url: "https://www.googleapis.com/calendar/v3".to_string(),
                credentials_path: "data/google_calendar_credential.json".to_string(),
                request_timeout_seconds: 30,
            },
            scheduler: SchedulerConfig {
                tick_seconds: 60,
                auth_retry_minutes: 30,
                calendar_list_refresh_hours: 4,
                device_refresh_minutes: 60,
                queue_wait_seconds: 5,
                look_back_days: 7,
                look_ahead_days: 30,
                too_late_minutes: 60,
            },
            logging: LoggingConfig { debug: false },
        }
    }
}
