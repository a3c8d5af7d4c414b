//! Tracing setup with a runtime-switchable debug level.

use std::sync::atomic::{AtomicBool, Ordering};

use tracing_subscriber::{layer::SubscriberExt, reload, util::SubscriberInitExt, EnvFilter, Registry};

use crate::error::{AppError, AppResult};

const DEFAULT_FILTER: &str = "calendar_triggers=info,tower_http=info";
const DEBUG_FILTER: &str = "calendar_triggers=debug,tower_http=debug";

fn filter_for(debug: bool) -> EnvFilter {
    if debug {
        EnvFilter::new(DEBUG_FILTER)
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
    }
}

/// Handle for switching debug logging on and off.
pub struct LogControl {
    handle: Option<reload::Handle<EnvFilter, Registry>>,
    debug: AtomicBool,
}

impl LogControl {
    /// A control that only tracks the flag, for when no subscriber is installed.
    pub fn detached(debug: bool) -> Self {
        LogControl {
            handle: None,
            debug: AtomicBool::new(debug),
        }
    }

    pub fn is_debug(&self) -> bool {
        self.debug.load(Ordering::SeqCst)
    }

    pub fn set_debug(&self, debug: bool) -> AppResult<()> {
        if let Some(handle) = &self.handle {
            handle
                .reload(filter_for(debug))
                .map_err(|e| AppError::Internal(anyhow::anyhow!("Failed to reload log filter: {}", e)))?;
        }
        self.debug.store(debug, Ordering::SeqCst);
        let state = if debug { "enabled" } else { "disabled" };
        tracing::info!("Debug logging {}", state);
        Ok(())
    }
}

/// Install the global subscriber. `RUST_LOG` overrides the default filter while
/// debug logging is off.
pub fn init_tracing(debug: bool) -> LogControl {
    let (filter, handle) = reload::Layer::new(filter_for(debug));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    LogControl {
        handle: Some(handle),
        debug: AtomicBool::new(debug),
    }
}
