use std::sync::Arc;
use std::time::Duration;

use axum::http::{header, Method};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

mod config;
mod db;
mod error;
mod logging;
mod routes;
mod services;

use config::Config;
use db::{PluginPrefsRepository, DEBUG_LOGGING_KEY};
use logging::LogControl;
use services::{
    google::GoogleConnector,
    host::SqliteHost,
    init,
    runtime::{PluginRuntime, RuntimeSettings},
};

pub struct AppState {
    pub db: sqlx::SqlitePool,
    pub config: Config,
    pub runtime: Arc<PluginRuntime>,
    pub log_control: LogControl,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = Config::from_env()?;

    let log_control = logging::init_tracing(config.logging.debug);
    tracing::info!("Starting calendar trigger service");

    let pool = init::init_db(&config).await?;

    // A stored preference wins over the environment default
    if let Some(debug) = PluginPrefsRepository::get_flag(&pool, DEBUG_LOGGING_KEY).await? {
        if debug != log_control.is_debug() {
            log_control.set_debug(debug)?;
        }
    }

    let host = Arc::new(SqliteHost::new(pool.clone())?);
    let runtime = Arc::new(PluginRuntime::new(
        host.clone(),
        host,
        RuntimeSettings::from_config(&config.scheduler),
    ));
    init::restore_runtime(&pool, &runtime).await?;

    let app_state = Arc::new(AppState {
        db: pool,
        config: config.clone(),
        runtime: runtime.clone(),
        log_control,
    });

    let (shutdown_tx, _shutdown_rx) = tokio::sync::broadcast::channel::<()>(1);
    let scheduler = init::spawn_scheduler(
        &config,
        runtime.clone(),
        Arc::new(GoogleConnector::new(&config.google)),
        &shutdown_tx,
    );

    let app = routes::app_router(app_state)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
                .allow_headers([header::CONTENT_TYPE, header::ACCEPT]),
        );

    let addr = format!("{}:{}", config.server.host, config.server.port);
    tracing::info!("Server listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    let signal_tx = shutdown_tx.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            tracing::info!("Shutdown signal received, stopping scheduler");
            let _ = signal_tx.send(());
        })
        .await?;

    let shutdown_wait = Duration::from_secs(15);
    if tokio::time::timeout(shutdown_wait, scheduler).await.is_err() {
        tracing::warn!(
            "Scheduler did not stop within {}s",
            shutdown_wait.as_secs()
        );
    }

    runtime.shutdown().await;
    tracing::info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut term) => {
                term.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to bind SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
