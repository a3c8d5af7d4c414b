use std::sync::Arc;

use axum::{routing::get, Router};

use crate::AppState;

pub mod calendar;
pub mod health;
pub mod plugin;
pub mod triggers;
pub mod variables;

/// All admin routes, with state attached.
pub fn app_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .nest("/api/calendars", calendar::calendars_router())
        .nest("/api/devices", calendar::devices_router())
        .nest("/api/triggers", triggers::router())
        .nest("/api/variables", variables::router())
        .nest("/api/plugin", plugin::router())
        .with_state(state)
}

#[cfg(test)]
pub mod test_support {
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use axum::Router;
    use http_body_util::BodyExt;
    use serde_json::Value;
    use tower::ServiceExt;

    use crate::config::Config;
    use crate::db::test_pool;
    use crate::logging::LogControl;
    use crate::services::host::SqliteHost;
    use crate::services::runtime::{PluginRuntime, RuntimeSettings};
    use crate::AppState;

    pub async fn test_app() -> (Router, Arc<AppState>) {
        let pool = test_pool().await;
        let config = Config::default();
        let host = Arc::new(SqliteHost::new(pool.clone()).unwrap());
        let runtime = Arc::new(PluginRuntime::new(
            host.clone(),
            host,
            RuntimeSettings::from_config(&config.scheduler),
        ));
        let state = Arc::new(AppState {
            db: pool,
            config,
            runtime,
            log_control: LogControl::detached(false),
        });
        (super::app_router(state.clone()), state)
    }

    /// Send one request; an empty response body comes back as `Value::Null`.
    pub async fn request(
        app: &Router,
        method: &str,
        uri: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(json) => builder
                .header("content-type", "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }
}
