//! Host runtime capabilities the core depends on.
//!
//! `DeviceStateStore` persists per-device event caches and per-trigger firing
//! history; `TriggerExecutor` performs the two externally visible side effects of a
//! firing. `SqliteHost` implements both on the application database.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use sqlx::SqlitePool;
use tracing::{debug, info};

use crate::db::models::{CreateTriggerExecution, TriggerRule};
use crate::db::{
    CalendarDeviceRepository, FiredTriggerRepository, TriggerExecutionRepository,
    VariableRepository,
};
use crate::error::{AppError, AppResult};
use crate::services::calendar::{CalendarEvent, EventCache};
use crate::services::evaluator::FiredTriggerHistory;

#[async_trait]
pub trait DeviceStateStore: Send + Sync {
    async fn load_event_cache(&self, device_id: i64) -> AppResult<EventCache>;

    /// Replace the stored cache as one unit; readers never observe a partial write.
    async fn save_event_cache(&self, device_id: i64, cache: &EventCache) -> AppResult<()>;

    async fn load_fired_history(&self, trigger_id: i64) -> AppResult<FiredTriggerHistory>;

    async fn save_fired_history(
        &self,
        trigger_id: i64,
        history: &FiredTriggerHistory,
    ) -> AppResult<()>;
}

#[async_trait]
pub trait TriggerExecutor: Send + Sync {
    /// Run the trigger's configured actions for one event.
    async fn execute_trigger(
        &self,
        rule: &TriggerRule,
        event_id: &str,
        event: &CalendarEvent,
    ) -> AppResult<()>;

    /// Write `value` into an existing variable.
    async fn set_variable(&self, name: &str, value: &str) -> AppResult<()>;
}

/// Payload POSTed to a rule's action URL.
#[derive(Debug, Serialize)]
struct ActionPayload<'a> {
    trigger_id: i64,
    trigger_name: &'a str,
    event_id: &'a str,
    summary: &'a str,
    start: &'a str,
    end: &'a str,
    link: &'a str,
}

pub struct SqliteHost {
    pool: SqlitePool,
    client: Client,
}

impl SqliteHost {
    pub fn new(pool: SqlitePool) -> AppResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .map_err(AppError::Request)?;
        Ok(SqliteHost { pool, client })
    }
}

#[async_trait]
impl DeviceStateStore for SqliteHost {
    async fn load_event_cache(&self, device_id: i64) -> AppResult<EventCache> {
        CalendarDeviceRepository::load_cache(&self.pool, device_id).await
    }

    async fn save_event_cache(&self, device_id: i64, cache: &EventCache) -> AppResult<()> {
        CalendarDeviceRepository::save_cache(&self.pool, device_id, cache).await
    }

    async fn load_fired_history(&self, trigger_id: i64) -> AppResult<FiredTriggerHistory> {
        let ids = FiredTriggerRepository::load(&self.pool, trigger_id).await?;
        Ok(FiredTriggerHistory::from_ids(ids))
    }

    async fn save_fired_history(
        &self,
        trigger_id: i64,
        history: &FiredTriggerHistory,
    ) -> AppResult<()> {
        FiredTriggerRepository::save(&self.pool, trigger_id, history.as_slice()).await
    }
}

#[async_trait]
impl TriggerExecutor for SqliteHost {
    async fn execute_trigger(
        &self,
        rule: &TriggerRule,
        event_id: &str,
        event: &CalendarEvent,
    ) -> AppResult<()> {
        TriggerExecutionRepository::create(
            &self.pool,
            CreateTriggerExecution {
                trigger_id: rule.id,
                event_id: event_id.to_string(),
                summary: event.summary.clone(),
            },
        )
        .await?;

        info!("Executed trigger \"{}\" for event \"{}\"", rule.name, event.summary);

        let Some(url) = rule.action_url.as_deref() else {
            return Ok(());
        };

        let payload = ActionPayload {
            trigger_id: rule.id,
            trigger_name: &rule.name,
            event_id,
            summary: &event.summary,
            start: &event.start,
            end: &event.end,
            link: &event.html_link,
        };

        let response = self.client.post(url).json(&payload).send().await?;
        if !response.status().is_success() {
            return Err(AppError::ServiceUnavailable(format!(
                "Action URL for trigger \"{}\" returned {}",
                rule.name,
                response.status()
            )));
        }
        debug!("Delivered action for trigger \"{}\" to {}", rule.name, url);
        Ok(())
    }

    async fn set_variable(&self, name: &str, value: &str) -> AppResult<()> {
        match VariableRepository::update_existing(&self.pool, name, value).await {
            Ok(true) => Ok(()),
            Ok(false) => Err(AppError::VariableWrite(format!(
                "Variable \"{}\" does not exist",
                name
            ))),
            Err(e) => Err(AppError::VariableWrite(format!(
                "Failed to write variable \"{}\": {}",
                name, e
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::{SearchField, TimeField, TriggerRuleInput};
    use crate::db::{test_pool, TriggerRuleRepository};
    use crate::services::testing::event;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn stored_rule(pool: &SqlitePool, action_url: Option<String>) -> TriggerRule {
        let device = CalendarDeviceRepository::create(pool, "Work", "work")
            .await
            .unwrap();
        let record = TriggerRuleRepository::create(
            pool,
            &TriggerRuleInput {
                name: Some("Board".to_string()),
                device_id: Some(device.id),
                action_url,
                ..Default::default()
            }
            .validate()
            .unwrap(),
        )
        .await
        .unwrap();
        let rule = TriggerRule::try_from(record).unwrap();
        assert_eq!(rule.search_field, SearchField::Summary);
        assert_eq!(rule.time_field, TimeField::Start);
        rule
    }

    #[tokio::test]
    async fn execution_is_logged_and_action_posted() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .and(body_partial_json(serde_json::json!({
                "event_id": "a",
                "summary": "board meeting"
            })))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let pool = test_pool().await;
        let rule = stored_rule(&pool, Some(format!("{}/hook", server.uri()))).await;
        let host = SqliteHost::new(pool.clone()).unwrap();

        host.execute_trigger(&rule, "a", &event("board meeting", "2030-01-01T10:00:00Z"))
            .await
            .unwrap();

        let log = TriggerExecutionRepository::list_for_trigger(&pool, rule.id, 10)
            .await
            .unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].event_id, "a");
    }

    #[tokio::test]
    async fn writing_missing_variable_is_a_variable_error() {
        let pool = test_pool().await;
        let host = SqliteHost::new(pool.clone()).unwrap();

        let result = host.set_variable("nope", "value").await;
        assert!(matches!(result, Err(AppError::VariableWrite(_))));

        VariableRepository::upsert(&pool, "next", "").await.unwrap();
        host.set_variable("next", "board meeting").await.unwrap();
        let stored = VariableRepository::find(&pool, "next").await.unwrap().unwrap();
        assert_eq!(stored.value, "board meeting");
    }

    #[tokio::test]
    async fn fired_history_round_trips() {
        let pool = test_pool().await;
        let rule = stored_rule(&pool, None).await;
        let host = SqliteHost::new(pool).unwrap();

        let history = FiredTriggerHistory::from_ids(vec!["a".to_string(), "b".to_string()]);
        host.save_fired_history(rule.id, &history).await.unwrap();
        assert_eq!(host.load_fired_history(rule.id).await.unwrap(), history);
    }
}
