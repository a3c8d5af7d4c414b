use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::db::models::{CreateTriggerExecution, TriggerExecution};
use crate::error::{AppError, AppResult};

/// Repository for the trigger execution log (`trigger_executions` table).
pub struct TriggerExecutionRepository;

impl TriggerExecutionRepository {
    pub async fn create(
        pool: &SqlitePool,
        execution: CreateTriggerExecution,
    ) -> AppResult<TriggerExecution> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().naive_utc();

        let row = sqlx::query_as::<_, TriggerExecution>(
            r#"
            INSERT INTO trigger_executions (id, trigger_id, event_id, summary, executed_at)
            VALUES (?, ?, ?, ?, ?)
            RETURNING id, trigger_id, event_id, summary, executed_at
            "#,
        )
        .bind(id)
        .bind(execution.trigger_id)
        .bind(execution.event_id)
        .bind(execution.summary)
        .bind(now)
        .fetch_one(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(row)
    }

    /// Most recent executions of a trigger, newest first.
    pub async fn list_for_trigger(
        pool: &SqlitePool,
        trigger_id: i64,
        limit: i64,
    ) -> AppResult<Vec<TriggerExecution>> {
        let rows = sqlx::query_as::<_, TriggerExecution>(
            r#"
            SELECT id, trigger_id, event_id, summary, executed_at
            FROM trigger_executions
            WHERE trigger_id = ?
            ORDER BY executed_at DESC
            LIMIT ?
            "#,
        )
        .bind(trigger_id)
        .bind(limit)
        .fetch_all(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(rows)
    }
}
