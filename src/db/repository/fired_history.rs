use chrono::Utc;
use sqlx::SqlitePool;

use crate::db::models::FiredTriggersRecord;
use crate::error::{AppError, AppResult};

/// Repository for per-trigger firing history (`fired_triggers` table).
pub struct FiredTriggerRepository;

impl FiredTriggerRepository {
    /// Event IDs a trigger already fired for, oldest first. Unknown triggers have
    /// an empty history.
    pub async fn load(pool: &SqlitePool, trigger_id: i64) -> AppResult<Vec<String>> {
        let row = sqlx::query_as::<_, FiredTriggersRecord>(
            r#"
            SELECT trigger_id, event_ids, updated_at
            FROM fired_triggers
            WHERE trigger_id = ?
            "#,
        )
        .bind(trigger_id)
        .fetch_optional(pool)
        .await
        .map_err(AppError::Database)?;

        match row {
            Some(r) => Ok(serde_json::from_str(&r.event_ids)?),
            None => Ok(Vec::new()),
        }
    }

    pub async fn save(pool: &SqlitePool, trigger_id: i64, event_ids: &[String]) -> AppResult<()> {
        let now = Utc::now().naive_utc();
        let encoded = serde_json::to_string(event_ids)?;

        sqlx::query(
            r#"
            INSERT INTO fired_triggers (trigger_id, event_ids, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(trigger_id) DO UPDATE SET
                event_ids = excluded.event_ids,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(trigger_id)
        .bind(encoded)
        .bind(now)
        .execute(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(())
    }
}
