use chrono::Utc;
use sqlx::SqlitePool;

use crate::db::models::{TriggerRuleRecord, ValidTriggerRule};
use crate::error::{AppError, AppResult};

const TRIGGER_COLUMNS: &str = r#"
    id,
    name,
    device_id,
    search_phrase,
    search_field,
    offset_minutes,
    time_field,
    variable_name,
    action_url,
    enabled,
    created_at,
    updated_at
"#;

/// Repository for trigger rule configuration (`trigger_rules` table).
pub struct TriggerRuleRepository;

impl TriggerRuleRepository {
    pub async fn create(pool: &SqlitePool, rule: &ValidTriggerRule) -> AppResult<TriggerRuleRecord> {
        let now = Utc::now().naive_utc();

        let record = sqlx::query_as::<_, TriggerRuleRecord>(&format!(
            r#"
            INSERT INTO trigger_rules (
                name,
                device_id,
                search_phrase,
                search_field,
                offset_minutes,
                time_field,
                variable_name,
                action_url,
                enabled,
                created_at,
                updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING {TRIGGER_COLUMNS}
            "#
        ))
        .bind(&rule.name)
        .bind(rule.device_id)
        .bind(&rule.search_phrase)
        .bind(rule.search_field.as_str())
        .bind(rule.offset_minutes)
        .bind(rule.time_field.as_str())
        .bind(&rule.variable_name)
        .bind(&rule.action_url)
        .bind(rule.enabled)
        .bind(now)
        .bind(now)
        .fetch_one(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(record)
    }

    /// Replace every configurable field of a rule.
    pub async fn replace(
        pool: &SqlitePool,
        id: i64,
        rule: &ValidTriggerRule,
    ) -> AppResult<Option<TriggerRuleRecord>> {
        let now = Utc::now().naive_utc();

        let record = sqlx::query_as::<_, TriggerRuleRecord>(&format!(
            r#"
            UPDATE trigger_rules
            SET name = ?,
                device_id = ?,
                search_phrase = ?,
                search_field = ?,
                offset_minutes = ?,
                time_field = ?,
                variable_name = ?,
                action_url = ?,
                enabled = ?,
                updated_at = ?
            WHERE id = ?
            RETURNING {TRIGGER_COLUMNS}
            "#
        ))
        .bind(&rule.name)
        .bind(rule.device_id)
        .bind(&rule.search_phrase)
        .bind(rule.search_field.as_str())
        .bind(rule.offset_minutes)
        .bind(rule.time_field.as_str())
        .bind(&rule.variable_name)
        .bind(&rule.action_url)
        .bind(rule.enabled)
        .bind(now)
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(record)
    }

    pub async fn find_by_id(pool: &SqlitePool, id: i64) -> AppResult<Option<TriggerRuleRecord>> {
        let row = sqlx::query_as::<_, TriggerRuleRecord>(&format!(
            "SELECT {TRIGGER_COLUMNS} FROM trigger_rules WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(row)
    }

    pub async fn list_all(pool: &SqlitePool) -> AppResult<Vec<TriggerRuleRecord>> {
        let rows = sqlx::query_as::<_, TriggerRuleRecord>(&format!(
            "SELECT {TRIGGER_COLUMNS} FROM trigger_rules ORDER BY id"
        ))
        .fetch_all(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(rows)
    }

    pub async fn find_by_device(
        pool: &SqlitePool,
        device_id: i64,
    ) -> AppResult<Vec<TriggerRuleRecord>> {
        let rows = sqlx::query_as::<_, TriggerRuleRecord>(&format!(
            "SELECT {TRIGGER_COLUMNS} FROM trigger_rules WHERE device_id = ? ORDER BY id"
        ))
        .bind(device_id)
        .fetch_all(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(rows)
    }

    pub async fn delete(pool: &SqlitePool, id: i64) -> AppResult<bool> {
        let result = sqlx::query("DELETE FROM trigger_rules WHERE id = ?")
            .bind(id)
            .execute(pool)
            .await
            .map_err(AppError::Database)?;
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::{SearchField, TimeField, TriggerRule, TriggerRuleInput};
    use crate::db::repository::CalendarDeviceRepository;
    use crate::db::test_pool;
    use serde_json::json;

    #[tokio::test]
    async fn created_rule_converts_to_domain_rule() {
        let pool = test_pool().await;
        let device = CalendarDeviceRepository::create(&pool, "Work", "work")
            .await
            .unwrap();

        let valid = TriggerRuleInput {
            name: Some("Board prep".to_string()),
            device_id: Some(device.id),
            search_phrase: Some("Board".to_string()),
            search_field: Some("description".to_string()),
            offset_minutes: Some(json!(15)),
            time_field: Some("end".to_string()),
            variable_name: Some("next_meeting".to_string()),
            action_url: None,
            enabled: None,
        }
        .validate()
        .unwrap();

        let record = TriggerRuleRepository::create(&pool, &valid).await.unwrap();
        let rule = TriggerRule::try_from(record).unwrap();
        assert_eq!(rule.search_phrase, "board");
        assert_eq!(rule.search_field, SearchField::Description);
        assert_eq!(rule.time_field, TimeField::End);
        assert_eq!(rule.offset_minutes, 15);
        assert_eq!(rule.variable_name.as_deref(), Some("next_meeting"));

        let by_device = TriggerRuleRepository::find_by_device(&pool, device.id)
            .await
            .unwrap();
        assert_eq!(by_device.len(), 1);
    }

    #[tokio::test]
    async fn deleting_device_cascades_to_rules() {
        let pool = test_pool().await;
        let device = CalendarDeviceRepository::create(&pool, "Work", "work")
            .await
            .unwrap();
        let valid = TriggerRuleInput {
            device_id: Some(device.id),
            ..Default::default()
        }
        .validate()
        .unwrap();
        let record = TriggerRuleRepository::create(&pool, &valid).await.unwrap();

        assert!(CalendarDeviceRepository::delete(&pool, device.id).await.unwrap());
        assert!(TriggerRuleRepository::find_by_id(&pool, record.id)
            .await
            .unwrap()
            .is_none());
    }
}
