use chrono::Utc;
use sqlx::SqlitePool;

use crate::db::models::CalendarDeviceRecord;
use crate::error::{AppError, AppResult};
use crate::services::calendar::EventCache;

const DEVICE_COLUMNS: &str = r#"
    id,
    name,
    calendar_id,
    event_data,
    event_count,
    last_download,
    online,
    created_at,
    updated_at
"#;

/// Repository for calendar devices and their cached events (`calendar_devices` table).
pub struct CalendarDeviceRepository;

impl CalendarDeviceRepository {
    pub async fn create(
        pool: &SqlitePool,
        name: &str,
        calendar_id: &str,
    ) -> AppResult<CalendarDeviceRecord> {
        let now = Utc::now().naive_utc();

        let record = sqlx::query_as::<_, CalendarDeviceRecord>(&format!(
            r#"
            INSERT INTO calendar_devices (
                name,
                calendar_id,
                event_data,
                event_count,
                last_download,
                online,
                created_at,
                updated_at
            )
            VALUES (?, ?, '{{}}', 0, NULL, 0, ?, ?)
            RETURNING {DEVICE_COLUMNS}
            "#
        ))
        .bind(name)
        .bind(calendar_id)
        .bind(now)
        .bind(now)
        .fetch_one(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(record)
    }

    pub async fn find_by_id(pool: &SqlitePool, id: i64) -> AppResult<Option<CalendarDeviceRecord>> {
        let row = sqlx::query_as::<_, CalendarDeviceRecord>(&format!(
            "SELECT {DEVICE_COLUMNS} FROM calendar_devices WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(row)
    }

    pub async fn list_all(pool: &SqlitePool) -> AppResult<Vec<CalendarDeviceRecord>> {
        let rows = sqlx::query_as::<_, CalendarDeviceRecord>(&format!(
            "SELECT {DEVICE_COLUMNS} FROM calendar_devices ORDER BY id"
        ))
        .fetch_all(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(rows)
    }

    /// Load the cached events and download metadata of a device.
    pub async fn load_cache(pool: &SqlitePool, id: i64) -> AppResult<EventCache> {
        match Self::find_by_id(pool, id).await? {
            Some(record) => record.event_cache(),
            None => Err(AppError::NotFound(format!("Calendar device {}", id))),
        }
    }

    /// Replace the cached events and metadata of a device in a single statement.
    pub async fn save_cache(pool: &SqlitePool, id: i64, cache: &EventCache) -> AppResult<()> {
        let now = Utc::now().naive_utc();
        let event_data = serde_json::to_string(&cache.events)?;
        let event_count = i64::try_from(cache.event_count).unwrap_or(i64::MAX);

        let result = sqlx::query(
            r#"
            UPDATE calendar_devices
            SET event_data = ?,
                event_count = ?,
                last_download = ?,
                online = ?,
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(event_data)
        .bind(event_count)
        .bind(cache.last_download)
        .bind(cache.online)
        .bind(now)
        .bind(id)
        .execute(pool)
        .await
        .map_err(AppError::Database)?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Calendar device {}", id)));
        }
        Ok(())
    }

    pub async fn delete(pool: &SqlitePool, id: i64) -> AppResult<bool> {
        let result = sqlx::query("DELETE FROM calendar_devices WHERE id = ?")
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
    use crate::db::test_pool;
    use crate::services::calendar::{reconcile, FetchedEvent};
    use crate::services::testing::fetched;

    #[tokio::test]
    async fn new_device_starts_with_empty_offline_cache() {
        let pool = test_pool().await;
        let device = CalendarDeviceRepository::create(&pool, "Work", "work@example.com")
            .await
            .unwrap();

        let cache = CalendarDeviceRepository::load_cache(&pool, device.id)
            .await
            .unwrap();
        assert!(cache.is_empty());
        assert!(!cache.online);
        assert_eq!(cache.last_download, None);
    }

    #[tokio::test]
    async fn saved_cache_round_trips_with_metadata() {
        let pool = test_pool().await;
        let device = CalendarDeviceRepository::create(&pool, "Work", "work@example.com")
            .await
            .unwrap();

        let batch: Vec<FetchedEvent> = vec![
            fetched("a", "Board Meeting", "2030-01-01T10:00:00Z"),
            fetched("b", "Lunch", "2030-01-01T12:00:00Z"),
        ];
        let cache = reconcile(&EventCache::default(), batch, Utc::now());
        CalendarDeviceRepository::save_cache(&pool, device.id, &cache)
            .await
            .unwrap();

        let loaded = CalendarDeviceRepository::load_cache(&pool, device.id)
            .await
            .unwrap();
        assert_eq!(loaded.events, cache.events);
        assert_eq!(loaded.event_count, 2);
        assert!(loaded.online);
        assert!(loaded.last_download.is_some());
    }

    #[tokio::test]
    async fn saving_cache_for_missing_device_is_not_found() {
        let pool = test_pool().await;
        let result =
            CalendarDeviceRepository::save_cache(&pool, 404, &EventCache::default()).await;
        assert!(matches!(result, Err(AppError::NotFound(_))));
    }
}
