use sqlx::SqlitePool;

use crate::error::{AppError, AppResult};

pub const DEBUG_LOGGING_KEY: &str = "debug_logging";

/// Repository for plugin-wide preferences (`plugin_prefs` table).
pub struct PluginPrefsRepository;

impl PluginPrefsRepository {
    pub async fn get(pool: &SqlitePool, key: &str) -> AppResult<Option<String>> {
        let value: Option<(String,)> =
            sqlx::query_as("SELECT value FROM plugin_prefs WHERE key = ?")
                .bind(key)
                .fetch_optional(pool)
                .await
                .map_err(AppError::Database)?;

        Ok(value.map(|(v,)| v))
    }

    pub async fn set(pool: &SqlitePool, key: &str, value: &str) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO plugin_prefs (key, value) VALUES (?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value
            "#,
        )
        .bind(key)
        .bind(value)
        .execute(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(())
    }

    pub async fn get_flag(pool: &SqlitePool, key: &str) -> AppResult<Option<bool>> {
        Ok(Self::get(pool, key).await?.map(|v| v == "true"))
    }

    pub async fn set_flag(pool: &SqlitePool, key: &str, value: bool) -> AppResult<()> {
        Self::set(pool, key, if value { "true" } else { "false" }).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;

    #[tokio::test]
    async fn flag_is_unset_until_written() {
        let pool = test_pool().await;
        assert_eq!(
            PluginPrefsRepository::get_flag(&pool, DEBUG_LOGGING_KEY)
                .await
                .unwrap(),
            None
        );

        PluginPrefsRepository::set_flag(&pool, DEBUG_LOGGING_KEY, true)
            .await
            .unwrap();
        PluginPrefsRepository::set_flag(&pool, DEBUG_LOGGING_KEY, false)
            .await
            .unwrap();
        assert_eq!(
            PluginPrefsRepository::get_flag(&pool, DEBUG_LOGGING_KEY)
                .await
                .unwrap(),
            Some(false)
        );
    }
}
