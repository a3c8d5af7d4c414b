use chrono::Utc;
use sqlx::SqlitePool;

use crate::db::models::Variable;
use crate::error::{AppError, AppResult};

/// Repository for named variables (`variables` table).
pub struct VariableRepository;

impl VariableRepository {
    pub async fn list_all(pool: &SqlitePool) -> AppResult<Vec<Variable>> {
        let rows = sqlx::query_as::<_, Variable>(
            "SELECT name, value, updated_at FROM variables ORDER BY name",
        )
        .fetch_all(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(rows)
    }

    pub async fn find(pool: &SqlitePool, name: &str) -> AppResult<Option<Variable>> {
        let row = sqlx::query_as::<_, Variable>(
            "SELECT name, value, updated_at FROM variables WHERE name = ?",
        )
        .bind(name)
        .fetch_optional(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(row)
    }

    /// Create the variable or overwrite its value.
    pub async fn upsert(pool: &SqlitePool, name: &str, value: &str) -> AppResult<Variable> {
        let now = Utc::now().naive_utc();

        let row = sqlx::query_as::<_, Variable>(
            r#"
            INSERT INTO variables (name, value, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(name) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at
            RETURNING name, value, updated_at
            "#,
        )
        .bind(name)
        .bind(value)
        .bind(now)
        .fetch_one(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(row)
    }

    /// Overwrite an existing variable. Returns `false` when no such variable exists.
    pub async fn update_existing(pool: &SqlitePool, name: &str, value: &str) -> AppResult<bool> {
        let now = Utc::now().naive_utc();

        let result = sqlx::query("UPDATE variables SET value = ?, updated_at = ? WHERE name = ?")
            .bind(value)
            .bind(now)
            .bind(name)
            .execute(pool)
            .await
            .map_err(AppError::Database)?;

        Ok(result.rows_affected() > 0)
    }
}
