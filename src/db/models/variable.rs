use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A named value that fired triggers can write the event summary into.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Variable {
    pub name: String,
    pub value: String,
    pub updated_at: NaiveDateTime,
}
