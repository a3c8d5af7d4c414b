use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

// ============================================================================
// Trigger Execution Models
// ============================================================================

/// One firing of a trigger for a specific calendar event.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct TriggerExecution {
    pub id: String,
    pub trigger_id: i64,
    pub event_id: String,
    pub summary: String,
    pub executed_at: NaiveDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTriggerExecution {
    pub trigger_id: i64,
    pub event_id: String,
    pub summary: String,
}

/// Persisted firing history of one trigger.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct FiredTriggersRecord {
    pub trigger_id: i64,
    /// JSON array of event IDs, oldest first.
    pub event_ids: String,
    pub updated_at: NaiveDateTime,
}
