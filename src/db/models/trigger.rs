use std::str::FromStr;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::error::{AppError, AppResult};
use crate::services::calendar::CalendarEvent;

// ============================================================================
// Trigger Rule Models
// ============================================================================

/// Event text searched by a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchField {
    Summary,
    Description,
}

impl SearchField {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchField::Summary => "summary",
            SearchField::Description => "description",
        }
    }

    pub fn text<'a>(&self, event: &'a CalendarEvent) -> &'a str {
        match self {
            SearchField::Summary => &event.summary,
            SearchField::Description => &event.description,
        }
    }
}

impl FromStr for SearchField {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "summary" => Ok(SearchField::Summary),
            "description" => Ok(SearchField::Description),
            other => Err(AppError::Validation(format!(
                "search_field: expected 'summary' or 'description', got '{}'",
                other
            ))),
        }
    }
}

/// Event timestamp the offset is measured from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeField {
    Start,
    End,
}

impl TimeField {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeField::Start => "start",
            TimeField::End => "end",
        }
    }

    pub fn value<'a>(&self, event: &'a CalendarEvent) -> &'a str {
        match self {
            TimeField::Start => &event.start,
            TimeField::End => &event.end,
        }
    }
}

impl FromStr for TimeField {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "start" => Ok(TimeField::Start),
            "end" => Ok(TimeField::End),
            other => Err(AppError::Validation(format!(
                "time_field: expected 'start' or 'end', got '{}'",
                other
            ))),
        }
    }
}

/// Row of the `trigger_rules` table.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct TriggerRuleRecord {
    pub id: i64,
    pub name: String,
    pub device_id: i64,
    pub search_phrase: String,
    pub search_field: String,
    pub offset_minutes: i64,
    pub time_field: String,
    pub variable_name: Option<String>,
    pub action_url: Option<String>,
    pub enabled: bool,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

/// A validated, immutable trigger rule as evaluated by a trigger worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TriggerRule {
    pub id: i64,
    pub name: String,
    pub device_id: i64,
    /// Lowercased; an empty phrase matches every event.
    pub search_phrase: String,
    pub search_field: SearchField,
    /// Minutes before the reference time; negative means after.
    pub offset_minutes: i64,
    pub time_field: TimeField,
    pub variable_name: Option<String>,
    pub action_url: Option<String>,
    pub enabled: bool,
}

impl TriggerRule {
    pub fn matches(&self, event: &CalendarEvent) -> bool {
        self.search_field
            .text(event)
            .to_lowercase()
            .contains(&self.search_phrase)
    }
}

impl TryFrom<TriggerRuleRecord> for TriggerRule {
    type Error = AppError;

    fn try_from(record: TriggerRuleRecord) -> Result<Self, Self::Error> {
        Ok(TriggerRule {
            id: record.id,
            name: record.name,
            device_id: record.device_id,
            search_phrase: record.search_phrase.to_lowercase(),
            search_field: record.search_field.parse()?,
            offset_minutes: record.offset_minutes,
            time_field: record.time_field.parse()?,
            variable_name: record.variable_name,
            action_url: record.action_url,
            enabled: record.enabled,
        })
    }
}

/// Trigger configuration as submitted by an operator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TriggerRuleInput {
    pub name: Option<String>,
    pub device_id: Option<i64>,
    pub search_phrase: Option<String>,
    pub search_field: Option<String>,
    /// Accepts a JSON number or a numeric string.
    pub offset_minutes: Option<serde_json::Value>,
    pub time_field: Option<String>,
    pub variable_name: Option<String>,
    pub action_url: Option<String>,
    pub enabled: Option<bool>,
}

/// Trigger configuration that passed validation and can be stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidTriggerRule {
    pub name: String,
    pub device_id: i64,
    pub search_phrase: String,
    pub search_field: SearchField,
    pub offset_minutes: i64,
    pub time_field: TimeField,
    pub variable_name: Option<String>,
    pub action_url: Option<String>,
    pub enabled: bool,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

/// Offsets beyond a year either way are configuration mistakes.
pub const MAX_OFFSET_MINUTES: i64 = 366 * 24 * 60;

fn parse_offset(value: Option<serde_json::Value>) -> AppResult<i64> {
    let invalid = || AppError::Validation("offset_minutes: Must be a number".to_string());
    let minutes = match value {
        None | Some(serde_json::Value::Null) => return Ok(0),
        Some(serde_json::Value::Number(n)) => match n.as_i64() {
            Some(i) => i as f64,
            None => n.as_f64().ok_or_else(invalid)?,
        },
        Some(serde_json::Value::String(s)) if s.trim().is_empty() => return Ok(0),
        Some(serde_json::Value::String(s)) => s.trim().parse::<f64>().map_err(|_| invalid())?,
        Some(_) => return Err(invalid()),
    };

    let minutes = minutes.trunc();
    if !minutes.is_finite() || minutes.abs() > MAX_OFFSET_MINUTES as f64 {
        return Err(AppError::Validation(
            "offset_minutes: Out of range".to_string(),
        ));
    }
    Ok(minutes as i64)
}

impl TriggerRuleInput {
    pub fn validate(self) -> AppResult<ValidTriggerRule> {
        let device_id = self
            .device_id
            .ok_or_else(|| AppError::Validation("device_id: Required".to_string()))?;

        let search_field = match non_empty(self.search_field) {
            Some(s) => s.parse()?,
            None => SearchField::Summary,
        };
        let time_field = match non_empty(self.time_field) {
            Some(s) => s.parse()?,
            None => TimeField::Start,
        };
        let offset_minutes = parse_offset(self.offset_minutes)?;

        let action_url = non_empty(self.action_url);
        if let Some(ref raw) = action_url {
            let parsed = url::Url::parse(raw)
                .map_err(|_| AppError::Validation("action_url: Invalid URL".to_string()))?;
            if !matches!(parsed.scheme(), "http" | "https") {
                return Err(AppError::Validation(
                    "action_url: Must be an http(s) URL".to_string(),
                ));
            }
        }

        let search_phrase = self
            .search_phrase
            .map(|s| s.to_lowercase())
            .unwrap_or_default();

        let name = non_empty(self.name).unwrap_or_else(|| {
            if search_phrase.trim().is_empty() {
                format!("Calendar trigger ({})", device_id)
            } else {
                format!("Calendar trigger \"{}\"", search_phrase.trim())
            }
        });

        Ok(ValidTriggerRule {
            name,
            device_id,
            search_phrase,
            search_field,
            offset_minutes,
            time_field,
            variable_name: non_empty(self.variable_name),
            action_url,
            enabled: self.enabled.unwrap_or(true),
        })
    }
}
