//! Trigger evaluation: decides which cached events fire a rule right now.
//!
//! Every event is classified independently against the rule, the rule's firing
//! history and the current instant. An event fires once it is `offset` minutes
//! before its reference time and keeps being eligible for a fixed window after
//! that; past the window it is too late and is never fired retroactively.

use chrono::{
    DateTime, Duration, FixedOffset, Local, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use crate::db::models::TriggerRule;
use crate::services::calendar::{CalendarEvent, EventCache};
use crate::services::host::TriggerExecutor;

/// Event IDs a rule has already fired for, in firing order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FiredTriggerHistory {
    event_ids: Vec<String>,
}

impl FiredTriggerHistory {
    pub fn from_ids(ids: Vec<String>) -> Self {
        let mut history = FiredTriggerHistory::default();
        for id in ids {
            history.record(id);
        }
        history
    }

    pub fn contains(&self, event_id: &str) -> bool {
        self.event_ids.iter().any(|id| id == event_id)
    }

    /// Returns `false` if the ID was already recorded.
    pub fn record(&mut self, event_id: impl Into<String>) -> bool {
        let event_id = event_id.into();
        if self.contains(&event_id) {
            return false;
        }
        self.event_ids.push(event_id);
        true
    }

    /// Drop IDs whose event is no longer cached. Returns how many were removed.
    pub fn prune(&mut self, cache: &EventCache) -> usize {
        let before = self.event_ids.len();
        self.event_ids.retain(|id| cache.contains(id));
        before - self.event_ids.len()
    }

    pub fn as_slice(&self) -> &[String] {
        &self.event_ids
    }

    pub fn len(&self) -> usize {
        self.event_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.event_ids.is_empty()
    }
}

/// Timezone used for reference times that carry no offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalZone {
    System,
    Fixed(FixedOffset),
}

impl LocalZone {
    fn resolve(&self, naive: NaiveDateTime) -> Option<DateTime<Utc>> {
        match self {
            LocalZone::System => Local
                .from_local_datetime(&naive)
                .earliest()
                .map(|dt| dt.with_timezone(&Utc)),
            LocalZone::Fixed(offset) => offset
                .from_local_datetime(&naive)
                .single()
                .map(|dt| dt.with_timezone(&Utc)),
        }
    }
}

/// Parse an event start/end value into an absolute instant.
///
/// Offsets in the value are honoured. Naive timestamps and all-day dates are taken
/// as wall-clock time in `zone`, so they are not shifted by the zone's UTC offset.
pub fn parse_reference_time(value: &str, zone: LocalZone) -> Result<DateTime<Utc>, String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err("empty timestamp".to_string());
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(dt.with_timezone(&Utc));
    }

    let naive = NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%d %H:%M:%S%.f"))
        .or_else(|_| NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M"))
        .or_else(|_| {
            NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
                .map(|date| date.and_time(NaiveTime::default()))
        })
        .map_err(|e| format!("invalid timestamp '{}': {}", value, e))?;

    zone.resolve(naive)
        .ok_or_else(|| format!("timestamp '{}' does not exist in the local timezone", value))
}

/// Outcome of classifying one cached event for one rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    AlreadyFired,
    NoMatch,
    InvalidTime(String),
    /// Matches, but `now` has not reached `fire_at` yet.
    Waiting {
        fire_at: DateTime<Utc>,
    },
    Fire {
        fire_at: DateTime<Utc>,
    },
    TooLate {
        fire_at: DateTime<Utc>,
    },
}

/// Counters of one evaluation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EvaluationSummary {
    pub events: usize,
    pub pruned: usize,
    pub pending: usize,
    pub matched: usize,
    pub invalid: usize,
    pub too_late: usize,
    pub fired: Vec<String>,
}

impl EvaluationSummary {
    /// Whether the pass changed the rule's history.
    pub fn history_changed(&self) -> bool {
        self.pruned > 0 || !self.fired.is_empty()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TriggerEvaluator {
    too_late_window: Duration,
    zone: LocalZone,
}

impl TriggerEvaluator {
    pub fn new(too_late_minutes: i64, zone: LocalZone) -> Self {
        TriggerEvaluator {
            too_late_window: Duration::minutes(too_late_minutes),
            zone,
        }
    }

    pub fn classify(
        &self,
        rule: &TriggerRule,
        event_id: &str,
        event: &CalendarEvent,
        history: &FiredTriggerHistory,
        now: DateTime<Utc>,
    ) -> Decision {
        if history.contains(event_id) {
            return Decision::AlreadyFired;
        }
        if !rule.matches(event) {
            return Decision::NoMatch;
        }

        let reference = match parse_reference_time(rule.time_field.value(event), self.zone) {
            Ok(t) => t,
            Err(reason) => return Decision::InvalidTime(reason),
        };

        let Some((fire_at, too_late_at)) = Duration::try_minutes(rule.offset_minutes)
            .and_then(|offset| reference.checked_sub_signed(offset))
            .and_then(|fire_at| {
                fire_at
                    .checked_add_signed(self.too_late_window)
                    .map(|too_late_at| (fire_at, too_late_at))
            })
        else {
            return Decision::InvalidTime(format!(
                "offset of {} minutes is out of range",
                rule.offset_minutes
            ));
        };

        if now > too_late_at {
            Decision::TooLate { fire_at }
        } else if now >= fire_at {
            Decision::Fire { fire_at }
        } else {
            Decision::Waiting { fire_at }
        }
    }

    /// Run one pass over `snapshot`, firing every eligible event.
    ///
    /// History is pruned against the snapshot first. A fired event is recorded
    /// before its side effects run, so a failing side effect never causes a second
    /// firing.
    pub async fn evaluate(
        &self,
        rule: &TriggerRule,
        snapshot: &EventCache,
        history: &mut FiredTriggerHistory,
        executor: &dyn TriggerExecutor,
        now: DateTime<Utc>,
    ) -> EvaluationSummary {
        let mut summary = EvaluationSummary {
            events: snapshot.len(),
            pruned: history.prune(snapshot),
            ..Default::default()
        };

        for (event_id, event) in &snapshot.events {
            let decision = self.classify(rule, event_id, event, history, now);
            if decision == Decision::AlreadyFired {
                continue;
            }
            summary.pending += 1;

            match decision {
                Decision::AlreadyFired | Decision::NoMatch => {}
                Decision::InvalidTime(reason) => {
                    summary.matched += 1;
                    summary.invalid += 1;
                    warn!(
                        "Trigger \"{}\": skipping event \"{}\": {}",
                        rule.name, event.summary, reason
                    );
                }
                Decision::Waiting { .. } => summary.matched += 1,
                Decision::TooLate { .. } => {
                    summary.matched += 1;
                    summary.too_late += 1;
                }
                Decision::Fire { fire_at } => {
                    summary.matched += 1;
                    debug!(
                        "Fire trigger \"{}\" for event \"{}\" (due {})",
                        rule.name, event.summary, fire_at
                    );
                    history.record(event_id.clone());
                    summary.fired.push(event_id.clone());
                    Self::fire(rule, event_id, event, executor).await;
                }
            }
        }

        debug!(
            "Trigger \"{}\": {} events, {} pending, {} matched, {} invalid, {} too late, {} fired",
            rule.name,
            summary.events,
            summary.pending,
            summary.matched,
            summary.invalid,
            summary.too_late,
            summary.fired.len()
        );

        summary
    }

    async fn fire(
        rule: &TriggerRule,
        event_id: &str,
        event: &CalendarEvent,
        executor: &dyn TriggerExecutor,
    ) {
        if let Some(variable) = rule.variable_name.as_deref() {
            if let Err(e) = executor.set_variable(variable, &event.summary).await {
                warn!(
                    "Trigger \"{}\": could not write variable \"{}\": {}",
                    rule.name, variable, e
                );
            }
        }

        if let Err(e) = executor.execute_trigger(rule, event_id, event).await {
            error!(
                "Trigger \"{}\": execution for event \"{}\" failed: {}",
                rule.name, event.summary, e
            );
        }
    }
}
