//! Upstream ticket and work time sources, and the mapping from their raw
//! shapes into drafts.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use itsm_core::normalize::{
    coerce_flag, flag_value, get_nested, is_terminal_status, millis_to_datetime, nested_text,
    parse_duration, parse_epoch_millis, resolve_time_hours, response_time_minutes, text_or_none,
    truncate_chars, TicketTimes,
};
use itsm_core::{
    NormalizeError, TicketDraft, MAX_TITLE_CHARS, OTHERS, UNASSIGNED_CUSTOMER_ID, UNASSIGNED_CUSTOMER_NAME,
    UNASSIGNED_ENGINEER_ID, UNASSIGNED_ENGINEER_NAME,
};
use itsm_storage::FetchError;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

mod api;
mod relational;
mod worktime;

pub use api::{ApiSource, ApiSourceConfig, API_KEY_PLACEHOLDER, FIELDS_REQUIRED};
pub use relational::{RelationalSource, RELATIONAL_TICKETS_SQL, TIME_SPENT_SQL, WORKLOGS_AFTER_SQL};
pub use worktime::{
    time_spent_from_row, worklog_from_row, TimeSpentRow, WorkTimeSource, WorklogRow, WORKLOG_BATCH_SIZE,
};

pub const CRATE_NAME: &str = "itsm-sources";

pub const DEFAULT_TITLE: &str = "No Subject";
pub const DEFAULT_DESCRIPTION: &str = "No description provided.";
pub const DEFAULT_STATUS: &str = "Open";
pub const DEFAULT_PRIORITY: &str = "Medium";

/// Flat row shape of the relational upstream query.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct RelationalRow {
    pub id: Option<String>,
    pub subject: Option<String>,
    pub description: Option<String>,
    pub status: Option<String>,
    pub priority: Option<String>,
    pub tech_id: Option<String>,
    pub tech_name: Option<String>,
    pub cust_id: Option<String>,
    pub cust_name: Option<String>,
    pub created_at_ms: Option<i64>,
    pub due_by_ms: Option<i64>,
    pub completed_at_ms: Option<i64>,
    pub timespent_minutes: Option<i64>,
}

/// A record as it came off the wire. Never persisted.
#[derive(Debug, Clone, PartialEq)]
pub enum RawRecord {
    Api(JsonValue),
    Relational(RelationalRow),
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error(transparent)]
    Http(#[from] FetchError),
    #[error("relational query failed: {0}")]
    Database(#[from] sqlx::Error),
    #[error("unexpected payload: {0}")]
    InvalidPayload(String),
}

#[async_trait]
pub trait TicketSource: Send + Sync {
    fn name(&self) -> &'static str;

    /// Finite, ordered batch; may be empty.
    async fn fetch(&self) -> Result<Vec<RawRecord>, SourceError>;
}

/// Map either raw shape into a draft. Missing fields fall back to defaults;
/// `now` stands in for an absent creation time. Only a missing id fails.
pub fn normalize(record: &RawRecord, now: DateTime<Utc>) -> Result<TicketDraft, NormalizeError> {
    match record {
        RawRecord::Api(value) => normalize_api(value, now),
        RawRecord::Relational(row) => normalize_relational(row, now),
    }
}

fn normalize_api(value: &JsonValue, now: DateTime<Utc>) -> Result<TicketDraft, NormalizeError> {
    let id = nested_text(value, &["id"]).ok_or(NormalizeError::MissingId)?;
    let text = |path: &[&str], default: &str| nested_text(value, path).unwrap_or_else(|| default.to_string());
    let millis = |field: &str| get_nested(value, &[field, "value"]).and_then(parse_epoch_millis);

    let status = text(&["status", "name"], DEFAULT_STATUS);
    let created = millis("created_time");
    let times = TicketTimes {
        created_at: created,
        responded_at: millis("responded_time"),
        resolved_at: millis("resolved_time"),
        completed_at: millis("completed_time"),
        status_terminal: is_terminal_status(&status),
    };

    // `time_elapsed` arrives either wrapped as `{value: ...}` or bare.
    let time_elapsed = get_nested(value, &["time_elapsed", "value"])
        .or_else(|| get_nested(value, &["time_elapsed"]).filter(|v| !v.is_object()))
        .map(parse_duration);

    Ok(TicketDraft {
        id,
        title: truncate_chars(&text(&["subject"], DEFAULT_TITLE), MAX_TITLE_CHARS),
        description: text(&["description"], DEFAULT_DESCRIPTION),
        customer_id: text(&["account", "id"], UNASSIGNED_CUSTOMER_ID),
        customer_name: text(&["account", "name"], UNASSIGNED_CUSTOMER_NAME),
        engineer_id: text(&["technician", "id"], UNASSIGNED_ENGINEER_ID),
        engineer_name: text(&["technician", "name"], UNASSIGNED_ENGINEER_NAME),
        priority: text(&["priority", "name"], DEFAULT_PRIORITY),
        category: text(&["category", "name"], OTHERS),
        upstream_request_type: nested_text(value, &["request_type", "name"]),
        upstream_is_service_request: flag_value(get_nested(value, &["is_service_request"])),
        created_at: created.unwrap_or(now),
        response_time_minutes: response_time_minutes(&times),
        resolve_time_hours: resolve_time_hours(&times),
        time_elapsed_minutes: time_elapsed,
        is_overdue: coerce_flag(get_nested(value, &["is_overdue"])),
        status,
    })
}

fn normalize_relational(row: &RelationalRow, now: DateTime<Utc>) -> Result<TicketDraft, NormalizeError> {
    let text = |field: &Option<String>| field.clone().and_then(text_or_none);
    let id = text(&row.id).ok_or(NormalizeError::MissingId)?;

    let status = text(&row.status).unwrap_or_else(|| DEFAULT_STATUS.to_string());
    let created = row.created_at_ms.and_then(millis_to_datetime);
    let completed = row.completed_at_ms.and_then(millis_to_datetime);
    let times = TicketTimes {
        created_at: created,
        completed_at: completed,
        status_terminal: is_terminal_status(&status),
        ..TicketTimes::default()
    };
    let is_overdue = row
        .due_by_ms
        .and_then(millis_to_datetime)
        .is_some_and(|due| completed.unwrap_or(now) > due);

    Ok(TicketDraft {
        id,
        title: truncate_chars(
            &text(&row.subject).unwrap_or_else(|| DEFAULT_TITLE.to_string()),
            MAX_TITLE_CHARS,
        ),
        description: text(&row.description).unwrap_or_else(|| DEFAULT_DESCRIPTION.to_string()),
        customer_id: text(&row.cust_id).unwrap_or_else(|| UNASSIGNED_CUSTOMER_ID.to_string()),
        customer_name: text(&row.cust_name).unwrap_or_else(|| UNASSIGNED_CUSTOMER_NAME.to_string()),
        engineer_id: text(&row.tech_id).unwrap_or_else(|| UNASSIGNED_ENGINEER_ID.to_string()),
        engineer_name: text(&row.tech_name).unwrap_or_else(|| UNASSIGNED_ENGINEER_NAME.to_string()),
        priority: text(&row.priority).unwrap_or_else(|| DEFAULT_PRIORITY.to_string()),
        category: OTHERS.to_string(),
        upstream_request_type: None,
        upstream_is_service_request: None,
        created_at: created.unwrap_or(now),
        response_time_minutes: response_time_minutes(&times),
        resolve_time_hours: resolve_time_hours(&times),
        time_elapsed_minutes: row.timespent_minutes,
        is_overdue,
        status,
    })
}
