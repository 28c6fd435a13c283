//! Work time rows read straight from the ticketing database.

use async_trait::async_trait;
use itsm_core::normalize::{millis_to_datetime, text_or_none, truncate_chars};
use itsm_core::worktime::millis_to_seconds;
use itsm_core::{NormalizeError, TechTimeSpent, Worklog, MAX_TITLE_CHARS};
use serde::{Deserialize, Serialize};

use crate::SourceError;

/// Work log lines fetched per incremental run.
pub const WORKLOG_BATCH_SIZE: i64 = 100;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct TimeSpentRow {
    pub assessment_id: Option<String>,
    pub request_id: Option<String>,
    pub subject: Option<String>,
    pub category: Option<String>,
    pub subcategory: Option<String>,
    pub item: Option<String>,
    pub technician: Option<String>,
    pub group_name: Option<String>,
    pub from_technician: Option<String>,
    pub to_technician: Option<String>,
    pub time_spent_minutes: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct WorklogRow {
    pub remote_id: Option<i64>,
    pub ticket_id: Option<String>,
    pub technician_name: Option<String>,
    pub time_spent_ms: Option<i64>,
    pub description: Option<String>,
    pub created_at_ms: Option<i64>,
}

#[async_trait]
pub trait WorkTimeSource: Send + Sync {
    /// Positive time-spent entries, newest request first, up to the row cap.
    async fn fetch_time_spent(&self) -> Result<Vec<TimeSpentRow>, SourceError>;

    /// Work log lines with a remote id above `last_id`, ascending, one batch.
    async fn fetch_worklogs_after(&self, last_id: i64) -> Result<Vec<WorklogRow>, SourceError>;
}

fn present(value: &Option<String>) -> Option<String> {
    value.clone().and_then(text_or_none)
}

/// `None` when the row has no assessment id; such rows are skipped, not failed.
pub fn time_spent_from_row(row: &TimeSpentRow) -> Option<TechTimeSpent> {
    let assessment_id = present(&row.assessment_id)?;
    Some(TechTimeSpent {
        assessment_id,
        request_id: present(&row.request_id).unwrap_or_default(),
        subject: truncate_chars(row.subject.as_deref().unwrap_or_default(), MAX_TITLE_CHARS),
        category: present(&row.category),
        subcategory: present(&row.subcategory),
        item: present(&row.item),
        technician: present(&row.technician),
        group_name: present(&row.group_name),
        from_technician: present(&row.from_technician),
        to_technician: present(&row.to_technician),
        time_spent_minutes: row.time_spent_minutes.unwrap_or(0).max(0),
    })
}

pub fn worklog_from_row(row: &WorklogRow) -> Result<Worklog, NormalizeError> {
    let remote_id = row.remote_id.ok_or(NormalizeError::MissingId)?;
    let ticket_id = present(&row.ticket_id).ok_or(NormalizeError::MissingId)?;
    Ok(Worklog {
        remote_id,
        ticket_id,
        technician_name: present(&row.technician_name),
        time_spent_seconds: millis_to_seconds(row.time_spent_ms),
        description: row.description.clone(),
        remote_created_at: row.created_at_ms.and_then(millis_to_datetime),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn time_spent_rows_without_assessment_are_skipped() {
        let row = TimeSpentRow {
            request_id: Some("42".into()),
            time_spent_minutes: Some(30),
            ..Default::default()
        };
        assert!(time_spent_from_row(&row).is_none());
    }

    #[test]
    fn time_spent_row_maps_and_truncates_subject() {
        let row = TimeSpentRow {
            assessment_id: Some("900".into()),
            request_id: Some("42".into()),
            subject: Some("x".repeat(600)),
            technician: Some("  ".into()),
            group_name: Some("Desktop".into()),
            time_spent_minutes: None,
            ..Default::default()
        };
        let entry = time_spent_from_row(&row).unwrap();
        assert_eq!(entry.subject.chars().count(), MAX_TITLE_CHARS);
        assert_eq!(entry.technician, None);
        assert_eq!(entry.group_name.as_deref(), Some("Desktop"));
        assert_eq!(entry.time_spent_minutes, 0);
    }

    #[test]
    fn worklog_row_converts_millis() {
        let row = WorklogRow {
            remote_id: Some(77),
            ticket_id: Some("42".into()),
            technician_name: Some("Minh Le".into()),
            time_spent_ms: Some(1_800_000),
            description: Some("Replaced dock".into()),
            created_at_ms: Some(1_767_225_600_000),
        };
        let log = worklog_from_row(&row).unwrap();
        assert_eq!(log.time_spent_seconds, 1800);
        assert_eq!(log.remote_created_at.unwrap().timestamp(), 1_767_225_600);
    }

    #[test]
    fn worklog_row_needs_both_ids() {
        let row = WorklogRow {
            remote_id: Some(77),
            ..Default::default()
        };
        assert!(matches!(worklog_from_row(&row), Err(NormalizeError::MissingId)));
    }
}
