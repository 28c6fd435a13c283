//! Technician work time: per-assessment time-spent entries and work log lines.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One technician charge against a request, keyed by the upstream
/// assessment id. Re-syncing overwrites every other field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TechTimeSpent {
    pub assessment_id: String,
    pub request_id: String,
    pub subject: String,
    pub category: Option<String>,
    pub subcategory: Option<String>,
    pub item: Option<String>,
    pub technician: Option<String>,
    pub group_name: Option<String>,
    pub from_technician: Option<String>,
    pub to_technician: Option<String>,
    pub time_spent_minutes: i64,
}

impl TechTimeSpent {
    /// `H:MM`, e.g. `1:05` for 65 minutes.
    pub fn formatted(&self) -> String {
        let minutes = self.time_spent_minutes.max(0);
        format!("{}:{:02}", minutes / 60, minutes % 60)
    }

    /// Decimal hours rounded to two places.
    pub fn hours(&self) -> f64 {
        (self.time_spent_minutes.max(0) as f64 / 60.0 * 100.0).round() / 100.0
    }
}

/// One upstream work log line. Append-only: an id already stored is skipped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Worklog {
    pub remote_id: i64,
    pub ticket_id: String,
    pub technician_name: Option<String>,
    pub time_spent_seconds: i64,
    pub description: Option<String>,
    pub remote_created_at: Option<DateTime<Utc>>,
}

impl Worklog {
    /// `HH:MM`.
    pub fn formatted(&self) -> String {
        let seconds = self.time_spent_seconds.max(0);
        format!("{:02}:{:02}", seconds / 3600, (seconds % 3600) / 60)
    }
}

/// Work log durations arrive in milliseconds. Absent or negative is zero.
pub fn millis_to_seconds(raw: Option<i64>) -> i64 {
    raw.map(|ms| ms.max(0) / 1000).unwrap_or(0)
}
