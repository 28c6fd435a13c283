//! Core ticket model, field normalization, request-type classification and
//! technician work time records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod classify;
pub mod normalize;
pub mod worktime;

pub use classify::{classify, Classification, ClassificationRules, KeywordRule};
pub use normalize::NormalizeError;
pub use worktime::{TechTimeSpent, Worklog};

pub const CRATE_NAME: &str = "itsm-core";

/// Customer id written when the upstream record names no account.
pub const UNASSIGNED_CUSTOMER_ID: &str = "N/A";
pub const UNASSIGNED_CUSTOMER_NAME: &str = "General";
/// Engineer id written when the upstream record has no technician.
pub const UNASSIGNED_ENGINEER_ID: &str = "Unassigned";
pub const UNASSIGNED_ENGINEER_NAME: &str = "Unassigned";
pub const DEFAULT_ENGINEER_GROUP: &str = "Support";
/// Placeholder used upstream for both request type and category.
pub const OTHERS: &str = "Others";
pub const MAX_TITLE_CHARS: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RequestType {
    Incident,
    #[serde(rename = "Service Request")]
    ServiceRequest,
    #[serde(rename = "Change Request")]
    ChangeRequest,
    Others,
}

impl RequestType {
    /// Storage and wire representation, matching the upstream display names.
    pub fn as_str(self) -> &'static str {
        match self {
            RequestType::Incident => "Incident",
            RequestType::ServiceRequest => "Service Request",
            RequestType::ChangeRequest => "Change Request",
            RequestType::Others => OTHERS,
        }
    }

    /// Lenient parse of an upstream tag. Unknown tags collapse to `Others`.
    pub fn from_upstream(tag: &str) -> Self {
        let tag = tag.trim();
        if tag.eq_ignore_ascii_case("service request") {
            RequestType::ServiceRequest
        } else if tag.eq_ignore_ascii_case("incident") {
            RequestType::Incident
        } else if tag.eq_ignore_ascii_case("change request") || tag.eq_ignore_ascii_case("change") {
            RequestType::ChangeRequest
        } else {
            RequestType::Others
        }
    }
}

/// Where a ticket's request type came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassificationSource {
    Upstream,
    Keyword,
    Default,
}

impl ClassificationSource {
    pub fn as_str(self) -> &'static str {
        match self {
            ClassificationSource::Upstream => "upstream",
            ClassificationSource::Keyword => "keyword",
            ClassificationSource::Default => "default",
        }
    }

    pub fn parse(value: &str) -> Self {
        match value {
            "upstream" => ClassificationSource::Upstream,
            "keyword" => ClassificationSource::Keyword,
            _ => ClassificationSource::Default,
        }
    }
}

/// Normalized handoff from source fetchers into classification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TicketDraft {
    pub id: String,
    pub title: String,
    pub description: String,
    pub customer_id: String,
    pub customer_name: String,
    pub engineer_id: String,
    pub engineer_name: String,
    pub status: String,
    pub priority: String,
    pub category: String,
    pub upstream_request_type: Option<String>,
    pub upstream_is_service_request: Option<bool>,
    pub created_at: DateTime<Utc>,
    pub response_time_minutes: Option<i64>,
    pub resolve_time_hours: Option<f64>,
    pub time_elapsed_minutes: Option<i64>,
    pub is_overdue: bool,
}

impl TicketDraft {
    pub fn into_canonical(self, classification: Classification) -> CanonicalTicket {
        CanonicalTicket {
            id: self.id,
            title: self.title,
            description: self.description,
            customer_id: self.customer_id,
            customer_name: self.customer_name,
            engineer_id: self.engineer_id,
            engineer_name: self.engineer_name,
            status: self.status,
            priority: self.priority,
            category: classification.category,
            request_type: classification.request_type,
            is_service_request: classification.is_service_request,
            classification_source: classification.source,
            created_at: self.created_at,
            response_time_minutes: self.response_time_minutes,
            resolve_time_hours: self.resolve_time_hours,
            time_elapsed_minutes: self.time_elapsed_minutes,
            is_overdue: self.is_overdue,
        }
    }
}

/// Canonical persisted ticket, keyed by the upstream natural id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalTicket {
    pub id: String,
    pub title: String,
    pub description: String,
    pub customer_id: String,
    pub customer_name: String,
    pub engineer_id: String,
    pub engineer_name: String,
    pub status: String,
    pub priority: String,
    pub category: String,
    pub request_type: RequestType,
    pub is_service_request: bool,
    pub classification_source: ClassificationSource,
    pub created_at: DateTime<Utc>,
    pub response_time_minutes: Option<i64>,
    pub resolve_time_hours: Option<f64>,
    pub time_elapsed_minutes: Option<i64>,
    pub is_overdue: bool,
}

impl CanonicalTicket {
    /// Merge a newer sighting into this stored ticket.
    ///
    /// `id` and `created_at` never change. Classification fields are locked
    /// once they came from an upstream tag and the incoming sighting was only
    /// classified heuristically.
    pub fn merged_with(&self, incoming: &CanonicalTicket) -> CanonicalTicket {
        let mut merged = incoming.clone();
        merged.id = self.id.clone();
        merged.created_at = self.created_at;
        if self.classification_locked_against(incoming) {
            merged.request_type = self.request_type;
            merged.is_service_request = self.is_service_request;
            merged.category = self.category.clone();
            merged.classification_source = self.classification_source;
        }
        merged
    }

    fn classification_locked_against(&self, incoming: &CanonicalTicket) -> bool {
        self.classification_source == ClassificationSource::Upstream
            && incoming.classification_source != ClassificationSource::Upstream
    }

    pub fn customer(&self) -> Option<Customer> {
        (self.customer_id != UNASSIGNED_CUSTOMER_ID).then(|| Customer {
            id: self.customer_id.clone(),
            name: self.customer_name.clone(),
        })
    }

    pub fn engineer(&self) -> Option<Engineer> {
        (self.engineer_id != UNASSIGNED_ENGINEER_ID).then(|| Engineer {
            id: self.engineer_id.clone(),
            name: self.engineer_name.clone(),
            group: Some(DEFAULT_ENGINEER_GROUP.to_string()),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Customer {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Engineer {
    pub id: String,
    pub name: String,
    pub group: Option<String>,
}
