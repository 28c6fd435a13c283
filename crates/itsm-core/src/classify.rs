//! Request-type classification: upstream tag, then keyword rule table, then default.

use serde::{Deserialize, Serialize};

use crate::{ClassificationSource, RequestType, TicketDraft, OTHERS};

const SERVICE_REQUEST_KEYWORDS: &[&str] = &[
    "service request",
    "yêu cầu",
    "request",
    "checklist",
    "report",
    "health check",
    "healthcheck",
    "monitor",
    "cung cấp",
    "bàn giao",
    "ticket",
    "daily",
    "weekly",
    "monthly",
    "patching",
    "update",
    "upgrade",
    "báo giá",
    "invoice",
    "hợp đồng",
    "certificate",
];

const INCIDENT_KEYWORDS: &[&str] = &[
    "incident",
    "lỗi",
    "sự cố",
    "hỏng",
    "error",
    "failure",
    "troubleshoot",
    "bảo hành",
    "repair",
    "hỗ trợ",
    "fix",
    "fault",
    "broken",
    "replace",
    "down",
    "critical",
    "warning",
    "high",
    "usage",
    "disconnected",
    "không vào được",
    "không khởi động",
    "alert",
    "expired",
    "timeout",
    "mất kết nối",
];

/// Ordered keyword rule table; the first rule with a matching keyword wins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationRules {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub rules: Vec<KeywordRule>,
}

fn default_version() -> u32 {
    1
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeywordRule {
    pub name: String,
    pub contains_any: Vec<String>,
    pub request_type: RequestType,
    /// Category override; `None` keeps the upstream category.
    #[serde(default)]
    pub category: Option<String>,
}

impl Default for ClassificationRules {
    fn default() -> Self {
        Self::builtin()
    }
}

impl ClassificationRules {
    pub fn builtin() -> Self {
        let words = |list: &[&str]| list.iter().map(|k| k.to_string()).collect::<Vec<_>>();
        Self {
            version: 1,
            rules: vec![
                KeywordRule {
                    name: "service-request".into(),
                    contains_any: words(SERVICE_REQUEST_KEYWORDS),
                    request_type: RequestType::ServiceRequest,
                    category: None,
                },
                KeywordRule {
                    name: "incident".into(),
                    contains_any: words(INCIDENT_KEYWORDS),
                    request_type: RequestType::Incident,
                    category: None,
                },
                KeywordRule {
                    name: "change".into(),
                    contains_any: words(&["change"]),
                    request_type: RequestType::ChangeRequest,
                    category: Some("Change".into()),
                },
            ],
        }
    }

    pub fn first_match(&self, title: &str) -> Option<&KeywordRule> {
        let title = title.to_lowercase();
        self.rules.iter().find(|rule| {
            rule.contains_any
                .iter()
                .any(|needle| title.contains(&needle.to_lowercase()))
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    pub request_type: RequestType,
    pub is_service_request: bool,
    pub category: String,
    pub source: ClassificationSource,
}

impl Classification {
    fn new(request_type: RequestType, category: String, source: ClassificationSource) -> Self {
        Self {
            request_type,
            is_service_request: request_type == RequestType::ServiceRequest,
            category,
            source,
        }
    }
}

fn is_placeholder(value: &str) -> bool {
    value.trim().eq_ignore_ascii_case(OTHERS)
}

/// Deterministic: the same draft and rules always give the same answer.
pub fn classify(draft: &TicketDraft, rules: &ClassificationRules) -> Classification {
    let tag = draft.upstream_request_type.as_deref().unwrap_or(OTHERS);
    let upstream_type = RequestType::from_upstream(tag);
    let category = draft.category.clone();

    if upstream_type == RequestType::ServiceRequest || draft.upstream_is_service_request == Some(true) {
        return Classification::new(RequestType::ServiceRequest, category, ClassificationSource::Upstream);
    }
    if upstream_type == RequestType::Incident {
        return Classification::new(RequestType::Incident, category, ClassificationSource::Upstream);
    }

    if is_placeholder(tag) || is_placeholder(&draft.category) {
        return match rules.first_match(&draft.title) {
            Some(rule) => Classification::new(
                rule.request_type,
                rule.category.clone().unwrap_or(category),
                ClassificationSource::Keyword,
            ),
            None => Classification::new(RequestType::Others, category, ClassificationSource::Default),
        };
    }

    Classification::new(upstream_type, category, ClassificationSource::Upstream)
}
