//! Deterministic synthetic batch in the REST payload shape.

use chrono::{DateTime, Utc};
use itsm_sources::RawRecord;
use serde_json::{json, Value as JsonValue};

// 2026-01-01T00:00:00Z
const BASE_EPOCH_MS: i64 = 1_767_225_600_000;
const HOUR_MS: i64 = 3_600_000;

const SUBJECTS: &[&str] = &[
    "Monthly health check report",
    "Server down at branch office",
    "Yêu cầu cấp tài khoản VPN",
    "Firewall change for new subnet",
    "Printer error on floor 3",
    "Backup job failure",
    "Cung cấp laptop cho nhân viên mới",
    "Xin chào",
];

const REQUEST_TYPES: &[Option<&str>] = &[
    None,
    Some("Incident"),
    Some("Service Request"),
    None,
    Some("Others"),
];

const STATUSES: &[&str] = &["Open", "In Progress", "On Hold", "Resolved", "Closed"];
const PRIORITIES: &[&str] = &["Low", "Medium", "High", "Urgent"];
const CATEGORIES: &[&str] = &["Hardware", "Network", "Others", "Software"];
const ACCOUNTS: &[(&str, &str)] = &[("101", "Acme Logistics"), ("102", "Northwind Bank"), ("103", "Fabrikam")];
const TECHNICIANS: &[(&str, &str)] = &[("7", "Tuan"), ("8", "Lan"), ("9", "Minh")];

/// `count` records; the same count always yields the same batch. Creation
/// times never pass `now`.
pub fn generate(count: usize, now: DateTime<Utc>) -> Vec<RawRecord> {
    let ceiling = now.timestamp_millis();
    (0..count).map(|i| RawRecord::Api(record(i, ceiling))).collect()
}

fn pick<T: Copy>(items: &[T], i: usize, stride: usize) -> T {
    items[(i * stride) % items.len()]
}

fn record(i: usize, ceiling_ms: i64) -> JsonValue {
    let created = (BASE_EPOCH_MS + i as i64 * 7 * HOUR_MS).min(ceiling_ms);
    let status = pick(STATUSES, i, 1);
    let terminal = matches!(status, "Resolved" | "Closed");

    let mut value = json!({
        "id": format!("{}", 900_000 + i),
        "subject": pick(SUBJECTS, i, 3),
        "description": format!("Synthetic ticket #{}", i + 1),
        "status": {"name": status},
        "priority": {"name": pick(PRIORITIES, i, 1)},
        "category": {"name": pick(CATEGORIES, i, 1)},
        "created_time": {"value": created.to_string()},
        "responded_time": {"value": (created + (15 + (i as i64 % 4) * 10) * 60_000).to_string()},
        "time_elapsed": {"value": format!("{}:{:02}", i % 5, (i * 13) % 60)},
        "is_overdue": i % 6 == 0,
    });

    if let Some(tag) = pick(REQUEST_TYPES, i, 1) {
        value["request_type"] = json!({"name": tag});
    }
    if i % 4 != 3 {
        let (id, name) = pick(ACCOUNTS, i, 1);
        value["account"] = json!({"id": id, "name": name});
    }
    if i % 5 != 4 {
        let (id, name) = pick(TECHNICIANS, i, 2);
        value["technician"] = json!({"id": id, "name": name});
    }
    if terminal {
        value["resolved_time"] = json!({"value": (created + (2 + i as i64 % 30) * HOUR_MS).to_string()});
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use itsm_sources::normalize;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 6, 1, 0, 0, 0).single().unwrap()
    }

    #[test]
    fn batches_are_deterministic_and_sized() {
        assert_eq!(generate(12, now()), generate(12, now()));
        assert_eq!(generate(12, now()).len(), 12);
        assert!(generate(0, now()).is_empty());
    }

    #[test]
    fn every_record_normalizes() {
        for record in generate(40, now()) {
            let draft = normalize(&record, now()).unwrap();
            assert!(draft.created_at <= now());
        }
    }
}
