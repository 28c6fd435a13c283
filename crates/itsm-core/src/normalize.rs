//! Total, non-panicking conversions for heterogeneous upstream field encodings.
//!
//! Every function here degrades to a default or `None` on malformed input; a
//! bad field must never abort ingestion of the record it belongs to.

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NormalizeError {
    #[error("record has no usable id")]
    MissingId,
}

/// Walk a tree of optional maps. `None` as soon as a segment is missing or not
/// a map, or when the leaf is null.
pub fn get_nested<'a>(value: &'a JsonValue, path: &[&str]) -> Option<&'a JsonValue> {
    let mut cur = value;
    for segment in path {
        cur = cur.as_object()?.get(*segment)?;
    }
    (!cur.is_null()).then_some(cur)
}

pub fn get_nested_or<'a>(value: &'a JsonValue, path: &[&str], default: &'a JsonValue) -> &'a JsonValue {
    get_nested(value, path).unwrap_or(default)
}

/// Scalar-to-string, accepting the numeric ids some payloads carry.
pub fn value_to_string(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::String(s) => Some(s.clone()),
        JsonValue::Number(n) => Some(n.to_string()),
        JsonValue::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Non-blank text at `path`, trimmed.
pub fn nested_text(value: &JsonValue, path: &[&str]) -> Option<String> {
    get_nested(value, path)
        .and_then(value_to_string)
        .and_then(text_or_none)
}

pub fn text_or_none(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

pub fn round_half_up(value: f64) -> i64 {
    if !value.is_finite() {
        return 0;
    }
    (value + 0.5).floor() as i64
}

/// Duration in whole minutes from any of the encodings upstream uses.
///
/// Numbers are minutes. Strings are numeric minutes, `MM:SS` or `HH:MM:SS`.
/// Seconds become fractional minutes before rounding half-up. Anything else
/// is 0.
pub fn parse_duration(raw: &JsonValue) -> i64 {
    match raw {
        JsonValue::Number(n) => n.as_f64().map(round_half_up).unwrap_or(0),
        JsonValue::String(s) => parse_duration_str(s),
        _ => 0,
    }
}

pub fn parse_duration_str(raw: &str) -> i64 {
    let raw = raw.trim();
    if raw.is_empty() {
        return 0;
    }
    let minutes = if raw.contains(':') {
        colon_minutes(raw)
    } else {
        raw.parse::<f64>().ok()
    };
    minutes.map(round_half_up).unwrap_or(0)
}

fn colon_minutes(raw: &str) -> Option<f64> {
    let parts = raw
        .split(':')
        .map(|part| part.trim().parse::<f64>().ok())
        .collect::<Option<Vec<_>>>()?;
    match parts.as_slice() {
        [minutes, seconds] => Some(minutes + seconds / 60.0),
        [hours, minutes, seconds] => Some(hours * 60.0 + minutes + seconds / 60.0),
        _ => None,
    }
}

/// Epoch milliseconds as number or numeric string. Non-positive is absent.
pub fn parse_epoch_millis(raw: &JsonValue) -> Option<DateTime<Utc>> {
    let millis = match raw {
        JsonValue::Number(n) => n.as_i64().or_else(|| finite_as_i64(n.as_f64()?)),
        JsonValue::String(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| finite_as_i64(s.parse::<f64>().ok()?))
        }
        _ => None,
    }?;
    millis_to_datetime(millis)
}

fn finite_as_i64(value: f64) -> Option<i64> {
    value.is_finite().then_some(value as i64)
}

pub fn millis_to_datetime(millis: i64) -> Option<DateTime<Utc>> {
    if millis <= 0 {
        return None;
    }
    DateTime::from_timestamp_millis(millis)
}

/// Boolean flag that may arrive as a JSON bool or as `"true"`/`"false"`.
pub fn flag_value(raw: Option<&JsonValue>) -> Option<bool> {
    match raw? {
        JsonValue::Bool(b) => Some(*b),
        JsonValue::String(s) => {
            let s = s.trim();
            if s.eq_ignore_ascii_case("true") {
                Some(true)
            } else if s.eq_ignore_ascii_case("false") {
                Some(false)
            } else {
                None
            }
        }
        _ => None,
    }
}

pub fn coerce_flag(raw: Option<&JsonValue>) -> bool {
    flag_value(raw).unwrap_or(false)
}

pub fn is_terminal_status(status: &str) -> bool {
    let status = status.trim();
    status.eq_ignore_ascii_case("resolved") || status.eq_ignore_ascii_case("closed")
}

pub fn truncate_chars(value: &str, max: usize) -> String {
    value.chars().take(max).collect()
}

/// Whole minutes, truncated toward zero.
pub fn minutes_between(from: DateTime<Utc>, to: DateTime<Utc>) -> i64 {
    (to - from).num_minutes()
}

/// Hours rounded to two decimals.
pub fn hours_between(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    let hours = (to - from).num_milliseconds() as f64 / 3_600_000.0;
    (hours * 100.0).round() / 100.0
}

/// Lifecycle timestamps a derived metric may be computed from.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TicketTimes {
    pub created_at: Option<DateTime<Utc>>,
    pub responded_at: Option<DateTime<Utc>>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub status_terminal: bool,
}

/// One named way of deriving a metric; yields `None` when it does not apply.
#[derive(Debug, Clone, Copy)]
pub struct TimeStrategy<T> {
    pub name: &'static str,
    pub derive: fn(&TicketTimes) -> Option<T>,
}

pub const RESPONSE_TIME_STRATEGIES: &[TimeStrategy<i64>] = &[TimeStrategy {
    name: "responded_time",
    derive: response_from_responded,
}];

pub const RESOLVE_TIME_STRATEGIES: &[TimeStrategy<f64>] = &[
    TimeStrategy {
        name: "resolved_time",
        derive: resolve_from_resolved,
    },
    TimeStrategy {
        name: "completed_time_when_terminal",
        derive: resolve_from_completed,
    },
];

fn response_from_responded(times: &TicketTimes) -> Option<i64> {
    Some(minutes_between(times.created_at?, times.responded_at?))
}

fn resolve_from_resolved(times: &TicketTimes) -> Option<f64> {
    Some(hours_between(times.created_at?, times.resolved_at?))
}

fn resolve_from_completed(times: &TicketTimes) -> Option<f64> {
    if !times.status_terminal {
        return None;
    }
    Some(hours_between(times.created_at?, times.completed_at?))
}

/// First strategy that yields a value, with its name.
pub fn first_match<T>(strategies: &[TimeStrategy<T>], times: &TicketTimes) -> Option<(&'static str, T)> {
    strategies
        .iter()
        .find_map(|strategy| (strategy.derive)(times).map(|v| (strategy.name, v)))
}

pub fn response_time_minutes(times: &TicketTimes) -> Option<i64> {
    first_match(RESPONSE_TIME_STRATEGIES, times).map(|(_, v)| v)
}

pub fn resolve_time_hours(times: &TicketTimes) -> Option<f64> {
    first_match(RESOLVE_TIME_STRATEGIES, times).map(|(_, v)| v)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 10, h, m, 0).single().unwrap()
    }

    #[test]
    fn duration_numeric_minutes_round_half_up() {
        assert_eq!(parse_duration(&json!(90)), 90);
        assert_eq!(parse_duration(&json!(90.4)), 90);
        assert_eq!(parse_duration(&json!(90.5)), 91);
    }

    #[test]
    fn duration_strings() {
        assert_eq!(parse_duration(&json!("90.5")), 91);
        assert_eq!(parse_duration(&json!("0")), 0);
        assert_eq!(parse_duration(&json!("2:30")), 3);
        assert_eq!(parse_duration(&json!("1:02:03")), 62);
    }

    #[test]
    fn duration_is_total() {
        assert_eq!(parse_duration(&JsonValue::Null), 0);
        assert_eq!(parse_duration(&json!("soon")), 0);
        assert_eq!(parse_duration(&json!("1:2:3:4")), 0);
        assert_eq!(parse_duration(&json!("a:30")), 0);
        assert_eq!(parse_duration(&json!("NaN")), 0);
        assert_eq!(parse_duration(&json!({"value": 5})), 0);
        assert_eq!(parse_duration(&json!([1, 2])), 0);
        assert_eq!(parse_duration(&json!(true)), 0);
    }

    #[test]
    fn nested_lookup_stops_at_missing_or_non_map_segments() {
        let v = json!({"status": {"name": "Open"}, "technician": null, "tags": ["a"]});
        assert_eq!(get_nested(&v, &["status", "name"]), Some(&json!("Open")));
        assert_eq!(get_nested(&v, &["status", "missing"]), None);
        assert_eq!(get_nested(&v, &["technician", "name"]), None);
        assert_eq!(get_nested(&v, &["technician"]), None);
        assert_eq!(get_nested(&v, &["tags", "0"]), None);
        assert_eq!(get_nested(&json!("scalar"), &["a"]), None);

        let fallback = json!("Medium");
        assert_eq!(get_nested_or(&v, &["priority", "name"], &fallback), &fallback);
    }

    #[test]
    fn nested_text_accepts_numeric_ids_and_skips_blank() {
        let v = json!({"account": {"id": 1207, "name": "  "}});
        assert_eq!(nested_text(&v, &["account", "id"]).as_deref(), Some("1207"));
        assert_eq!(nested_text(&v, &["account", "name"]), None);
    }

    #[test]
    fn epoch_millis_from_number_or_string() {
        let expected = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).single().unwrap();
        assert_eq!(parse_epoch_millis(&json!(1_767_225_600_000_i64)), Some(expected));
        assert_eq!(parse_epoch_millis(&json!("1767225600000")), Some(expected));
        assert_eq!(parse_epoch_millis(&json!(0)), None);
        assert_eq!(parse_epoch_millis(&json!("-1")), None);
        assert_eq!(parse_epoch_millis(&json!("yesterday")), None);
    }

    #[test]
    fn flags_coerce_strings() {
        assert!(coerce_flag(Some(&json!(true))));
        assert!(coerce_flag(Some(&json!("TRUE"))));
        assert!(!coerce_flag(Some(&json!("false"))));
        assert!(!coerce_flag(Some(&json!(1))));
        assert!(!coerce_flag(None));
    }

    #[test]
    fn response_time_needs_both_ends() {
        let mut times = TicketTimes {
            created_at: Some(at(8, 0)),
            ..Default::default()
        };
        assert_eq!(response_time_minutes(&times), None);
        times.responded_at = Some(at(8, 45));
        assert_eq!(response_time_minutes(&times), Some(45));
    }

    #[test]
    fn resolve_time_prefers_resolved_over_completed() {
        let times = TicketTimes {
            created_at: Some(at(8, 0)),
            resolved_at: Some(at(10, 30)),
            completed_at: Some(at(12, 0)),
            status_terminal: true,
            ..Default::default()
        };
        assert_eq!(first_match(RESOLVE_TIME_STRATEGIES, &times), Some(("resolved_time", 2.5)));
    }

    #[test]
    fn completed_time_only_counts_for_terminal_status() {
        let mut times = TicketTimes {
            created_at: Some(at(8, 0)),
            completed_at: Some(at(9, 20)),
            ..Default::default()
        };
        assert_eq!(resolve_time_hours(&times), None);
        times.status_terminal = true;
        assert_eq!(resolve_time_hours(&times), Some(1.33));
    }

    #[test]
    fn title_truncation_respects_char_boundaries() {
        assert_eq!(truncate_chars("lỗi mạng", 3), "lỗi");
    }
}
