use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use itsm_sources::{ApiSource, ApiSourceConfig, RawRecord, SourceError, TicketSource};
use itsm_storage::BackoffPolicy;
use serde_json::{json, Value};

#[derive(Default)]
struct Upstream {
    total: usize,
    /// `start_index` values answered with the paired status instead of data.
    failures: HashMap<usize, (StatusCode, usize)>,
    requests: AtomicUsize,
    seen_start_indexes: Mutex<Vec<usize>>,
    seen_tokens: Mutex<Vec<String>>,
}

async fn requests_handler(
    State(upstream): State<Arc<Upstream>>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    upstream.requests.fetch_add(1, Ordering::SeqCst);
    if let Some(token) = headers.get("authtoken").and_then(|v| v.to_str().ok()) {
        upstream.seen_tokens.lock().unwrap().push(token.to_string());
    }

    let input: Value = serde_json::from_str(params.get("input_data").map(String::as_str).unwrap_or("{}")).unwrap();
    let row_count = input["list_info"]["row_count"].as_u64().unwrap() as usize;
    let start_index = input["list_info"]["start_index"].as_u64().unwrap() as usize;
    upstream.seen_start_indexes.lock().unwrap().push(start_index);

    if let Some((status, remaining)) = upstream.failures.get(&start_index) {
        let seen = upstream
            .seen_start_indexes
            .lock()
            .unwrap()
            .iter()
            .filter(|s| **s == start_index)
            .count();
        if seen <= *remaining {
            return (*status, "upstream unavailable").into_response();
        }
    }

    let first = start_index - 1;
    let last = (first + row_count).min(upstream.total);
    let requests = (first..last)
        .map(|i| json!({"id": (1000 + i).to_string(), "subject": format!("Ticket {i}")}))
        .collect::<Vec<_>>();
    Json(json!({"requests": requests, "list_info": {"has_more_rows": last < upstream.total}})).into_response()
}

async fn spawn_upstream(upstream: Arc<Upstream>) -> String {
    let app = Router::new()
        .route("/api/v3/requests", get(requests_handler))
        .with_state(upstream);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}/api/v3")
}

fn source(base_url: String, page_size: usize, max_pages: usize) -> ApiSource {
    let config = ApiSourceConfig {
        base_url,
        api_key: Some("test-token".into()),
        page_size,
        max_pages,
        timeout: Duration::from_secs(5),
        backoff: BackoffPolicy::none(),
    };
    ApiSource::from_config(&config).unwrap().unwrap()
}

fn ids(records: &[RawRecord]) -> Vec<String> {
    records
        .iter()
        .map(|r| match r {
            RawRecord::Api(v) => v["id"].as_str().unwrap().to_string(),
            RawRecord::Relational(_) => panic!("unexpected relational record"),
        })
        .collect()
}

#[tokio::test]
async fn stops_on_short_page_and_sends_auth_header() {
    let upstream = Arc::new(Upstream { total: 5, ..Upstream::default() });
    let base = spawn_upstream(upstream.clone()).await;

    let records = source(base, 2, 20).fetch().await.unwrap();

    assert_eq!(ids(&records), vec!["1000", "1001", "1002", "1003", "1004"]);
    assert_eq!(*upstream.seen_start_indexes.lock().unwrap(), vec![1, 3, 5]);
    assert!(upstream.seen_tokens.lock().unwrap().iter().all(|t| t == "test-token"));
}

#[tokio::test]
async fn page_budget_bounds_the_fetch() {
    let upstream = Arc::new(Upstream { total: 50, ..Upstream::default() });
    let base = spawn_upstream(upstream.clone()).await;

    let records = source(base, 2, 3).fetch().await.unwrap();

    assert_eq!(records.len(), 6);
    assert_eq!(upstream.requests.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn empty_first_page_yields_no_records() {
    let upstream = Arc::new(Upstream::default());
    let base = spawn_upstream(upstream.clone()).await;

    let records = source(base, 10, 20).fetch().await.unwrap();

    assert!(records.is_empty());
    assert_eq!(upstream.requests.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn first_page_failure_fails_the_fetch() {
    let upstream = Arc::new(Upstream {
        total: 10,
        failures: HashMap::from([(1, (StatusCode::UNAUTHORIZED, usize::MAX))]),
        ..Upstream::default()
    });
    let base = spawn_upstream(upstream).await;

    let err = source(base, 2, 20).fetch().await.unwrap_err();

    assert!(matches!(err, SourceError::Http(_)));
}

#[tokio::test]
async fn later_page_failure_keeps_collected_records() {
    let upstream = Arc::new(Upstream {
        total: 10,
        failures: HashMap::from([(5, (StatusCode::INTERNAL_SERVER_ERROR, usize::MAX))]),
        ..Upstream::default()
    });
    let base = spawn_upstream(upstream).await;

    let records = source(base, 2, 20).fetch().await.unwrap();

    assert_eq!(ids(&records), vec!["1000", "1001", "1002", "1003"]);
}

#[tokio::test]
async fn transient_server_errors_are_retried() {
    let upstream = Arc::new(Upstream {
        total: 1,
        failures: HashMap::from([(1, (StatusCode::SERVICE_UNAVAILABLE, 1))]),
        ..Upstream::default()
    });
    let base = spawn_upstream(upstream.clone()).await;
    let config = ApiSourceConfig {
        base_url: base,
        api_key: Some("test-token".into()),
        page_size: 10,
        max_pages: 20,
        timeout: Duration::from_secs(5),
        backoff: BackoffPolicy {
            max_retries: 2,
            base_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(20),
        },
    };

    let records = ApiSource::from_config(&config).unwrap().unwrap().fetch().await.unwrap();

    assert_eq!(records.len(), 1);
    assert_eq!(upstream.requests.load(Ordering::SeqCst), 2);
}
