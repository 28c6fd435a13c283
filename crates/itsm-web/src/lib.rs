//! Control surface: manual sync triggers, sync status and health.

use std::future::Future;
use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use itsm_sync::{SyncOrchestrator, WorkTimeJob};
use serde::Serialize;
use tokio::net::TcpListener;
use tracing::{info, warn};

pub const CRATE_NAME: &str = "itsm-web";

pub const SERVICE_NAME: &str = "ITSM Ticket Sync";

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<SyncOrchestrator>,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(orchestrator: Arc<SyncOrchestrator>) -> Self {
        Self {
            orchestrator,
            started_at: Utc::now(),
        }
    }
}

#[derive(Debug, Serialize)]
struct HealthDocument {
    status: &'static str,
    service: &'static str,
    mode: &'static str,
    store: &'static str,
    tickets: Option<i64>,
    uptime_seconds: i64,
    last_sync_success: Option<bool>,
    last_sync_finished_at: Option<DateTime<Utc>>,
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/api/report/sync", post(trigger_sync_handler))
        .route("/api/report/sync/status", get(sync_status_handler))
        .route("/api/report/monitoring", get(monitoring_handler))
        .route("/api/time-spent/sync", post(time_spent_sync_handler))
        .with_state(Arc::new(state))
}

/// Serve until `shutdown` resolves.
pub async fn serve(
    state: AppState,
    port: u16,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, "control surface listening");
    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

async fn trigger_sync_handler(State(state): State<Arc<AppState>>) -> Response {
    let orchestrator = Arc::clone(&state.orchestrator);
    tokio::spawn(async move {
        orchestrator.run_once().await;
    });
    (
        StatusCode::ACCEPTED,
        Json(serde_json::json!({"message": "Sync started in background"})),
    )
        .into_response()
}

/// Runs inline and answers with the job result.
async fn time_spent_sync_handler(State(state): State<Arc<AppState>>) -> Response {
    let result = state.orchestrator.work_time().run(WorkTimeJob::TimeSpent).await;
    Json(result).into_response()
}

async fn sync_status_handler(State(state): State<Arc<AppState>>) -> Response {
    Json(state.orchestrator.status().await).into_response()
}

async fn monitoring_handler(State(state): State<Arc<AppState>>) -> Response {
    let store = state.orchestrator.store();
    let tickets = match store.count_tickets().await {
        Ok(n) => Some(n),
        Err(err) => {
            warn!(error = %err, "store health check failed");
            None
        }
    };
    let last_run = state.orchestrator.status().await.last_run;

    let doc = HealthDocument {
        status: if tickets.is_some() { "healthy" } else { "degraded" },
        service: SERVICE_NAME,
        mode: if state.orchestrator.is_mock() { "mock" } else { "live" },
        store: store.backend(),
        tickets,
        uptime_seconds: (Utc::now() - state.started_at).num_seconds(),
        last_sync_success: last_run.as_ref().map(|r| r.success),
        last_sync_finished_at: last_run.as_ref().map(|r| r.finished_at),
    };
    let status = if doc.tickets.is_some() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(doc)).into_response()
}
