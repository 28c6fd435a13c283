use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use itsm_sources::{time_spent_from_row, worklog_from_row, WorkTimeSource};
use itsm_storage::{StoreTxn, TicketStore, UpsertOutcome};
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

/// Per-record errors logged in full for a work time job.
pub const LOGGED_ERRORS_PER_JOB: usize = 5;

pub const NOT_CONFIGURED: &str = "ITSM database not configured";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkTimeJob {
    /// Full refresh of per-assessment time spent.
    TimeSpent,
    /// Incremental pull of work log lines after the last stored remote id.
    Worklogs,
}

impl WorkTimeJob {
    pub const ALL: [WorkTimeJob; 2] = [WorkTimeJob::TimeSpent, WorkTimeJob::Worklogs];

    pub fn as_str(self) -> &'static str {
        match self {
            WorkTimeJob::TimeSpent => "time_spent",
            WorkTimeJob::Worklogs => "worklogs",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkTimeRunResult {
    pub run_id: Uuid,
    pub job: WorkTimeJob,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub success: bool,
    pub synced: usize,
    pub inserted: usize,
    pub skipped: usize,
    pub errors: usize,
    /// Worklogs only: the remote id the next incremental run starts after.
    pub last_remote_id: Option<i64>,
    pub error: Option<String>,
}

impl WorkTimeRunResult {
    fn started(job: WorkTimeJob) -> Self {
        let now = Utc::now();
        Self {
            run_id: Uuid::new_v4(),
            job,
            started_at: now,
            finished_at: now,
            success: false,
            synced: 0,
            inserted: 0,
            skipped: 0,
            errors: 0,
            last_remote_id: None,
            error: None,
        }
    }

    fn record_error(&mut self, context: &str, err: &dyn std::fmt::Display) {
        self.errors += 1;
        if self.errors <= LOGGED_ERRORS_PER_JOB {
            error!(job = self.job.as_str(), error = %err, "{context}");
        }
    }

    fn discard_counts(&mut self) {
        self.synced = 0;
        self.inserted = 0;
    }
}

/// Runs the two work time jobs against the same store as the ticket sync.
/// Both read the relational upstream only; there is no API fallback.
pub struct WorkTimeSync {
    source: Option<Arc<dyn WorkTimeSource>>,
    store: Arc<dyn TicketStore>,
    last_runs: RwLock<BTreeMap<WorkTimeJob, WorkTimeRunResult>>,
}

impl WorkTimeSync {
    pub fn new(source: Option<Arc<dyn WorkTimeSource>>, store: Arc<dyn TicketStore>) -> Self {
        Self {
            source,
            store,
            last_runs: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.source.is_some()
    }

    pub async fn last_runs(&self) -> Vec<WorkTimeRunResult> {
        self.last_runs.read().await.values().cloned().collect()
    }

    /// One complete job run. Never fails the caller.
    pub async fn run(&self, job: WorkTimeJob) -> WorkTimeRunResult {
        let mut result = WorkTimeRunResult::started(job);
        let span = info_span!("work_time_run", job = job.as_str(), run_id = %result.run_id);
        async {
            match &self.source {
                None => {
                    warn!("{NOT_CONFIGURED}; skipping");
                    result.error = Some(NOT_CONFIGURED.to_string());
                }
                Some(source) => match job {
                    WorkTimeJob::TimeSpent => self.sync_time_spent(source.as_ref(), &mut result).await,
                    WorkTimeJob::Worklogs => self.sync_worklogs(source.as_ref(), &mut result).await,
                },
            }
        }
        .instrument(span)
        .await;

        result.finished_at = Utc::now();
        self.last_runs.write().await.insert(job, result.clone());
        result
    }

    async fn sync_time_spent(&self, source: &dyn WorkTimeSource, result: &mut WorkTimeRunResult) {
        let rows = match source.fetch_time_spent().await {
            Ok(rows) => rows,
            Err(err) => {
                error!(error = %err, "time spent fetch failed");
                result.error = Some(err.to_string());
                return;
            }
        };
        if rows.is_empty() {
            info!("no time spent records found");
            result.success = true;
            return;
        }

        let Some(mut txn) = self.begin(result).await else {
            return;
        };
        for row in &rows {
            let Some(entry) = time_spent_from_row(row) else {
                result.skipped += 1;
                continue;
            };
            match txn.upsert_time_spent(&entry).await {
                Ok(outcome) => {
                    result.synced += 1;
                    if outcome == UpsertOutcome::Inserted {
                        result.inserted += 1;
                    }
                }
                Err(err) => result.record_error("error processing time spent record", &err),
            }
        }
        self.commit(txn, result).await;
    }

    async fn sync_worklogs(&self, source: &dyn WorkTimeSource, result: &mut WorkTimeRunResult) {
        let last_id = match self.store.last_worklog_id().await {
            Ok(id) => id,
            Err(err) => {
                error!(error = %err, "could not read last synced worklog id");
                result.error = Some(format!("store unavailable: {err}"));
                return;
            }
        };
        result.last_remote_id = Some(last_id);

        let rows = match source.fetch_worklogs_after(last_id).await {
            Ok(rows) => rows,
            Err(err) => {
                error!(error = %err, after = last_id, "worklog fetch failed");
                result.error = Some(err.to_string());
                return;
            }
        };
        if rows.is_empty() {
            info!(after = last_id, "no new worklogs");
            result.success = true;
            return;
        }

        let Some(mut txn) = self.begin(result).await else {
            return;
        };
        let mut high_water = last_id;
        for row in &rows {
            let worklog = match worklog_from_row(row) {
                Ok(worklog) => worklog,
                Err(err) => {
                    result.record_error("error processing worklog", &err);
                    continue;
                }
            };
            match txn.insert_worklog(&worklog).await {
                Ok(true) => {
                    result.synced += 1;
                    result.inserted += 1;
                    high_water = high_water.max(worklog.remote_id);
                }
                Ok(false) => result.skipped += 1,
                Err(err) => result.record_error("error processing worklog", &err),
            }
        }
        if self.commit(txn, result).await {
            result.last_remote_id = Some(high_water);
        }
    }

    async fn begin(&self, result: &mut WorkTimeRunResult) -> Option<Box<dyn StoreTxn>> {
        match self.store.begin().await {
            Ok(txn) => Some(txn),
            Err(err) => {
                error!(error = %err, "could not open store batch");
                result.error = Some(format!("store unavailable: {err}"));
                None
            }
        }
    }

    async fn commit(&self, txn: Box<dyn StoreTxn>, result: &mut WorkTimeRunResult) -> bool {
        if let Err(err) = txn.commit().await {
            error!(error = %err, "commit failed; job discarded");
            result.error = Some(format!("commit failed: {err}"));
            result.discard_counts();
            return false;
        }
        result.success = true;
        info!(
            synced = result.synced,
            inserted = result.inserted,
            skipped = result.skipped,
            errors = result.errors,
            "work time job complete"
        );
        true
    }
}
