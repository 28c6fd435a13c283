//! Ticket store backends + HTTP fetch utilities for the ITSM sync pipeline.

use async_trait::async_trait;
use itsm_core::{CanonicalTicket, Customer, Engineer, TechTimeSpent, Worklog};
use serde::Serialize;
use thiserror::Error;

mod http;
mod memory;
mod postgres;

pub use http::{
    classify_reqwest_error, classify_status, BackoffPolicy, FetchError, FetchedResponse, HttpClientConfig,
    HttpFetcher, RetryDisposition,
};
pub use memory::MemoryStore;
pub use postgres::PgTicketStore;

pub const CRATE_NAME: &str = "itsm-storage";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpsertOutcome {
    Inserted,
    Updated,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{kind} id must not be empty")]
    EmptyId { kind: &'static str },
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Persistent "current state" of tickets and the dimensions derived from them.
#[async_trait]
pub trait TicketStore: Send + Sync {
    fn backend(&self) -> &'static str;

    /// Open a batch. Nothing written through it is visible until `commit`;
    /// dropping it uncommitted discards every write.
    async fn begin(&self) -> Result<Box<dyn StoreTxn>, StoreError>;

    async fn get_ticket(&self, id: &str) -> Result<Option<CanonicalTicket>, StoreError>;

    async fn count_tickets(&self) -> Result<i64, StoreError>;

    /// Highest stored work log remote id, or 0 when none is stored.
    async fn last_worklog_id(&self) -> Result<i64, StoreError>;
}

#[async_trait]
pub trait StoreTxn: Send {
    /// Insert when `ticket.id` is absent, otherwise merge into the stored row
    /// per [`CanonicalTicket::merged_with`]. A failure leaves the batch usable.
    async fn upsert_ticket(&mut self, ticket: &CanonicalTicket) -> Result<UpsertOutcome, StoreError>;

    /// Insert or overwrite the name.
    async fn upsert_customer(&mut self, customer: &Customer) -> Result<(), StoreError>;

    /// Insert or overwrite the name.
    async fn upsert_engineer(&mut self, engineer: &Engineer) -> Result<(), StoreError>;

    /// Insert or overwrite every field, keyed by `assessment_id`.
    async fn upsert_time_spent(&mut self, entry: &TechTimeSpent) -> Result<UpsertOutcome, StoreError>;

    /// Insert unless `remote_id` is already stored. Returns whether a row was added.
    async fn insert_worklog(&mut self, worklog: &Worklog) -> Result<bool, StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;
}

fn require_id(kind: &'static str, id: &str) -> Result<(), StoreError> {
    if id.trim().is_empty() {
        Err(StoreError::EmptyId { kind })
    } else {
        Ok(())
    }
}
