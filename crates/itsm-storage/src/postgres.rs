use anyhow::Context;
use async_trait::async_trait;
use itsm_core::{CanonicalTicket, ClassificationSource, Customer, Engineer, RequestType, TechTimeSpent, Worklog};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgConnection, PgPool, Postgres, Row, Transaction};
use tracing::debug;

use crate::{require_id, StoreError, StoreTxn, TicketStore, UpsertOutcome};

const TICKET_COLUMNS: &str = "id, title, description, customer_id, customer_name, engineer_id, engineer_name, \
     status, priority, category, request_type, is_service_request, classification_source, created_at, \
     response_time_minutes, resolve_time_hours, time_elapsed_minutes, is_overdue";

/// Classification columns keep their stored value when the stored row was
/// upstream-tagged and the incoming one was not.
const UPSERT_TICKET_SQL: &str = r#"
INSERT INTO tickets (
    id, title, description, customer_id, customer_name, engineer_id, engineer_name,
    status, priority, category, request_type, is_service_request, classification_source,
    created_at, response_time_minutes, resolve_time_hours, time_elapsed_minutes, is_overdue
)
VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)
ON CONFLICT (id) DO UPDATE SET
    title = EXCLUDED.title,
    description = EXCLUDED.description,
    customer_id = EXCLUDED.customer_id,
    customer_name = EXCLUDED.customer_name,
    engineer_id = EXCLUDED.engineer_id,
    engineer_name = EXCLUDED.engineer_name,
    status = EXCLUDED.status,
    priority = EXCLUDED.priority,
    category = CASE WHEN tickets.classification_source = 'upstream'
                     AND EXCLUDED.classification_source <> 'upstream'
                    THEN tickets.category ELSE EXCLUDED.category END,
    request_type = CASE WHEN tickets.classification_source = 'upstream'
                         AND EXCLUDED.classification_source <> 'upstream'
                        THEN tickets.request_type ELSE EXCLUDED.request_type END,
    is_service_request = CASE WHEN tickets.classification_source = 'upstream'
                               AND EXCLUDED.classification_source <> 'upstream'
                              THEN tickets.is_service_request ELSE EXCLUDED.is_service_request END,
    classification_source = CASE WHEN tickets.classification_source = 'upstream'
                                  AND EXCLUDED.classification_source <> 'upstream'
                                 THEN tickets.classification_source ELSE EXCLUDED.classification_source END,
    response_time_minutes = EXCLUDED.response_time_minutes,
    resolve_time_hours = EXCLUDED.resolve_time_hours,
    time_elapsed_minutes = EXCLUDED.time_elapsed_minutes,
    is_overdue = EXCLUDED.is_overdue,
    synced_at = NOW()
RETURNING (xmax = 0) AS inserted
"#;

const UPSERT_CUSTOMER_SQL: &str = r#"
INSERT INTO customers (id, name)
VALUES ($1, $2)
ON CONFLICT (id) DO UPDATE SET name = EXCLUDED.name, updated_at = NOW()
"#;

const UPSERT_ENGINEER_SQL: &str = r#"
INSERT INTO engineers (id, name, "group")
VALUES ($1, $2, $3)
ON CONFLICT (id) DO UPDATE SET name = EXCLUDED.name, updated_at = NOW()
"#;

const UPSERT_TIME_SPENT_SQL: &str = r#"
INSERT INTO tech_time_spent (
    assessment_id, request_id, subject, category, subcategory, item,
    technician, group_name, from_technician, to_technician, time_spent_minutes
)
VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
ON CONFLICT (assessment_id) DO UPDATE SET
    request_id = EXCLUDED.request_id,
    subject = EXCLUDED.subject,
    category = EXCLUDED.category,
    subcategory = EXCLUDED.subcategory,
    item = EXCLUDED.item,
    technician = EXCLUDED.technician,
    group_name = EXCLUDED.group_name,
    from_technician = EXCLUDED.from_technician,
    to_technician = EXCLUDED.to_technician,
    time_spent_minutes = EXCLUDED.time_spent_minutes,
    synced_at = NOW()
RETURNING (xmax = 0) AS inserted
"#;

const INSERT_WORKLOG_SQL: &str = r#"
INSERT INTO worklogs (remote_id, ticket_id, technician_name, time_spent_seconds, description, remote_created_at)
VALUES ($1, $2, $3, $4, $5, $6)
ON CONFLICT (remote_id) DO NOTHING
RETURNING remote_id
"#;

/// Writes per savepoint before it is released. Keeps a large batch well
/// under Postgres' per-backend cache of 64 subtransaction ids.
const RECORDS_PER_SAVEPOINT: usize = 100;

#[derive(Debug, Clone)]
pub struct PgTicketStore {
    pool: PgPool,
}

impl PgTicketStore {
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .context("connecting to ticket store")?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .context("applying ticket store migrations")?;
        Ok(())
    }
}

#[async_trait]
impl TicketStore for PgTicketStore {
    fn backend(&self) -> &'static str {
        "postgres"
    }

    async fn begin(&self) -> Result<Box<dyn StoreTxn>, StoreError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgStoreTxn {
            tx,
            chunk: Vec::new(),
            savepoint_open: false,
        }))
    }

    async fn get_ticket(&self, id: &str) -> Result<Option<CanonicalTicket>, StoreError> {
        let sql = format!("SELECT {TICKET_COLUMNS} FROM tickets WHERE id = $1");
        let row = sqlx::query(&sql).bind(id).fetch_optional(&self.pool).await?;
        row.as_ref().map(ticket_from_row).transpose()
    }

    async fn count_tickets(&self) -> Result<i64, StoreError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM tickets")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get("n")?)
    }

    async fn last_worklog_id(&self) -> Result<i64, StoreError> {
        let row = sqlx::query("SELECT COALESCE(MAX(remote_id), 0)::BIGINT AS last_id FROM worklogs")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get("last_id")?)
    }
}

fn ticket_from_row(row: &PgRow) -> Result<CanonicalTicket, StoreError> {
    let request_type: String = row.try_get("request_type")?;
    let source: String = row.try_get("classification_source")?;
    Ok(CanonicalTicket {
        id: row.try_get("id")?,
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        customer_id: row.try_get("customer_id")?,
        customer_name: row.try_get("customer_name")?,
        engineer_id: row.try_get("engineer_id")?,
        engineer_name: row.try_get("engineer_name")?,
        status: row.try_get("status")?,
        priority: row.try_get("priority")?,
        category: row.try_get("category")?,
        request_type: RequestType::from_upstream(&request_type),
        is_service_request: row.try_get("is_service_request")?,
        classification_source: ClassificationSource::parse(&source),
        created_at: row.try_get("created_at")?,
        response_time_minutes: row.try_get("response_time_minutes")?,
        resolve_time_hours: row.try_get("resolve_time_hours")?,
        time_elapsed_minutes: row.try_get("time_elapsed_minutes")?,
        is_overdue: row.try_get("is_overdue")?,
    })
}

enum RecordWrite {
    Ticket(CanonicalTicket),
    Customer(Customer),
    Engineer(Engineer),
    TimeSpent(TechTimeSpent),
    Worklog(Worklog),
}

impl RecordWrite {
    /// Run the statement. `true` when it added a row; dimensions always report `true`.
    async fn apply(&self, conn: &mut PgConnection) -> Result<bool, sqlx::Error> {
        match self {
            RecordWrite::Ticket(ticket) => {
                let row = sqlx::query(UPSERT_TICKET_SQL)
                    .bind(&ticket.id)
                    .bind(&ticket.title)
                    .bind(&ticket.description)
                    .bind(&ticket.customer_id)
                    .bind(&ticket.customer_name)
                    .bind(&ticket.engineer_id)
                    .bind(&ticket.engineer_name)
                    .bind(&ticket.status)
                    .bind(&ticket.priority)
                    .bind(&ticket.category)
                    .bind(ticket.request_type.as_str())
                    .bind(ticket.is_service_request)
                    .bind(ticket.classification_source.as_str())
                    .bind(ticket.created_at)
                    .bind(ticket.response_time_minutes)
                    .bind(ticket.resolve_time_hours)
                    .bind(ticket.time_elapsed_minutes)
                    .bind(ticket.is_overdue)
                    .fetch_one(&mut *conn)
                    .await?;
                row.try_get("inserted")
            }
            RecordWrite::Customer(customer) => {
                sqlx::query(UPSERT_CUSTOMER_SQL)
                    .bind(&customer.id)
                    .bind(&customer.name)
                    .execute(&mut *conn)
                    .await?;
                Ok(true)
            }
            RecordWrite::Engineer(engineer) => {
                sqlx::query(UPSERT_ENGINEER_SQL)
                    .bind(&engineer.id)
                    .bind(&engineer.name)
                    .bind(engineer.group.as_deref())
                    .execute(&mut *conn)
                    .await?;
                Ok(true)
            }
            RecordWrite::TimeSpent(entry) => {
                let row = sqlx::query(UPSERT_TIME_SPENT_SQL)
                    .bind(&entry.assessment_id)
                    .bind(&entry.request_id)
                    .bind(&entry.subject)
                    .bind(entry.category.as_deref())
                    .bind(entry.subcategory.as_deref())
                    .bind(entry.item.as_deref())
                    .bind(entry.technician.as_deref())
                    .bind(entry.group_name.as_deref())
                    .bind(entry.from_technician.as_deref())
                    .bind(entry.to_technician.as_deref())
                    .bind(entry.time_spent_minutes)
                    .fetch_one(&mut *conn)
                    .await?;
                row.try_get("inserted")
            }
            RecordWrite::Worklog(worklog) => {
                let row = sqlx::query(INSERT_WORKLOG_SQL)
                    .bind(worklog.remote_id)
                    .bind(&worklog.ticket_id)
                    .bind(worklog.technician_name.as_deref())
                    .bind(worklog.time_spent_seconds)
                    .bind(worklog.description.as_deref())
                    .bind(worklog.remote_created_at)
                    .fetch_optional(&mut *conn)
                    .await?;
                Ok(row.is_some())
            }
        }
    }
}

/// One run's batch.
///
/// Writes go through a savepoint that is released every
/// [`RECORDS_PER_SAVEPOINT`] writes. When a write fails the batch rolls back
/// to that savepoint and replays the chunk's earlier writes, so a bad record
/// neither aborts the transaction nor loses its neighbours.
pub struct PgStoreTxn {
    tx: Transaction<'static, Postgres>,
    chunk: Vec<RecordWrite>,
    savepoint_open: bool,
}

impl PgStoreTxn {
    async fn write(&mut self, write: RecordWrite) -> Result<bool, StoreError> {
        if !self.savepoint_open {
            sqlx::query("SAVEPOINT record_chunk").execute(&mut *self.tx).await?;
            self.savepoint_open = true;
        }

        match write.apply(&mut self.tx).await {
            Ok(inserted) => {
                self.chunk.push(write);
                if self.chunk.len() >= RECORDS_PER_SAVEPOINT {
                    self.release_chunk().await?;
                }
                Ok(inserted)
            }
            Err(err) => {
                sqlx::query("ROLLBACK TO SAVEPOINT record_chunk")
                    .execute(&mut *self.tx)
                    .await?;
                for earlier in &self.chunk {
                    earlier.apply(&mut self.tx).await?;
                }
                debug!(replayed = self.chunk.len(), error = %err, "write rolled back");
                Err(err.into())
            }
        }
    }

    async fn release_chunk(&mut self) -> Result<(), StoreError> {
        sqlx::query("RELEASE SAVEPOINT record_chunk")
            .execute(&mut *self.tx)
            .await?;
        self.savepoint_open = false;
        self.chunk.clear();
        Ok(())
    }
}

#[async_trait]
impl StoreTxn for PgStoreTxn {
    async fn upsert_ticket(&mut self, ticket: &CanonicalTicket) -> Result<UpsertOutcome, StoreError> {
        require_id("ticket", &ticket.id)?;
        let inserted = self.write(RecordWrite::Ticket(ticket.clone())).await?;
        debug!(ticket_id = %ticket.id, inserted, "ticket upserted");
        Ok(if inserted {
            UpsertOutcome::Inserted
        } else {
            UpsertOutcome::Updated
        })
    }

    async fn upsert_customer(&mut self, customer: &Customer) -> Result<(), StoreError> {
        require_id("customer", &customer.id)?;
        self.write(RecordWrite::Customer(customer.clone())).await?;
        Ok(())
    }

    async fn upsert_engineer(&mut self, engineer: &Engineer) -> Result<(), StoreError> {
        require_id("engineer", &engineer.id)?;
        self.write(RecordWrite::Engineer(engineer.clone())).await?;
        Ok(())
    }

    async fn upsert_time_spent(&mut self, entry: &TechTimeSpent) -> Result<UpsertOutcome, StoreError> {
        require_id("assessment", &entry.assessment_id)?;
        let inserted = self.write(RecordWrite::TimeSpent(entry.clone())).await?;
        Ok(if inserted {
            UpsertOutcome::Inserted
        } else {
            UpsertOutcome::Updated
        })
    }

    async fn insert_worklog(&mut self, worklog: &Worklog) -> Result<bool, StoreError> {
        require_id("worklog ticket", &worklog.ticket_id)?;
        self.write(RecordWrite::Worklog(worklog.clone())).await
    }

    async fn commit(mut self: Box<Self>) -> Result<(), StoreError> {
        if self.savepoint_open {
            self.release_chunk().await?;
        }
        self.tx.commit().await?;
        Ok(())
    }
}
