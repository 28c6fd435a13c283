use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;

use crate::worktime::{TimeSpentRow, WorkTimeSource, WorklogRow, WORKLOG_BATCH_SIZE};
use crate::{RawRecord, RelationalRow, SourceError, TicketSource};

/// Newest tickets first, capped by `$1`. `timespent_minutes` sums the
/// technician charge entries of each request's work log.
pub const RELATIONAL_TICKETS_SQL: &str = r#"
SELECT
    wo.workorderid::TEXT                  AS id,
    wo.title                              AS subject,
    wtd.fulldescription                   AS description,
    sd.statusname                         AS status,
    pd.priorityname                       AS priority,
    tech.user_id::TEXT                    AS tech_id,
    tech.first_name                       AS tech_name,
    acc.org_id::TEXT                      AS cust_id,
    acc.org_name                          AS cust_name,
    wo.createdtime                        AS created_at_ms,
    wo.duebytime                          AS due_by_ms,
    wo.completedtime                      AS completed_at_ms,
    (
        SELECT CAST(SUM(CAST(wti.timespent AS BIGINT)) AS BIGINT)
          FROM wo_assessment woa
          JOIN wo_tech_info wti ON wti.assessmentid = woa.assessmentid
         WHERE woa.workorderid = wo.workorderid
           AND wti.timespent IS NOT NULL
    )                                     AS timespent_minutes
FROM workorder wo
LEFT JOIN workordertodescription wtd ON wtd.workorderid = wo.workorderid
LEFT JOIN workorderstates wos        ON wos.workorderid = wo.workorderid
LEFT JOIN statusdefinition sd        ON sd.statusid = wos.statusid
LEFT JOIN prioritydefinition pd      ON pd.priorityid = wos.priorityid
LEFT JOIN aaauser tech               ON tech.user_id = wos.ownerid
LEFT JOIN workordertoorg wto         ON wto.workorderid = wo.workorderid
LEFT JOIN sdorganization acc         ON acc.org_id = wto.orgid
ORDER BY wo.createdtime DESC
LIMIT $1
"#;

/// Per-assessment technician charges with a positive whole-number time,
/// newest request first, capped by `$1`. Non-numeric times are dropped.
pub const TIME_SPENT_SQL: &str = r#"
SELECT *
FROM (
    SELECT
        wti.assessmentid::TEXT            AS assessment_id,
        wo.workorderid::TEXT              AS request_id,
        wo.title                          AS subject,
        cd.categoryname                   AS category,
        scd.name                          AS subcategory,
        icd.name                          AS item,
        owner_user.first_name             AS technician,
        qd.queuename                      AS group_name,
        from_tech.first_name              AS from_technician,
        to_tech.first_name                AS to_technician,
        CASE WHEN TRIM(wti.timespent::TEXT) ~ '^[0-9]{1,18}$'
             THEN CAST(TRIM(wti.timespent::TEXT) AS BIGINT)
        END                               AS time_spent_minutes,
        wo.workorderid                    AS sort_key
    FROM workorder wo
    LEFT JOIN workorderstates wos         ON wos.workorderid = wo.workorderid
    LEFT JOIN itemdefinition icd          ON icd.itemid = wos.itemid
    LEFT JOIN subcategorydefinition scd   ON scd.subcategoryid = wos.subcategoryid
    LEFT JOIN categorydefinition cd       ON cd.categoryid = wos.categoryid
    LEFT JOIN aaauser owner_user          ON owner_user.user_id = wos.ownerid
    LEFT JOIN workorder_queue woq         ON woq.workorderid = wo.workorderid
    LEFT JOIN queuedefinition qd          ON qd.queueid = woq.queueid
    JOIN wo_assessment woa                ON woa.workorderid = wo.workorderid
    JOIN wo_tech_info wti                 ON wti.assessmentid = woa.assessmentid
    LEFT JOIN aaauser from_tech           ON from_tech.user_id = wti.technicianid
    LEFT JOIN aaauser to_tech             ON to_tech.user_id = wti.nexttechnicianid
) charges
WHERE time_spent_minutes > 0
ORDER BY sort_key DESC
LIMIT $1
"#;

/// Work log lines after remote id `$1`, ascending, at most `$2`.
pub const WORKLOGS_AFTER_SQL: &str = r#"
SELECT
    w.worklogid                                                  AS remote_id,
    w.requestid::TEXT                                            AS ticket_id,
    NULLIF(TRIM(CONCAT_WS(' ', u.first_name, u.last_name)), '')  AS technician_name,
    CAST(w.timespent AS BIGINT)                                  AS time_spent_ms,
    w.description                                                AS description,
    w.createdtime                                                AS created_at_ms
FROM worklog w
LEFT JOIN aaauser u ON u.user_id = w.userid
WHERE w.worklogid > $1
ORDER BY w.worklogid ASC
LIMIT $2
"#;

/// Direct read of the ticketing system's own database.
#[derive(Debug, Clone)]
pub struct RelationalSource {
    pool: PgPool,
    row_cap: i64,
}

impl RelationalSource {
    /// Connections are opened on first fetch, so an unreachable database
    /// fails that run's fetch instead of startup.
    pub fn connect_lazy(database_url: &str, row_cap: usize) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(2)
            .acquire_timeout(Duration::from_secs(10))
            .connect_lazy(database_url)
            .context("parsing ITSM database URL")?;
        Ok(Self::from_pool(pool, row_cap))
    }

    pub fn from_pool(pool: PgPool, row_cap: usize) -> Self {
        Self {
            pool,
            row_cap: i64::try_from(row_cap).unwrap_or(i64::MAX),
        }
    }
}

#[async_trait]
impl TicketSource for RelationalSource {
    fn name(&self) -> &'static str {
        "relational"
    }

    async fn fetch(&self) -> Result<Vec<RawRecord>, SourceError> {
        let rows = sqlx::query_as::<_, RelationalRow>(RELATIONAL_TICKETS_SQL)
            .bind(self.row_cap)
            .fetch_all(&self.pool)
            .await?;
        info!(records = rows.len(), row_cap = self.row_cap, "relational fetch complete");
        Ok(rows.into_iter().map(RawRecord::Relational).collect())
    }
}

#[async_trait]
impl WorkTimeSource for RelationalSource {
    async fn fetch_time_spent(&self) -> Result<Vec<TimeSpentRow>, SourceError> {
        let rows = sqlx::query_as::<_, TimeSpentRow>(TIME_SPENT_SQL)
            .bind(self.row_cap)
            .fetch_all(&self.pool)
            .await?;
        info!(records = rows.len(), row_cap = self.row_cap, "time spent fetch complete");
        Ok(rows)
    }

    async fn fetch_worklogs_after(&self, last_id: i64) -> Result<Vec<WorklogRow>, SourceError> {
        let rows = sqlx::query_as::<_, WorklogRow>(WORKLOGS_AFTER_SQL)
            .bind(last_id)
            .bind(WORKLOG_BATCH_SIZE)
            .fetch_all(&self.pool)
            .await?;
        info!(records = rows.len(), after = last_id, "worklog fetch complete");
        Ok(rows)
    }
}
