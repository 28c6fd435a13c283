//! Runs only when DATABASE_URL points at a Postgres the tests may create
//! schemas in. Each test loads a small copy of the ticketing schema into its
//! own schema and drops it afterwards.

use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use itsm_sources::{RawRecord, RelationalSource, TicketSource, WorkTimeSource};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::PgPool;

static NEXT_SCHEMA: AtomicUsize = AtomicUsize::new(0);

const UPSTREAM_DDL: &[&str] = &[
    "CREATE TABLE workorder (workorderid BIGINT PRIMARY KEY, title TEXT, createdtime BIGINT, duebytime BIGINT, completedtime BIGINT)",
    "CREATE TABLE workordertodescription (workorderid BIGINT, fulldescription TEXT)",
    "CREATE TABLE workorderstates (workorderid BIGINT, statusid BIGINT, priorityid BIGINT, ownerid BIGINT, categoryid BIGINT, subcategoryid BIGINT, itemid BIGINT)",
    "CREATE TABLE statusdefinition (statusid BIGINT, statusname TEXT)",
    "CREATE TABLE prioritydefinition (priorityid BIGINT, priorityname TEXT)",
    "CREATE TABLE aaauser (user_id BIGINT, first_name TEXT, last_name TEXT)",
    "CREATE TABLE workordertoorg (workorderid BIGINT, orgid BIGINT)",
    "CREATE TABLE sdorganization (org_id BIGINT, org_name TEXT)",
    "CREATE TABLE wo_assessment (assessmentid BIGINT, workorderid BIGINT)",
    "CREATE TABLE wo_tech_info (assessmentid BIGINT, timespent TEXT, technicianid BIGINT, nexttechnicianid BIGINT)",
    "CREATE TABLE categorydefinition (categoryid BIGINT, categoryname TEXT)",
    "CREATE TABLE subcategorydefinition (subcategoryid BIGINT, name TEXT)",
    "CREATE TABLE itemdefinition (itemid BIGINT, name TEXT)",
    "CREATE TABLE workorder_queue (workorderid BIGINT, queueid BIGINT)",
    "CREATE TABLE queuedefinition (queueid BIGINT, queuename TEXT)",
    "CREATE TABLE worklog (worklogid BIGINT, requestid BIGINT, userid BIGINT, timespent BIGINT, description TEXT, createdtime BIGINT)",
];

const UPSTREAM_ROWS: &[&str] = &[
    "INSERT INTO workorder VALUES (100, 'Printer jam', 1767225600000, 1767229200000, 1767232800000), (101, 'New laptop request', 1767312000000, NULL, NULL)",
    "INSERT INTO workordertodescription VALUES (100, 'Tray 2 keeps jamming')",
    "INSERT INTO workorderstates VALUES (100, 1, 1, 7, 10, 20, 30), (101, 2, 1, NULL, 10, NULL, NULL)",
    "INSERT INTO statusdefinition VALUES (1, 'Closed'), (2, 'Open')",
    "INSERT INTO prioritydefinition VALUES (1, 'High')",
    "INSERT INTO aaauser VALUES (7, 'Minh', 'Le'), (8, 'Hoa', NULL)",
    "INSERT INTO workordertoorg VALUES (100, 500)",
    "INSERT INTO sdorganization VALUES (500, 'Acme')",
    "INSERT INTO wo_assessment VALUES (1000, 100), (1001, 100), (1002, 101)",
    "INSERT INTO wo_tech_info VALUES (1000, '45', 7, 8), (1001, '30', 8, NULL), (1002, '0', 7, NULL)",
    "INSERT INTO categorydefinition VALUES (10, 'Hardware')",
    "INSERT INTO subcategorydefinition VALUES (20, 'Printer')",
    "INSERT INTO itemdefinition VALUES (30, 'Tray')",
    "INSERT INTO workorder_queue VALUES (100, 3)",
    "INSERT INTO queuedefinition VALUES (3, 'Desktop Support')",
    "INSERT INTO worklog VALUES (1, 100, 7, 600000, 'Cleared jam', 1767226000000), (2, 100, 8, 1200000, NULL, 1767227000000), (3, 101, 7, NULL, 'Ordered', 1767313000000)",
];

struct Upstream {
    admin: PgPool,
    schema: String,
    pool: PgPool,
}

impl Upstream {
    async fn load() -> Option<Self> {
        let url = std::env::var("DATABASE_URL").ok()?;
        let admin = PgPool::connect(&url).await.expect("connect to DATABASE_URL");
        let nanos = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().subsec_nanos();
        let schema = format!(
            "itsm_upstream_test_{}_{}_{}",
            std::process::id(),
            nanos,
            NEXT_SCHEMA.fetch_add(1, Ordering::SeqCst)
        );
        sqlx::query(&format!("CREATE SCHEMA {schema}"))
            .execute(&admin)
            .await
            .expect("create scratch schema");

        let options = PgConnectOptions::from_str(&url)
            .unwrap()
            .options([("search_path", schema.as_str())]);
        let pool = PgPoolOptions::new()
            .max_connections(2)
            .connect_with(options)
            .await
            .expect("connect scratch pool");
        for sql in UPSTREAM_DDL.iter().chain(UPSTREAM_ROWS) {
            sqlx::query(sql).execute(&pool).await.expect(sql);
        }
        Some(Self { admin, schema, pool })
    }

    async fn close(self) {
        self.pool.close().await;
        sqlx::query(&format!("DROP SCHEMA {} CASCADE", self.schema))
            .execute(&self.admin)
            .await
            .expect("drop scratch schema");
    }
}

#[tokio::test]
async fn tickets_come_newest_first_with_summed_work_time() {
    let Some(db) = Upstream::load().await else {
        return;
    };

    let records = RelationalSource::from_pool(db.pool.clone(), 10).fetch().await.unwrap();
    let rows: Vec<_> = records
        .into_iter()
        .map(|record| match record {
            RawRecord::Relational(row) => row,
            other => panic!("unexpected record {other:?}"),
        })
        .collect();

    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].id.as_deref(), Some("101"));
    assert_eq!(rows[0].tech_id, None);
    assert_eq!(rows[0].timespent_minutes, Some(0));

    let printer = &rows[1];
    assert_eq!(printer.subject.as_deref(), Some("Printer jam"));
    assert_eq!(printer.description.as_deref(), Some("Tray 2 keeps jamming"));
    assert_eq!(printer.status.as_deref(), Some("Closed"));
    assert_eq!(printer.tech_id.as_deref(), Some("7"));
    assert_eq!(printer.cust_name.as_deref(), Some("Acme"));
    assert_eq!(printer.due_by_ms, Some(1_767_229_200_000));
    assert_eq!(printer.timespent_minutes, Some(75));
    db.close().await;
}

#[tokio::test]
async fn row_cap_limits_the_ticket_query() {
    let Some(db) = Upstream::load().await else {
        return;
    };

    let records = RelationalSource::from_pool(db.pool.clone(), 1).fetch().await.unwrap();
    assert_eq!(records.len(), 1);
    db.close().await;
}

#[tokio::test]
async fn time_spent_keeps_positive_charges_only() {
    let Some(db) = Upstream::load().await else {
        return;
    };

    let rows = RelationalSource::from_pool(db.pool.clone(), 10)
        .fetch_time_spent()
        .await
        .unwrap();
    assert_eq!(rows.len(), 2);
    let first = rows.iter().find(|r| r.assessment_id.as_deref() == Some("1000")).unwrap();
    assert_eq!(first.request_id.as_deref(), Some("100"));
    assert_eq!(first.category.as_deref(), Some("Hardware"));
    assert_eq!(first.subcategory.as_deref(), Some("Printer"));
    assert_eq!(first.item.as_deref(), Some("Tray"));
    assert_eq!(first.technician.as_deref(), Some("Minh"));
    assert_eq!(first.group_name.as_deref(), Some("Desktop Support"));
    assert_eq!(first.from_technician.as_deref(), Some("Minh"));
    assert_eq!(first.to_technician.as_deref(), Some("Hoa"));
    assert_eq!(first.time_spent_minutes, Some(45));
    db.close().await;
}

#[tokio::test]
async fn worklogs_page_after_the_given_id() {
    let Some(db) = Upstream::load().await else {
        return;
    };

    let source = RelationalSource::from_pool(db.pool.clone(), 10);
    let rows = source.fetch_worklogs_after(1).await.unwrap();
    assert_eq!(rows.iter().map(|r| r.remote_id).collect::<Vec<_>>(), vec![Some(2), Some(3)]);
    assert_eq!(rows[0].technician_name.as_deref(), Some("Hoa"));
    assert_eq!(rows[0].time_spent_ms, Some(1_200_000));
    assert_eq!(rows[1].ticket_id.as_deref(), Some("101"));
    assert_eq!(rows[1].technician_name.as_deref(), Some("Minh Le"));

    assert!(source.fetch_worklogs_after(3).await.unwrap().is_empty());
    db.close().await;
}
