//! PostgreSQL record store.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use import_core::query::FieldKind;
use import_core::{
    Attempt, DbErrorCode, Error, Filter, FilterOp, ImportedRecord, IngestionRun, InsertOutcome,
    ListQuery, NewRecord, Page, Result, RunId, RunStatus,
};
use sqlx::postgres::{PgArguments, PgPoolOptions};
use sqlx::{FromRow, PgPool, Postgres, QueryBuilder};
use telemetry::metrics;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::StoreConfig;
use crate::schema::all_tables;
use crate::store::{RecordStore, RetryOutcome};

const RUN_COLUMNS: &str = "id, owner_id, file_name, source_url, status, total_rows, \
     processed_rows, error_message, started_at, completed_at, attempt, heartbeat_at";

const RECORD_COLUMNS: &str =
    "id, run_id, source_row, name, category, price, stock, description, created_at";

type PgQuery<'q> = sqlx::query::Query<'q, Postgres, PgArguments>;

/// Maximum rows per INSERT statement, well under the bind parameter limit.
const INSERT_CHUNK: usize = 1000;

#[derive(FromRow)]
struct RunRow {
    id: Uuid,
    owner_id: String,
    file_name: String,
    source_url: String,
    status: String,
    total_rows: Option<i64>,
    processed_rows: i64,
    error_message: Option<String>,
    started_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    attempt: i32,
    heartbeat_at: DateTime<Utc>,
}

impl TryFrom<RunRow> for IngestionRun {
    type Error = Error;

    fn try_from(row: RunRow) -> Result<Self> {
        Ok(Self {
            id: row.id,
            owner_id: row.owner_id,
            file_name: row.file_name,
            source_url: row.source_url,
            status: row.status.parse()?,
            total_rows: row.total_rows.map(|n| n.max(0) as u64),
            processed_rows: row.processed_rows.max(0) as u64,
            error_message: row.error_message,
            started_at: row.started_at,
            completed_at: row.completed_at,
            attempt: row.attempt.max(1) as u32,
            heartbeat_at: row.heartbeat_at,
        })
    }
}

#[derive(FromRow)]
struct RecordRow {
    id: Uuid,
    run_id: Uuid,
    source_row: i64,
    name: String,
    category: String,
    price: f64,
    stock: i64,
    description: Option<String>,
    created_at: DateTime<Utc>,
}

impl From<RecordRow> for ImportedRecord {
    fn from(row: RecordRow) -> Self {
        Self {
            id: row.id,
            run_id: row.run_id,
            source_row: row.source_row.max(0) as u64,
            name: row.name,
            category: row.category,
            price: row.price,
            stock: row.stock,
            description: row.description,
            created_at: row.created_at,
        }
    }
}

fn store_error(context: &str, err: sqlx::Error) -> Error {
    metrics().store_errors.inc();
    Error::database(DbErrorCode::StoreFailed, format!("{}: {}", context, err))
}

fn write_error(err: sqlx::Error) -> Error {
    metrics().store_errors.inc();
    Error::database(DbErrorCode::WriteFailed, format!("failed to write records: {}", err))
}

fn to_i64(n: u64) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

fn to_i32(n: u32) -> i32 {
    i32::try_from(n).unwrap_or(i32::MAX)
}

/// Escapes LIKE wildcards so `contains` matches literally.
fn like_pattern(value: &str) -> String {
    let escaped = value
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{}%", escaped)
}

/// Appends ` AND <filter>` using the whitelisted column from the filter.
fn push_filter(builder: &mut QueryBuilder<'_, Postgres>, filter: &Filter) {
    builder.push(" AND ");
    match (filter.kind, filter.op) {
        (_, FilterOp::Contains) => {
            builder
                .push(filter.column)
                .push(" ILIKE ")
                .push_bind(like_pattern(&filter.value));
        }
        (FieldKind::Number, op) => {
            let value: f64 = filter.value.trim().parse().unwrap_or(f64::NAN);
            builder
                .push(filter.column)
                .push(format!(" {} ", op.sql()))
                .push_bind(value);
        }
        (FieldKind::Text, FilterOp::Ne) => {
            builder
                .push("(")
                .push(filter.column)
                .push(" IS NULL OR ")
                .push(filter.column)
                .push(" <> ")
                .push_bind(filter.value.clone())
                .push(")");
        }
        (FieldKind::Text, op) => {
            builder
                .push(filter.column)
                .push(format!(" {} ", op.sql()))
                .push_bind(filter.value.clone());
        }
    }
}

/// PostgreSQL-backed record store.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Connects a pool and ensures the schema exists.
    pub async fn connect(config: &StoreConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.timeout_secs))
            .connect(&config.url)
            .await
            .map_err(|e| store_error("failed to connect", e))?;

        info!(max_connections = config.max_connections, "Connected PostgreSQL record store");

        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Creates tables and indexes if they do not exist.
    pub async fn init_schema(&self) -> Result<()> {
        for ddl in all_tables() {
            sqlx::query(ddl)
                .execute(&self.pool)
                .await
                .map_err(|e| store_error("failed to execute DDL", e))?;
        }
        debug!("Record store schema initialized");
        Ok(())
    }

    async fn run_status(&self, id: RunId, owner_id: &str) -> Result<Option<RunStatus>> {
        let status: Option<String> =
            sqlx::query_scalar("SELECT status FROM import_runs WHERE id = $1 AND owner_id = $2")
                .bind(id)
                .bind(owner_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| store_error("failed to read run status", e))?;
        status.map(|s| s.parse()).transpose()
    }

    async fn update(&self, context: &str, query: PgQuery<'_>) -> Result<bool> {
        let result = query
            .execute(&self.pool)
            .await
            .map_err(|e| store_error(context, e))?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl RecordStore for PgStore {
    async fn create_run(&self, run: &IngestionRun) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO import_runs (
                id, owner_id, file_name, source_url, status, total_rows,
                processed_rows, error_message, started_at, completed_at, attempt, heartbeat_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(run.id)
        .bind(&run.owner_id)
        .bind(&run.file_name)
        .bind(&run.source_url)
        .bind(run.status.as_str())
        .bind(run.total_rows.map(to_i64))
        .bind(to_i64(run.processed_rows))
        .bind(&run.error_message)
        .bind(run.started_at)
        .bind(run.completed_at)
        .bind(to_i32(run.attempt))
        .bind(run.heartbeat_at)
        .execute(&self.pool)
        .await
        .map_err(|e| store_error("failed to create run", e))?;
        Ok(())
    }

    async fn get_run(&self, id: RunId) -> Result<Option<IngestionRun>> {
        let row: Option<RunRow> =
            sqlx::query_as(&format!("SELECT {} FROM import_runs WHERE id = $1", RUN_COLUMNS))
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| store_error("failed to read run", e))?;
        row.map(IngestionRun::try_from).transpose()
    }

    async fn list_runs(&self, owner_id: &str, query: &ListQuery) -> Result<Page<IngestionRun>> {
        let filter = query.filter::<IngestionRun>()?;

        let mut count = QueryBuilder::new("SELECT COUNT(*) FROM import_runs WHERE owner_id = ");
        count.push_bind(owner_id);
        let mut select = QueryBuilder::new(format!(
            "SELECT {} FROM import_runs WHERE owner_id = ",
            RUN_COLUMNS
        ));
        select.push_bind(owner_id);
        if let Some(ref filter) = filter {
            push_filter(&mut count, filter);
            push_filter(&mut select, filter);
        }
        select
            .push(" ORDER BY started_at DESC, id DESC LIMIT ")
            .push_bind(i64::from(query.page_size()))
            .push(" OFFSET ")
            .push_bind(to_i64(query.offset()));

        let total: i64 = count
            .build_query_scalar::<i64>()
            .fetch_one(&self.pool)
            .await
            .map_err(|e| store_error("failed to count runs", e))?;
        let rows: Vec<RunRow> = select
            .build_query_as::<RunRow>()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| store_error("failed to list runs", e))?;

        Ok(Page {
            items: rows
                .into_iter()
                .map(IngestionRun::try_from)
                .collect::<Result<_>>()?,
            page: query.page(),
            page_size: query.page_size(),
            total: total.max(0) as u64,
        })
    }

    async fn set_total(&self, attempt: Attempt, total: u64) -> Result<bool> {
        let query = sqlx::query(
            r#"
            UPDATE import_runs
            SET total_rows = $3, processed_rows = LEAST(processed_rows, $3)
            WHERE id = $1 AND attempt = $2 AND status = 'running'
            "#,
        )
        .bind(attempt.run_id)
        .bind(to_i32(attempt.number))
        .bind(to_i64(total));
        self.update("failed to set total", query).await
    }

    async fn advance(&self, attempt: Attempt, delta: u64) -> Result<bool> {
        let query = sqlx::query(
            r#"
            UPDATE import_runs
            SET processed_rows = CASE
                WHEN total_rows IS NULL THEN processed_rows + $3
                ELSE LEAST(processed_rows + $3, total_rows)
            END
            WHERE id = $1 AND attempt = $2 AND status = 'running'
            "#,
        )
        .bind(attempt.run_id)
        .bind(to_i32(attempt.number))
        .bind(to_i64(delta));
        self.update("failed to advance progress", query).await
    }

    async fn mark_completed(&self, attempt: Attempt) -> Result<bool> {
        let query = sqlx::query(
            r#"
            UPDATE import_runs
            SET status = 'completed',
                total_rows = COALESCE(total_rows, processed_rows),
                processed_rows = COALESCE(total_rows, processed_rows),
                error_message = NULL,
                completed_at = NOW()
            WHERE id = $1 AND attempt = $2 AND status = 'running'
            "#,
        )
        .bind(attempt.run_id)
        .bind(to_i32(attempt.number));
        self.update("failed to complete run", query).await
    }

    async fn mark_failed(&self, attempt: Attempt, message: &str) -> Result<bool> {
        let query = sqlx::query(
            r#"
            UPDATE import_runs
            SET status = 'failed', error_message = $3, completed_at = NOW()
            WHERE id = $1 AND attempt = $2 AND status = 'running'
            "#,
        )
        .bind(attempt.run_id)
        .bind(to_i32(attempt.number))
        .bind(import_core::failure_message(message));
        self.update("failed to fail run", query).await
    }

    async fn heartbeat(&self, attempt: Attempt) -> Result<bool> {
        let query = sqlx::query(
            r#"
            UPDATE import_runs
            SET heartbeat_at = NOW()
            WHERE id = $1 AND attempt = $2 AND status = 'running'
            "#,
        )
        .bind(attempt.run_id)
        .bind(to_i32(attempt.number));
        self.update("failed to renew run lease", query).await
    }

    async fn begin_retry(&self, id: RunId, owner_id: &str) -> Result<RetryOutcome> {
        let rewound: Option<RunRow> = sqlx::query_as(&format!(
            r#"
            UPDATE import_runs
            SET status = 'running',
                total_rows = NULL,
                processed_rows = 0,
                error_message = NULL,
                completed_at = NULL,
                started_at = NOW(),
                attempt = attempt + 1,
                heartbeat_at = NOW()
            WHERE id = $1 AND owner_id = $2 AND status = 'failed'
            RETURNING {}
            "#,
            RUN_COLUMNS
        ))
        .bind(id)
        .bind(owner_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| store_error("failed to rewind run", e))?;

        if let Some(row) = rewound {
            return Ok(RetryOutcome::Rewound(row.try_into()?));
        }

        Ok(match self.run_status(id, owner_id).await? {
            Some(status) => RetryOutcome::NotRetriable(status),
            None => RetryOutcome::NotFound,
        })
    }

    async fn insert_records(
        &self,
        attempt: Attempt,
        records: &[NewRecord],
    ) -> Result<InsertOutcome> {
        if records.is_empty() {
            return Ok(InsertOutcome::default());
        }

        let mut tx = self.pool.begin().await.map_err(write_error)?;

        // Holds the run row against a concurrent retry until the batch commits.
        let live: Option<i32> = sqlx::query_scalar(
            r#"
            SELECT attempt FROM import_runs
            WHERE id = $1 AND attempt = $2 AND status = 'running'
            FOR SHARE
            "#,
        )
        .bind(attempt.run_id)
        .bind(to_i32(attempt.number))
        .fetch_optional(&mut *tx)
        .await
        .map_err(write_error)?;
        if live.is_none() {
            return Err(Error::Superseded(attempt));
        }

        let mut inserted = 0u64;

        for chunk in records.chunks(INSERT_CHUNK) {
            let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
                "INSERT INTO imported_records \
                 (id, run_id, source_row, name, category, price, stock, description) ",
            );
            builder.push_values(chunk, |mut b, record| {
                b.push_bind(Uuid::new_v4())
                    .push_bind(record.run_id)
                    .push_bind(to_i64(record.source_row))
                    .push_bind(record.name.clone())
                    .push_bind(record.category.clone())
                    .push_bind(record.price)
                    .push_bind(record.stock)
                    .push_bind(record.description.clone());
            });
            builder.push(" ON CONFLICT (run_id, name, category) DO NOTHING");

            let result = builder
                .build()
                .execute(&mut *tx)
                .await
                .map_err(write_error)?;
            inserted += result.rows_affected();
        }

        tx.commit().await.map_err(write_error)?;

        Ok(InsertOutcome {
            inserted,
            skipped: (records.len() as u64).saturating_sub(inserted),
        })
    }

    async fn delete_records(&self, run_id: RunId) -> Result<u64> {
        let result = sqlx::query("DELETE FROM imported_records WHERE run_id = $1")
            .bind(run_id)
            .execute(&self.pool)
            .await
            .map_err(|e| store_error("failed to delete records", e))?;
        Ok(result.rows_affected())
    }

    async fn list_records(
        &self,
        run_id: RunId,
        query: &ListQuery,
    ) -> Result<Page<ImportedRecord>> {
        let filter = query.filter::<ImportedRecord>()?;

        let mut count = QueryBuilder::new("SELECT COUNT(*) FROM imported_records WHERE run_id = ");
        count.push_bind(run_id);
        let mut select = QueryBuilder::new(format!(
            "SELECT {} FROM imported_records WHERE run_id = ",
            RECORD_COLUMNS
        ));
        select.push_bind(run_id);
        if let Some(ref filter) = filter {
            push_filter(&mut count, filter);
            push_filter(&mut select, filter);
        }
        select
            .push(" ORDER BY source_row, id LIMIT ")
            .push_bind(i64::from(query.page_size()))
            .push(" OFFSET ")
            .push_bind(to_i64(query.offset()));

        let total: i64 = count
            .build_query_scalar::<i64>()
            .fetch_one(&self.pool)
            .await
            .map_err(|e| store_error("failed to count records", e))?;
        let rows: Vec<RecordRow> = select
            .build_query_as::<RecordRow>()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| store_error("failed to list records", e))?;

        Ok(Page {
            items: rows.into_iter().map(ImportedRecord::from).collect(),
            page: query.page(),
            page_size: query.page_size(),
            total: total.max(0) as u64,
        })
    }

    async fn fail_stale_runs(&self, stale_before: DateTime<Utc>, message: &str) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE import_runs
            SET status = 'failed', error_message = $2, completed_at = NOW()
            WHERE status = 'running' AND heartbeat_at < $1
            "#,
        )
        .bind(stale_before)
        .bind(import_core::failure_message(message))
        .execute(&self.pool)
        .await
        .map_err(|e| store_error("failed to reclaim running runs", e))?;
        Ok(result.rows_affected())
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query_scalar::<_, i32>("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| store_error("ping failed", e))?;
        Ok(())
    }
}
