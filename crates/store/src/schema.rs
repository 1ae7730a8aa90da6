//! PostgreSQL table schemas.
//!
//! - One `import_runs` row per run
//! - N `imported_records` rows per run, removed with their run
//! - `(run_id, name, category)` is unique so batch inserts can skip duplicates
//! - `attempt` fences writes of superseded executions; `heartbeat_at` is the
//!   liveness lease the orphan sweep checks

/// SQL for creating the runs table.
pub const CREATE_RUNS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS import_runs (
    id UUID PRIMARY KEY,
    owner_id TEXT NOT NULL,
    file_name TEXT NOT NULL,
    source_url TEXT NOT NULL,
    status TEXT NOT NULL CHECK (status IN ('running', 'completed', 'failed')),
    total_rows BIGINT,
    processed_rows BIGINT NOT NULL DEFAULT 0,
    error_message TEXT,
    started_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    completed_at TIMESTAMPTZ,
    attempt INTEGER NOT NULL DEFAULT 1,
    heartbeat_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    CHECK (total_rows IS NULL OR processed_rows <= total_rows)
)
"#;

pub const CREATE_RUNS_OWNER_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS idx_import_runs_owner_started
    ON import_runs (owner_id, started_at DESC)
"#;

pub const CREATE_RUNS_STATUS_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS idx_import_runs_running
    ON import_runs (heartbeat_at) WHERE status = 'running'
"#;

/// SQL for creating the imported records table.
pub const CREATE_RECORDS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS imported_records (
    id UUID PRIMARY KEY,
    run_id UUID NOT NULL REFERENCES import_runs (id) ON DELETE CASCADE,
    source_row BIGINT NOT NULL,
    name TEXT NOT NULL,
    category TEXT NOT NULL,
    price DOUBLE PRECISION NOT NULL,
    stock BIGINT NOT NULL DEFAULT 0,
    description TEXT,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    CONSTRAINT uq_imported_records_identity UNIQUE (run_id, name, category)
)
"#;

pub const CREATE_RECORDS_ORDER_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS idx_imported_records_run_row
    ON imported_records (run_id, source_row)
"#;

/// All DDL statements in dependency order.
pub fn all_tables() -> Vec<&'static str> {
    vec![
        CREATE_RUNS_TABLE,
        CREATE_RUNS_OWNER_INDEX,
        CREATE_RUNS_STATUS_INDEX,
        CREATE_RECORDS_TABLE,
        CREATE_RECORDS_ORDER_INDEX,
    ]
}
