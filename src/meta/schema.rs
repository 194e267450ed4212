//! SQLite schema definition

/// SQL schema for the ingestion ledger
pub const SCHEMA_SQL: &str = r#"
-- Ingestion runs: one row per bulk load attempt
CREATE TABLE IF NOT EXISTS ingestion_runs (
    id TEXT PRIMARY KEY,
    collection TEXT NOT NULL,
    started_at TEXT NOT NULL,
    completed_at TEXT,
    status TEXT NOT NULL,
    rows_processed INTEGER NOT NULL DEFAULT 0,
    rows_uploaded INTEGER NOT NULL DEFAULT 0,
    missing_records INTEGER NOT NULL DEFAULT 0,
    last_offset INTEGER,
    error TEXT
);

-- At most one running ingestion per collection
CREATE UNIQUE INDEX IF NOT EXISTS idx_runs_single_writer
    ON ingestion_runs(collection) WHERE status = 'running';

CREATE INDEX IF NOT EXISTS idx_runs_collection ON ingestion_runs(collection, started_at);
"#;
