//! Ingestion ledger using SQLite
//!
//! Every bulk load is recorded as an ingestion run. A run in `running`
//! status claims its collection: a second ingestion into the same collection
//! is refused until the first finishes or the claim is cleared.

mod schema;

pub use schema::*;

use crate::config::Config;
use crate::error::{Error, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::FromRow;
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Ingestion run status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
    Skipped,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Running => write!(f, "running"),
            RunStatus::Completed => write!(f, "completed"),
            RunStatus::Failed => write!(f, "failed"),
            RunStatus::Skipped => write!(f, "skipped"),
        }
    }
}

impl FromStr for RunStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "running" => Ok(RunStatus::Running),
            "completed" => Ok(RunStatus::Completed),
            "failed" => Ok(RunStatus::Failed),
            "skipped" => Ok(RunStatus::Skipped),
            _ => Err(Error::Config(format!("Unknown run status: {}", s))),
        }
    }
}

/// An ingestion run record
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct IngestionRun {
    pub id: String,
    pub collection: String,
    pub started_at: String,
    pub completed_at: Option<String>,
    pub status: String,
    pub rows_processed: i64,
    pub rows_uploaded: i64,
    pub missing_records: i64,
    pub last_offset: Option<i64>,
    pub error: Option<String>,
}

impl IngestionRun {
    pub fn new(collection: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            collection: collection.into(),
            started_at: Utc::now().to_rfc3339(),
            completed_at: None,
            status: RunStatus::Running.to_string(),
            rows_processed: 0,
            rows_uploaded: 0,
            missing_records: 0,
            last_offset: None,
            error: None,
        }
    }

    pub fn status(&self) -> Result<RunStatus> {
        self.status.parse()
    }
}

/// Final counters written when a run ends
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunOutcome {
    pub rows_processed: u64,
    pub rows_uploaded: u64,
    pub missing_records: u64,
    /// Corpus offset of the batch that failed, if any
    pub last_offset: Option<u64>,
    pub error: Option<String>,
}

/// Ingestion ledger handle
#[derive(Clone)]
pub struct MetaDb {
    pool: SqlitePool,
}

impl MetaDb {
    /// Open the ledger named in config
    pub async fn connect(config: &Config) -> Result<Self> {
        Self::new(&config.paths.state_db).await
    }

    /// Open (creating if needed) a ledger at the given path
    pub async fn new(db_path: &Path) -> Result<Self> {
        // Create parent directory if needed
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal);

        debug!("Connecting to SQLite database at {:?}", db_path);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let db = Self { pool };

        // Auto-initialize schema if needed
        if !db.is_initialized().await? {
            db.init_schema().await?;
        }

        Ok(db)
    }

    /// Throwaway ledger for dry runs; nothing outlives the handle
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        let db = Self { pool };
        db.init_schema().await?;
        Ok(db)
    }

    /// Initialize the database schema
    pub async fn init_schema(&self) -> Result<()> {
        info!("Initializing ingestion ledger schema");
        sqlx::raw_sql(SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }

    /// Check if database is initialized
    pub async fn is_initialized(&self) -> Result<bool> {
        let result: Option<(i32,)> = sqlx::query_as(
            "SELECT 1 FROM sqlite_master WHERE type='table' AND name='ingestion_runs'",
        )
        .fetch_optional(&self.pool)
        .await?;
        Ok(result.is_some())
    }

    /// Claim `collection` for a new ingestion run.
    ///
    /// Fails with [`Error::IngestionInProgress`] while another run for the
    /// collection is `running`. With `force`, such runs are marked failed
    /// first.
    pub async fn start_run(&self, collection: &str, force: bool) -> Result<IngestionRun> {
        if force {
            let cleared = sqlx::query(
                "UPDATE ingestion_runs SET status = ?, completed_at = ?, error = ? \
                 WHERE collection = ? AND status = ?",
            )
            .bind(RunStatus::Failed.to_string())
            .bind(Utc::now().to_rfc3339())
            .bind("cleared by --force")
            .bind(collection)
            .bind(RunStatus::Running.to_string())
            .execute(&self.pool)
            .await?
            .rows_affected();

            if cleared > 0 {
                warn!("Cleared {} stale ingestion run(s) for {}", cleared, collection);
            }
        }

        let run = IngestionRun::new(collection);
        let inserted = sqlx::query(
            r#"
            INSERT INTO ingestion_runs (id, collection, started_at, status, rows_processed, rows_uploaded, missing_records)
            VALUES (?, ?, ?, ?, 0, 0, 0)
            "#,
        )
        .bind(&run.id)
        .bind(&run.collection)
        .bind(&run.started_at)
        .bind(&run.status)
        .execute(&self.pool)
        .await;

        match inserted {
            Ok(_) => Ok(run),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Err(Error::IngestionInProgress(collection.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Close a run with its final status and counters
    pub async fn finish_run(&self, id: &str, status: RunStatus, outcome: &RunOutcome) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE ingestion_runs SET
                completed_at = ?,
                status = ?,
                rows_processed = ?,
                rows_uploaded = ?,
                missing_records = ?,
                last_offset = ?,
                error = ?
            WHERE id = ?
            "#,
        )
        .bind(Utc::now().to_rfc3339())
        .bind(status.to_string())
        .bind(outcome.rows_processed as i64)
        .bind(outcome.rows_uploaded as i64)
        .bind(outcome.missing_records as i64)
        .bind(outcome.last_offset.map(|o| o as i64))
        .bind(&outcome.error)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Latest run for a collection
    pub async fn latest_run(&self, collection: &str) -> Result<Option<IngestionRun>> {
        let run = sqlx::query_as::<_, IngestionRun>(
            "SELECT * FROM ingestion_runs WHERE collection = ? ORDER BY started_at DESC, rowid DESC LIMIT 1",
        )
        .bind(collection)
        .fetch_optional(&self.pool)
        .await?;
        Ok(run)
    }

    /// Most recent runs across all collections
    pub async fn list_runs(&self, limit: u32) -> Result<Vec<IngestionRun>> {
        let runs = sqlx::query_as::<_, IngestionRun>(
            "SELECT * FROM ingestion_runs ORDER BY started_at DESC, rowid DESC LIMIT ?",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(runs)
    }
}
