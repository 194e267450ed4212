//! Status command implementation

use crate::config::Config;
use crate::error::Result;
use crate::meta::{IngestionRun, MetaDb};
use crate::store::{CollectionInfo, VectorIndex};
use serde::Serialize;
use tracing::{debug, info};

/// Status information
#[derive(Debug, Clone, Serialize)]
pub struct StatusInfo {
    pub config_path: String,
    pub state_db: String,
    pub articles_db: String,
    pub articles_db_exists: bool,
    pub vectors_db: String,
    pub vectors_db_exists: bool,
    pub qdrant_url: String,
    pub collection_name: String,
    pub index_connected: bool,
    pub collection: Option<CollectionInfo>,
    pub embedding_model: String,
    pub llm_endpoint: String,
    pub last_run: Option<IngestionRun>,
    /// Most recent runs across all collections, newest first
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub recent_runs: Vec<IngestionRun>,
}

/// Get system status. An unreachable index is reported, not returned as an error.
///
/// `runs` asks for that many ledger entries as well; zero lists none.
pub async fn cmd_status(
    config: &Config,
    ledger: &MetaDb,
    index: &dyn VectorIndex,
    runs: u32,
) -> Result<StatusInfo> {
    info!("Getting status");

    let (index_connected, collection) = match index.collection_info(&config.collection_name).await {
        Ok(info) => (true, info),
        Err(e) => {
            debug!("{} status error: {}", index.backend(), e);
            (false, None)
        }
    };

    let last_run = ledger.latest_run(&config.collection_name).await?;
    let recent_runs = if runs > 0 {
        ledger.list_runs(runs).await?
    } else {
        Vec::new()
    };

    Ok(StatusInfo {
        config_path: config.paths.config_file.display().to_string(),
        state_db: config.paths.state_db.display().to_string(),
        articles_db: config.corpus.articles_db.display().to_string(),
        articles_db_exists: config.corpus.articles_db.exists(),
        vectors_db: config.corpus.vectors_db.display().to_string(),
        vectors_db_exists: config.corpus.vectors_db.exists(),
        qdrant_url: config.qdrant_url.clone(),
        collection_name: config.collection_name.clone(),
        index_connected,
        collection,
        embedding_model: config.embedding.model.clone(),
        llm_endpoint: config.llm.endpoint.clone(),
        last_run,
        recent_runs,
    })
}

fn presence(exists: bool) -> &'static str {
    if exists {
        "✓"
    } else {
        "✗ missing"
    }
}

/// Print status to console
pub fn print_status(status: &StatusInfo) {
    println!("\n📊 pubmed-rag Status\n");
    println!("Configuration: {}", status.config_path);
    println!("Ingestion ledger: {}", status.state_db);
    println!("\nCorpus:");
    println!("  Articles: {} {}", status.articles_db, presence(status.articles_db_exists));
    println!("  Vectors:  {} {}", status.vectors_db, presence(status.vectors_db_exists));

    println!("\nQdrant:");
    println!("  URL: {}", status.qdrant_url);
    println!("  Collection: {}", status.collection_name);
    let connection_status = match (status.index_connected, &status.collection) {
        (true, Some(_)) => "✓ Connected".to_string(),
        (true, None) => {
            "⚠ Connected (collection not created - run 'pubmed-rag ingest' to create)".to_string()
        }
        (false, _) => "✗ Not connected".to_string(),
    };
    println!("  Status: {}", connection_status);
    if let Some(info) = &status.collection {
        println!("  Points: {}", info.points_count);
        println!("  Indexed vectors: {}", info.indexed_vectors_count);
        println!("  Optimizer: {}", info.status);
    }

    println!("\nEmbedding Model: {}", status.embedding_model);
    println!("Language Model: {}", status.llm_endpoint);

    println!("\nLast ingestion:");
    match &status.last_run {
        Some(run) => {
            println!("  Run: {} ({})", run.id, run.status);
            println!("  Started: {}", run.started_at);
            if let Some(done) = &run.completed_at {
                println!("  Finished: {}", done);
            }
            println!(
                "  Rows: {} processed, {} uploaded, {} missing records",
                run.rows_processed, run.rows_uploaded, run.missing_records
            );
            if let Some(error) = &run.error {
                println!("  Error: {}", error);
                if let Some(offset) = run.last_offset {
                    println!("  Failed at corpus offset {}", offset);
                }
            }
        }
        None => println!("  None recorded"),
    }

    if !status.recent_runs.is_empty() {
        println!("\nRecent runs:");
        for run in &status.recent_runs {
            let offset = run
                .last_offset
                .map(|o| format!(" at offset {}", o))
                .unwrap_or_default();
            println!(
                "  {}  {:<10} {:<24} {} uploaded{}",
                run.started_at, run.status, run.collection, run.rows_uploaded, offset
            );
        }
    }
}
