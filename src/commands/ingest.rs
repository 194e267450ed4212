//! Ingest command implementation
//!
//! Streams the precomputed abstract embeddings out of the corpus, joins each
//! batch to its article records by id, and upserts the aligned batch into the
//! quantized collection. Every attempt is recorded in the ingestion ledger.

use crate::corpus::{Corpus, DocumentRecord};
use crate::error::{Error, Result};
use crate::meta::{MetaDb, RunOutcome, RunStatus};
use crate::progress::add_progress_bar;
use crate::store::{point_id, CollectionSpec, DocumentPayload, VectorIndex};
use futures::{StreamExt, TryStreamExt};
use indicatif::{ProgressBar, ProgressStyle};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Options for a bulk load
#[derive(Debug, Clone)]
pub struct IngestOptions {
    /// Layout used if the collection has to be created
    pub collection: CollectionSpec,
    /// Rows per upload batch
    pub batch_size: usize,
    /// Stop after this many corpus rows
    pub limit: Option<usize>,
    /// Load into a collection that already exists
    pub resume: bool,
    /// Clear a stale running claim on the collection
    pub force: bool,
}

impl IngestOptions {
    pub fn new(collection: CollectionSpec) -> Self {
        Self {
            collection,
            batch_size: crate::config::default_ingest_batch_size(),
            limit: None,
            resume: false,
            force: false,
        }
    }
}

/// Statistics from an ingestion run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestStats {
    pub run_id: String,
    pub collection: String,
    pub rows_processed: u64,
    pub rows_uploaded: u64,
    /// Vectors dropped because their article record does not exist
    pub missing_records: u64,
    pub batches: u64,
    /// The collection already existed and `resume` was off
    pub skipped: bool,
}

impl IngestStats {
    fn outcome(&self) -> RunOutcome {
        RunOutcome {
            rows_processed: self.rows_processed,
            rows_uploaded: self.rows_uploaded,
            missing_records: self.missing_records,
            last_offset: None,
            error: None,
        }
    }
}

/// Load the corpus into `options.collection`.
///
/// The run claims the collection in `ledger` first, so two loads into the
/// same collection never interleave. The first failing batch aborts the run;
/// the ledger then records the error and the corpus offset of that batch.
pub async fn cmd_ingest(
    corpus: &Corpus,
    index: &dyn VectorIndex,
    ledger: &MetaDb,
    options: &IngestOptions,
) -> Result<IngestStats> {
    if options.batch_size == 0 {
        return Err(Error::Config("batch size must be positive".to_string()));
    }

    let collection = &options.collection.name;
    let run = ledger.start_run(collection, options.force).await?;
    info!(
        "Started ingestion run {} into {} ({})",
        run.id,
        collection,
        index.backend()
    );

    let mut stats = IngestStats {
        run_id: run.id.clone(),
        collection: collection.clone(),
        ..Default::default()
    };

    let started = Instant::now();
    match load(corpus, index, options, &mut stats).await {
        Ok(()) => {
            let status = if stats.skipped {
                RunStatus::Skipped
            } else {
                RunStatus::Completed
            };
            ledger.finish_run(&run.id, status, &stats.outcome()).await?;
            info!(
                "Ingestion run {} {} in {:.1}s: {} rows, {} uploaded, {} missing records",
                run.id,
                status,
                started.elapsed().as_secs_f64(),
                stats.rows_processed,
                stats.rows_uploaded,
                stats.missing_records
            );
            Ok(stats)
        }
        Err(e) => {
            let outcome = RunOutcome {
                last_offset: Some(stats.rows_processed),
                error: Some(e.to_string()),
                ..stats.outcome()
            };
            if let Err(ledger_err) = ledger.finish_run(&run.id, RunStatus::Failed, &outcome).await {
                warn!("Could not record failed run {}: {}", run.id, ledger_err);
            }
            Err(e)
        }
    }
}

async fn load(
    corpus: &Corpus,
    index: &dyn VectorIndex,
    options: &IngestOptions,
    stats: &mut IngestStats,
) -> Result<()> {
    let spec = &options.collection;

    if index.collection_exists(&spec.name).await? && !options.resume {
        info!(
            "Collection {} already exists, skipping ingestion (pass --resume to load into it)",
            spec.name
        );
        stats.skipped = true;
        return Ok(());
    }

    if let Some(dimension) = corpus.dimension().await? {
        if dimension != spec.dimension {
            return Err(Error::Config(format!(
                "corpus vectors have {} dimensions but collection '{}' is configured for {}",
                dimension, spec.name, spec.dimension
            )));
        }
    }

    if index.create_collection(spec).await? {
        info!(
            "Created collection {} ({} dims, binary quantization)",
            spec.name, spec.dimension
        );
    } else {
        info!("Resuming into existing collection {}", spec.name);
    }

    let total = corpus.count().await?;
    let total = options
        .limit
        .map_or(total, |limit| total.min(limit as u64));
    let progress = start_progress_bar(total, "Uploading abstracts");

    let rows = corpus
        .vectors()
        .take(options.limit.unwrap_or(usize::MAX))
        .try_chunks(options.batch_size)
        .map_err(|e| e.1);
    let mut rows = std::pin::pin!(rows);

    while let Some(batch) = rows.try_next().await? {
        let len = batch.len() as u64;
        let (uploaded, missing) = upload_batch(corpus, index, &spec.name, batch).await?;

        stats.batches += 1;
        stats.rows_processed += len;
        stats.rows_uploaded += uploaded;
        stats.missing_records += missing;

        debug!(
            "Batch {}: {} rows, {} uploaded, {} missing (offset {})",
            stats.batches,
            len,
            uploaded,
            missing,
            stats.rows_processed
        );
        if let Some(pb) = &progress {
            pb.inc(len);
        }
    }

    finish_progress(progress, "Abstracts uploaded");
    Ok(())
}

/// Join one batch to its records and upload it. Returns (uploaded, missing).
///
/// Ids without a record are dropped and counted; a batch where none match
/// is an error.
async fn upload_batch(
    corpus: &Corpus,
    index: &dyn VectorIndex,
    collection: &str,
    batch: Vec<(i64, Vec<f32>)>,
) -> Result<(u64, u64)> {
    let ids: Vec<i64> = batch.iter().map(|(id, _)| *id).collect();

    // NotFound here means no id in the batch has a record; that fails the run
    let records = corpus.fetch(&ids).await?;
    let by_id: HashMap<i64, DocumentRecord> =
        records.into_iter().map(|record| (record.id, record)).collect();

    let mut point_ids = Vec::with_capacity(batch.len());
    let mut vectors = Vec::with_capacity(batch.len());
    let mut payloads = Vec::with_capacity(batch.len());
    let mut missing = 0u64;

    for (id, vector) in batch {
        match by_id.get(&id) {
            Some(record) => {
                point_ids.push(point_id(id)?);
                vectors.push(vector);
                payloads.push(DocumentPayload::from(record));
            }
            None => missing += 1,
        }
    }

    if missing > 0 {
        warn!(
            "Dropped {} vectors without a matching article record",
            missing
        );
    }

    if !point_ids.is_empty() {
        index
            .upload(collection, &point_ids, &vectors, &payloads)
            .await?;
    }

    Ok((point_ids.len() as u64, missing))
}

fn start_progress_bar(len: u64, message: &str) -> Option<ProgressBar> {
    if len == 0 {
        return None;
    }

    let pb = add_progress_bar(len);
    pb.set_style(
        ProgressStyle::with_template(
            "{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏"),
    );
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    Some(pb)
}

fn finish_progress(pb: Option<ProgressBar>, message: &str) {
    if let Some(pb) = pb {
        pb.finish_with_message(message.to_string());
    }
}

/// Print ingestion statistics
pub fn print_ingest_stats(stats: &IngestStats, dry_run: bool) {
    if stats.skipped {
        println!(
            "⏭  Collection '{}' already exists; nothing ingested (use --resume to continue loading)",
            stats.collection
        );
        return;
    }

    if dry_run {
        println!("\n✓ Dry run complete (in-memory index, nothing written to Qdrant)");
    } else {
        println!("\n✓ Ingestion into '{}' complete", stats.collection);
    }
    println!("  Rows processed:  {}", stats.rows_processed);
    println!("  Rows uploaded:   {}", stats.rows_uploaded);
    println!("  Missing records: {}", stats.missing_records);
    println!("  Batches:         {}", stats.batches);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::CorpusWriter;
    use crate::store::{InMemoryIndex, QuantizationSearch, SearchRequest};
    use tempfile::TempDir;

    const COLLECTION: &str = "abstracts";

    async fn write_corpus(tmp: &TempDir, vectors: &[(i64, Vec<f32>)]) -> Corpus {
        let path = tmp.path().join("corpus.db");
        let writer = CorpusWriter::create(&path).await.unwrap();
        writer
            .insert_article(&DocumentRecord::new(1, "A").with_abstract("x").with_year(2020))
            .await
            .unwrap();
        writer
            .insert_article(&DocumentRecord::new(2, "B"))
            .await
            .unwrap();
        writer
            .insert_article(&DocumentRecord::new(3, "C").with_authors("Doe A"))
            .await
            .unwrap();
        for (id, vector) in vectors {
            writer.insert_vector(*id, vector).await.unwrap();
        }
        writer.close().await;
        Corpus::open(&path, &path).await.unwrap()
    }

    fn options(dimension: usize, batch_size: usize) -> IngestOptions {
        let mut options = IngestOptions::new(CollectionSpec::new(COLLECTION, dimension));
        options.batch_size = batch_size;
        options
    }

    fn standard_vectors() -> Vec<(i64, Vec<f32>)> {
        vec![
            (1, vec![1.0, 0.0, 0.0]),
            (2, vec![0.0, 1.0, 0.0]),
            (99, vec![0.0, 0.0, 1.0]),
            (3, vec![0.0, 0.0, -1.0]),
        ]
    }

    #[tokio::test]
    async fn test_ingest_joins_by_id_and_counts_missing() {
        let tmp = TempDir::new().unwrap();
        let corpus = write_corpus(&tmp, &standard_vectors()).await;
        let index = InMemoryIndex::new();
        let ledger = MetaDb::in_memory().await.unwrap();

        let stats = cmd_ingest(&corpus, &index, &ledger, &options(3, 2))
            .await
            .unwrap();

        assert!(!stats.skipped);
        assert_eq!(stats.rows_processed, 4);
        assert_eq!(stats.rows_uploaded, 3);
        assert_eq!(stats.missing_records, 1);
        assert_eq!(stats.batches, 2);
        assert_eq!(index.count(COLLECTION).await.unwrap(), 3);

        // Payloads line up with their own vectors
        let request = SearchRequest {
            vector: vec![0.0, 1.0, 0.0],
            limit: 1,
            params: QuantizationSearch::exact(),
            timeout: Duration::from_secs(5),
        };
        let hits = index.search(COLLECTION, &request).await.unwrap();
        assert_eq!(hits[0].id, 2);
        assert_eq!(hits[0].payload.title.as_deref(), Some("B"));
        assert_eq!(hits[0].payload.pmid, Some(2));

        let run = ledger.latest_run(COLLECTION).await.unwrap().unwrap();
        assert_eq!(run.status().unwrap(), RunStatus::Completed);
        assert_eq!(run.rows_uploaded, 3);
        assert_eq!(run.missing_records, 1);
    }

    #[tokio::test]
    async fn test_existing_collection_is_skipped_without_resume() {
        let tmp = TempDir::new().unwrap();
        let corpus = write_corpus(&tmp, &standard_vectors()).await;
        let index = InMemoryIndex::new();
        index
            .create_collection(&CollectionSpec::new(COLLECTION, 3))
            .await
            .unwrap();
        let ledger = MetaDb::in_memory().await.unwrap();

        let stats = cmd_ingest(&corpus, &index, &ledger, &options(3, 2))
            .await
            .unwrap();

        assert!(stats.skipped);
        assert_eq!(stats.rows_processed, 0);
        assert_eq!(index.count(COLLECTION).await.unwrap(), 0);

        let run = ledger.latest_run(COLLECTION).await.unwrap().unwrap();
        assert_eq!(run.status().unwrap(), RunStatus::Skipped);
    }

    #[tokio::test]
    async fn test_resume_is_duplicate_tolerant() {
        let tmp = TempDir::new().unwrap();
        let corpus = write_corpus(&tmp, &standard_vectors()).await;
        let index = InMemoryIndex::new();
        let ledger = MetaDb::in_memory().await.unwrap();

        cmd_ingest(&corpus, &index, &ledger, &options(3, 10))
            .await
            .unwrap();

        let mut resumed = options(3, 10);
        resumed.resume = true;
        let stats = cmd_ingest(&corpus, &index, &ledger, &resumed).await.unwrap();

        assert_eq!(stats.rows_uploaded, 3);
        assert_eq!(index.count(COLLECTION).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_limit_caps_rows() {
        let tmp = TempDir::new().unwrap();
        let corpus = write_corpus(&tmp, &standard_vectors()).await;
        let index = InMemoryIndex::new();
        let ledger = MetaDb::in_memory().await.unwrap();

        let mut limited = options(3, 10);
        limited.limit = Some(2);
        let stats = cmd_ingest(&corpus, &index, &ledger, &limited).await.unwrap();

        assert_eq!(stats.rows_processed, 2);
        assert_eq!(stats.batches, 1);
        assert_eq!(index.count(COLLECTION).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_failed_batch_is_recorded_with_offset() {
        let tmp = TempDir::new().unwrap();
        // Second row has the wrong dimension
        let corpus = write_corpus(
            &tmp,
            &[(1, vec![1.0, 0.0, 0.0]), (2, vec![0.0, 1.0]), (3, vec![0.0, 0.0, 1.0])],
        )
        .await;
        let index = InMemoryIndex::new();
        let ledger = MetaDb::in_memory().await.unwrap();

        let result = cmd_ingest(&corpus, &index, &ledger, &options(3, 1)).await;
        assert!(result.is_err());
        assert_eq!(index.count(COLLECTION).await.unwrap(), 1);

        let run = ledger.latest_run(COLLECTION).await.unwrap().unwrap();
        assert_eq!(run.status().unwrap(), RunStatus::Failed);
        assert_eq!(run.last_offset, Some(1));
        assert_eq!(run.rows_uploaded, 1);
        assert!(run.error.is_some());

        // The claim was released
        ledger.start_run(COLLECTION, false).await.unwrap();
    }

    #[tokio::test]
    async fn test_batch_without_any_record_fails_the_run() {
        let tmp = TempDir::new().unwrap();
        let corpus = write_corpus(
            &tmp,
            &[(1, vec![1.0, 0.0, 0.0]), (500, vec![0.0, 1.0, 0.0]), (501, vec![0.0, 0.0, 1.0])],
        )
        .await;
        let index = InMemoryIndex::new();
        let ledger = MetaDb::in_memory().await.unwrap();

        let err = cmd_ingest(&corpus, &index, &ledger, &options(3, 1))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
        assert_eq!(index.count(COLLECTION).await.unwrap(), 1);

        let run = ledger.latest_run(COLLECTION).await.unwrap().unwrap();
        assert_eq!(run.status().unwrap(), RunStatus::Failed);
        assert_eq!(run.last_offset, Some(1));
        assert_eq!(run.rows_uploaded, 1);
    }

    #[tokio::test]
    async fn test_concurrent_run_is_refused() {
        let tmp = TempDir::new().unwrap();
        let corpus = write_corpus(&tmp, &standard_vectors()).await;
        let index = InMemoryIndex::new();
        let ledger = MetaDb::in_memory().await.unwrap();
        ledger.start_run(COLLECTION, false).await.unwrap();

        let err = cmd_ingest(&corpus, &index, &ledger, &options(3, 2))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::IngestionInProgress(_)));
        assert!(!index.collection_exists(COLLECTION).await.unwrap());

        let mut forced = options(3, 2);
        forced.force = true;
        let stats = cmd_ingest(&corpus, &index, &ledger, &forced).await.unwrap();
        assert_eq!(stats.rows_uploaded, 3);
    }

    #[tokio::test]
    async fn test_dimension_mismatch_fails_before_creating_collection() {
        let tmp = TempDir::new().unwrap();
        let corpus = write_corpus(&tmp, &standard_vectors()).await;
        let index = InMemoryIndex::new();
        let ledger = MetaDb::in_memory().await.unwrap();

        let err = cmd_ingest(&corpus, &index, &ledger, &options(768, 2))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(!index.collection_exists(COLLECTION).await.unwrap());

        let run = ledger.latest_run(COLLECTION).await.unwrap().unwrap();
        assert_eq!(run.status().unwrap(), RunStatus::Failed);
        assert_eq!(run.last_offset, Some(0));
    }

    #[tokio::test]
    async fn test_zero_batch_size_is_config_error() {
        let tmp = TempDir::new().unwrap();
        let corpus = write_corpus(&tmp, &standard_vectors()).await;
        let ledger = MetaDb::in_memory().await.unwrap();

        let err = cmd_ingest(&corpus, &InMemoryIndex::new(), &ledger, &options(3, 0))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
