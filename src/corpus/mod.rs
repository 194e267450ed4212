//! Persisted corpus access
//!
//! The corpus lives in two SQLite stores:
//! - the relational store (`articles`) with title, authors, abstract and year
//! - the array store (`doc_vectors`) with one precomputed embedding per document
//!
//! Both may be the same file. Reading never mutates either store.

mod schema;

pub use schema::*;

use crate::config::CorpusConfig;
use crate::error::{Error, Result};
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::FromRow;
use std::path::Path;
use tracing::debug;

/// Keeps `IN (...)` lists under SQLite's historical bind-parameter limit.
const MAX_IDS_PER_QUERY: usize = 900;

/// One abstract as stored in the relational store
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub id: i64,
    pub title: Option<String>,
    pub authors: Option<String>,
    pub abstract_text: Option<String>,
    pub publication_year: Option<i64>,
}

impl DocumentRecord {
    pub fn new(id: i64, title: impl Into<String>) -> Self {
        Self {
            id,
            title: Some(title.into()),
            authors: None,
            abstract_text: None,
            publication_year: None,
        }
    }

    pub fn with_authors(mut self, authors: impl Into<String>) -> Self {
        self.authors = Some(authors.into());
        self
    }

    pub fn with_abstract(mut self, abstract_text: impl Into<String>) -> Self {
        self.abstract_text = Some(abstract_text.into());
        self
    }

    pub fn with_year(mut self, year: i64) -> Self {
        self.publication_year = Some(year);
        self
    }
}

/// Read handle over both corpus stores
pub struct Corpus {
    articles: SqlitePool,
    vectors: SqlitePool,
}

impl Corpus {
    /// Open the stores named in config
    pub async fn connect(config: &CorpusConfig) -> Result<Self> {
        Self::open(&config.articles_db, &config.vectors_db).await
    }

    /// Open both stores read-only
    pub async fn open(articles_db: &Path, vectors_db: &Path) -> Result<Self> {
        let articles = open_read_only(articles_db).await?;
        let vectors = if articles_db == vectors_db {
            articles.clone()
        } else {
            open_read_only(vectors_db).await?
        };

        Ok(Self { articles, vectors })
    }

    /// Number of vectors in the array store
    pub async fn count(&self) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM doc_vectors")
            .fetch_one(&self.vectors)
            .await?;
        Ok(count.max(0) as u64)
    }

    /// Vector dimension, inferred from the first stored vector
    pub async fn dimension(&self) -> Result<Option<usize>> {
        let blob: Option<Vec<u8>> =
            sqlx::query_scalar("SELECT vector FROM doc_vectors ORDER BY rowid LIMIT 1")
                .fetch_optional(&self.vectors)
                .await?;

        match blob {
            Some(bytes) => Ok(Some(decode_vector(&bytes)?.len())),
            None => Ok(None),
        }
    }

    /// Lazily stream `(id, vector)` pairs in stable corpus order
    pub fn vectors(&self) -> impl Stream<Item = Result<(i64, Vec<f32>)>> + Send + '_ {
        sqlx::query_as::<_, (i64, Vec<u8>)>("SELECT doc_id, vector FROM doc_vectors ORDER BY rowid")
            .fetch(&self.vectors)
            .map(|row| {
                let (id, blob) = row?;
                let vector = decode_vector(&blob).map_err(|e| match e {
                    Error::Other(msg) => Error::Other(format!("document {}: {}", id, msg)),
                    other => other,
                })?;
                Ok((id, vector))
            })
    }

    /// Fetch the records for a batch of ids.
    ///
    /// Ids missing from the corpus are silently omitted; the call only fails
    /// with [`Error::NotFound`] when none of a non-empty request exist.
    /// Records come back in ascending id order, duplicates collapsed.
    pub async fn fetch(&self, ids: &[i64]) -> Result<Vec<DocumentRecord>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut unique = ids.to_vec();
        unique.sort_unstable();
        unique.dedup();

        let mut records = Vec::with_capacity(unique.len());
        for slice in unique.chunks(MAX_IDS_PER_QUERY) {
            let placeholders = vec!["?"; slice.len()].join(", ");
            let sql = format!(
                "SELECT pmid AS id, title, authors, abstract AS abstract_text, publication_year \
                 FROM articles WHERE pmid IN ({}) ORDER BY pmid",
                placeholders
            );

            let mut query = sqlx::query_as::<_, DocumentRecord>(&sql);
            for id in slice {
                query = query.bind(*id);
            }
            records.extend(query.fetch_all(&self.articles).await?);
        }

        if records.is_empty() {
            return Err(Error::NotFound(format!(
                "none of the {} requested documents exist in the corpus (first id {})",
                unique.len(),
                unique[0]
            )));
        }

        debug!(
            "Fetched {} of {} requested documents",
            records.len(),
            unique.len()
        );
        Ok(records)
    }
}

/// Write handle used to build corpus files (fixtures, conversions)
pub struct CorpusWriter {
    pool: SqlitePool,
}

impl CorpusWriter {
    /// Create (or open) a single-file corpus with both tables
    pub async fn create(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        sqlx::query(ARTICLES_SCHEMA_SQL).execute(&pool).await?;
        sqlx::query(VECTORS_SCHEMA_SQL).execute(&pool).await?;

        Ok(Self { pool })
    }

    pub async fn insert_article(&self, record: &DocumentRecord) -> Result<()> {
        sqlx::query(
            "INSERT OR REPLACE INTO articles (pmid, title, authors, abstract, publication_year) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(record.id)
        .bind(&record.title)
        .bind(&record.authors)
        .bind(&record.abstract_text)
        .bind(record.publication_year)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn insert_vector(&self, doc_id: i64, vector: &[f32]) -> Result<()> {
        sqlx::query("INSERT INTO doc_vectors (doc_id, vector) VALUES (?, ?)")
            .bind(doc_id)
            .bind(encode_vector(vector))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn close(self) {
        self.pool.close().await;
    }
}

async fn open_read_only(path: &Path) -> Result<SqlitePool> {
    if !path.exists() {
        return Err(Error::Config(format!(
            "Corpus store not found: {}",
            path.display()
        )));
    }

    debug!("Opening corpus store at {:?}", path);

    let options = SqliteConnectOptions::new()
        .filename(path)
        .read_only(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(4)
        .connect_with(options)
        .await?;

    Ok(pool)
}

/// Serialize a vector as little-endian f32s
pub fn encode_vector(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|v| v.to_le_bytes()).collect()
}

/// Deserialize a little-endian f32 blob
pub fn decode_vector(bytes: &[u8]) -> Result<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return Err(Error::Other(format!(
            "vector blob of {} bytes is not a whole number of f32 values",
            bytes.len()
        )));
    }

    Ok(bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect())
}
