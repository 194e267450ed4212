//! Vector index integration
//!
//! This module defines the [`VectorIndex`] seam and provides:
//! - A Qdrant backend with binary quantization (`QdrantIndex`)
//! - An in-process backend with the same quantized search semantics (`InMemoryIndex`)
//! - The payload projection stored with every point

mod memory;
mod payload;
mod qdrant;

pub use memory::*;
pub use payload::*;
pub use qdrant::*;

use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::time::Duration;

/// Layout of a binary-quantized collection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionSpec {
    pub name: String,
    pub dimension: usize,
    /// Exact vectors live on disk
    pub on_disk: bool,
    /// 1-bit vectors stay resident in RAM
    pub always_ram: bool,
    pub segment_number: u64,
    /// 0 defers index construction until the store triggers it
    pub indexing_threshold: u64,
}

impl CollectionSpec {
    pub fn new(name: impl Into<String>, dimension: usize) -> Self {
        Self {
            name: name.into(),
            dimension,
            on_disk: true,
            always_ram: true,
            segment_number: 8,
            indexing_threshold: 0,
        }
    }
}

/// Quantization controls for a single search
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QuantizationSearch {
    /// Score exact vectors, bypassing the quantized copy
    pub ignore: bool,
    /// Re-rank quantized candidates with exact vectors
    pub rescore: bool,
    /// Candidate fetch factor (>= 1.0) applied before rescoring
    pub oversampling: Option<f64>,
}

impl Default for QuantizationSearch {
    fn default() -> Self {
        Self {
            ignore: false,
            rescore: false,
            oversampling: Some(1.5),
        }
    }
}

impl QuantizationSearch {
    /// Exact search over full-precision vectors
    pub fn exact() -> Self {
        Self {
            ignore: true,
            rescore: false,
            oversampling: None,
        }
    }

    /// Number of quantized candidates to consider for `limit` results
    pub fn candidate_pool(&self, limit: usize) -> usize {
        match self.oversampling {
            Some(factor) if factor > 1.0 => (limit as f64 * factor).ceil() as usize,
            _ => limit,
        }
    }
}

/// A single nearest-neighbour query
#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub vector: Vec<f32>,
    pub limit: usize,
    pub params: QuantizationSearch,
    pub timeout: Duration,
}

/// Search result
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub id: u64,
    pub score: f32,
    pub payload: DocumentPayload,
}

/// Information about a collection
#[derive(Debug, Clone, Serialize)]
pub struct CollectionInfo {
    pub points_count: u64,
    pub indexed_vectors_count: u64,
    pub status: String,
}

/// A quantized similarity index holding named collections
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Short backend name for logs
    fn backend(&self) -> &'static str;

    async fn collection_exists(&self, name: &str) -> Result<bool>;

    /// Create the collection unless it exists.
    ///
    /// Returns `true` if it was created; an existing collection keeps its
    /// configuration.
    async fn create_collection(&self, spec: &CollectionSpec) -> Result<bool>;

    /// Append points. `ids`, `vectors` and `payloads` are positionally
    /// correlated and must have equal length.
    async fn upload(
        &self,
        name: &str,
        ids: &[u64],
        vectors: &[Vec<f32>],
        payloads: &[DocumentPayload],
    ) -> Result<()>;

    /// At most `request.limit` hits ordered by non-increasing score
    async fn search(&self, name: &str, request: &SearchRequest) -> Result<Vec<SearchHit>>;

    async fn count(&self, name: &str) -> Result<u64>;

    async fn collection_info(&self, name: &str) -> Result<Option<CollectionInfo>>;
}

/// Reject a batch whose parallel slices differ in length
pub fn check_alignment(ids: &[u64], vectors: &[Vec<f32>], payloads: &[DocumentPayload]) -> Result<()> {
    if ids.len() != vectors.len() || vectors.len() != payloads.len() {
        return Err(Error::Alignment {
            ids: ids.len(),
            vectors: vectors.len(),
            payloads: payloads.len(),
        });
    }
    Ok(())
}

/// Reject vectors whose length differs from the collection dimension
pub fn check_dimensions(collection: &str, dimension: usize, vectors: &[Vec<f32>]) -> Result<()> {
    if let Some(mismatch) = vectors.iter().find(|v| v.len() != dimension) {
        return Err(Error::VectorIndex(format!(
            "Vector dimension mismatch for collection '{}': expected {}, got {}",
            collection,
            dimension,
            mismatch.len()
        )));
    }
    Ok(())
}

/// Order hits by descending score, then ascending id
pub fn sort_hits(hits: &mut [SearchHit]) {
    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });
}

/// Convert a corpus id into a point id
pub fn point_id(doc_id: i64) -> Result<u64> {
    u64::try_from(doc_id).map_err(|_| {
        Error::VectorIndex(format!(
            "document id {} cannot be used as a point id (must be non-negative)",
            doc_id
        ))
    })
}
