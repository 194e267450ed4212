//! In-process vector index with binary quantization.
//!
//! Every point keeps its exact vector plus a 1-bit sign code. Quantized
//! search scores candidates with the binary dot approximation
//! `dimension - 2 * hamming(query, point)`, widens the candidate pool by the
//! oversampling factor and, when asked, re-ranks the pool with exact dot
//! products. Used for tests and for dry runs without a Qdrant server.

use super::{
    check_alignment, check_dimensions, sort_hits, CollectionInfo, CollectionSpec,
    DocumentPayload, SearchHit, SearchRequest, VectorIndex,
};
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Instant;
use tokio::sync::RwLock;
use tracing::debug;

#[derive(Debug, Clone)]
struct StoredPoint {
    id: u64,
    vector: Vec<f32>,
    code: Vec<u64>,
    payload: DocumentPayload,
}

#[derive(Debug)]
struct MemoryCollection {
    spec: CollectionSpec,
    points: Vec<StoredPoint>,
    positions: HashMap<u64, usize>,
}

/// An in-memory [`VectorIndex`]
#[derive(Debug, Default)]
pub struct InMemoryIndex {
    collections: RwLock<HashMap<String, MemoryCollection>>,
}

impl InMemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Configuration a collection was created with
    pub async fn collection_spec(&self, name: &str) -> Option<CollectionSpec> {
        let collections = self.collections.read().await;
        collections.get(name).map(|c| c.spec.clone())
    }
}

fn missing(name: &str) -> Error {
    Error::VectorIndex(format!("Collection '{}' does not exist", name))
}

/// Pack the sign of every component into bits (`x > 0` is a set bit)
fn binary_code(vector: &[f32]) -> Vec<u64> {
    let mut code = vec![0u64; vector.len().div_ceil(64)];
    for (i, value) in vector.iter().enumerate() {
        if *value > 0.0 {
            code[i / 64] |= 1 << (i % 64);
        }
    }
    code
}

fn hamming(a: &[u64], b: &[u64]) -> u32 {
    a.iter().zip(b).map(|(x, y)| (x ^ y).count_ones()).sum()
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

#[async_trait]
impl VectorIndex for InMemoryIndex {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn collection_exists(&self, name: &str) -> Result<bool> {
        Ok(self.collections.read().await.contains_key(name))
    }

    async fn create_collection(&self, spec: &CollectionSpec) -> Result<bool> {
        let mut collections = self.collections.write().await;
        if collections.contains_key(&spec.name) {
            debug!("Collection {} already exists", spec.name);
            return Ok(false);
        }

        collections.insert(
            spec.name.clone(),
            MemoryCollection {
                spec: spec.clone(),
                points: Vec::new(),
                positions: HashMap::new(),
            },
        );
        Ok(true)
    }

    async fn upload(
        &self,
        name: &str,
        ids: &[u64],
        vectors: &[Vec<f32>],
        payloads: &[DocumentPayload],
    ) -> Result<()> {
        check_alignment(ids, vectors, payloads)?;

        let mut collections = self.collections.write().await;
        let collection = collections.get_mut(name).ok_or_else(|| missing(name))?;
        check_dimensions(name, collection.spec.dimension, vectors)?;

        for ((id, vector), payload) in ids.iter().zip(vectors).zip(payloads) {
            let point = StoredPoint {
                id: *id,
                code: binary_code(vector),
                vector: vector.clone(),
                payload: payload.clone(),
            };
            match collection.positions.get(id) {
                Some(&pos) => collection.points[pos] = point,
                None => {
                    collection.positions.insert(*id, collection.points.len());
                    collection.points.push(point);
                }
            }
        }

        debug!("Upserted {} points to collection {}", ids.len(), name);
        Ok(())
    }

    async fn search(&self, name: &str, request: &SearchRequest) -> Result<Vec<SearchHit>> {
        let started = Instant::now();
        let deadline = started.checked_add(request.timeout);

        let collections = self.collections.read().await;
        let collection = collections.get(name).ok_or_else(|| missing(name))?;
        check_dimensions(name, collection.spec.dimension, std::slice::from_ref(&request.vector))?;

        if request.limit == 0 {
            return Ok(Vec::new());
        }

        let dimension = collection.spec.dimension as f32;
        let query_code = binary_code(&request.vector);
        let params = request.params;

        let mut scored: Vec<(f32, &StoredPoint)> = Vec::with_capacity(collection.points.len());
        for point in &collection.points {
            if deadline.is_some_and(|d| Instant::now() >= d) {
                return Err(Error::timeout("in-memory search", request.timeout));
            }
            let score = if params.ignore {
                dot(&request.vector, &point.vector)
            } else {
                dimension - 2.0 * hamming(&query_code, &point.code) as f32
            };
            scored.push((score, point));
        }

        let to_hit = |(score, point): (f32, &StoredPoint)| SearchHit {
            id: point.id,
            score,
            payload: point.payload.clone(),
        };

        let mut hits: Vec<SearchHit> = scored.into_iter().map(to_hit).collect();
        sort_hits(&mut hits);

        if !params.ignore {
            hits.truncate(params.candidate_pool(request.limit));
            if params.rescore {
                for hit in hits.iter_mut() {
                    let pos = collection.positions[&hit.id];
                    hit.score = dot(&request.vector, &collection.points[pos].vector);
                }
                sort_hits(&mut hits);
            }
        }

        hits.truncate(request.limit);
        Ok(hits)
    }

    async fn count(&self, name: &str) -> Result<u64> {
        let collections = self.collections.read().await;
        let collection = collections.get(name).ok_or_else(|| missing(name))?;
        Ok(collection.points.len() as u64)
    }

    async fn collection_info(&self, name: &str) -> Result<Option<CollectionInfo>> {
        let collections = self.collections.read().await;
        Ok(collections.get(name).map(|c| CollectionInfo {
            points_count: c.points.len() as u64,
            indexed_vectors_count: c.points.len() as u64,
            status: "Green".to_string(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::QuantizationSearch;
    use std::time::Duration;

    fn payload(title: &str) -> DocumentPayload {
        DocumentPayload {
            title: Some(title.to_string()),
            ..Default::default()
        }
    }

    fn request(vector: Vec<f32>, limit: usize, params: QuantizationSearch) -> SearchRequest {
        SearchRequest {
            vector,
            limit,
            params,
            timeout: Duration::from_secs(5),
        }
    }

    async fn seeded() -> InMemoryIndex {
        let index = InMemoryIndex::new();
        index
            .create_collection(&CollectionSpec::new("docs", 4))
            .await
            .unwrap();
        index
            .upload(
                "docs",
                &[1, 2, 3, 4],
                &[
                    vec![1.0, 0.0, 0.0, 0.0],
                    vec![0.0, 1.0, 0.0, 0.0],
                    vec![0.9, 0.8, -0.1, -0.2],
                    vec![-1.0, -1.0, 1.0, 1.0],
                ],
                &[payload("A"), payload("B"), payload("C"), payload("D")],
            )
            .await
            .unwrap();
        index
    }

    #[test]
    fn test_binary_code_and_hamming() {
        let a = binary_code(&[0.5, -0.5, 0.0, 2.0]);
        let b = binary_code(&[0.5, 0.5, -1.0, 2.0]);
        assert_eq!(a, vec![0b1001]);
        assert_eq!(hamming(&a, &b), 1);

        let long = binary_code(&vec![1.0; 130]);
        assert_eq!(long.len(), 3);
        assert_eq!(hamming(&long, &binary_code(&vec![-1.0; 130])), 130);
    }

    #[tokio::test]
    async fn test_create_collection_is_idempotent() {
        let index = InMemoryIndex::new();
        let spec = CollectionSpec::new("docs", 4);
        assert!(index.create_collection(&spec).await.unwrap());

        let mut other = CollectionSpec::new("docs", 8);
        other.always_ram = false;
        assert!(!index.create_collection(&other).await.unwrap());

        assert_eq!(index.collection_spec("docs").await, Some(spec));
    }

    #[tokio::test]
    async fn test_misaligned_upload_leaves_collection_unchanged() {
        let index = seeded().await;
        let before = index.count("docs").await.unwrap();

        let err = index
            .upload(
                "docs",
                &[10, 11, 12],
                &[vec![0.0; 4], vec![0.0; 4], vec![0.0; 4]],
                &[payload("x"), payload("y")],
            )
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Alignment { vectors: 3, payloads: 2, .. }));
        assert_eq!(index.count("docs").await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_wrong_dimension_is_rejected() {
        let index = seeded().await;
        let err = index
            .upload("docs", &[9], &[vec![1.0; 3]], &[payload("bad")])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::VectorIndex(_)));
        assert_eq!(index.count("docs").await.unwrap(), 4);
    }

    #[tokio::test]
    async fn test_reupload_overwrites_point() {
        let index = seeded().await;
        index
            .upload("docs", &[2], &[vec![0.0, 1.0, 0.0, 0.0]], &[payload("B2")])
            .await
            .unwrap();
        assert_eq!(index.count("docs").await.unwrap(), 4);

        let hits = index
            .search("docs", &request(vec![0.0, 1.0, 0.0, 0.0], 1, QuantizationSearch::exact()))
            .await
            .unwrap();
        assert_eq!(hits[0].payload.title.as_deref(), Some("B2"));
    }

    #[tokio::test]
    async fn test_quantized_search_ranks_exact_match_first() {
        let index = seeded().await;
        let hits = index
            .search(
                "docs",
                &request(vec![0.0, 1.0, 0.0, 0.0], 2, QuantizationSearch::default()),
            )
            .await
            .unwrap();

        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, 2);
        assert!(hits[0].score > 0.0);
        assert!(hits[0].score >= hits[1].score);
    }

    #[tokio::test]
    async fn test_rescore_uses_exact_scores() {
        let index = seeded().await;
        let params = QuantizationSearch {
            ignore: false,
            rescore: true,
            oversampling: Some(2.0),
        };
        let hits = index
            .search("docs", &request(vec![1.0, 0.9, 0.0, 0.0], 2, params))
            .await
            .unwrap();

        assert_eq!(hits[0].id, 3);
        assert!((hits[0].score - 1.62).abs() < 1e-5);
        assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));
    }

    #[tokio::test]
    async fn test_search_is_deterministic_and_bounded() {
        let index = seeded().await;
        let req = request(vec![0.3, 0.3, 0.3, 0.3], 3, QuantizationSearch::default());

        let first = index.search("docs", &req).await.unwrap();
        let second = index.search("docs", &req).await.unwrap();
        assert_eq!(first, second);
        assert!(first.len() <= 3);
        assert!(first.windows(2).all(|w| w[0].score >= w[1].score));
    }

    #[tokio::test]
    async fn test_zero_timeout_fails_instead_of_truncating() {
        let index = seeded().await;
        let mut req = request(vec![1.0, 0.0, 0.0, 0.0], 2, QuantizationSearch::default());
        req.timeout = Duration::ZERO;

        let err = index.search("docs", &req).await.unwrap_err();
        assert!(matches!(err, Error::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_search_unknown_collection() {
        let index = InMemoryIndex::new();
        let err = index
            .search("nope", &request(vec![0.0; 4], 1, QuantizationSearch::default()))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::VectorIndex(_)));
        assert!(index.collection_info("nope").await.unwrap().is_none());
    }
}
