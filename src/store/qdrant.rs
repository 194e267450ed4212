//! Qdrant backend
//!
//! Collections are created with dot-product distance, exact vectors on disk,
//! 1-bit binary quantization held in RAM and deferred indexing. Searches pass
//! the quantization controls through to Qdrant.

use super::{
    check_alignment, check_dimensions, sort_hits, CollectionInfo, CollectionSpec, DocumentPayload,
    QuantizationSearch, SearchHit, SearchRequest, VectorIndex,
};
use crate::config::Config;
use crate::error::{Error, Result};
use async_trait::async_trait;
use qdrant_client::qdrant::point_id::PointIdOptions;
use qdrant_client::qdrant::{
    vectors_config, BinaryQuantizationBuilder, CreateCollectionBuilder, Distance,
    GetCollectionInfoResponse, OptimizersConfigDiffBuilder, PointId, PointStruct,
    QuantizationSearchParamsBuilder, SearchParamsBuilder, SearchPointsBuilder,
    UpsertPointsBuilder, VectorParamsBuilder,
};
use qdrant_client::Qdrant;
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Qdrant index handle
pub struct QdrantIndex {
    client: Qdrant,
    upload_timeout: Duration,
    /// Vector size per collection, learned on create or first upload
    dimensions: RwLock<HashMap<String, usize>>,
}

impl QdrantIndex {
    /// Connect to Qdrant using config
    pub fn connect(config: &Config) -> Result<Self> {
        let request_timeout = Duration::from_secs(
            config
                .index
                .upload_timeout_secs
                .max(config.retrieval.timeout_secs)
                .max(1),
        );
        Self::new(
            &config.qdrant_url,
            config.qdrant_api_key(),
            request_timeout,
            Duration::from_secs(config.index.upload_timeout_secs),
        )
    }

    /// Create a client for the given URL. The gRPC channel is opened lazily.
    pub fn new(
        url: &str,
        api_key: Option<String>,
        request_timeout: Duration,
        upload_timeout: Duration,
    ) -> Result<Self> {
        debug!("Connecting to Qdrant at {}", url);

        let mut builder = Qdrant::from_url(url)
            .timeout(request_timeout)
            .skip_compatibility_check();
        if let Some(key) = api_key {
            builder = builder.api_key(key);
        }

        let client = builder
            .build()
            .map_err(|e| Error::VectorIndex(e.to_string()))?;

        Ok(Self {
            client,
            upload_timeout,
            dimensions: RwLock::new(HashMap::new()),
        })
    }

    async fn collection_vector_sizes(&self, name: &str) -> Result<Option<Vec<(String, u64)>>> {
        let info = self.client.collection_info(name).await?;
        Ok(extract_vector_sizes(&info))
    }

    /// Dimension of a single-vector collection
    async fn collection_dimension(&self, name: &str) -> Result<usize> {
        let sizes = self.collection_vector_sizes(name).await?.ok_or_else(|| {
            Error::VectorIndex(format!("Collection '{}' reports no vector config", name))
        })?;

        if sizes.len() > 1 {
            return Err(Error::VectorIndex(format!(
                "Collection '{}' uses named vectors ({}) which are not supported",
                name,
                describe_vector_sizes(&sizes)
            )));
        }

        Ok(sizes[0].1 as usize)
    }

    async fn cached_dimension(&self, name: &str) -> Result<usize> {
        if let Some(dimension) = self.dimensions.read().await.get(name) {
            return Ok(*dimension);
        }
        let dimension = self.collection_dimension(name).await?;
        self.remember_dimension(name, dimension).await;
        Ok(dimension)
    }

    async fn remember_dimension(&self, name: &str, dimension: usize) {
        self.dimensions
            .write()
            .await
            .insert(name.to_string(), dimension);
    }
}

#[async_trait]
impl VectorIndex for QdrantIndex {
    fn backend(&self) -> &'static str {
        "qdrant"
    }

    async fn collection_exists(&self, name: &str) -> Result<bool> {
        let exists = self.client.collection_exists(name).await?;
        Ok(exists)
    }

    async fn create_collection(&self, spec: &CollectionSpec) -> Result<bool> {
        if self.client.collection_exists(&spec.name).await? {
            debug!("Collection {} already exists", spec.name);

            let size = self.collection_dimension(&spec.name).await?;
            if size != spec.dimension {
                return Err(Error::VectorIndex(format!(
                    "Collection '{}' has vector size {}, but {} is configured. Remediation: set a new collection name or re-ingest with the expected dimension.",
                    spec.name, size, spec.dimension
                )));
            }

            self.remember_dimension(&spec.name, size).await;
            return Ok(false);
        }

        info!(
            "Creating collection {} with dimension {} (binary quantization, always_ram={})",
            spec.name, spec.dimension, spec.always_ram
        );

        let vectors_config = VectorParamsBuilder::new(spec.dimension as u64, Distance::Dot)
            .on_disk(spec.on_disk);
        let optimizers_config = OptimizersConfigDiffBuilder::default()
            .default_segment_number(spec.segment_number)
            .indexing_threshold(spec.indexing_threshold);

        self.client
            .create_collection(
                CreateCollectionBuilder::new(&spec.name)
                    .vectors_config(vectors_config)
                    .optimizers_config(optimizers_config)
                    .quantization_config(BinaryQuantizationBuilder::new(spec.always_ram)),
            )
            .await?;

        self.remember_dimension(&spec.name, spec.dimension).await;
        info!("Collection {} created successfully", spec.name);
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
        if ids.is_empty() {
            return Ok(());
        }

        // The deadline covers the dimension lookup as well as the upsert
        let write = async {
            let dimension = self.cached_dimension(name).await?;
            check_dimensions(name, dimension, vectors)?;

            debug!("Upserting {} points to collection {}", ids.len(), name);

            let points: Vec<PointStruct> = ids
                .iter()
                .zip(vectors)
                .zip(payloads)
                .map(|((id, vector), payload)| {
                    PointStruct::new(*id, vector.clone(), payload.to_qdrant_payload())
                })
                .collect();

            self.client
                .upsert_points(UpsertPointsBuilder::new(name, points).wait(true))
                .await?;
            Ok::<(), Error>(())
        };

        tokio::time::timeout(self.upload_timeout, write)
            .await
            .map_err(|_| Error::timeout("qdrant upload", self.upload_timeout))?
    }

    async fn search(&self, name: &str, request: &SearchRequest) -> Result<Vec<SearchHit>> {
        if request.limit == 0 {
            return Ok(Vec::new());
        }

        debug!(
            "Searching collection {} with limit {} ({:?})",
            name, request.limit, request.params
        );

        let builder = SearchPointsBuilder::new(name, request.vector.clone(), request.limit as u64)
            .with_payload(true)
            .params(SearchParamsBuilder::default().quantization(quantization_params(&request.params)))
            .timeout(request.timeout.as_secs_f64().ceil().max(1.0) as u64);

        let response = bounded("search", request.timeout, self.client.search_points(builder))
            .await??;

        let mut hits: Vec<SearchHit> = response
            .result
            .into_iter()
            .map(|p| {
                let payload = DocumentPayload::from_qdrant_payload(p.payload);
                SearchHit {
                    id: point_id_to_u64(p.id.as_ref(), &payload),
                    score: p.score,
                    payload,
                }
            })
            .collect();
        sort_hits(&mut hits);

        Ok(hits)
    }

    async fn count(&self, name: &str) -> Result<u64> {
        Ok(self
            .collection_info(name)
            .await?
            .map(|info| info.points_count)
            .unwrap_or(0))
    }

    async fn collection_info(&self, name: &str) -> Result<Option<CollectionInfo>> {
        if !self.client.collection_exists(name).await? {
            return Ok(None);
        }

        let info = self.client.collection_info(name).await?;
        Ok(info.result.map(|result| CollectionInfo {
            points_count: result.points_count.unwrap_or(0),
            indexed_vectors_count: result.indexed_vectors_count.unwrap_or(0),
            status: format!("{:?}", result.status()),
        }))
    }
}

/// Run a request under a client-side deadline
async fn bounded<T>(
    operation: &str,
    timeout: Duration,
    fut: impl Future<Output = std::result::Result<T, qdrant_client::QdrantError>>,
) -> Result<Result<T>> {
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => Ok(result.map_err(Error::from)),
        Err(_) => Err(Error::timeout(format!("qdrant {}", operation), timeout)),
    }
}

fn quantization_params(params: &QuantizationSearch) -> QuantizationSearchParamsBuilder {
    let mut builder = QuantizationSearchParamsBuilder::default()
        .ignore(params.ignore)
        .rescore(params.rescore);
    if let Some(factor) = params.oversampling {
        builder = builder.oversampling(factor);
    }
    builder
}

/// Numeric point id, falling back to the payload's PubMed id for UUID points
fn point_id_to_u64(id: Option<&PointId>, payload: &DocumentPayload) -> u64 {
    match id.and_then(|id| id.point_id_options.as_ref()) {
        Some(PointIdOptions::Num(num)) => *num,
        _ => payload
            .pmid
            .and_then(|pmid| u64::try_from(pmid).ok())
            .unwrap_or(0),
    }
}

fn describe_vector_sizes(sizes: &[(String, u64)]) -> String {
    sizes
        .iter()
        .map(|(name, size)| format!("{}:{}", name, size))
        .collect::<Vec<_>>()
        .join(", ")
}

fn extract_vector_sizes(info: &GetCollectionInfoResponse) -> Option<Vec<(String, u64)>> {
    let result = info.result.as_ref()?;
    let config = result.config.as_ref()?;
    let params = config.params.as_ref()?;
    let vectors_config = params.vectors_config.as_ref()?;
    let config = vectors_config.config.as_ref()?;

    match config {
        vectors_config::Config::Params(params) => Some(vec![("default".to_string(), params.size)]),
        vectors_config::Config::ParamsMap(map) => {
            let sizes: Vec<(String, u64)> = map
                .map
                .iter()
                .map(|(name, params)| (name.clone(), params.size))
                .collect();
            if sizes.is_empty() {
                None
            } else {
                Some(sizes)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local_index() -> QdrantIndex {
        QdrantIndex::new(
            "http://127.0.0.1:6334",
            None,
            Duration::from_secs(5),
            Duration::from_secs(5),
        )
        .expect("client should initialize")
    }

    #[test]
    fn test_point_id_fallback_to_pmid() {
        let payload = DocumentPayload {
            pmid: Some(31),
            ..Default::default()
        };
        let num = PointId {
            point_id_options: Some(PointIdOptions::Num(5)),
        };
        let uuid = PointId {
            point_id_options: Some(PointIdOptions::Uuid(
                "6f1c2c1e-7d3b-4a35-9a57-1c2f3e4d5a6b".to_string(),
            )),
        };

        assert_eq!(point_id_to_u64(Some(&num), &payload), 5);
        assert_eq!(point_id_to_u64(Some(&uuid), &payload), 31);
        assert_eq!(point_id_to_u64(None, &DocumentPayload::default()), 0);
    }

    #[tokio::test]
    async fn test_upload_rejects_misaligned_batch_before_network() {
        let index = local_index();

        let err = index
            .upload(
                "test_collection",
                &[1, 2, 3],
                &[vec![0.1; 4], vec![0.2; 4], vec![0.3; 4]],
                &[DocumentPayload::default(), DocumentPayload::default()],
            )
            .await
            .expect_err("should reject misaligned batch");

        assert!(matches!(err, Error::Alignment { payloads: 2, .. }));
    }

    #[tokio::test]
    async fn test_zero_limit_search_is_empty() {
        let index = local_index();
        let request = SearchRequest {
            vector: vec![0.0; 4],
            limit: 0,
            params: QuantizationSearch::default(),
            timeout: Duration::from_secs(1),
        };
        assert!(index.search("anything", &request).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_upload_deadline_covers_dimension_lookup() {
        // Accepts connections and never answers
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let _server = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let index = QdrantIndex::new(
            &format!("http://{}", addr),
            None,
            Duration::from_secs(30),
            Duration::from_millis(200),
        )
        .unwrap();

        let started = std::time::Instant::now();
        let err = index
            .upload("abstracts", &[1], &[vec![1.0, 0.0]], &[DocumentPayload::default()])
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Timeout { .. }), "got {err:?}");
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    // Requires a Qdrant server on localhost:6334
    #[tokio::test]
    #[ignore]
    async fn test_live_create_is_idempotent() {
        let index = local_index();
        let spec = CollectionSpec::new("pubmed_rag_live_test", 4);

        index.create_collection(&spec).await.unwrap();
        assert!(!index.create_collection(&spec).await.unwrap());

        index
            .upload(
                &spec.name,
                &[1, 2],
                &[vec![1.0, 0.0, 0.0, 0.0], vec![0.0, 1.0, 0.0, 0.0]],
                &[DocumentPayload::default(), DocumentPayload::default()],
            )
            .await
            .unwrap();

        let hits = index
            .search(
                &spec.name,
                &SearchRequest {
                    vector: vec![0.0, 1.0, 0.0, 0.0],
                    limit: 1,
                    params: QuantizationSearch::default(),
                    timeout: Duration::from_secs(10),
                },
            )
            .await
            .unwrap();
        assert_eq!(hits[0].id, 2);
    }
}
