//! Query-time retrieval: embed a query and search the quantized index

use crate::config::Config;
use crate::embed::Embedder;
use crate::error::Result;
use crate::store::{QuantizationSearch, SearchHit, SearchRequest, VectorIndex};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Embeds queries and searches one collection
#[derive(Clone)]
pub struct Retriever {
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
    collection: String,
    params: QuantizationSearch,
    timeout: Duration,
}

impl Retriever {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn VectorIndex>,
        collection: impl Into<String>,
    ) -> Self {
        Self {
            embedder,
            index,
            collection: collection.into(),
            params: QuantizationSearch::default(),
            timeout: Duration::from_secs(crate::config::default_search_timeout()),
        }
    }

    /// Retriever with the collection, quantization controls and timeout from config
    pub fn from_config(
        config: &Config,
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn VectorIndex>,
    ) -> Self {
        Self::new(embedder, index, &config.collection_name)
            .with_params(config.retrieval.search_params())
            .with_timeout(config.retrieval.timeout())
    }

    pub fn with_params(mut self, params: QuantizationSearch) -> Self {
        self.params = params;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Top `top_k` hits for `query`, best first
    pub async fn search(&self, query: &str, top_k: usize) -> Result<Vec<SearchHit>> {
        let started = Instant::now();

        let vector = self.embedder.embed_query(query).await?;
        debug!(
            "Embedded query with {} ({} dims) in {:?}",
            self.embedder.model_name(),
            vector.len(),
            started.elapsed()
        );

        let request = SearchRequest {
            vector,
            limit: top_k,
            params: self.params,
            timeout: self.timeout,
        };
        let hits = self.index.search(&self.collection, &request).await?;

        info!(
            "Retrieved {} hits from {} in {:.3}s",
            hits.len(),
            self.collection,
            started.elapsed().as_secs_f64()
        );
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embed::MockEmbedder;
    use crate::error::Error;
    use crate::store::{CollectionSpec, DocumentPayload, InMemoryIndex};

    async fn two_documents() -> Arc<InMemoryIndex> {
        let index = Arc::new(InMemoryIndex::new());
        index
            .create_collection(&CollectionSpec::new("abstracts", 4))
            .await
            .unwrap();
        index
            .upload(
                "abstracts",
                &[1, 2],
                &[vec![1.0, 0.0, 0.0, 0.0], vec![0.0, 1.0, 0.0, 0.0]],
                &[
                    DocumentPayload {
                        pmid: Some(1),
                        title: Some("A".to_string()),
                        ..Default::default()
                    },
                    DocumentPayload {
                        pmid: Some(2),
                        title: Some("B".to_string()),
                        ..Default::default()
                    },
                ],
            )
            .await
            .unwrap();
        index
    }

    #[tokio::test]
    async fn test_search_returns_nearest_document() {
        let index = two_documents().await;
        let embedder = Arc::new(MockEmbedder::new(4).with_vector("q", vec![0.0, 1.0, 0.0, 0.0]));
        let retriever = Retriever::new(embedder, index, "abstracts");

        let hits = retriever.search("q", 1).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, 2);
        assert!(hits[0].score > 0.0);
        assert_eq!(hits[0].payload.title.as_deref(), Some("B"));
    }

    #[tokio::test]
    async fn test_top_k_bounds_hits() {
        let index = two_documents().await;
        let embedder = Arc::new(MockEmbedder::new(4));
        let retriever = Retriever::new(embedder, index, "abstracts");

        assert_eq!(retriever.search("anything", 5).await.unwrap().len(), 2);
        assert!(retriever.search("anything", 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_timeout_propagates() {
        let index = two_documents().await;
        let embedder = Arc::new(MockEmbedder::new(4));
        let retriever =
            Retriever::new(embedder, index, "abstracts").with_timeout(Duration::ZERO);

        let err = retriever.search("q", 2).await.unwrap_err();
        assert!(matches!(err, Error::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_from_config_uses_retrieval_settings() {
        let mut config = Config::default();
        config.collection_name = "abstracts".to_string();
        config.retrieval.rescore = true;

        let retriever = Retriever::from_config(
            &config,
            Arc::new(MockEmbedder::new(4)),
            two_documents().await,
        );
        assert_eq!(retriever.collection(), "abstracts");
        assert!(retriever.params.rescore);
        assert_eq!(retriever.timeout, Duration::from_secs(500));
    }
}
