use super::{check_embedding_dimensions, with_query_prefix, Embedder};
use crate::config::EmbeddingConfig;
use crate::error::{Error, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;
use url::Url;

#[derive(Debug, Clone, Serialize)]
struct EmbedTextRequest<'a> {
    model: &'a str,
    inputs: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum EmbeddingResponse {
    Embeddings { embeddings: Vec<Vec<f32>> },
    Data { data: Vec<EmbeddingData> },
}

#[derive(Debug, Clone, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

impl EmbeddingResponse {
    fn into_embeddings(self) -> Vec<Vec<f32>> {
        match self {
            EmbeddingResponse::Embeddings { embeddings } => embeddings,
            EmbeddingResponse::Data { data } => data.into_iter().map(|d| d.embedding).collect(),
        }
    }
}

/// Embedding sidecar reached over HTTP
pub struct HttpEmbedder {
    client: Client,
    endpoint: Url,
    model: String,
    dimension: usize,
    query_prefix: String,
}

impl HttpEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let base = config.url.as_deref().ok_or_else(|| {
            Error::Config("embedding.url is required for the http backend".to_string())
        })?;
        let endpoint = Url::parse(base)?
            .join("/embed")
            .map_err(|e| Error::Config(format!("Invalid embedding backend URL: {}", e)))?;

        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;

        Ok(Self {
            client,
            endpoint,
            model: config.model.clone(),
            dimension: config.dimension,
            query_prefix: config.query_prefix.clone(),
        })
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let expected = texts.len();
        debug!("POST {} ({} inputs)", self.endpoint, expected);

        let response = self
            .client
            .post(self.endpoint.clone())
            .json(&EmbedTextRequest {
                model: &self.model,
                inputs: texts,
            })
            .send()
            .await?
            .error_for_status()
            .map_err(|e| Error::Embedding(e.to_string()))?;

        let embeddings = response.json::<EmbeddingResponse>().await?.into_embeddings();

        if embeddings.len() != expected {
            return Err(Error::Embedding(format!(
                "backend returned {} embeddings for {} inputs",
                embeddings.len(),
                expected
            )));
        }
        check_embedding_dimensions(&self.model, self.dimension, &embeddings)?;
        Ok(embeddings)
    }

    async fn embed_query(&self, query: &str) -> Result<Vec<f32>> {
        let text = with_query_prefix(&self.query_prefix, query);
        let mut embeddings = self.embed(vec![text]).await?;
        embeddings
            .pop()
            .ok_or_else(|| Error::Embedding("backend returned no embedding".to_string()))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
