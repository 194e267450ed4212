//! FastEmbed implementation for local embeddings

use super::{check_embedding_dimensions, with_query_prefix, Embedder};
use crate::config::EmbeddingConfig;
use crate::error::{Error, Result};
use async_trait::async_trait;
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Map a configured model name to a FastEmbed model
pub fn fastembed_model(name: &str) -> Option<EmbeddingModel> {
    match name {
        "nomic-ai/nomic-embed-text-v1.5" => Some(EmbeddingModel::NomicEmbedTextV15),
        "nomic-ai/nomic-embed-text-v1" => Some(EmbeddingModel::NomicEmbedTextV1),
        "BAAI/bge-small-en-v1.5" => Some(EmbeddingModel::BGESmallENV15),
        "BAAI/bge-base-en-v1.5" => Some(EmbeddingModel::BGEBaseENV15),
        "BAAI/bge-large-en-v1.5" => Some(EmbeddingModel::BGELargeENV15),
        "sentence-transformers/all-MiniLM-L6-v2" => Some(EmbeddingModel::AllMiniLML6V2),
        _ => None,
    }
}

/// FastEmbed-based embedder
pub struct FastEmbedder {
    model: Arc<Mutex<TextEmbedding>>,
    model_name: String,
    dimension: usize,
    query_prefix: String,
    batch_size: usize,
}

impl FastEmbedder {
    /// Create a new FastEmbed embedder
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        info!("Initializing FastEmbed with model: {}", config.model);

        let model_enum = fastembed_model(&config.model).ok_or_else(|| {
            Error::Config(format!(
                "Model '{}' is not available locally; use embedding.backend = \"http\"",
                config.model
            ))
        })?;

        let options = InitOptions::new(model_enum).with_show_download_progress(true);

        let model = TextEmbedding::try_new(options)
            .map_err(|e| Error::Embedding(format!("Failed to initialize model: {}", e)))?;

        info!("FastEmbed model loaded successfully");

        Ok(Self {
            model: Arc::new(Mutex::new(model)),
            model_name: config.model.clone(),
            dimension: config.dimension,
            query_prefix: config.query_prefix.clone(),
            batch_size: config.batch_size,
        })
    }
}

#[async_trait]
impl Embedder for FastEmbedder {
    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        debug!("Embedding {} texts", texts.len());

        // FastEmbed is synchronous, so we wrap in blocking task
        let model = self.model.clone();
        let batch_size = self.batch_size;
        let embeddings = tokio::task::spawn_blocking(move || {
            let model = model.blocking_lock();
            model.embed(texts, Some(batch_size))
        })
        .await
        .map_err(|e| Error::Embedding(format!("Task join error: {}", e)))?
        .map_err(|e| Error::Embedding(format!("Embedding failed: {}", e)))?;

        check_embedding_dimensions(&self.model_name, self.dimension, &embeddings)?;
        Ok(embeddings)
    }

    async fn embed_query(&self, query: &str) -> Result<Vec<f32>> {
        let text = with_query_prefix(&self.query_prefix, query);
        let mut embeddings = self.embed(vec![text]).await?;
        embeddings
            .pop()
            .ok_or_else(|| Error::Embedding("FastEmbed returned no embedding".to_string()))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }
}
