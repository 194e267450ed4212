//! Embedding generation
//!
//! This module provides an abstraction over embedding models with:
//! - A trait for different embedding backends
//! - Local embedding via FastEmbed (feature `local-embed`)
//! - HTTP embedding backend
//! - A deterministic backend for tests and offline runs

#[cfg(feature = "local-embed")]
mod fastembed_impl;
mod http_backend;
mod mock;

#[cfg(feature = "local-embed")]
pub use fastembed_impl::*;
pub use http_backend::*;
pub use mock::*;

use crate::config::{EmbeddingBackendKind, EmbeddingConfig};
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::sync::Arc;

/// Trait for embedding providers
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a batch of texts
    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>>;

    /// Embed a single retrieval query.
    ///
    /// Asymmetric models (nomic-embed, e5) expect a task prefix on queries;
    /// backends that know their prefix apply it here.
    async fn embed_query(&self, query: &str) -> Result<Vec<f32>> {
        let mut embeddings = self.embed(vec![query.to_string()]).await?;
        embeddings
            .pop()
            .ok_or_else(|| Error::Embedding("backend returned no embedding for query".to_string()))
    }

    /// Get the embedding dimension
    fn dimension(&self) -> usize;

    /// Get the model name
    fn model_name(&self) -> &str;
}

/// Create an embedder based on configuration
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>> {
    match config.backend {
        #[cfg(feature = "local-embed")]
        EmbeddingBackendKind::Local => Ok(Arc::new(FastEmbedder::new(config)?)),
        #[cfg(not(feature = "local-embed"))]
        EmbeddingBackendKind::Local => Err(Error::Config(
            "embedding.backend = \"local\" requires the 'local-embed' feature".to_string(),
        )),
        EmbeddingBackendKind::Http => Ok(Arc::new(HttpEmbedder::new(config)?)),
    }
}

/// Apply a query prefix unless the caller already did
pub fn with_query_prefix(prefix: &str, query: &str) -> String {
    if prefix.is_empty() || query.starts_with(prefix) {
        query.to_string()
    } else {
        format!("{}{}", prefix, query)
    }
}

/// Reject embeddings whose length differs from the expected dimension
pub fn check_embedding_dimensions(model: &str, expected: usize, embeddings: &[Vec<f32>]) -> Result<()> {
    if let Some(mismatch) = embeddings.iter().find(|v| v.len() != expected) {
        return Err(Error::Embedding(format!(
            "Embedding dimension mismatch for model '{}': expected {}, got {}",
            model,
            expected,
            mismatch.len()
        )));
    }
    Ok(())
}
