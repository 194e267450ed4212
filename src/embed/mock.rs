//! Deterministic embedder for tests and offline runs

use super::Embedder;
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::Mutex;

/// Produces vectors from text hashes, or from a fixed table when a text was
/// registered with [`MockEmbedder::with_vector`]. Every call is recorded.
#[derive(Debug, Default)]
pub struct MockEmbedder {
    dimension: usize,
    fixed: HashMap<String, Vec<f32>>,
    calls: Mutex<Vec<Vec<String>>>,
}

impl MockEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            ..Default::default()
        }
    }

    /// Pin the embedding returned for `text`
    pub fn with_vector(mut self, text: impl Into<String>, vector: Vec<f32>) -> Self {
        self.fixed.insert(text.into(), vector);
        self
    }

    /// Inputs of every `embed` call so far
    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls
            .lock()
            .map(|calls| calls.clone())
            .unwrap_or_default()
    }

    fn hashed(&self, text: &str) -> Vec<f32> {
        let mut embedding: Vec<f32> = (0..self.dimension)
            .map(|i| {
                let mut hasher = DefaultHasher::new();
                text.hash(&mut hasher);
                i.hash(&mut hasher);
                let byte = (hasher.finish() & 0xff) as f32;
                byte / 127.5 - 1.0
            })
            .collect();

        let norm = embedding.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut embedding {
                *v /= norm;
            }
        }
        embedding
    }
}

#[async_trait]
impl Embedder for MockEmbedder {
    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(texts.clone());
        }

        texts
            .iter()
            .map(|text| match self.fixed.get(text) {
                Some(v) if v.len() != self.dimension => Err(Error::Embedding(format!(
                    "fixed vector for '{}' has dimension {}, expected {}",
                    text,
                    v.len(),
                    self.dimension
                ))),
                Some(v) => Ok(v.clone()),
                None => Ok(self.hashed(text)),
            })
            .collect()
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_deterministic_and_normalized() {
        let embedder = MockEmbedder::new(64);
        let a = embedder.embed_query("hello").await.unwrap();
        let b = embedder.embed_query("hello").await.unwrap();
        let c = embedder.embed_query("world").await.unwrap();

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);

        let norm = a.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-3);
        assert!(a.iter().any(|v| *v < 0.0));
    }

    #[tokio::test]
    async fn test_fixed_vectors_and_call_log() {
        let embedder = MockEmbedder::new(2).with_vector("q", vec![0.0, 1.0]);
        assert_eq!(embedder.embed_query("q").await.unwrap(), vec![0.0, 1.0]);
        assert_eq!(embedder.calls(), vec![vec!["q".to_string()]]);
    }

    #[tokio::test]
    async fn test_fixed_vector_dimension_checked() {
        let embedder = MockEmbedder::new(3).with_vector("q", vec![0.0, 1.0]);
        assert!(embedder.embed_query("q").await.is_err());
    }
}
