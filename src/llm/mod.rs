//! Text generation
//!
//! [`TextGenerator`] is the seam between the RAG engine and a language model.
//! Implementations:
//! - llama.cpp server over HTTP with SSE streaming (`LlamaServerGenerator`)
//! - canned outputs for tests (`ScriptedGenerator`)

mod llama_server;
mod mock;

pub use llama_server::*;
pub use mock::*;

use crate::config::LlmConfig;
use crate::error::Result;
use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;
use std::sync::Arc;

/// Lazy, finite stream of text fragments. Dropping it cancels generation.
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// A language model that completes prompts
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Generate the whole completion for `prompt`
    async fn complete(&self, prompt: &str) -> Result<String>;

    /// Generate the completion for `prompt` fragment by fragment
    async fn stream(&self, prompt: &str) -> Result<FragmentStream>;
}

/// Create the configured generator
pub fn create_generator(config: &LlmConfig) -> Result<Arc<dyn TextGenerator>> {
    Ok(Arc::new(LlamaServerGenerator::new(config)?))
}
