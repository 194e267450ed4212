//! Configuration management for pubmed-rag
//!
//! Handles loading, saving, and validating configuration from TOML files.

mod defaults;

pub use defaults::*;

use crate::error::{Error, Result};
use crate::rag::{Mode, PromptTemplates};
use crate::store::{CollectionSpec, QuantizationSearch};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Qdrant connection URL
    #[serde(default = "default_qdrant_url")]
    pub qdrant_url: String,

    /// Environment variable name for Qdrant API key
    #[serde(default = "default_qdrant_api_key_env")]
    pub qdrant_api_key_env: String,

    /// Qdrant collection name
    #[serde(default = "default_collection_name")]
    pub collection_name: String,

    /// Persisted corpus inputs
    #[serde(default)]
    pub corpus: CorpusConfig,

    /// Quantized collection layout
    #[serde(default)]
    pub index: IndexConfig,

    /// Bulk ingestion settings
    #[serde(default)]
    pub ingest: IngestConfig,

    /// Embedding model configuration
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Query-time search configuration
    #[serde(default)]
    pub retrieval: RetrievalConfig,

    /// Language model server configuration
    #[serde(default)]
    pub llm: LlmConfig,

    /// Chat surface configuration
    #[serde(default)]
    pub chat: ChatConfig,

    /// Prompt templates (few-shot condense examples and answer template)
    #[serde(default)]
    pub prompts: PromptTemplates,

    /// Paths configuration (internal, not user-editable)
    #[serde(skip)]
    pub paths: PathsConfig,
}

/// Locations of the corpus stores
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorpusConfig {
    /// SQLite file with the `articles` table
    #[serde(default = "default_articles_db")]
    pub articles_db: PathBuf,

    /// SQLite file with the `doc_vectors` table (may equal `articles_db`)
    #[serde(default = "default_vectors_db")]
    pub vectors_db: PathBuf,
}

/// Collection layout used when the collection is first created
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Vector dimension
    #[serde(default = "default_dimension")]
    pub dimension: usize,

    /// Keep exact vectors on disk
    #[serde(default = "default_on_disk")]
    pub on_disk: bool,

    /// Keep quantized vectors resident in RAM
    #[serde(default = "default_always_ram")]
    pub always_ram: bool,

    /// Optimizer segment count
    #[serde(default = "default_segment_number")]
    pub segment_number: u64,

    /// Indexing threshold (0 defers index construction)
    #[serde(default = "default_indexing_threshold")]
    pub indexing_threshold: u64,

    /// Upload timeout in seconds
    #[serde(default = "default_upload_timeout")]
    pub upload_timeout_secs: u64,
}

/// Ingestion configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Rows per upload batch
    #[serde(default = "default_ingest_batch_size")]
    pub batch_size: usize,
}

/// Which embedding backend serves query embeddings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingBackendKind {
    /// In-process ONNX model via fastembed
    Local,
    /// Remote embedding sidecar
    Http,
}

impl Default for EmbeddingBackendKind {
    fn default() -> Self {
        if cfg!(feature = "local-embed") {
            EmbeddingBackendKind::Local
        } else {
            EmbeddingBackendKind::Http
        }
    }
}

/// Embedding configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    #[serde(default)]
    pub backend: EmbeddingBackendKind,

    /// Model name/identifier
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Embedding dimension (must match model and index)
    #[serde(default = "default_dimension")]
    pub dimension: usize,

    /// Prefix prepended to retrieval queries
    #[serde(default = "default_query_prefix")]
    pub query_prefix: String,

    /// Base URL of the HTTP embedding backend
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Batch size for embedding
    #[serde(default = "default_embedding_batch_size")]
    pub batch_size: usize,
}

/// Query-time search configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Number of hits fed into the context
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// Bypass quantization and score exact vectors
    #[serde(default)]
    pub ignore: bool,

    /// Re-rank quantized candidates with exact vectors
    #[serde(default)]
    pub rescore: bool,

    /// Candidate fetch factor applied before rescoring
    #[serde(default = "default_oversampling")]
    pub oversampling: f64,

    /// Search timeout in seconds
    #[serde(default = "default_search_timeout")]
    pub timeout_secs: u64,
}

/// Language model server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// llama.cpp server base URL
    #[serde(default = "default_llm_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default = "default_top_p")]
    pub top_p: f32,

    /// Stop sequences passed to every request
    #[serde(default)]
    pub stop: Vec<String>,

    /// Request timeout in seconds for blocking completions
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,
}

/// Chat surface configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatConfig {
    #[serde(default)]
    pub default_mode: Mode,

    /// Delay between answer fragments when rendering (milliseconds)
    #[serde(default = "default_answer_pacing_ms")]
    pub answer_pacing_ms: u64,

    /// Delay between context fragments in retrieval mode (milliseconds)
    #[serde(default = "default_context_pacing_ms")]
    pub context_pacing_ms: u64,
}

/// Internal paths configuration
#[derive(Debug, Clone, Default)]
pub struct PathsConfig {
    /// Base directory for pubmed-rag data
    pub base_dir: PathBuf,

    /// Path to config file
    pub config_file: PathBuf,

    /// Path to the ingestion ledger database
    pub state_db: PathBuf,
}

impl PathsConfig {
    /// Paths rooted at the directory holding `config_path`
    pub fn for_config_file(config_path: &Path) -> Self {
        let base = config_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        Self {
            config_file: config_path.to_path_buf(),
            state_db: base.join("state.db"),
            base_dir: base,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            qdrant_url: default_qdrant_url(),
            qdrant_api_key_env: default_qdrant_api_key_env(),
            collection_name: default_collection_name(),
            corpus: CorpusConfig::default(),
            index: IndexConfig::default(),
            ingest: IngestConfig::default(),
            embedding: EmbeddingConfig::default(),
            retrieval: RetrievalConfig::default(),
            llm: LlmConfig::default(),
            chat: ChatConfig::default(),
            prompts: PromptTemplates::default(),
            paths: PathsConfig::default(),
        }
    }
}

impl Default for CorpusConfig {
    fn default() -> Self {
        Self {
            articles_db: default_articles_db(),
            vectors_db: default_vectors_db(),
        }
    }
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            dimension: default_dimension(),
            on_disk: default_on_disk(),
            always_ram: default_always_ram(),
            segment_number: default_segment_number(),
            indexing_threshold: default_indexing_threshold(),
            upload_timeout_secs: default_upload_timeout(),
        }
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            batch_size: default_ingest_batch_size(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            backend: EmbeddingBackendKind::default(),
            model: default_embedding_model(),
            dimension: default_dimension(),
            query_prefix: default_query_prefix(),
            url: None,
            batch_size: default_embedding_batch_size(),
        }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            ignore: false,
            rescore: false,
            oversampling: default_oversampling(),
            timeout_secs: default_search_timeout(),
        }
    }
}

impl RetrievalConfig {
    /// Quantization controls sent with every search
    pub fn search_params(&self) -> QuantizationSearch {
        QuantizationSearch {
            ignore: self.ignore,
            rescore: self.rescore,
            oversampling: Some(self.oversampling),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            endpoint: default_llm_endpoint(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            top_p: default_top_p(),
            stop: Vec::new(),
            timeout_secs: default_llm_timeout(),
        }
    }
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            default_mode: Mode::default(),
            answer_pacing_ms: default_answer_pacing_ms(),
            context_pacing_ms: default_context_pacing_ms(),
        }
    }
}

impl ChatConfig {
    /// Rendering delay for a given mode
    pub fn pacing(&self, mode: Mode) -> Duration {
        match mode {
            Mode::Rag => Duration::from_millis(self.answer_pacing_ms),
            Mode::Retrieval => Duration::from_millis(self.context_pacing_ms),
        }
    }
}

impl Config {
    /// Get the default base directory for pubmed-rag (~/.pubmed-rag)
    pub fn default_base_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".pubmed-rag")
    }

    /// Get the default config file path
    pub fn default_config_path() -> PathBuf {
        Self::default_base_dir().join("config.toml")
    }

    /// Load configuration from a specific file path
    pub fn load(config_path: &Path) -> Result<Self> {
        debug!("Loading config from {:?}", config_path);

        if !config_path.exists() {
            return Err(Error::Config(format!(
                "Config file not found: {}",
                config_path.display()
            )));
        }

        let content = std::fs::read_to_string(config_path)?;
        let mut config: Config = toml::from_str(&content)?;

        config.paths = PathsConfig::for_config_file(config_path);

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.paths.config_file.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(&self.paths.config_file, content)?;
        info!("Saved config to {:?}", self.paths.config_file);
        Ok(())
    }

    /// Get the Qdrant API key from environment
    pub fn qdrant_api_key(&self) -> Option<String> {
        std::env::var(&self.qdrant_api_key_env).ok()
    }

    /// Collection layout derived from the index section
    pub fn collection_spec(&self) -> CollectionSpec {
        CollectionSpec {
            name: self.collection_name.clone(),
            dimension: self.index.dimension,
            on_disk: self.index.on_disk,
            always_ram: self.index.always_ram,
            segment_number: self.index.segment_number,
            indexing_threshold: self.index.indexing_threshold,
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.collection_name.trim().is_empty() {
            return Err(Error::Config("collection_name must not be empty".to_string()));
        }

        parse_endpoint("qdrant_url", &self.qdrant_url)?;
        parse_endpoint("llm.endpoint", &self.llm.endpoint)?;

        if self.index.dimension == 0 {
            return Err(Error::Config("index.dimension must be positive".to_string()));
        }

        if self.embedding.dimension != self.index.dimension {
            return Err(Error::Config(format!(
                "embedding.dimension ({}) must equal index.dimension ({})",
                self.embedding.dimension, self.index.dimension
            )));
        }

        if self.embedding.backend == EmbeddingBackendKind::Http {
            match &self.embedding.url {
                Some(url) => {
                    parse_endpoint("embedding.url", url)?;
                }
                None => {
                    return Err(Error::Config(
                        "embedding.url is required when embedding.backend = \"http\"".to_string(),
                    ))
                }
            }
        }

        if self.embedding.backend == EmbeddingBackendKind::Local && !cfg!(feature = "local-embed")
        {
            return Err(Error::Config(
                "embedding.backend = \"local\" requires the 'local-embed' feature".to_string(),
            ));
        }

        if self.ingest.batch_size == 0 {
            return Err(Error::Config("ingest.batch_size must be positive".to_string()));
        }

        if self.embedding.batch_size == 0 {
            return Err(Error::Config("embedding.batch_size must be positive".to_string()));
        }

        if self.retrieval.top_k == 0 {
            return Err(Error::Config("retrieval.top_k must be positive".to_string()));
        }

        if !self.retrieval.oversampling.is_finite() || self.retrieval.oversampling < 1.0 {
            return Err(Error::Config(
                "retrieval.oversampling must be >= 1.0".to_string(),
            ));
        }

        if self.llm.top_p <= 0.0 || self.llm.top_p > 1.0 {
            return Err(Error::Config(
                "llm.top_p must be in (0.0, 1.0]".to_string(),
            ));
        }

        if self.llm.temperature < 0.0 {
            return Err(Error::Config(
                "llm.temperature must not be negative".to_string(),
            ));
        }

        if self.llm.max_tokens == 0 {
            return Err(Error::Config("llm.max_tokens must be positive".to_string()));
        }

        self.prompts.validate()?;

        Ok(())
    }
}

fn parse_endpoint(field: &str, value: &str) -> Result<Url> {
    let url = Url::parse(value)
        .map_err(|e| Error::Config(format!("{} is not a valid URL ('{}'): {}", field, value, e)))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(Error::Config(format!(
            "{} must use http or https, got '{}'",
            field, other
        ))),
    }
}
