//! Default values for configuration

use std::path::PathBuf;

/// Default Qdrant URL (gRPC port) for local development
pub fn default_qdrant_url() -> String {
    std::env::var("QDRANT_URL").unwrap_or_else(|_| "http://127.0.0.1:6334".to_string())
}

/// Default environment variable name for Qdrant API key
pub fn default_qdrant_api_key_env() -> String {
    "QDRANT_API_KEY".to_string()
}

/// Default collection name
pub fn default_collection_name() -> String {
    "binary-quantization-collection".to_string()
}

/// Default relational store holding article metadata
pub fn default_articles_db() -> PathBuf {
    PathBuf::from("./data/pubmed_abstracts_2024.db")
}

/// Default array store holding precomputed abstract embeddings
pub fn default_vectors_db() -> PathBuf {
    PathBuf::from("./data/pubmed_embeddings.db")
}

/// Default vector dimension (nomic-embed-text-v1.5)
pub fn default_dimension() -> usize {
    768
}

/// Default number of segments for the collection optimizer
pub fn default_segment_number() -> u64 {
    8
}

/// Default indexing threshold: zero defers HNSW construction
pub fn default_indexing_threshold() -> u64 {
    0
}

/// Default: keep exact vectors on disk
pub fn default_on_disk() -> bool {
    true
}

/// Default: keep the 1-bit quantized vectors resident in RAM
pub fn default_always_ram() -> bool {
    true
}

/// Default upload timeout in seconds
pub fn default_upload_timeout() -> u64 {
    1000
}

/// Default ingestion batch size
pub fn default_ingest_batch_size() -> usize {
    1000
}

/// Default embedding model
pub fn default_embedding_model() -> String {
    "nomic-ai/nomic-embed-text-v1.5".to_string()
}

/// Default prefix nomic-embed expects on retrieval queries
pub fn default_query_prefix() -> String {
    "search_query: ".to_string()
}

/// Default batch size for embedding
pub fn default_embedding_batch_size() -> usize {
    32
}

/// Default number of retrieved abstracts
pub fn default_top_k() -> usize {
    20
}

/// Default quantization oversampling factor
pub fn default_oversampling() -> f64 {
    1.5
}

/// Default search timeout in seconds
pub fn default_search_timeout() -> u64 {
    500
}

/// Default llama.cpp server endpoint
pub fn default_llm_endpoint() -> String {
    std::env::var("LLM_ENDPOINT").unwrap_or_else(|_| "http://127.0.0.1:8080".to_string())
}

/// Default sampling temperature
pub fn default_temperature() -> f32 {
    0.75
}

/// Default maximum generated tokens
pub fn default_max_tokens() -> u32 {
    2000
}

/// Default nucleus sampling threshold
pub fn default_top_p() -> f32 {
    1.0
}

/// Default generation request timeout in seconds
pub fn default_llm_timeout() -> u64 {
    300
}

/// Default per-fragment delay when rendering streamed answers (milliseconds)
pub fn default_answer_pacing_ms() -> u64 {
    20
}

/// Default per-fragment delay when rendering retrieved context (milliseconds)
pub fn default_context_pacing_ms() -> u64 {
    1
}
