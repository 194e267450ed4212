//! pubmed-rag: retrieval-augmented question answering over PubMed abstracts
//!
//! Offline, precomputed abstract embeddings are bulk-loaded into a
//! binary-quantized Qdrant collection. Online, a question is condensed into a
//! search query, retrieved against the index, rendered into a grounding
//! context and answered by a streaming language model.

pub mod commands;
pub mod config;
pub mod corpus;
pub mod embed;
pub mod error;
pub mod llm;
pub mod meta;
pub mod progress;
pub mod rag;
pub mod retrieve;
pub mod session;
pub mod store;

pub use error::{Error, Result};
