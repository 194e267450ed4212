//! Retrieval-augmented answering
//!
//! A request runs strictly in order: condense the question into a search
//! query, retrieve with the condensed query, assemble the hits into a
//! context, then stream an answer to the *original* question. Retrieval mode
//! skips the model and streams the assembled context itself.

pub mod context;
pub mod prompts;

pub use context::{assemble, NO_CONTEXT};
pub use prompts::{normalize_search_query, FewShotExample, PromptTemplates};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::llm::{FragmentStream, TextGenerator};
use crate::retrieve::Retriever;
use crate::session::ChatSession;
use crate::store::SearchHit;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// What a chat turn produces
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Grounded answer from the language model
    #[default]
    Rag,
    /// The retrieved context itself, no generation
    Retrieval,
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Mode::Rag => write!(f, "rag"),
            Mode::Retrieval => write!(f, "retrieval"),
        }
    }
}

impl FromStr for Mode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "rag" => Ok(Mode::Rag),
            "retrieval" => Ok(Mode::Retrieval),
            _ => Err(Error::Config(format!(
                "Unknown mode '{}' (expected rag or retrieval)",
                s
            ))),
        }
    }
}

/// Orchestrates condense, retrieve, assemble and generate
pub struct RagEngine {
    retriever: Retriever,
    generator: Arc<dyn TextGenerator>,
    prompts: PromptTemplates,
    top_k: usize,
}

impl RagEngine {
    pub fn new(
        retriever: Retriever,
        generator: Arc<dyn TextGenerator>,
        prompts: PromptTemplates,
        top_k: usize,
    ) -> Self {
        Self {
            retriever,
            generator,
            prompts,
            top_k,
        }
    }

    pub fn from_config(
        config: &Config,
        retriever: Retriever,
        generator: Arc<dyn TextGenerator>,
    ) -> Self {
        Self::new(
            retriever,
            generator,
            config.prompts.clone(),
            config.retrieval.top_k,
        )
    }

    /// Ask the model for a short search query for `question`
    pub async fn condense(&self, question: &str) -> Result<String> {
        let prompt = self.prompts.condense_prompt(question);
        let raw = self.generator.complete(&prompt).await?;

        let query = normalize_search_query(&raw).ok_or_else(|| {
            Error::Generation("condense step returned no usable search query".to_string())
        })?;
        info!("Condensed question into search query: {}", query);
        Ok(query)
    }

    pub async fn retrieve(&self, query: &str) -> Result<Vec<SearchHit>> {
        self.retriever.search(query, self.top_k).await
    }

    /// Stream a grounded answer to `question`
    pub async fn answer(&self, question: &str) -> Result<FragmentStream> {
        let query = self.condense(question).await?;
        let hits = self.retrieve(&query).await?;
        let context = assemble(&hits);

        let prompt = self.prompts.answer_prompt(&context, question);
        debug!(
            "Answer prompt built from {} hits ({} bytes)",
            hits.len(),
            prompt.len()
        );
        self.generator.stream(&prompt).await
    }

    /// Stream the context retrieved for `question`, without generation
    pub async fn inspect(&self, question: &str) -> Result<FragmentStream> {
        let hits = self.retrieve(question).await?;
        let fragments = context::word_fragments(&assemble(&hits));
        Ok(Box::pin(futures::stream::iter(fragments.into_iter().map(Ok))))
    }

    /// Dispatch on the session's mode
    pub async fn respond(&self, session: &ChatSession, question: &str) -> Result<FragmentStream> {
        match session.mode() {
            Mode::Rag => self.answer(question).await,
            Mode::Retrieval => self.inspect(question).await,
        }
    }
}

/// Delay every fragment by `delay` before it is yielded. Zero is a no-op.
pub fn pace(stream: FragmentStream, delay: Duration) -> FragmentStream {
    if delay.is_zero() {
        return stream;
    }
    Box::pin(stream.then(move |item| async move {
        tokio::time::sleep(delay).await;
        item
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embed::MockEmbedder;
    use crate::llm::ScriptedGenerator;
    use crate::store::{CollectionSpec, DocumentPayload, InMemoryIndex, VectorIndex};
    use futures::TryStreamExt;
    use std::time::Instant;

    const QUESTION: &str = "What is the recommended treatment for a grade 2 PCL tear?";
    const CONDENSED: &str = "Posterior cruciate ligament tear";

    async fn index_with(collection: &str) -> Arc<InMemoryIndex> {
        let index = Arc::new(InMemoryIndex::new());
        index
            .create_collection(&CollectionSpec::new(collection, 4))
            .await
            .unwrap();
        index
            .upload(
                collection,
                &[1, 2],
                &[vec![1.0, 0.0, 0.0, 0.0], vec![0.0, 1.0, 0.0, 0.0]],
                &[
                    DocumentPayload {
                        pmid: Some(1),
                        title: Some("A".to_string()),
                        abstract_text: Some("x".to_string()),
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

    fn engine(
        index: Arc<dyn VectorIndex>,
        embedder: Arc<MockEmbedder>,
        generator: Arc<ScriptedGenerator>,
        top_k: usize,
    ) -> RagEngine {
        let retriever = Retriever::new(embedder, index, "abstracts");
        RagEngine::new(retriever, generator, PromptTemplates::default(), top_k)
    }

    #[tokio::test]
    async fn test_condensed_query_retrieves_original_question_answers() {
        let embedder = Arc::new(
            MockEmbedder::new(4).with_vector(CONDENSED, vec![0.0, 1.0, 0.0, 0.0]),
        );
        let generator = Arc::new(
            ScriptedGenerator::new()
                .with_completion(format!("{}\nQuestion: something else", CONDENSED))
                .with_stream(["Surgery ", "is rarely needed."]),
        );
        let rag = engine(
            index_with("abstracts").await,
            embedder.clone(),
            generator.clone(),
            1,
        );

        let answer: Vec<String> = rag.answer(QUESTION).await.unwrap().try_collect().await.unwrap();
        assert_eq!(answer.concat(), "Surgery is rarely needed.");

        // Retrieval saw the condensed query, never the question
        assert_eq!(embedder.calls(), vec![vec![CONDENSED.to_string()]]);

        // The answer prompt carries the question and the retrieved context
        let prompts = generator.prompts();
        assert_eq!(prompts.len(), 2);
        assert!(prompts[0].ends_with(&format!("Question: {}\nSearch Query: ", QUESTION)));
        assert!(prompts[1].contains(&format!("Query: {}\n", QUESTION)));
        assert!(!prompts[1].contains(&format!("Query: {}\n", CONDENSED)));
        assert!(prompts[1].contains("Title: B\n\nPublication year: N/A"));
        assert!(prompts[1].contains("Abstract: N/A"));
    }

    #[tokio::test]
    async fn test_zero_hits_answer_with_no_context_marker() {
        let index = Arc::new(InMemoryIndex::new());
        index
            .create_collection(&CollectionSpec::new("abstracts", 4))
            .await
            .unwrap();
        let generator = Arc::new(
            ScriptedGenerator::new()
                .with_completion(CONDENSED)
                .with_stream(["I don't know!"]),
        );
        let rag = engine(index, Arc::new(MockEmbedder::new(4)), generator.clone(), 20);

        let answer: Vec<String> = rag.answer(QUESTION).await.unwrap().try_collect().await.unwrap();
        assert_eq!(answer, vec!["I don't know!"]);
        assert!(generator.prompts()[1].contains(NO_CONTEXT));
    }

    #[tokio::test]
    async fn test_retrieval_error_is_not_empty_context() {
        // Collection never created: the index fails the search
        let index = Arc::new(InMemoryIndex::new());
        let generator = Arc::new(
            ScriptedGenerator::new()
                .with_completion(CONDENSED)
                .with_stream(["unused"]),
        );
        let rag = engine(index, Arc::new(MockEmbedder::new(4)), generator.clone(), 20);

        let err = rag.answer(QUESTION).await.err().unwrap();
        assert!(matches!(err, Error::VectorIndex(_)));
        // No answer was generated
        assert_eq!(generator.prompts().len(), 1);
    }

    #[tokio::test]
    async fn test_condense_failure_surfaces() {
        let generator = Arc::new(ScriptedGenerator::new().with_completion("  \n\"\"\n"));
        let rag = engine(
            index_with("abstracts").await,
            Arc::new(MockEmbedder::new(4)),
            generator,
            20,
        );

        let err = rag.condense(QUESTION).await.unwrap_err();
        assert!(matches!(err, Error::Generation(_)));
    }

    #[tokio::test]
    async fn test_retrieval_mode_streams_context_without_model() {
        let embedder = Arc::new(
            MockEmbedder::new(4).with_vector(QUESTION, vec![0.0, 1.0, 0.0, 0.0]),
        );
        let generator = Arc::new(ScriptedGenerator::new());
        let rag = engine(
            index_with("abstracts").await,
            embedder.clone(),
            generator.clone(),
            1,
        );
        let session = ChatSession::new(Mode::Retrieval);

        let fragments: Vec<String> = rag
            .respond(&session, QUESTION)
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();

        assert_eq!(fragments[0], "Title: ");
        assert_eq!(
            fragments.concat(),
            "Title: B\n\nPublication year: N/A\n\nAuthors: N/A\n\nAbstract: N/A\n\n "
        );
        assert!(generator.prompts().is_empty());
        assert_eq!(embedder.calls(), vec![vec![QUESTION.to_string()]]);
    }

    #[tokio::test]
    async fn test_dropping_stream_stops_consumption() {
        let generator = Arc::new(
            ScriptedGenerator::new()
                .with_completion(CONDENSED)
                .with_stream(["one ", "two ", "three"]),
        );
        let rag = engine(
            index_with("abstracts").await,
            Arc::new(MockEmbedder::new(4)),
            generator,
            2,
        );

        let mut stream = rag.answer(QUESTION).await.unwrap();
        assert_eq!(stream.next().await.unwrap().unwrap(), "one ");
        assert_eq!(stream.next().await.unwrap().unwrap(), "two ");
        drop(stream);
    }

    #[tokio::test]
    async fn test_pace_delays_each_fragment() {
        let stream: FragmentStream = Box::pin(futures::stream::iter(
            vec!["a".to_string(), "b".to_string(), "c".to_string()]
                .into_iter()
                .map(Ok),
        ));

        let started = Instant::now();
        let out: Vec<String> = pace(stream, Duration::from_millis(5))
            .try_collect()
            .await
            .unwrap();

        assert_eq!(out, vec!["a", "b", "c"]);
        assert!(started.elapsed() >= Duration::from_millis(15));
    }

    #[test]
    fn test_mode_parse_and_display() {
        assert_eq!("Retrieval".parse::<Mode>().unwrap(), Mode::Retrieval);
        assert_eq!(Mode::default(), Mode::Rag);
        assert_eq!(Mode::Rag.to_string(), "rag");
        assert!("chat".parse::<Mode>().is_err());
    }
}
