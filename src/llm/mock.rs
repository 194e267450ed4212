use super::{FragmentStream, TextGenerator};
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;

/// Replays canned outputs in order and records every prompt it receives
#[derive(Debug, Default)]
pub struct ScriptedGenerator {
    completions: Mutex<VecDeque<std::result::Result<String, String>>>,
    streams: Mutex<VecDeque<Vec<String>>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the result of the next `complete` call
    pub fn with_completion(self, text: impl Into<String>) -> Self {
        if let Ok(mut queue) = self.completions.lock() {
            queue.push_back(Ok(text.into()));
        }
        self
    }

    /// Queue a failing `complete` call
    pub fn with_completion_error(self, message: impl Into<String>) -> Self {
        if let Ok(mut queue) = self.completions.lock() {
            queue.push_back(Err(message.into()));
        }
        self
    }

    /// Queue the fragments of the next `stream` call
    pub fn with_stream<I, S>(self, fragments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if let Ok(mut queue) = self.streams.lock() {
            queue.push_back(fragments.into_iter().map(Into::into).collect());
        }
        self
    }

    /// Prompts received so far, across both methods
    pub fn prompts(&self) -> Vec<String> {
        self.prompts
            .lock()
            .map(|prompts| prompts.clone())
            .unwrap_or_default()
    }

    fn record(&self, prompt: &str) {
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(prompt.to_string());
        }
    }
}

#[async_trait]
impl TextGenerator for ScriptedGenerator {
    async fn complete(&self, prompt: &str) -> Result<String> {
        self.record(prompt);
        let next = self
            .completions
            .lock()
            .ok()
            .and_then(|mut queue| queue.pop_front());

        match next {
            Some(Ok(text)) => Ok(text),
            Some(Err(message)) => Err(Error::Generation(message)),
            None => Err(Error::Generation("no scripted completion left".to_string())),
        }
    }

    async fn stream(&self, prompt: &str) -> Result<FragmentStream> {
        self.record(prompt);
        let fragments = self
            .streams
            .lock()
            .ok()
            .and_then(|mut queue| queue.pop_front())
            .ok_or_else(|| Error::Generation("no scripted stream left".to_string()))?;

        Ok(Box::pin(futures::stream::iter(fragments.into_iter().map(Ok))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;

    #[tokio::test]
    async fn test_replays_in_order() {
        let generator = ScriptedGenerator::new()
            .with_completion("first")
            .with_completion_error("boom")
            .with_stream(["a", "b"]);

        assert_eq!(generator.complete("p1").await.unwrap(), "first");
        assert!(matches!(
            generator.complete("p2").await,
            Err(Error::Generation(_))
        ));
        assert!(generator.complete("p3").await.is_err());

        let fragments: Vec<String> = generator
            .stream("p4")
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        assert_eq!(fragments, vec!["a", "b"]);
        assert!(generator.stream("p5").await.is_err());

        assert_eq!(generator.prompts(), vec!["p1", "p2", "p3", "p4", "p5"]);
    }
}
