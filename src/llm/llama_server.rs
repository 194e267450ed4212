//! llama.cpp server client
//!
//! Speaks the `/completion` endpoint. Blocking completions return one JSON
//! object; streaming completions arrive as server-sent events of the form
//! `data: {"content": "...", "stop": false}` separated by blank lines.

use super::{FragmentStream, TextGenerator};
use crate::config::LlmConfig;
use crate::error::{Error, Result};
use async_stream::try_stream;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;
use url::Url;

#[derive(Debug, Clone, Serialize)]
struct CompletionRequest<'a> {
    prompt: &'a str,
    n_predict: u32,
    temperature: f32,
    top_p: f32,
    stream: bool,
    #[serde(skip_serializing_if = "no_stop_sequences")]
    stop: &'a [String],
}

fn no_stop_sequences(stop: &&[String]) -> bool {
    stop.is_empty()
}

/// One completion object, or one streamed fragment
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CompletionChunk {
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub stop: bool,
}

/// llama.cpp server backend
pub struct LlamaServerGenerator {
    client: Client,
    endpoint: Url,
    config: LlmConfig,
}

impl LlamaServerGenerator {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let endpoint = Url::parse(&config.endpoint)?
            .join("/completion")
            .map_err(|e| Error::Config(format!("Invalid llm.endpoint: {}", e)))?;

        // Blocking completions set a per-request timeout; streams are unbounded.
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()?;

        Ok(Self {
            client,
            endpoint,
            config: config.clone(),
        })
    }

    fn request_body<'a>(&'a self, prompt: &'a str, stream: bool) -> CompletionRequest<'a> {
        CompletionRequest {
            prompt,
            n_predict: self.config.max_tokens,
            temperature: self.config.temperature,
            top_p: self.config.top_p,
            stream,
            stop: &self.config.stop,
        }
    }
}

#[async_trait]
impl TextGenerator for LlamaServerGenerator {
    async fn complete(&self, prompt: &str) -> Result<String> {
        debug!("POST {} (blocking, {} prompt bytes)", self.endpoint, prompt.len());

        let timeout = Duration::from_secs(self.config.timeout_secs);
        let response = self
            .client
            .post(self.endpoint.clone())
            .timeout(timeout)
            .json(&self.request_body(prompt, false))
            .send()
            .await
            .map_err(|e| request_error(e, timeout))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Generation(format!(
                "llama server returned {}: {}",
                status, body
            )));
        }

        let chunk: CompletionChunk = response.json().await.map_err(|e| {
            Error::Generation(format!("unreadable completion response: {}", e))
        })?;
        Ok(chunk.content)
    }

    async fn stream(&self, prompt: &str) -> Result<FragmentStream> {
        debug!("POST {} (streaming, {} prompt bytes)", self.endpoint, prompt.len());

        let request = self
            .client
            .post(self.endpoint.clone())
            .json(&self.request_body(prompt, true));

        let stream = try_stream! {
            let response = request
                .send()
                .await
                .map_err(|e| request_error(e, CONNECT_TIMEOUT))?;

            if !response.status().is_success() {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                Err::<(), Error>(Error::Generation(format!(
                    "llama server returned {}: {}",
                    status, body
                )))?;
            } else {
                let mut bytes = response.bytes_stream();
                let mut buffer: Vec<u8> = Vec::new();
                let mut finished = false;

                while let Some(chunk) = bytes.next().await {
                    let chunk = chunk.map_err(|e| {
                        Error::Generation(format!("completion stream interrupted: {}", e))
                    })?;
                    append_normalized(&mut buffer, &chunk);

                    while let Some(event) = next_event(&mut buffer) {
                        if let Some(chunk) = parse_sse_event(&event)? {
                            if !chunk.content.is_empty() {
                                yield chunk.content;
                            }
                            finished = chunk.stop;
                        }
                        if finished {
                            break;
                        }
                    }
                    if finished {
                        break;
                    }
                }

                // A server may close the stream without a trailing blank line
                if !finished {
                    append_normalized(&mut buffer, b"\n\n");
                    while let Some(event) = next_event(&mut buffer) {
                        if let Some(chunk) = parse_sse_event(&event)? {
                            if !chunk.content.is_empty() {
                                yield chunk.content;
                            }
                            if chunk.stop {
                                break;
                            }
                        }
                    }
                }
            }
        };

        Ok(Box::pin(stream))
    }
}

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

fn request_error(e: reqwest::Error, timeout: Duration) -> Error {
    if e.is_timeout() {
        Error::timeout("completion", timeout)
    } else {
        Error::Generation(format!("llama server unreachable: {}", e))
    }
}

/// Append `chunk`, folding CRLF line endings to LF.
///
/// A `\r` at the end of the buffer is kept until the next byte shows whether
/// it starts a CRLF pair.
fn append_normalized(buffer: &mut Vec<u8>, chunk: &[u8]) {
    for &byte in chunk {
        if byte == b'\n' && buffer.last() == Some(&b'\r') {
            buffer.pop();
        }
        buffer.push(byte);
    }
}

/// Remove and return the next complete event, if a blank line ends one
fn next_event(buffer: &mut Vec<u8>) -> Option<String> {
    let end = buffer.windows(2).position(|w| w == b"\n\n")?;
    let event: Vec<u8> = buffer.drain(..end + 2).collect();
    Some(String::from_utf8_lossy(&event).into_owned())
}

/// Parse one server-sent event.
///
/// Returns `None` for comments and events without a data line.
pub fn parse_sse_event(event: &str) -> Result<Option<CompletionChunk>> {
    for line in event.lines() {
        let line = line.trim_end_matches('\r');

        if let Some(error) = line.strip_prefix("error:") {
            return Err(Error::Generation(format!(
                "llama server reported: {}",
                error.trim()
            )));
        }

        if let Some(data) = line.strip_prefix("data:") {
            let data = data.trim();
            if data == "[DONE]" {
                return Ok(Some(CompletionChunk {
                    content: String::new(),
                    stop: true,
                }));
            }
            let chunk: CompletionChunk = serde_json::from_str(data).map_err(|e| {
                Error::Generation(format!("malformed completion event: {}", e))
            })?;
            return Ok(Some(chunk));
        }
    }
    Ok(None)
}
