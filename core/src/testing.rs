//! Deterministic providers for tests
//!
//! [`ScriptedProvider`] replays pre-programmed responses in call order,
//! so agents and workflows can be exercised without a model backend.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream;

use crate::backend::{
    ChatModelInput, ChatModelOutput, ChatModelProvider, ChatModelUsage, ChatStream,
    EmbeddingModelInput, EmbeddingModelOutput, EmbeddingModelProvider, EmbeddingModelUsage,
};
use crate::message::{Message, ToolCall};
use crate::signal::AbortSignal;
use crate::{Error, Result};

/// One pre-programmed provider response
#[derive(Debug, Clone)]
pub enum ScriptedResponse {
    /// Yield these chunks (merged for non-streaming calls)
    Chunks(Vec<ChatModelOutput>),
    /// Yield these chunks, then fail mid-stream
    FailAfter {
        chunks: Vec<ChatModelOutput>,
        message: String,
    },
    /// Fail the call itself
    Error { message: String, retryable: bool },
    /// Wait, then behave like the inner response
    Delay(Duration, Box<ScriptedResponse>),
    /// Never answer; only the abort signal ends the call
    Hang,
}

impl ScriptedResponse {
    /// A text answer streamed word by word, with cumulative usage on the last chunk
    pub fn text(text: &str) -> Self {
        let words: Vec<&str> = text.split_inclusive(' ').collect();
        let count = words.len() as u32;
        let mut chunks: Vec<ChatModelOutput> = words
            .into_iter()
            .map(|word| ChatModelOutput::new(vec![Message::assistant(word)]))
            .collect();
        if let Some(last) = chunks.last_mut() {
            last.usage = Some(ChatModelUsage::new(10, count, 10 + count));
            last.finish_reason = Some("stop".to_string());
        }
        Self::Chunks(chunks)
    }

    /// A single tool call request
    pub fn tool_call(id: &str, tool_name: &str, args: serde_json::Value) -> Self {
        Self::Chunks(vec![ChatModelOutput::new(vec![Message::assistant_tool_calls(
            vec![ToolCall {
                id: id.to_string(),
                tool_name: tool_name.to_string(),
                args,
            }],
        )])
        .with_finish_reason("tool_calls")])
    }

    pub fn error(message: &str) -> Self {
        Self::Error {
            message: message.to_string(),
            retryable: true,
        }
    }

    pub fn fatal(message: &str) -> Self {
        Self::Error {
            message: message.to_string(),
            retryable: false,
        }
    }

    pub fn delayed(delay: Duration, inner: ScriptedResponse) -> Self {
        Self::Delay(delay, Box::new(inner))
    }
}

/// Provider returning scripted responses in sequence
pub struct ScriptedProvider {
    id: String,
    responses: Vec<ScriptedResponse>,
    repeat_last: bool,
    call_count: AtomicUsize,
}

impl ScriptedProvider {
    pub fn new(responses: Vec<ScriptedResponse>) -> Self {
        Self {
            id: "scripted".to_string(),
            responses,
            repeat_last: false,
            call_count: AtomicUsize::new(0),
        }
    }

    /// Answer every call with the same response
    pub fn always(response: ScriptedResponse) -> Self {
        Self {
            repeat_last: true,
            ..Self::new(vec![response])
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    fn next_response(&self) -> Result<ScriptedResponse> {
        let index = self.call_count.fetch_add(1, Ordering::SeqCst);
        let index = if self.repeat_last {
            index.min(self.responses.len().saturating_sub(1))
        } else {
            index
        };
        self.responses.get(index).cloned().ok_or_else(|| {
            Error::provider_fatal(
                self.id.clone(),
                format!("no response configured for call {index}"),
            )
        })
    }

    async fn resolve(&self, signal: &AbortSignal) -> Result<ScriptedResponse> {
        let mut response = self.next_response()?;
        loop {
            response = match response {
                ScriptedResponse::Delay(delay, inner) => {
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => *inner,
                        _ = signal.cancelled() => return Err(cancelled(signal)),
                    }
                }
                ScriptedResponse::Hang => {
                    signal.cancelled().await;
                    return Err(cancelled(signal));
                }
                ScriptedResponse::Error { message, retryable } => {
                    return Err(if retryable {
                        Error::provider(self.id.clone(), message)
                    } else {
                        Error::provider_fatal(self.id.clone(), message)
                    });
                }
                other => return Ok(other),
            };
        }
    }
}

fn cancelled(signal: &AbortSignal) -> Error {
    Error::cancelled(signal.reason().unwrap_or_else(|| "aborted".to_string()))
}

#[async_trait]
impl ChatModelProvider for ScriptedProvider {
    fn provider_id(&self) -> &str {
        &self.id
    }

    fn model_id(&self) -> &str {
        "scripted-model"
    }

    async fn create(&self, _input: &ChatModelInput, signal: &AbortSignal) -> Result<ChatModelOutput> {
        match self.resolve(signal).await? {
            ScriptedResponse::Chunks(chunks) => Ok(ChatModelOutput::from_chunks(chunks)),
            ScriptedResponse::FailAfter { message, .. } => Err(Error::provider(self.id.clone(), message)),
            other => Err(Error::provider_fatal(
                self.id.clone(),
                format!("unresolved scripted response {other:?}"),
            )),
        }
    }

    async fn create_stream(&self, _input: &ChatModelInput, signal: &AbortSignal) -> Result<ChatStream> {
        let items: Vec<Result<ChatModelOutput>> = match self.resolve(signal).await? {
            ScriptedResponse::Chunks(chunks) => chunks.into_iter().map(Ok).collect(),
            ScriptedResponse::FailAfter { chunks, message } => chunks
                .into_iter()
                .map(Ok)
                .chain(std::iter::once(Err(Error::provider(self.id.clone(), message))))
                .collect(),
            other => {
                return Err(Error::provider_fatal(
                    self.id.clone(),
                    format!("unresolved scripted response {other:?}"),
                ))
            }
        };
        Ok(Box::pin(stream::iter(items)))
    }
}

/// Embedding provider producing small deterministic vectors
#[derive(Debug, Default)]
pub struct ScriptedEmbedder;

#[async_trait]
impl EmbeddingModelProvider for ScriptedEmbedder {
    fn provider_id(&self) -> &str {
        "scripted"
    }

    fn model_id(&self) -> &str {
        "scripted-embedding"
    }

    async fn embed(
        &self,
        input: &EmbeddingModelInput,
        signal: &AbortSignal,
    ) -> Result<EmbeddingModelOutput> {
        signal.check()?;
        let embeddings = input
            .values
            .iter()
            .map(|value| {
                let bytes = value.as_bytes();
                let sum: u32 = bytes.iter().map(|b| u32::from(*b)).sum();
                vec![bytes.len() as f32, sum as f32 / 255.0]
            })
            .collect();
        let tokens = input.values.iter().map(|v| v.split_whitespace().count() as u32).sum();
        Ok(EmbeddingModelOutput {
            values: input.values.clone(),
            embeddings,
            usage: Some(EmbeddingModelUsage {
                prompt_tokens: tokens,
                completion_tokens: 0,
                total_tokens: tokens,
            }),
        })
    }
}
