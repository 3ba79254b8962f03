//! ChatModel - runs a chat provider with streaming aggregation and events

use std::sync::Arc;

use futures::StreamExt;
use runloom_core::backend::{ChatModelInput, ChatModelOutput, ChatModelProvider};
use runloom_core::{AbortSignal, Creator, Emitter, Error};
use tracing::debug;

use crate::error::{Result, RunError};
use crate::event::ErrorEvent;
use crate::run::{Run, RunContext, RunOptions};

/// Payload of the chat model `start` event
#[derive(Debug, Clone)]
pub struct ChatModelStartEvent {
    pub input: ChatModelInput,
}

/// Payload of `new_token`, one per streamed chunk.
///
/// Signaling `abort` stops consuming the stream after this chunk; the run
/// then resolves with the chunks received so far.
#[derive(Debug, Clone)]
pub struct NewTokenEvent {
    pub chunk: ChatModelOutput,
    pub abort: AbortSignal,
}

/// Payload of the chat model `success` event
#[derive(Debug, Clone)]
pub struct ChatModelSuccessEvent {
    pub output: ChatModelOutput,
}

/// A chat provider bound to an emitter node `backend.<provider>.chat`
#[derive(Clone)]
pub struct ChatModel {
    provider: Arc<dyn ChatModelProvider>,
    emitter: Emitter,
}

impl ChatModel {
    pub fn new(provider: Arc<dyn ChatModelProvider>, parent: &Emitter) -> Self {
        let creator = Creator::new(
            "chat_model",
            format!("{}:{}", provider.provider_id(), provider.model_id()),
        );
        let emitter = parent.child(&["backend", provider.provider_id(), "chat"], creator);
        Self { provider, emitter }
    }

    pub fn emitter(&self) -> &Emitter {
        &self.emitter
    }

    pub fn provider_id(&self) -> &str {
        self.provider.provider_id()
    }

    pub fn model_id(&self) -> &str {
        self.provider.model_id()
    }

    /// Generate a response; streams when `input.parameters.stream` is set
    pub fn create(&self, input: ChatModelInput) -> Run<ChatModelOutput> {
        self.create_with(input, RunOptions::default())
    }

    pub fn create_with(&self, input: ChatModelInput, options: RunOptions) -> Run<ChatModelOutput> {
        let provider = Arc::clone(&self.provider);
        let input = Arc::new(input);
        Run::new(&self.emitter, options, move |ctx| {
            generate(Arc::clone(&provider), Arc::clone(&input), ctx)
        })
    }
}

impl std::fmt::Debug for ChatModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatModel")
            .field("provider", &self.provider.provider_id())
            .field("model", &self.provider.model_id())
            .finish()
    }
}

async fn generate(
    provider: Arc<dyn ChatModelProvider>,
    input: Arc<ChatModelInput>,
    ctx: RunContext,
) -> Result<ChatModelOutput> {
    ctx.emit(
        "start",
        ChatModelStartEvent {
            input: (*input).clone(),
        },
    );

    let result = if input.parameters.stream {
        stream(provider.as_ref(), &input, &ctx).await
    } else {
        provider
            .create(&input, &ctx.signal)
            .await
            .map_err(RunError::from)
    };

    match result {
        Ok(output) => {
            ctx.emit(
                "success",
                ChatModelSuccessEvent {
                    output: output.clone(),
                },
            );
            Ok(output)
        }
        Err(err) => {
            ctx.emit(
                "error",
                ErrorEvent {
                    kind: err.kind(),
                    message: err.to_string(),
                    attempts: ctx.attempt,
                },
            );
            Err(err)
        }
    }
}

async fn stream(
    provider: &dyn ChatModelProvider,
    input: &ChatModelInput,
    ctx: &RunContext,
) -> Result<ChatModelOutput> {
    let mut chunks_stream = provider.create_stream(input, &ctx.signal).await?;
    let stop = AbortSignal::new();
    let mut chunks = Vec::new();

    while let Some(chunk) = chunks_stream.next().await {
        let chunk = chunk?;
        ctx.emit(
            "new_token",
            NewTokenEvent {
                chunk: chunk.clone(),
                abort: stop.clone(),
            },
        );
        chunks.push(chunk);
        if stop.is_signaled() {
            debug!(reason = ?stop.reason(), "chat stream stopped by listener");
            break;
        }
    }

    debug!(
        provider = provider.provider_id(),
        chunks = chunks.len(),
        "chat stream finished"
    );
    if chunks.is_empty() {
        return Err(Error::provider(provider.provider_id(), "No chunks have been received").into());
    }
    Ok(ChatModelOutput::from_chunks(chunks))
}
