//! Provider adapter interfaces
//!
//! Concrete adapters translate a [`ChatModelInput`] into a vendor API call.
//! They must honor the abort signal and report transport/auth failures as
//! [`Error::Provider`](crate::Error::Provider).

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use super::chat::{ChatModelInput, ChatModelOutput};
use super::embedding::{EmbeddingModelInput, EmbeddingModelOutput};
use crate::signal::AbortSignal;
use crate::Result;

/// Stream of partial outputs produced by a streaming provider
pub type ChatStream = Pin<Box<dyn Stream<Item = Result<ChatModelOutput>> + Send>>;

#[async_trait]
pub trait ChatModelProvider: Send + Sync {
    /// Short provider identifier, e.g. `ollama`
    fn provider_id(&self) -> &str;

    fn model_id(&self) -> &str;

    /// Single-shot completion
    async fn create(&self, input: &ChatModelInput, signal: &AbortSignal) -> Result<ChatModelOutput>;

    /// Streamed completion, one chunk per item
    async fn create_stream(&self, input: &ChatModelInput, signal: &AbortSignal) -> Result<ChatStream>;
}

#[async_trait]
pub trait EmbeddingModelProvider: Send + Sync {
    fn provider_id(&self) -> &str;

    fn model_id(&self) -> &str;

    async fn embed(
        &self,
        input: &EmbeddingModelInput,
        signal: &AbortSignal,
    ) -> Result<EmbeddingModelOutput>;
}
