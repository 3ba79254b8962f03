//! EmbeddingModel - runs an embedding provider

use std::sync::Arc;

use runloom_core::backend::{EmbeddingModelInput, EmbeddingModelOutput, EmbeddingModelProvider};
use runloom_core::{Creator, Emitter};

use crate::error::RunError;
use crate::event::ErrorEvent;
use crate::run::{Run, RunOptions};

/// An embedding provider bound to an emitter node `backend.<provider>.embedding`
#[derive(Clone)]
pub struct EmbeddingModel {
    provider: Arc<dyn EmbeddingModelProvider>,
    emitter: Emitter,
}

impl EmbeddingModel {
    pub fn new(provider: Arc<dyn EmbeddingModelProvider>, parent: &Emitter) -> Self {
        let creator = Creator::new(
            "embedding_model",
            format!("{}:{}", provider.provider_id(), provider.model_id()),
        );
        let emitter = parent.child(&["backend", provider.provider_id(), "embedding"], creator);
        Self { provider, emitter }
    }

    pub fn emitter(&self) -> &Emitter {
        &self.emitter
    }

    pub fn create(&self, input: EmbeddingModelInput) -> Run<EmbeddingModelOutput> {
        self.create_with(input, RunOptions::default())
    }

    pub fn create_with(
        &self,
        input: EmbeddingModelInput,
        options: RunOptions,
    ) -> Run<EmbeddingModelOutput> {
        let provider = Arc::clone(&self.provider);
        let input = Arc::new(input);
        Run::new(&self.emitter, options, move |ctx| {
            let provider = Arc::clone(&provider);
            let input = Arc::clone(&input);
            async move {
                ctx.emit("start", (*input).clone());
                match provider.embed(&input, &ctx.signal).await {
                    Ok(output) => {
                        ctx.emit("success", output.clone());
                        Ok(output)
                    }
                    Err(err) => {
                        let err = RunError::from(err);
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
        })
    }
}

impl std::fmt::Debug for EmbeddingModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddingModel")
            .field("provider", &self.provider.provider_id())
            .field("model", &self.provider.model_id())
            .finish()
    }
}
