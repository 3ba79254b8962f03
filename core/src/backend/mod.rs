mod chat;
mod embedding;
mod provider;

pub use chat::{ChatModelInput, ChatModelOutput, ChatModelParameters, ChatModelUsage};
pub use embedding::{EmbeddingModelInput, EmbeddingModelOutput, EmbeddingModelUsage};
pub use provider::{ChatModelProvider, ChatStream, EmbeddingModelProvider};
