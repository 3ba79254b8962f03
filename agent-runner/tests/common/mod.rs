//! Shared helpers for agent-runner integration tests

use async_trait::async_trait;
use futures::stream;
use runloom_core::backend::{ChatModelInput, ChatModelOutput, ChatModelProvider, ChatStream};
use runloom_core::message::{Message, Role};
use runloom_core::AbortSignal;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Install a test-friendly subscriber once; later calls are no-ops
pub fn init_tracing() {
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "agent_runner=debug,runloom_core=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_test_writer())
        .try_init();
}

/// Answers with the text of the latest user message
pub struct EchoProvider;

impl EchoProvider {
    fn reply(input: &ChatModelInput) -> ChatModelOutput {
        let text = input
            .messages()
            .iter()
            .rev()
            .find(|message| message.role() == Role::User)
            .map(Message::text)
            .unwrap_or_default();
        ChatModelOutput::new(vec![Message::assistant(text)]).with_finish_reason("stop")
    }
}

#[async_trait]
impl ChatModelProvider for EchoProvider {
    fn provider_id(&self) -> &str {
        "echo"
    }

    fn model_id(&self) -> &str {
        "echo-1"
    }

    async fn create(
        &self,
        input: &ChatModelInput,
        signal: &AbortSignal,
    ) -> runloom_core::Result<ChatModelOutput> {
        signal.check()?;
        Ok(Self::reply(input))
    }

    async fn create_stream(
        &self,
        input: &ChatModelInput,
        signal: &AbortSignal,
    ) -> runloom_core::Result<ChatStream> {
        signal.check()?;
        Ok(Box::pin(stream::iter(vec![Ok(Self::reply(input))])))
    }
}
