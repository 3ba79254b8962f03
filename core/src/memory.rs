//! Conversation memory
//!
//! Consulted and updated by agent handlers, never by the run machinery.

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::message::Message;
use crate::Result;

/// Storage interface for conversation history
#[async_trait]
pub trait Memory: Send + Sync {
    /// Messages in insertion order
    async fn messages(&self) -> Vec<Message>;

    async fn add(&self, message: Message) -> Result<()>;

    async fn add_many(&self, messages: Vec<Message>) -> Result<()> {
        for message in messages {
            self.add(message).await?;
        }
        Ok(())
    }

    async fn reset(&self) -> Result<()>;

    async fn is_empty(&self) -> bool {
        self.messages().await.is_empty()
    }
}

/// Memory that keeps every message
#[derive(Debug, Default)]
pub struct UnconstrainedMemory {
    messages: RwLock<Vec<Message>>,
}

impl UnconstrainedMemory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_messages(messages: Vec<Message>) -> Self {
        Self {
            messages: RwLock::new(messages),
        }
    }
}

#[async_trait]
impl Memory for UnconstrainedMemory {
    async fn messages(&self) -> Vec<Message> {
        self.messages.read().clone()
    }

    async fn add(&self, message: Message) -> Result<()> {
        self.messages.write().push(message);
        Ok(())
    }

    async fn reset(&self) -> Result<()> {
        self.messages.write().clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::assert_ok;

    #[tokio::test]
    async fn test_unconstrained_memory() {
        let memory = UnconstrainedMemory::new();
        assert!(memory.is_empty().await);

        assert_ok!(memory.add(Message::user("hello")).await);
        assert_ok!(
            memory
                .add_many(vec![Message::assistant("hi"), Message::user("bye")])
                .await
        );

        let texts: Vec<String> = memory.messages().await.iter().map(Message::text).collect();
        assert_eq!(texts, vec!["hello", "hi", "bye"]);

        assert_ok!(memory.reset().await);
        assert!(memory.is_empty().await);
    }
}
