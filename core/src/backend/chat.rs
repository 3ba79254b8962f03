//! Chat model input/output and streamed-output aggregation

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::message::{Message, ToolCall};
use crate::tool::Tool;
use crate::{Error, Result};

/// Sampling and decoding parameters passed through to the provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatModelParameters {
    pub max_tokens: Option<u32>,
    pub temperature: f32,
    pub top_p: Option<f32>,
    pub top_k: Option<u32>,
    pub n: Option<u32>,
    pub frequency_penalty: Option<f32>,
    pub presence_penalty: Option<f32>,
    pub seed: Option<u64>,
    pub stop_sequences: Vec<String>,
    /// Request a streamed response
    pub stream: bool,
}

impl Default for ChatModelParameters {
    fn default() -> Self {
        Self {
            max_tokens: None,
            temperature: 0.0,
            top_p: None,
            top_k: None,
            n: None,
            frequency_penalty: None,
            presence_penalty: None,
            seed: None,
            stop_sequences: Vec::new(),
            stream: true,
        }
    }
}

/// A request to a chat model
#[derive(Clone)]
pub struct ChatModelInput {
    messages: Vec<Message>,
    pub tools: Vec<Arc<dyn Tool>>,
    pub parameters: ChatModelParameters,
}

impl ChatModelInput {
    /// Fails with [`Error::InvalidInput`] when `messages` is empty.
    pub fn new(messages: Vec<Message>) -> Result<Self> {
        if messages.is_empty() {
            return Err(Error::InvalidInput(
                "chat model input requires at least one message".to_string(),
            ));
        }
        Ok(Self {
            messages,
            tools: Vec::new(),
            parameters: ChatModelParameters::default(),
        })
    }

    pub fn with_tools(mut self, tools: Vec<Arc<dyn Tool>>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_parameters(mut self, parameters: ChatModelParameters) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }
}

impl std::fmt::Debug for ChatModelInput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatModelInput")
            .field("messages", &self.messages)
            .field(
                "tools",
                &self.tools.iter().map(|t| t.name().to_string()).collect::<Vec<_>>(),
            )
            .field("parameters", &self.parameters)
            .finish()
    }
}

/// Token accounting reported by a provider
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatModelUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl ChatModelUsage {
    pub fn new(prompt_tokens: u32, completion_tokens: u32, total_tokens: u32) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens,
        }
    }

    /// Element-wise maximum
    pub fn max(self, other: Self) -> Self {
        Self {
            prompt_tokens: self.prompt_tokens.max(other.prompt_tokens),
            completion_tokens: self.completion_tokens.max(other.completion_tokens),
            total_tokens: self.total_tokens.max(other.total_tokens),
        }
    }
}

/// A complete model response, or one streamed chunk of it
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatModelOutput {
    pub messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<ChatModelUsage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}

impl ChatModelOutput {
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            usage: None,
            finish_reason: None,
        }
    }

    pub fn with_usage(mut self, usage: ChatModelUsage) -> Self {
        self.usage = Some(usage);
        self
    }

    pub fn with_finish_reason(mut self, reason: impl Into<String>) -> Self {
        self.finish_reason = Some(reason.into());
        self
    }

    /// Fold chunks into one output, in order. No chunks yields an empty output.
    pub fn from_chunks<I>(chunks: I) -> Self
    where
        I: IntoIterator<Item = ChatModelOutput>,
    {
        chunks.into_iter().fold(Self::default(), |mut merged, chunk| {
            merged.merge(chunk);
            merged
        })
    }

    /// Merge a later chunk into this output.
    ///
    /// Messages are appended and the finish reason is taken from `other`.
    /// Providers resend cumulative usage while streaming, so usage is the
    /// element-wise maximum rather than a sum; a chunk reporting zero total
    /// tokens leaves the current usage untouched.
    pub fn merge(&mut self, other: ChatModelOutput) {
        self.messages.extend(other.messages);
        self.finish_reason = other.finish_reason;
        self.usage = match (self.usage, other.usage) {
            (Some(current), Some(incoming)) if incoming.total_tokens > 0 => {
                Some(current.max(incoming))
            }
            (Some(current), _) => Some(current),
            (None, incoming) => incoming,
        };
    }

    /// Owned variant of [`merge`](Self::merge)
    pub fn merged(mut self, other: ChatModelOutput) -> Self {
        self.merge(other);
        self
    }

    /// Tool calls across all assistant messages
    pub fn tool_calls(&self) -> Vec<&ToolCall> {
        self.messages
            .iter()
            .filter(|m| m.is_assistant())
            .flat_map(Message::tool_calls)
            .collect()
    }

    /// Assistant messages carrying non-empty text
    pub fn text_messages(&self) -> Vec<&Message> {
        self.messages
            .iter()
            .filter(|m| m.is_assistant() && !m.text().is_empty())
            .collect()
    }

    /// Concatenated assistant text
    pub fn text_content(&self) -> String {
        self.messages
            .iter()
            .filter(|m| m.is_assistant())
            .map(Message::text)
            .collect()
    }
}
