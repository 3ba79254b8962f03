//! Chat messages exchanged with model providers

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Message role in a chat
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Tool => "tool",
        }
    }
}

/// A tool invocation requested by the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub tool_name: String,
    #[serde(default)]
    pub args: serde_json::Value,
}

/// Outcome of a tool invocation, fed back to the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub tool_call_id: String,
    pub tool_name: String,
    pub result: String,
    #[serde(default)]
    pub is_error: bool,
}

/// One part of an assistant message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AssistantContent {
    Text { text: String },
    ToolCall(ToolCall),
}

/// A chat message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum Message {
    System {
        text: String,
        meta: MessageMeta,
    },
    User {
        text: String,
        meta: MessageMeta,
    },
    Assistant {
        content: Vec<AssistantContent>,
        meta: MessageMeta,
    },
    Tool {
        results: Vec<ToolResult>,
        meta: MessageMeta,
    },
}

/// Bookkeeping attached to every message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageMeta {
    pub id: String,
    pub created_at: DateTime<Utc>,
}

impl MessageMeta {
    fn new() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: Utc::now(),
        }
    }
}

impl Message {
    pub fn system(text: impl Into<String>) -> Self {
        Self::System {
            text: text.into(),
            meta: MessageMeta::new(),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::User {
            text: text.into(),
            meta: MessageMeta::new(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::Assistant {
            content: vec![AssistantContent::Text { text: text.into() }],
            meta: MessageMeta::new(),
        }
    }

    pub fn assistant_tool_calls(calls: Vec<ToolCall>) -> Self {
        Self::Assistant {
            content: calls.into_iter().map(AssistantContent::ToolCall).collect(),
            meta: MessageMeta::new(),
        }
    }

    pub fn tool(results: Vec<ToolResult>) -> Self {
        Self::Tool {
            results,
            meta: MessageMeta::new(),
        }
    }

    pub fn role(&self) -> Role {
        match self {
            Self::System { .. } => Role::System,
            Self::User { .. } => Role::User,
            Self::Assistant { .. } => Role::Assistant,
            Self::Tool { .. } => Role::Tool,
        }
    }

    pub fn meta(&self) -> &MessageMeta {
        match self {
            Self::System { meta, .. }
            | Self::User { meta, .. }
            | Self::Assistant { meta, .. }
            | Self::Tool { meta, .. } => meta,
        }
    }

    /// Concatenated textual content
    pub fn text(&self) -> String {
        match self {
            Self::System { text, .. } | Self::User { text, .. } => text.clone(),
            Self::Assistant { content, .. } => content
                .iter()
                .filter_map(|part| match part {
                    AssistantContent::Text { text } => Some(text.as_str()),
                    AssistantContent::ToolCall(_) => None,
                })
                .collect(),
            Self::Tool { results, .. } => results
                .iter()
                .map(|r| r.result.as_str())
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }

    /// Tool calls requested by an assistant message; empty for other kinds
    pub fn tool_calls(&self) -> Vec<&ToolCall> {
        match self {
            Self::Assistant { content, .. } => content
                .iter()
                .filter_map(|part| match part {
                    AssistantContent::ToolCall(call) => Some(call),
                    AssistantContent::Text { .. } => None,
                })
                .collect(),
            _ => Vec::new(),
        }
    }

    pub fn is_assistant(&self) -> bool {
        matches!(self, Self::Assistant { .. })
    }
}
