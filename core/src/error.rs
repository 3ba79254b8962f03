//! Error types for the core library

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Coarse classification of a failure, carried by `error` events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Cancelled,
    Provider,
    Listener,
    Tool,
    InvalidInput,
    Serialization,
    RetryExhausted,
    StepFailed,
    MaxIterations,
    Fatal,
    Other,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cancelled => "cancelled",
            Self::Provider => "provider",
            Self::Listener => "listener",
            Self::Tool => "tool",
            Self::InvalidInput => "invalid_input",
            Self::Serialization => "serialization",
            Self::RetryExhausted => "retry_exhausted",
            Self::StepFailed => "step_failed",
            Self::MaxIterations => "max_iterations",
            Self::Fatal => "fatal",
            Self::Other => "other",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug)]
pub enum Error {
    /// The abort signal was observed
    #[error("Operation cancelled: {reason}")]
    Cancelled { reason: String },

    /// Opaque failure from a model provider adapter
    #[error("Provider '{provider}' failed: {message}")]
    Provider {
        provider: String,
        message: String,
        retryable: bool,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// An event listener returned an error or panicked
    #[error("Listener for '{path}' failed: {message}")]
    Listener { path: String, message: String },

    #[error("Tool '{tool}' failed: {message}")]
    Tool { tool: String, message: String },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Create a Cancelled error
    pub fn cancelled(reason: impl Into<String>) -> Self {
        Self::Cancelled {
            reason: reason.into(),
        }
    }

    /// Create a retryable Provider error
    pub fn provider(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Provider {
            provider: provider.into(),
            message: message.into(),
            retryable: true,
            source: None,
        }
    }

    /// Create a Provider error with source
    pub fn provider_with_source(
        provider: impl Into<String>,
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Provider {
            provider: provider.into(),
            message: message.into(),
            retryable: true,
            source: Some(Box::new(source)),
        }
    }

    /// Create a Provider error that must not be retried (auth, bad request)
    pub fn provider_fatal(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Provider {
            provider: provider.into(),
            message: message.into(),
            retryable: false,
            source: None,
        }
    }

    /// Create a Tool error
    pub fn tool(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Tool {
            tool: tool.into(),
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Cancelled { .. } => ErrorKind::Cancelled,
            Self::Provider { .. } => ErrorKind::Provider,
            Self::Listener { .. } => ErrorKind::Listener,
            Self::Tool { .. } => ErrorKind::Tool,
            Self::InvalidInput(_) => ErrorKind::InvalidInput,
            Self::Serialization(_) => ErrorKind::Serialization,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Cancelled { .. } | Self::InvalidInput(_) => false,
            Self::Provider { retryable, .. } => *retryable,
            _ => true,
        }
    }
}
