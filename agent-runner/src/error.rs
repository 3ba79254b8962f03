//! Error types for agent-runner

use runloom_core::{Error, ErrorKind};
use thiserror::Error;

/// Result type alias for run operations
pub type Result<T> = std::result::Result<T, RunError>;

/// Errors surfaced by runs, agents and workflows
#[derive(Debug, Error)]
pub enum RunError {
    /// Cancellation, provider, listener or tool failure from the core layer
    #[error(transparent)]
    Core(#[from] Error),

    /// Handler kept failing after the configured retries
    #[error("Run failed after {attempts} attempts: {source}")]
    RetryExhausted {
        attempts: u32,
        #[source]
        source: Box<RunError>,
    },

    /// A workflow step failed
    #[error("Step '{step}' failed: {source}")]
    StepFailed {
        step: String,
        #[source]
        source: Box<RunError>,
    },

    /// Agent did not produce a final answer in time
    #[error("Agent exceeded the maximum of {iterations} iterations")]
    MaxIterations { iterations: u32 },

    /// Unrecoverable failure, never retried
    #[error("Fatal error: {message}")]
    Fatal { message: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl RunError {
    /// Create a Fatal error
    pub fn fatal(message: impl Into<String>) -> Self {
        Self::Fatal {
            message: message.into(),
        }
    }

    /// Create a StepFailed error
    pub fn step_failed(step: impl Into<String>, source: RunError) -> Self {
        Self::StepFailed {
            step: step.into(),
            source: Box::new(source),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Core(err) => err.kind(),
            Self::RetryExhausted { .. } => ErrorKind::RetryExhausted,
            Self::StepFailed { .. } => ErrorKind::StepFailed,
            Self::MaxIterations { .. } => ErrorKind::MaxIterations,
            Self::Fatal { .. } => ErrorKind::Fatal,
            Self::Other(_) => ErrorKind::Other,
        }
    }

    /// Whether a retry policy may re-invoke the failed handler
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Core(err) => err.is_retryable(),
            Self::Other(_) => true,
            Self::RetryExhausted { .. }
            | Self::StepFailed { .. }
            | Self::MaxIterations { .. }
            | Self::Fatal { .. } => false,
        }
    }

    /// True for cancellation, also when wrapped by a retry or step failure
    pub fn is_cancelled(&self) -> bool {
        match self {
            Self::Core(err) => err.is_cancelled(),
            Self::RetryExhausted { source, .. } | Self::StepFailed { source, .. } => {
                source.is_cancelled()
            }
            _ => false,
        }
    }

    /// The innermost error, looking through retry and step wrappers
    pub fn root_cause(&self) -> &RunError {
        match self {
            Self::RetryExhausted { source, .. } | Self::StepFailed { source, .. } => {
                source.root_cause()
            }
            _ => self,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds_and_retryability() {
        let provider: RunError = Error::provider("ollama", "timeout").into();
        assert_eq!(provider.kind(), ErrorKind::Provider);
        assert!(provider.is_retryable());

        let fatal: RunError = Error::provider_fatal("ollama", "bad key").into();
        assert!(!fatal.is_retryable());

        assert!(RunError::from(anyhow::anyhow!("boom")).is_retryable());
        assert!(!RunError::fatal("stop").is_retryable());
        assert!(!RunError::MaxIterations { iterations: 10 }.is_retryable());
    }

    #[test]
    fn test_cancellation_seen_through_wrappers() {
        let err = RunError::step_failed(
            "writer",
            RunError::RetryExhausted {
                attempts: 2,
                source: Box::new(Error::cancelled("user").into()),
            },
        );
        assert!(err.is_cancelled());
        assert_eq!(err.kind(), ErrorKind::StepFailed);
        assert_eq!(err.root_cause().kind(), ErrorKind::Cancelled);
    }

    #[test]
    fn test_display_includes_cause() {
        let err = RunError::step_failed("writer", RunError::fatal("no model"));
        assert_eq!(err.to_string(), "Step 'writer' failed: Fatal error: no model");
    }
}
