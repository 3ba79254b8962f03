//! Run lifecycle status and event payloads

use runloom_core::ErrorKind;
use serde::{Deserialize, Serialize};

/// Status of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Created, not yet awaited
    Pending,
    /// Handler is executing
    Running,
    /// Waiting before the next attempt
    Retrying,
    /// Handler produced a value
    Resolved,
    /// Handler failed for good
    Failed,
    /// Abort signal observed
    Cancelled,
}

impl RunStatus {
    /// Check if the status represents a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Resolved | Self::Failed | Self::Cancelled)
    }

    /// Check if the status represents an active state
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Running | Self::Retrying)
    }
}

/// Payload of `run.start`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartEvent {
    /// 1-based attempt number
    pub attempt: u32,
}

/// Payload of `run.retry`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryEvent {
    /// The attempt that failed
    pub attempt: u32,
    pub max_retries: u32,
    pub delay_ms: u64,
    pub kind: ErrorKind,
    pub message: String,
}

/// Payload of `run.error` and of component `error` events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEvent {
    pub kind: ErrorKind,
    pub message: String,
    /// Handler invocations made before giving up
    pub attempts: u32,
}

/// Payload of `run.success`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuccessEvent<T> {
    pub value: T,
}

/// Payload of `run.finish`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinishEvent {
    pub status: RunStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert!(RunStatus::Resolved.is_terminal());
        assert!(RunStatus::Cancelled.is_terminal());
        assert!(!RunStatus::Retrying.is_terminal());
        assert!(RunStatus::Retrying.is_active());
        assert!(!RunStatus::Pending.is_active());
    }

    #[test]
    fn test_status_serialization() {
        let json = serde_json::to_string(&FinishEvent {
            status: RunStatus::Cancelled,
        })
        .unwrap();
        assert_eq!(json, r#"{"status":"cancelled"}"#);
    }
}
