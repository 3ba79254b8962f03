//! Event metadata and payloads

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifies the component that owns an emitter
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Creator {
    /// Component kind, e.g. `chat_model`, `agent`, `workflow`
    pub kind: String,
    /// Instance name, e.g. `ollama:granite3.3`
    pub name: String,
}

impl Creator {
    pub fn new(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            name: name.into(),
        }
    }

    pub fn root() -> Self {
        Self::new("root", "root")
    }
}

impl fmt::Display for Creator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.name)
    }
}

/// Correlates events of nested runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventTrace {
    pub run_id: Uuid,
    pub parent_run_id: Option<Uuid>,
}

/// Immutable record attached to every emitted event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventMeta {
    /// Unique event ID
    pub id: Uuid,
    /// Event name, the last path segment
    pub name: String,
    /// Fully qualified path at emission time (`namespace.name`)
    pub path: String,
    /// Owner of the emitting node
    pub creator: Creator,
    /// Timestamp
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace: Option<EventTrace>,
}

impl EventMeta {
    /// Path segments, namespace first
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.path.split('.')
    }
}

/// Type-erased event payload, cheap to clone.
#[derive(Clone)]
pub struct EventPayload(Arc<dyn Any + Send + Sync>);

impl EventPayload {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self(Arc::new(value))
    }

    pub fn empty() -> Self {
        Self::new(())
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref::<T>()
    }

    pub fn is<T: Any>(&self) -> bool {
        self.0.is::<T>()
    }
}

impl fmt::Debug for EventPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EventPayload(..)")
    }
}

/// Payload of the `error` event raised when a listener fails
#[derive(Debug, Clone)]
pub struct ListenerFailure {
    /// The event whose delivery failed
    pub event: EventMeta,
    pub message: String,
}
