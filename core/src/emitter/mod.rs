//! Hierarchical event emitter
//!
//! Emitters form a tree keyed by dot-separated namespaces. An event emitted
//! on a node is delivered to that node's listeners first, then ascends to
//! each ancestor in turn. Within a node, listeners run in registration order
//! over a snapshot of the listener list, so registration or removal during
//! delivery never disturbs the current round.
//!
//! A failing listener (error or panic) does not stop delivery. Failures are
//! collected and re-emitted as an `error` event from the same node once the
//! round is over, except when the failing round was itself an `error` event.

mod event;
mod matcher;

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use chrono::Utc;
use parking_lot::Mutex;
use tracing::warn;
use uuid::Uuid;

use crate::error::Error;

pub use event::{Creator, EventMeta, EventPayload, EventTrace, ListenerFailure};
pub use matcher::{EventPredicate, Matcher, Segment};

/// Error type listeners may return
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Result returned by listener callbacks
pub type ListenerResult = std::result::Result<(), BoxError>;

type Callback = Arc<dyn Fn(&EventPayload, &EventMeta) -> ListenerResult + Send + Sync>;

static NEXT_LISTENER_ID: AtomicU64 = AtomicU64::new(1);

/// Listener registration options
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EmitterOptions {
    /// Also receive events emitted on descendant emitters
    pub match_nested: bool,
    /// Dispose after the first delivery
    pub once: bool,
}

impl EmitterOptions {
    pub fn nested() -> Self {
        Self {
            match_nested: true,
            once: false,
        }
    }

    pub fn once() -> Self {
        Self {
            match_nested: false,
            once: true,
        }
    }
}

/// Settings for a child emitter
#[derive(Debug, Clone, Default)]
pub struct ChildOptions {
    /// Segments appended to the parent namespace (may be empty)
    pub namespace: Vec<String>,
    /// Defaults to the parent's creator
    pub creator: Option<Creator>,
    /// Defaults to the parent's group
    pub group_id: Option<String>,
    /// Defaults to the parent's trace
    pub trace: Option<EventTrace>,
}

struct Listener {
    id: u64,
    matcher: Matcher,
    options: EmitterOptions,
    callback: Callback,
}

struct EmitterInner {
    namespace: Vec<String>,
    creator: Creator,
    group_id: Option<String>,
    trace: Option<EventTrace>,
    parent: Option<Weak<EmitterInner>>,
    listeners: Mutex<Vec<Arc<Listener>>>,
    children: Mutex<Vec<Weak<EmitterInner>>>,
}

impl EmitterInner {
    fn remove_listener(&self, id: u64) -> bool {
        let mut listeners = self.listeners.lock();
        let before = listeners.len();
        listeners.retain(|listener| listener.id != id);
        listeners.len() != before
    }

    fn destroy(&self) {
        self.listeners.lock().clear();
        let children = std::mem::take(&mut *self.children.lock());
        for child in children.iter().filter_map(Weak::upgrade) {
            child.destroy();
        }
    }
}

/// Handle to a node of the emitter tree. Clones share the node.
#[derive(Clone)]
pub struct Emitter {
    inner: Arc<EmitterInner>,
}

/// Disposer returned by [`Emitter::on`]. Dropping it keeps the listener.
#[derive(Debug, Clone)]
pub struct Subscription {
    emitter: Weak<EmitterInner>,
    id: u64,
}

impl Subscription {
    /// Remove the listener. Returns `false` if it was already gone.
    pub fn dispose(&self) -> bool {
        self.emitter
            .upgrade()
            .map(|inner| inner.remove_listener(self.id))
            .unwrap_or(false)
    }
}

impl std::fmt::Debug for EmitterInner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Emitter")
            .field("namespace", &self.namespace.join("."))
            .field("creator", &self.creator)
            .finish()
    }
}

impl std::fmt::Debug for Emitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.inner.fmt(f)
    }
}

impl Emitter {
    /// Create a root emitter. Construct one per process and pass it down.
    pub fn root() -> Self {
        Self {
            inner: Arc::new(EmitterInner {
                namespace: Vec::new(),
                creator: Creator::root(),
                group_id: None,
                trace: None,
                parent: None,
                listeners: Mutex::new(Vec::new()),
                children: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Create a child whose namespace is this namespace plus `namespace`
    pub fn child(&self, namespace: &[&str], creator: Creator) -> Self {
        self.child_with(ChildOptions {
            namespace: namespace.iter().map(|s| s.to_string()).collect(),
            creator: Some(creator),
            ..Default::default()
        })
    }

    pub fn child_with(&self, options: ChildOptions) -> Self {
        let mut namespace = self.inner.namespace.clone();
        namespace.extend(
            options
                .namespace
                .iter()
                .flat_map(|segment| segment.split('.'))
                .filter(|segment| !segment.is_empty())
                .map(str::to_string),
        );

        let child = Self {
            inner: Arc::new(EmitterInner {
                namespace,
                creator: options.creator.unwrap_or_else(|| self.inner.creator.clone()),
                group_id: options.group_id.or_else(|| self.inner.group_id.clone()),
                trace: options.trace.or(self.inner.trace),
                parent: Some(Arc::downgrade(&self.inner)),
                listeners: Mutex::new(Vec::new()),
                children: Mutex::new(Vec::new()),
            }),
        };

        let mut children = self.inner.children.lock();
        children.retain(|c| c.strong_count() > 0);
        children.push(Arc::downgrade(&child.inner));

        child
    }

    pub fn namespace(&self) -> &[String] {
        &self.inner.namespace
    }

    pub fn creator(&self) -> &Creator {
        &self.inner.creator
    }

    pub fn trace(&self) -> Option<EventTrace> {
        self.inner.trace
    }

    pub fn group_id(&self) -> Option<&str> {
        self.inner.group_id.as_deref()
    }

    /// Number of listeners registered directly on this node
    pub fn listener_count(&self) -> usize {
        self.inner.listeners.lock().len()
    }

    /// Register a listener
    pub fn on<M, F>(&self, matcher: M, callback: F, options: EmitterOptions) -> Subscription
    where
        M: Into<Matcher>,
        F: Fn(&EventPayload, &EventMeta) -> ListenerResult + Send + Sync + 'static,
    {
        let id = NEXT_LISTENER_ID.fetch_add(1, Ordering::Relaxed);
        self.inner.listeners.lock().push(Arc::new(Listener {
            id,
            matcher: matcher.into(),
            options,
            callback: Arc::new(callback),
        }));
        Subscription {
            emitter: Arc::downgrade(&self.inner),
            id,
        }
    }

    /// Register a listener that only receives payloads of type `T`
    pub fn on_typed<T, M, F>(&self, matcher: M, callback: F, options: EmitterOptions) -> Subscription
    where
        T: 'static,
        M: Into<Matcher>,
        F: Fn(&T, &EventMeta) -> ListenerResult + Send + Sync + 'static,
    {
        self.on(
            matcher,
            move |payload, meta| match payload.downcast_ref::<T>() {
                Some(value) => callback(value, meta),
                None => Ok(()),
            },
            options,
        )
    }

    /// Emit an event from this node
    pub fn emit(&self, name: &str, payload: EventPayload) {
        let meta = self.create_meta(name);
        let failures = self.dispatch(&meta, &payload);

        for failure in failures {
            warn!(path = %meta.path, error = %failure, "event listener failed");
            if meta.name == "error" {
                continue;
            }
            let message = failure.to_string();
            self.emit(
                "error",
                EventPayload::new(ListenerFailure {
                    event: meta.clone(),
                    message,
                }),
            );
        }
    }

    /// Remove every listener on this node and its live descendants
    pub fn destroy(&self) {
        self.inner.destroy();
    }

    fn create_meta(&self, name: &str) -> EventMeta {
        let path = if self.inner.namespace.is_empty() {
            name.to_string()
        } else {
            format!("{}.{}", self.inner.namespace.join("."), name)
        };

        EventMeta {
            id: Uuid::new_v4(),
            name: name.to_string(),
            path,
            creator: self.inner.creator.clone(),
            created_at: Utc::now(),
            group_id: self.inner.group_id.clone(),
            trace: self.inner.trace,
        }
    }

    fn dispatch(&self, meta: &EventMeta, payload: &EventPayload) -> Vec<Error> {
        let segments: Vec<&str> = meta.path.split('.').collect();
        let mut failures = Vec::new();
        let mut node = Some(Arc::clone(&self.inner));
        let mut depth = 0;

        while let Some(current) = node {
            let snapshot: Vec<Arc<Listener>> = current.listeners.lock().clone();
            let offset = current.namespace.len().min(segments.len());
            let relative = &segments[offset..];

            for listener in snapshot {
                if !listener
                    .matcher
                    .matches(meta, relative, depth, listener.options.match_nested)
                {
                    continue;
                }
                if listener.options.once && !current.remove_listener(listener.id) {
                    continue;
                }

                let callback = Arc::clone(&listener.callback);
                match panic::catch_unwind(AssertUnwindSafe(|| callback(payload, meta))) {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => failures.push(Error::Listener {
                        path: meta.path.clone(),
                        message: err.to_string(),
                    }),
                    Err(panic) => failures.push(Error::Listener {
                        path: meta.path.clone(),
                        message: panic_message(panic.as_ref()),
                    }),
                }
            }

            node = current.parent.as_ref().and_then(Weak::upgrade);
            depth += 1;
        }

        failures
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        format!("listener panicked: {message}")
    } else if let Some(message) = panic.downcast_ref::<String>() {
        format!("listener panicked: {message}")
    } else {
        "listener panicked".to_string()
    }
}
