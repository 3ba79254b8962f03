//! Abort signal - one-shot cancellation shared by reference
//!
//! An [`AbortSignal`] is cloned into every run that should observe it.
//! Signaling is permanent and idempotent. Child signals created with
//! [`AbortSignal::child`] are cancelled together with their parent, never
//! the other way around.

use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::Error;

type SignalListener = Box<dyn FnOnce(&str) + Send>;

struct SignalInner {
    token: CancellationToken,
    state: Mutex<SignalState>,
}

#[derive(Default)]
struct SignalState {
    reason: Option<String>,
    listeners: Vec<SignalListener>,
    children: Vec<Weak<SignalInner>>,
}

/// Cancellation token shared between a caller and the runs it starts
#[derive(Clone)]
pub struct AbortSignal {
    inner: Arc<SignalInner>,
}

impl AbortSignal {
    /// Create a new, active signal
    pub fn new() -> Self {
        Self::from_token(CancellationToken::new())
    }

    fn from_token(token: CancellationToken) -> Self {
        Self {
            inner: Arc::new(SignalInner {
                token,
                state: Mutex::new(SignalState::default()),
            }),
        }
    }

    /// Create a signal that is cancelled whenever `self` is.
    ///
    /// The parent only keeps a weak link; links to dropped children are
    /// pruned on the next call.
    pub fn child(&self) -> Self {
        let child = Self::from_token(self.inner.token.child_token());
        let mut state = self.inner.state.lock();
        if let Some(reason) = state.reason.clone() {
            drop(state);
            child.signal(reason);
            return child;
        }
        state.children.retain(|weak| weak.strong_count() > 0);
        state.children.push(Arc::downgrade(&child.inner));
        child
    }

    /// Signal cancellation.
    ///
    /// Returns `true` if this call performed the transition; later calls are
    /// no-ops and return `false`. Live descendants get their reason before
    /// any token is cancelled.
    pub fn signal(&self, reason: impl Into<String>) -> bool {
        let reason = reason.into();
        let mut listeners = Vec::new();
        if !Self::mark(&self.inner, &reason, &mut listeners) {
            return false;
        }

        self.inner.token.cancel();

        debug!(reason = %reason, listeners = listeners.len(), "abort signal triggered");
        for listener in listeners {
            listener(&reason);
        }
        true
    }

    fn mark(inner: &Arc<SignalInner>, reason: &str, listeners: &mut Vec<SignalListener>) -> bool {
        let children = {
            let mut state = inner.state.lock();
            if state.reason.is_some() {
                return false;
            }
            state.reason = Some(reason.to_string());
            listeners.append(&mut state.listeners);
            std::mem::take(&mut state.children)
        };
        for child in children.iter().filter_map(Weak::upgrade) {
            Self::mark(&child, reason, listeners);
        }
        true
    }

    pub fn is_signaled(&self) -> bool {
        self.inner.state.lock().reason.is_some() || self.inner.token.is_cancelled()
    }

    /// The reason passed to [`signal`](Self::signal), if signaled
    pub fn reason(&self) -> Option<String> {
        self.inner.state.lock().reason.clone()
    }

    /// Register a callback invoked once when the signal fires.
    ///
    /// If the signal already fired the callback runs immediately.
    pub fn on_signal<F>(&self, callback: F)
    where
        F: FnOnce(&str) + Send + 'static,
    {
        let reason = {
            let mut state = self.inner.state.lock();
            match &state.reason {
                Some(reason) => reason.clone(),
                None => {
                    state.listeners.push(Box::new(callback));
                    return;
                }
            }
        };
        callback(&reason);
    }

    /// Fail with [`Error::Cancelled`] if the signal has fired
    pub fn check(&self) -> Result<(), Error> {
        if !self.is_signaled() {
            return Ok(());
        }
        let reason = self.reason().unwrap_or_else(|| "aborted".to_string());
        Err(Error::cancelled(reason))
    }

    /// Resolves once the signal fires
    pub async fn cancelled(&self) {
        self.inner.token.cancelled().await
    }

    /// Access the underlying token for interop with tokio-util based code
    pub fn token(&self) -> &CancellationToken {
        &self.inner.token
    }
}

impl Default for AbortSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for AbortSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AbortSignal")
            .field("reason", &self.reason())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn test_signal_is_idempotent() {
        let signal = AbortSignal::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        signal.on_signal(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert!(signal.signal("first"));
        assert!(!signal.signal("second"));

        assert!(signal.is_signaled());
        assert_eq!(signal.reason().as_deref(), Some("first"));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_check_reports_cancellation() {
        let signal = AbortSignal::new();
        assert!(signal.check().is_ok());

        signal.signal("user abort");
        let err = signal.check().unwrap_err();
        assert!(err.is_cancelled());
        assert!(err.to_string().contains("user abort"));
    }

    #[test]
    fn test_late_listener_runs_immediately() {
        let signal = AbortSignal::new();
        signal.signal("done");

        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        signal.on_signal(move |reason| {
            assert_eq!(reason, "done");
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_parent_cancels_child_only_downwards() {
        let parent = AbortSignal::new();
        let child = parent.child();
        let grandchild = child.child();

        child.signal("child only");
        assert!(!parent.is_signaled());
        assert!(grandchild.is_signaled());

        let parent = AbortSignal::new();
        let child = parent.child();
        parent.signal("shutdown");
        assert!(child.is_signaled());
        assert_eq!(child.reason().as_deref(), Some("shutdown"));
        assert!(child.token().is_cancelled());
    }

    #[test]
    fn test_dropped_children_are_pruned() {
        let parent = AbortSignal::new();
        for _ in 0..1000 {
            drop(parent.child());
        }
        let kept = parent.child();

        assert_eq!(parent.inner.state.lock().children.len(), 1);
        assert!(parent.inner.state.lock().listeners.is_empty());

        parent.signal("shutdown");
        assert_eq!(kept.reason().as_deref(), Some("shutdown"));
    }

    #[test]
    fn test_child_reason_set_before_token_cancelled() {
        let parent = AbortSignal::new();
        let observed = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&observed);
        let child = parent.child();
        let watched = child.clone();
        parent.on_signal(move |_| {
            *sink.lock() = Some((watched.token().is_cancelled(), watched.reason()));
        });

        parent.signal("shutdown");

        assert_eq!(
            *observed.lock(),
            Some((true, Some("shutdown".to_string())))
        );
        let err = child.check().unwrap_err();
        assert!(err.to_string().contains("shutdown"));
    }

    #[test]
    fn test_child_of_signaled_parent_starts_signaled() {
        let parent = AbortSignal::new();
        parent.signal("closed");

        let child = parent.child();
        assert!(child.is_signaled());
        assert!(child.token().is_cancelled());
        assert_eq!(child.reason().as_deref(), Some("closed"));
    }

    #[tokio::test]
    async fn test_woken_child_sees_reason() {
        let parent = AbortSignal::new();
        let child = parent.child();
        let handle = tokio::spawn(async move {
            child.cancelled().await;
            (child.is_signaled(), child.reason())
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        parent.signal("shutdown");

        let (signaled, reason) = handle.await.unwrap();
        assert!(signaled);
        assert_eq!(reason.as_deref(), Some("shutdown"));
    }

    #[tokio::test]
    async fn test_cancelled_future_resolves() {
        let signal = AbortSignal::new();
        let waiter = signal.clone();
        let handle = tokio::spawn(async move {
            waiter.cancelled().await;
            waiter.reason()
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        signal.signal("timeout");

        let reason = handle.await.unwrap();
        assert_eq!(reason.as_deref(), Some("timeout"));
    }
}
