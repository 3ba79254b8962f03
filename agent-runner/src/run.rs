//! Run - a cancellable, observable, retryable unit of work
//!
//! A [`Run`] wraps a handler with its own emitter node, abort signal and
//! retry policy. Runs are lazy: nothing executes until the run is awaited
//! (or spawned), so observers chained with [`Run::on`] before that point
//! see every event.
//!
//! Lifecycle events go to the `run` child of the run's emitter:
//! `run.start`, `run.retry`, then exactly one of `run.success` /
//! `run.error`, then `run.finish`. Handlers emit their own events on
//! [`RunContext::emitter`].

use std::any::Any;
use std::future::{Future, IntoFuture};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use runloom_core::emitter::{ChildOptions, EventTrace, ListenerResult};
use runloom_core::{
    AbortSignal, Emitter, EmitterOptions, Error, EventMeta, EventPayload, Matcher,
};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{Result, RunError};
use crate::event::{ErrorEvent, FinishEvent, RetryEvent, RunStatus, StartEvent, SuccessEvent};
use crate::retry::RetryPolicy;

type Handler<T> = Arc<dyn Fn(RunContext) -> BoxFuture<'static, Result<T>> + Send + Sync>;

/// Settings for a single run
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Caller's signal; the run derives a child from it
    pub signal: Option<AbortSignal>,
    pub retry: RetryPolicy,
    /// Copied into the metadata of every event
    pub group_id: Option<String>,
    /// Set for runs started from inside another run's handler
    pub parent: Option<ParentRun>,
}

impl RunOptions {
    pub fn with_signal(mut self, signal: AbortSignal) -> Self {
        self.signal = Some(signal);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_group_id(mut self, group_id: impl Into<String>) -> Self {
        self.group_id = Some(group_id.into());
        self
    }
}

/// Link from a nested run to the run that started it
#[derive(Debug, Clone)]
pub struct ParentRun {
    pub run_id: Uuid,
    pub emitter: Emitter,
}

/// What a handler sees while it executes
#[derive(Debug, Clone)]
pub struct RunContext {
    pub run_id: Uuid,
    pub parent_run_id: Option<Uuid>,
    /// 1-based attempt number
    pub attempt: u32,
    pub emitter: Emitter,
    pub signal: AbortSignal,
    pub created_at: DateTime<Utc>,
    group_id: Option<String>,
}

impl RunContext {
    /// Options for a run started from this handler: it is cancelled with
    /// this run and its events surface below this run's emitter.
    pub fn child_options(&self) -> RunOptions {
        RunOptions {
            signal: Some(self.signal.clone()),
            retry: RetryPolicy::none(),
            group_id: self.group_id.clone(),
            parent: Some(ParentRun {
                run_id: self.run_id,
                emitter: self.emitter.clone(),
            }),
        }
    }

    /// Emit a handler event on the run's emitter
    pub fn emit<P: Any + Send + Sync>(&self, name: &str, payload: P) {
        self.emitter.emit(name, EventPayload::new(payload));
    }

    /// Fail with a cancellation error if the run was aborted
    pub fn check(&self) -> Result<()> {
        self.signal.check().map_err(RunError::from)
    }
}

/// Cloneable view of a run that outlives `await`
#[derive(Debug, Clone)]
pub struct RunHandle {
    run_id: Uuid,
    status: Arc<Mutex<RunStatus>>,
    signal: AbortSignal,
}

impl RunHandle {
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn status(&self) -> RunStatus {
        *self.status.lock()
    }

    /// Abort the run. Returns `false` if it was already aborted.
    pub fn abort(&self, reason: impl Into<String>) -> bool {
        self.signal.signal(reason)
    }
}

/// A pending run resolving to `T`
pub struct Run<T> {
    run_id: Uuid,
    parent_run_id: Option<Uuid>,
    emitter: Emitter,
    // keeps the owning component's node (and its parent link) alive
    _owner: Emitter,
    signal: AbortSignal,
    retry: RetryPolicy,
    group_id: Option<String>,
    status: Arc<Mutex<RunStatus>>,
    handler: Handler<T>,
}

impl<T> Run<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create a run owned by the component emitter `owner`.
    ///
    /// Top-level runs get an emitter node sharing the owner's namespace;
    /// nested runs get a node below the parent run's emitter, named after
    /// the owner's namespace.
    pub fn new<F, Fut>(owner: &Emitter, options: RunOptions, handler: F) -> Self
    where
        F: Fn(RunContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let run_id = Uuid::new_v4();
        let parent_run_id = options.parent.as_ref().map(|parent| parent.run_id);
        let trace = EventTrace {
            run_id,
            parent_run_id,
        };

        let emitter = match &options.parent {
            Some(parent) => parent.emitter.child_with(ChildOptions {
                namespace: owner.namespace().to_vec(),
                creator: Some(owner.creator().clone()),
                group_id: options.group_id.clone(),
                trace: Some(trace),
            }),
            None => owner.child_with(ChildOptions {
                namespace: Vec::new(),
                creator: None,
                group_id: options.group_id.clone(),
                trace: Some(trace),
            }),
        };

        let signal = match &options.signal {
            Some(signal) => signal.child(),
            None => AbortSignal::new(),
        };

        Self {
            run_id,
            parent_run_id,
            emitter,
            _owner: owner.clone(),
            signal,
            retry: options.retry,
            group_id: options.group_id,
            status: Arc::new(Mutex::new(RunStatus::Pending)),
            handler: Arc::new(move |ctx: RunContext| handler(ctx).boxed()),
        }
    }

    /// Observe events on this run's emitter, chaining
    pub fn on<M, F>(self, matcher: M, callback: F) -> Self
    where
        M: Into<Matcher>,
        F: Fn(&EventPayload, &EventMeta) -> ListenerResult + Send + Sync + 'static,
    {
        self.emitter.on(matcher, callback, EmitterOptions::default());
        self
    }

    pub fn on_with<M, F>(self, matcher: M, options: EmitterOptions, callback: F) -> Self
    where
        M: Into<Matcher>,
        F: Fn(&EventPayload, &EventMeta) -> ListenerResult + Send + Sync + 'static,
    {
        self.emitter.on(matcher, callback, options);
        self
    }

    /// Register several observers at once
    pub fn observe<F>(self, setup: F) -> Self
    where
        F: FnOnce(&Emitter),
    {
        setup(&self.emitter);
        self
    }

    pub fn emitter(&self) -> &Emitter {
        &self.emitter
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn status(&self) -> RunStatus {
        *self.status.lock()
    }

    pub fn signal(&self) -> &AbortSignal {
        &self.signal
    }

    /// Abort this run only; the caller's signal is left untouched.
    pub fn abort(&self, reason: impl Into<String>) -> bool {
        self.signal.signal(reason)
    }

    pub fn handle(&self) -> RunHandle {
        RunHandle {
            run_id: self.run_id,
            status: Arc::clone(&self.status),
            signal: self.signal.clone(),
        }
    }

    /// Start executing on the tokio runtime
    pub fn spawn(self) -> JoinHandle<Result<T>> {
        tokio::spawn(self.execute())
    }

    fn set_status(&self, status: RunStatus) {
        *self.status.lock() = status;
    }

    fn cancelled_error(&self) -> RunError {
        let reason = self.signal.reason().unwrap_or_else(|| "aborted".to_string());
        RunError::Core(Error::cancelled(reason))
    }

    async fn execute(self) -> Result<T> {
        let lifecycle = self.emitter.child(&["run"], self.emitter.creator().clone());
        let path = self.emitter.namespace().join(".");
        let created_at = Utc::now();
        let mut attempts = 0u32;

        let outcome = loop {
            if self.signal.is_signaled() {
                break Err(self.cancelled_error());
            }

            attempts += 1;
            self.set_status(RunStatus::Running);
            if attempts == 1 {
                info!(run_id = %self.run_id, path = %path, "run started");
            } else {
                debug!(run_id = %self.run_id, attempt = attempts, "run attempt started");
            }
            lifecycle.emit("start", EventPayload::new(StartEvent { attempt: attempts }));

            let ctx = RunContext {
                run_id: self.run_id,
                parent_run_id: self.parent_run_id,
                attempt: attempts,
                emitter: self.emitter.clone(),
                signal: self.signal.clone(),
                created_at,
                group_id: self.group_id.clone(),
            };

            let result = tokio::select! {
                biased;
                _ = self.signal.cancelled() => Err(self.cancelled_error()),
                result = (self.handler)(ctx) => result,
            };

            let err = match result {
                Ok(value) => break Ok(value),
                Err(err) => err,
            };

            if err.is_cancelled()
                || self.signal.is_signaled()
                || !err.is_retryable()
                || !self.retry.allows_retry(attempts)
            {
                break Err(err);
            }

            let delay = self.retry.delay_for(attempts);
            self.set_status(RunStatus::Retrying);
            warn!(
                run_id = %self.run_id,
                attempt = attempts,
                max_retries = self.retry.max_retries,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "run attempt failed, retrying"
            );
            lifecycle.emit(
                "retry",
                EventPayload::new(RetryEvent {
                    attempt: attempts,
                    max_retries: self.retry.max_retries,
                    delay_ms: delay.as_millis() as u64,
                    kind: err.kind(),
                    message: err.to_string(),
                }),
            );

            tokio::select! {
                biased;
                _ = self.signal.cancelled() => break Err(self.cancelled_error()),
                _ = tokio::time::sleep(delay) => {}
            }
        };

        let result = self.settle(&lifecycle, outcome, attempts);
        self.emitter.destroy();
        result
    }

    fn settle(&self, lifecycle: &Emitter, outcome: Result<T>, attempts: u32) -> Result<T> {
        let err = match outcome {
            Ok(value) => {
                self.set_status(RunStatus::Resolved);
                info!(run_id = %self.run_id, attempts, "run resolved");
                lifecycle.emit(
                    "success",
                    EventPayload::new(SuccessEvent {
                        value: value.clone(),
                    }),
                );
                lifecycle.emit(
                    "finish",
                    EventPayload::new(FinishEvent {
                        status: RunStatus::Resolved,
                    }),
                );
                return Ok(value);
            }
            Err(err) => err,
        };

        let status = if err.is_cancelled() {
            info!(run_id = %self.run_id, attempts, reason = %err, "run cancelled");
            RunStatus::Cancelled
        } else {
            error!(run_id = %self.run_id, attempts, error = %err, "run failed");
            RunStatus::Failed
        };
        self.set_status(status);

        lifecycle.emit(
            "error",
            EventPayload::new(ErrorEvent {
                kind: err.kind(),
                message: err.to_string(),
                attempts,
            }),
        );
        lifecycle.emit("finish", EventPayload::new(FinishEvent { status }));

        let exhausted = status == RunStatus::Failed
            && attempts > 1
            && err.is_retryable()
            && !self.retry.allows_retry(attempts);
        if exhausted {
            Err(RunError::RetryExhausted {
                attempts,
                source: Box::new(err),
            })
        } else {
            Err(err)
        }
    }
}

impl<T> IntoFuture for Run<T>
where
    T: Clone + Send + Sync + 'static,
{
    type Output = Result<T>;
    type IntoFuture = BoxFuture<'static, Result<T>>;

    fn into_future(self) -> Self::IntoFuture {
        self.execute().boxed()
    }
}

impl<T> std::fmt::Debug for Run<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Run")
            .field("run_id", &self.run_id)
            .field("emitter", &self.emitter)
            .field("status", &*self.status.lock())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use runloom_core::Creator;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;
    use tokio_test::{assert_err, assert_ok};

    fn owner(root: &Emitter) -> Emitter {
        root.child(&["agent", "test"], Creator::new("agent", "test"))
    }

    fn fast_retry(max_retries: u32) -> RunOptions {
        RunOptions::default()
            .with_retry(RetryPolicy::new(max_retries).with_base_delay(Duration::ZERO))
    }

    /// Records lifecycle event names in delivery order
    fn lifecycle_log<T>(run: Run<T>) -> (Run<T>, Arc<Mutex<Vec<String>>>)
    where
        T: Clone + Send + Sync + 'static,
    {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&log);
        let run = run.on("run.*", move |_, meta| {
            sink.lock().push(meta.name.clone());
            Ok(())
        });
        (run, log)
    }

    #[tokio::test]
    async fn test_resolves_with_ordered_lifecycle() {
        let root = Emitter::root();
        let run = Run::new(&owner(&root), RunOptions::default(), |_ctx| async { Ok(42u32) });
        assert_eq!(run.status(), RunStatus::Pending);
        let handle = run.handle();

        let (run, log) = lifecycle_log(run);
        let value = assert_ok!(run.await);

        assert_eq!(value, 42);
        assert_eq!(*log.lock(), vec!["start", "success", "finish"]);
        assert_eq!(handle.status(), RunStatus::Resolved);
    }

    #[tokio::test]
    async fn test_success_payload_carries_value() {
        let root = Emitter::root();
        let seen = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&seen);

        let run = Run::new(&owner(&root), RunOptions::default(), |_ctx| async {
            Ok("done".to_string())
        })
        .on("run.success", move |payload, meta| {
            let event = payload.downcast_ref::<SuccessEvent<String>>();
            *slot.lock() = event.map(|e| (e.value.clone(), meta.path.clone()));
            Ok(())
        });

        assert_ok!(run.await);
        assert_eq!(
            seen.lock().clone(),
            Some(("done".to_string(), "agent.test.run.success".to_string()))
        );
    }

    #[tokio::test]
    async fn test_always_failing_run_emits_n_retries_then_one_error() {
        let root = Emitter::root();
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let run = Run::new(&owner(&root), fast_retry(3), move |_ctx| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err::<u32, _>(anyhow::anyhow!("boom").into()) }
        });
        let handle = run.handle();
        let (run, log) = lifecycle_log(run);

        let err = assert_err!(run.await);
        assert!(matches!(err, RunError::RetryExhausted { attempts: 4, .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 4);

        let log = log.lock();
        assert_eq!(log.iter().filter(|name| *name == "retry").count(), 3);
        assert_eq!(log.iter().filter(|name| *name == "error").count(), 1);
        assert!(!log.contains(&"success".to_string()));
        assert_eq!(log.last().map(String::as_str), Some("finish"));
        assert_eq!(handle.status(), RunStatus::Failed);
    }

    #[tokio::test]
    async fn test_recovers_after_retry() {
        let root = Emitter::root();
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let run = Run::new(&owner(&root), fast_retry(3), move |ctx| {
            let call = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if call < 2 {
                    Err(Error::provider("scripted", "overloaded").into())
                } else {
                    Ok(ctx.attempt)
                }
            }
        });
        let (run, log) = lifecycle_log(run);

        assert_eq!(assert_ok!(run.await), 3);
        assert_eq!(
            *log.lock(),
            vec!["start", "retry", "start", "retry", "start", "success", "finish"]
        );
    }

    #[tokio::test]
    async fn test_zero_budget_surfaces_original_error() {
        let root = Emitter::root();
        let run = Run::new(&owner(&root), RunOptions::default(), |_ctx| async {
            Err::<(), _>(Error::provider("scripted", "down").into())
        });

        let err = assert_err!(run.await);
        assert!(matches!(err, RunError::Core(Error::Provider { .. })));
    }

    #[tokio::test]
    async fn test_fatal_error_is_not_retried() {
        let root = Emitter::root();
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let run = Run::new(&owner(&root), fast_retry(5), move |_ctx| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(RunError::fatal("bad configuration")) }
        });

        let err = assert_err!(run.await);
        assert!(matches!(err, RunError::Fatal { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_fatal_error_after_retry_is_not_wrapped() {
        let root = Emitter::root();
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let run = Run::new(&owner(&root), fast_retry(5), move |_ctx| {
            let call = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if call == 0 {
                    Err::<(), _>(Error::provider("scripted", "overloaded").into())
                } else {
                    Err(RunError::fatal("bad configuration"))
                }
            }
        });
        let (run, log) = lifecycle_log(run);

        let err = assert_err!(run.await);
        assert!(matches!(err, RunError::Fatal { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(
            *log.lock(),
            vec!["start", "retry", "start", "error", "finish"]
        );
    }

    #[tokio::test]
    async fn test_abort_during_handler() {
        let root = Emitter::root();
        let errors = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&errors);

        let run = Run::new(&owner(&root), fast_retry(3), |_ctx| async {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(())
        })
        .on("run.error", move |payload, _| {
            if let Some(event) = payload.downcast_ref::<ErrorEvent>() {
                sink.lock().push(event.clone());
            }
            Ok(())
        });
        let handle = run.handle();

        tokio::spawn({
            let handle = handle.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                handle.abort("user stop");
            }
        });

        let err = assert_err!(run.await);
        assert!(err.is_cancelled());
        assert_eq!(handle.status(), RunStatus::Cancelled);

        let errors = errors.lock();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].kind, runloom_core::ErrorKind::Cancelled);
        assert_eq!(errors[0].attempts, 1);
    }

    #[tokio::test]
    async fn test_abort_during_backoff() {
        let root = Emitter::root();
        let options = RunOptions::default()
            .with_retry(RetryPolicy::new(3).with_base_delay(Duration::from_secs(30)));
        let run = Run::new(&owner(&root), options, |_ctx| async {
            Err::<(), _>(anyhow::anyhow!("flaky").into())
        });
        let handle = run.handle();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            handle.abort("shutdown");
        });

        let result = tokio::time::timeout(Duration::from_secs(5), run).await;
        let err = assert_err!(assert_ok!(result));
        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn test_parent_signal_cancels_but_run_abort_does_not_propagate_up() {
        let root = Emitter::root();
        let parent = AbortSignal::new();

        let run = Run::new(
            &owner(&root),
            RunOptions::default().with_signal(parent.clone()),
            |_ctx| async { Ok(()) },
        );
        run.abort("local");
        assert!(!parent.is_signaled());
        assert!(assert_err!(run.await).is_cancelled());

        let run = Run::new(
            &owner(&root),
            RunOptions::default().with_signal(parent.clone()),
            |ctx| async move {
                ctx.signal.cancelled().await;
                ctx.check()
            },
        );
        let task = run.spawn();
        parent.signal("shutdown");
        let err = assert_err!(assert_ok!(task.await));
        assert_eq!(err.to_string(), "Operation cancelled: shutdown");
    }

    #[tokio::test]
    async fn test_nested_run_events_reach_parent_run() {
        let root = Emitter::root();
        let tool_owner = root.child(&["tool", "calc"], Creator::new("tool", "calc"));
        let metas = Arc::new(Mutex::new(Vec::<EventMeta>::new()));
        let sink = Arc::clone(&metas);

        let run = Run::new(&owner(&root), RunOptions::default(), move |ctx| {
            let tool_owner = tool_owner.clone();
            async move {
                let inner = Run::new(&tool_owner, ctx.child_options(), |inner_ctx| async move {
                    inner_ctx.emit("progress", 50u8);
                    Ok(2u32)
                });
                let value = inner.await?;
                Ok(value * 2)
            }
        })
        .on_with("*", EmitterOptions::nested(), move |_, meta| {
            sink.lock().push(meta.clone());
            Ok(())
        });
        let parent_id = run.run_id();

        assert_eq!(assert_ok!(run.await), 4);

        let metas = metas.lock();
        let progress = metas
            .iter()
            .find(|meta| meta.name == "progress")
            .expect("nested event observed");
        assert_eq!(progress.path, "agent.test.tool.calc.progress");
        assert_eq!(progress.creator.kind, "tool");
        let trace = progress.trace.expect("trace attached");
        assert_eq!(trace.parent_run_id, Some(parent_id));
        assert!(metas
            .iter()
            .any(|meta| meta.path == "agent.test.tool.calc.run.success"));
    }

    #[tokio::test]
    async fn test_listener_failure_does_not_fail_run() {
        let root = Emitter::root();
        let run = Run::new(&owner(&root), RunOptions::default(), |_ctx| async { Ok(1u8) })
            .on("run.start", |_, _| Err("observer broke".into()));

        assert_eq!(assert_ok!(run.await), 1);
    }

    #[tokio::test]
    async fn test_observers_dropped_after_completion() {
        let root = Emitter::root();
        let run = Run::new(&owner(&root), RunOptions::default(), |_ctx| async { Ok(()) })
            .observe(|emitter| {
                emitter.on("a", |_, _| Ok(()), EmitterOptions::default());
                emitter.on("b", |_, _| Ok(()), EmitterOptions::default());
            });
        let emitter = run.emitter().clone();
        assert_eq!(emitter.listener_count(), 2);

        assert_ok!(run.await);
        assert_eq!(emitter.listener_count(), 0);
    }

    #[tokio::test]
    async fn test_group_id_reaches_event_meta() {
        let root = Emitter::root();
        let group = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&group);

        let run = Run::new(
            &owner(&root),
            RunOptions::default().with_group_id("batch-1"),
            |_ctx| async { Ok(()) },
        )
        .on("run.finish", move |_, meta| {
            *slot.lock() = meta.group_id.clone();
            Ok(())
        });

        assert_ok!(run.await);
        assert_eq!(group.lock().as_deref(), Some("batch-1"));
    }
}
