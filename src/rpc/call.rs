//! # Call
//!
//! The lifecycle of a single method invocation, both as seen by the caller
//! (a [`Call`] handle, spec §3.2 "Call (client-side)") and by the running
//! handler (a [`Cookie`], spec §3.2 "Call (server-side)").

use crate::error::RpcError;
use crate::object::Object;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, Notify};

/// Status of an in-flight or completed call (spec §3.2).
#[derive(Debug, Clone, PartialEq)]
pub enum CallStatus {
    Pending,
    Progress,
    Done(Object),
    Error(RpcError),
    Aborted,
}

impl CallStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, CallStatus::Done(_) | CallStatus::Error(_) | CallStatus::Aborted)
    }
}

/// Client-side handle to an in-flight or completed call. Cheap to clone —
/// every clone observes the same underlying state, the way a C API would
/// hand out a refcounted pointer to the same call object.
#[derive(Clone)]
pub struct Call {
    inner: Arc<CallInner>,
}

struct CallInner {
    id: String,
    method: String,
    args: Object,
    status: Mutex<CallStatus>,
    fragments: Mutex<VecDeque<Object>>,
    completion: Notify,
    fragment_available: Notify,
    abort_tx: Mutex<Option<mpsc::UnboundedSender<String>>>,
}

impl Call {
    pub fn new(id: String, method: String, args: Object, abort_tx: mpsc::UnboundedSender<String>) -> Self {
        Self {
            inner: Arc::new(CallInner {
                id,
                method,
                args,
                status: Mutex::new(CallStatus::Pending),
                fragments: Mutex::new(VecDeque::new()),
                completion: Notify::new(),
                fragment_available: Notify::new(),
                abort_tx: Mutex::new(Some(abort_tx)),
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn method(&self) -> &str {
        &self.inner.method
    }

    pub fn args(&self) -> &Object {
        &self.inner.args
    }

    pub async fn status(&self) -> CallStatus {
        self.inner.status.lock().await.clone()
    }

    /// Transition to a terminal (or Progress) state and wake anyone waiting
    /// on [`Call::wait`].
    pub(crate) async fn set_status(&self, status: CallStatus) {
        let mut guard = self.inner.status.lock().await;
        *guard = status;
        drop(guard);
        self.inner.completion.notify_waiters();
    }

    pub(crate) async fn push_fragment(&self, value: Object) {
        self.inner.fragments.lock().await.push_back(value);
        self.inner.fragment_available.notify_waiters();
    }

    /// Pop the next buffered fragment, waiting for one to arrive if the
    /// queue is empty and the call hasn't reached a terminal state yet
    /// (spec §5: "streaming reads suspend when the fragment queue is
    /// empty").
    pub async fn next_fragment(&self) -> Option<Object> {
        loop {
            // Register for the next wakeup before checking state: `Notify`
            // snapshots its notify_waiters() generation when this future is
            // created, so a push_fragment()/set_status() that lands after
            // this line but before the `.await` below is still observed
            // instead of being lost.
            let notified = self.inner.fragment_available.notified();
            if let Some(value) = self.inner.fragments.lock().await.pop_front() {
                return Some(value);
            }
            if self.status().await.is_terminal() {
                return self.inner.fragments.lock().await.pop_front();
            }
            notified.await;
        }
    }

    /// Block until the call reaches a terminal state or `timeout` elapses.
    pub async fn wait(&self, timeout: Option<std::time::Duration>) -> Result<(), RpcError> {
        loop {
            // Same ordering as `next_fragment`: create the `Notified` future
            // before checking status, so a concurrent `set_status` can't
            // notify between the check and the await and be missed.
            let notified = self.inner.completion.notified();
            if self.status().await.is_terminal() {
                return Ok(());
            }
            match timeout {
                Some(d) => {
                    tokio::time::timeout(d, notified).await.map_err(|_| RpcError::timeout())?;
                }
                None => notified.await,
            }
        }
    }

    /// Resolve to the call's final value: the result `Object` on success,
    /// or the `RpcError` on failure/timeout/abort.
    pub async fn result(&self) -> Result<Object, RpcError> {
        match self.status().await {
            CallStatus::Done(obj) => Ok(obj),
            CallStatus::Error(e) => Err(e),
            CallStatus::Aborted => Err(RpcError::call_aborted()),
            _ => {
                self.wait(None).await?;
                Box::pin(self.result()).await
            }
        }
    }

    /// Send a best-effort abort envelope and transition locally to
    /// `Aborted` (spec §4.3 "Abort").
    pub async fn abort(&self) {
        self.set_status(CallStatus::Aborted).await;
        let sender = self.inner.abort_tx.lock().await.take();
        if let Some(sender) = sender {
            let _ = sender.send(self.inner.id.clone());
        }
    }
}

/// Server-side per-call context handed to a method handler (spec §3.2, §4.4
/// "cookie"). A handler uses this to yield fragments, finish with a result,
/// fail with an error, or check whether the client aborted.
#[derive(Clone)]
pub struct Cookie {
    inner: Arc<CookieInner>,
}

struct CookieInner {
    id: String,
    method: String,
    args: Object,
    aborted: AtomicBool,
    fragment_tx: mpsc::Sender<Object>,
}

impl Cookie {
    pub fn new(id: String, method: String, args: Object, fragment_tx: mpsc::Sender<Object>) -> Self {
        Self {
            inner: Arc::new(CookieInner {
                id,
                method,
                args,
                aborted: AtomicBool::new(false),
                fragment_tx,
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn method(&self) -> &str {
        &self.inner.method
    }

    pub fn args(&self) -> &Object {
        &self.inner.args
    }

    /// Cooperative cancellation check (spec §5: "the handler's cooperative
    /// cancellation check"). Handlers that stream should poll this between
    /// fragments.
    pub fn is_aborted(&self) -> bool {
        self.inner.aborted.load(Ordering::SeqCst)
    }

    pub(crate) fn mark_aborted(&self) {
        self.inner.aborted.store(true, Ordering::SeqCst);
    }

    /// Yield one fragment. Suspends (back-pressure) when the bounded
    /// fragment queue to the connection is full (spec §4.3, §5).
    pub async fn yield_fragment(&self, value: Object) -> Result<(), RpcError> {
        self.inner
            .fragment_tx
            .send(value)
            .await
            .map_err(|_| RpcError::connection_closed())
    }
}
