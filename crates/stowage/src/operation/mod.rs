//! Cooperative async operations.
//!
//! Every multi-tick job of the engine (downloads, catalog bootstrap, update
//! checks, history cleanup) is an [`Operation`] driven by the
//! [`Scheduler`]. An operation owns an [`OperationCore`] that enforces the
//! status machine `Init -> Processing -> {Successful, Failed}`, keeps progress
//! monotonic and delivers completion callbacks exactly once.

mod scheduler;

pub use scheduler::Scheduler;

use std::cell::{Ref, RefCell};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};

use crate::engine::Services;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationStatus {
    Init,
    Processing,
    Successful,
    Failed,
}

impl OperationStatus {
    pub fn is_done(self) -> bool {
        matches!(self, OperationStatus::Successful | OperationStatus::Failed)
    }
}

/// Terminal state handed to completion callbacks and awaiters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationOutcome {
    pub status: OperationStatus,
    pub error: Option<String>,
}

impl OperationOutcome {
    pub fn is_success(&self) -> bool {
        self.status == OperationStatus::Successful
    }
}

pub type CompletionCallback = Box<dyn FnOnce(&OperationOutcome)>;

/// Status, progress and completion bookkeeping shared by all operations.
pub struct OperationCore {
    status: OperationStatus,
    progress: f32,
    error: Option<String>,
    registered: bool,
    callbacks: Vec<CompletionCallback>,
    wakers: Vec<Waker>,
}

impl Default for OperationCore {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for OperationCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationCore")
            .field("status", &self.status)
            .field("progress", &self.progress)
            .field("error", &self.error)
            .field("callbacks", &self.callbacks.len())
            .finish()
    }
}

impl OperationCore {
    pub fn new() -> Self {
        Self {
            status: OperationStatus::Init,
            progress: 0.0,
            error: None,
            registered: false,
            callbacks: Vec::new(),
            wakers: Vec::new(),
        }
    }

    pub fn status(&self) -> OperationStatus {
        self.status
    }

    pub fn progress(&self) -> f32 {
        self.progress
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn is_done(&self) -> bool {
        self.status.is_done()
    }

    /// Raise progress; lower values and updates after finishing are ignored.
    pub fn set_progress(&mut self, progress: f32) {
        if self.is_done() || progress.is_nan() {
            return;
        }
        self.progress = self.progress.max(progress.clamp(0.0, 1.0));
    }

    /// Move to a terminal state. `None` means success.
    ///
    /// Returns `false` if the operation had already finished, in which case
    /// nothing changes.
    pub fn finish(&mut self, error: Option<String>) -> bool {
        if self.is_done() {
            return false;
        }
        self.progress = 1.0;
        self.status = match error {
            None => OperationStatus::Successful,
            Some(_) => OperationStatus::Failed,
        };
        self.error = error;
        true
    }

    pub fn cancel(&mut self) -> bool {
        self.finish(Some("cancelled".to_string()))
    }

    pub fn outcome(&self) -> OperationOutcome {
        OperationOutcome {
            status: self.status,
            error: self.error.clone(),
        }
    }

    fn begin(&mut self) {
        if self.status == OperationStatus::Init {
            self.status = OperationStatus::Processing;
        }
    }
}

/// What an operation can reach while it runs.
pub struct OperationContext<'a> {
    pub services: &'a mut Services,
}

impl<'a> OperationContext<'a> {
    pub fn new(services: &'a mut Services) -> Self {
        Self { services }
    }

    /// Poll the tick budget; long loops return early once this is `true`.
    pub fn is_busy(&self) -> bool {
        self.services.budget.is_busy()
    }
}

/// A unit of multi-tick work.
///
/// Implementations finish through [`OperationCore::finish`]; returning from
/// `on_update` without finishing means "call me again next tick".
pub trait Operation: 'static {
    fn core(&self) -> &OperationCore;

    fn core_mut(&mut self) -> &mut OperationCore;

    fn name(&self) -> &'static str;

    /// One-shot setup, called on the first tick after submission.
    fn on_start(&mut self, _cx: &mut OperationContext<'_>) {}

    /// Called every tick while processing.
    fn on_update(&mut self, cx: &mut OperationContext<'_>);
}

/// Fire pending callbacks and wake awaiters of a finished operation.
///
/// The borrow is released before any callback runs.
pub(crate) fn deliver<O: Operation + ?Sized>(op: &RefCell<O>) {
    let (callbacks, wakers, outcome) = {
        let mut op = op.borrow_mut();
        let core = op.core_mut();
        if !core.is_done() {
            return;
        }
        (
            std::mem::take(&mut core.callbacks),
            std::mem::take(&mut core.wakers),
            core.outcome(),
        )
    };
    for callback in callbacks {
        callback(&outcome);
    }
    for waker in wakers {
        waker.wake();
    }
}

/// Shared handle to a submitted or not yet submitted operation.
pub struct OperationHandle<T: Operation> {
    inner: Rc<RefCell<T>>,
}

impl<T: Operation> Clone for OperationHandle<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Operation> OperationHandle<T> {
    pub fn new(operation: T) -> Self {
        Self {
            inner: Rc::new(RefCell::new(operation)),
        }
    }

    pub fn status(&self) -> OperationStatus {
        self.inner.borrow().core().status()
    }

    pub fn progress(&self) -> f32 {
        self.inner.borrow().core().progress()
    }

    pub fn error(&self) -> Option<String> {
        self.inner.borrow().core().error().map(str::to_string)
    }

    pub fn is_done(&self) -> bool {
        self.status().is_done()
    }

    pub fn outcome(&self) -> OperationOutcome {
        self.inner.borrow().core().outcome()
    }

    /// Borrow the operation to read its results.
    pub fn get(&self) -> Ref<'_, T> {
        self.inner.borrow()
    }

    /// Register a completion callback.
    ///
    /// Callbacks fire once, in registration order. Registering on an already
    /// finished operation fires immediately.
    pub fn on_completed(&self, callback: impl FnOnce(&OperationOutcome) + 'static) {
        let outcome = {
            let mut op = self.inner.borrow_mut();
            let core = op.core_mut();
            if !core.is_done() {
                core.callbacks.push(Box::new(callback));
                return;
            }
            core.outcome()
        };
        callback(&outcome);
    }

    /// Mark the operation failed with `"cancelled"`.
    ///
    /// Work already handed to the I/O pool keeps running; its result is
    /// ignored.
    pub fn cancel(&self) {
        let cancelled = self.inner.borrow_mut().core_mut().cancel();
        if cancelled {
            tracing::debug!(operation = self.inner.borrow().name(), "operation cancelled");
            deliver(&*self.inner);
        }
    }

    /// Future resolving with the outcome once the operation finishes.
    pub fn completion(&self) -> Completion {
        Completion {
            operation: self.erased(),
        }
    }

    pub(crate) fn erased(&self) -> Rc<RefCell<dyn Operation>> {
        self.inner.clone()
    }
}

/// Awaitable view of an operation; observes the same terminal event as the
/// completion callbacks.
pub struct Completion {
    operation: Rc<RefCell<dyn Operation>>,
}

impl Future for Completion {
    type Output = OperationOutcome;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut op = self.operation.borrow_mut();
        let core = op.core_mut();
        if core.is_done() {
            Poll::Ready(core.outcome())
        } else {
            if !core.wakers.iter().any(|w| w.will_wake(cx.waker())) {
                core.wakers.push(cx.waker().clone());
            }
            Poll::Pending
        }
    }
}
