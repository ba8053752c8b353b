use futures::channel::oneshot;
use or_poisoned::OrPoisoned;
use std::{
    fmt::{Debug, Formatter},
    future::Future,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
};

/// A cloneable cancellation handle.
///
/// Every dispatch owns one controller. Aborting it flips a flag that all
/// clones observe and fires any callbacks registered with
/// [`AbortController::on_abort`], exactly once. Handlers receive the
/// controller of their own run and should stop work once it is aborted;
/// whether they do or not, an aborted run's results are never published.
pub struct AbortController {
    inner: Arc<Inner>,
}

struct Inner {
    aborted: AtomicBool,
    on_abort: Mutex<Vec<Box<dyn FnOnce() + Send>>>,
}

impl AbortController {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                aborted: AtomicBool::new(false),
                on_abort: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn is_aborted(&self) -> bool {
        self.inner.aborted.load(Ordering::SeqCst)
    }

    /// Aborts the run this controller belongs to. Idempotent.
    pub fn abort(&self) {
        if self.inner.aborted.swap(true, Ordering::SeqCst) {
            return;
        }
        let callbacks =
            std::mem::take(&mut *self.inner.on_abort.lock().or_poisoned());
        for callback in callbacks {
            callback();
        }
    }

    /// Registers a callback to run on abort. If the controller is already
    /// aborted, the callback runs immediately.
    pub fn on_abort(&self, f: impl FnOnce() + Send + 'static) {
        if self.is_aborted() {
            f();
            return;
        }
        let mut callbacks = self.inner.on_abort.lock().or_poisoned();
        // re-check under the lock so the callback cannot be lost if abort()
        // drained the list between the check above and this push
        if self.inner.aborted.load(Ordering::SeqCst) {
            drop(callbacks);
            f();
        } else {
            callbacks.push(Box::new(f));
        }
    }

    /// A future that resolves when the controller is aborted, and never
    /// resolves if it is dropped without being aborted.
    ///
    /// Handlers can race this against their own I/O to stop early.
    pub fn cancelled(&self) -> impl Future<Output = ()> + Send + 'static {
        let (tx, rx) = oneshot::channel::<()>();
        self.on_abort(move || {
            let _ = tx.send(());
        });
        async move {
            match rx.await {
                Ok(()) => {}
                // the sender was dropped without an abort, so cancellation
                // can no longer happen
                Err(_) => std::future::pending().await,
            }
        }
    }
}

impl Default for AbortController {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for AbortController {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl Debug for AbortController {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AbortController")
            .field("aborted", &self.is_aborted())
            .finish()
    }
}

/// Controller equality is identity: two handles are equal when they control
/// the same run.
impl PartialEq for AbortController {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for AbortController {}

/// Reports a handler's progress as a fraction in `[0, 1]`.
#[derive(Clone)]
pub struct Progress {
    report: Arc<dyn Fn(f64) + Send + Sync>,
}

impl Progress {
    pub(crate) fn new(report: impl Fn(f64) + Send + Sync + 'static) -> Self {
        Self {
            report: Arc::new(report),
        }
    }

    /// Publishes a progress fraction, clamped to `[0, 1]`. Non-finite values
    /// are ignored.
    pub fn report(&self, fraction: f64) {
        if !fraction.is_finite() {
            return;
        }
        (self.report)(fraction.clamp(0.0, 1.0));
    }
}

impl Debug for Progress {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Progress").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn abort_is_idempotent_and_fires_callbacks_once() {
        let controller = AbortController::new();
        let fired = Arc::new(AtomicUsize::new(0));
        controller.on_abort({
            let fired = Arc::clone(&fired);
            move || {
                fired.fetch_add(1, Ordering::SeqCst);
            }
        });

        assert!(!controller.is_aborted());
        controller.abort();
        controller.abort();
        assert!(controller.is_aborted());
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn on_abort_after_abort_runs_immediately() {
        let controller = AbortController::new();
        controller.abort();
        let fired = Arc::new(AtomicUsize::new(0));
        controller.on_abort({
            let fired = Arc::clone(&fired);
            move || {
                fired.fetch_add(1, Ordering::SeqCst);
            }
        });
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn clones_share_the_flag() {
        let a = AbortController::new();
        let b = a.clone();
        b.abort();
        assert!(a.is_aborted());
        assert_eq!(a, b);
        assert_ne!(a, AbortController::new());
    }
}
