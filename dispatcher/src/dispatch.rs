use crate::{
    abort::{AbortController, Progress},
    error::DispatchError,
};
use futures::{channel::oneshot, FutureExt};
use or_poisoned::OrPoisoned;
use std::{
    future::Future,
    marker::PhantomData,
    pin::Pin,
    sync::{Arc, Mutex},
    time::Duration,
};
use whispr::{Cell, ReadCell, Subscription};

/// The externally observable state of a dispatch.
#[derive(Clone, Debug, PartialEq)]
pub enum DispatchPayload<O> {
    /// Work is in flight. `progress` is a fraction in `[0, 1]`.
    Loading { progress: f64 },
    /// The handler resolved.
    Ready { data: O },
    /// The handler failed; the failure is state, not a thrown error.
    Failed { error: DispatchError },
}

impl<O> DispatchPayload<O> {
    pub fn is_loading(&self) -> bool {
        matches!(self, DispatchPayload::Loading { .. })
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, DispatchPayload::Ready { .. })
    }

    pub fn data(&self) -> Option<&O> {
        match self {
            DispatchPayload::Ready { data } => Some(data),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&DispatchError> {
        match self {
            DispatchPayload::Failed { error } => Some(error),
            _ => None,
        }
    }
}

/// A payload paired with the controller of the run that produced it.
///
/// At most one controller is current at any time: every dispatch aborts the
/// previous controller before installing its own. Equality compares the
/// controller by identity and the payload by value, so two loading states
/// from different dispatches are different states.
#[derive(Clone, Debug, PartialEq)]
pub struct DispatchState<O> {
    pub controller: AbortController,
    pub payload: DispatchPayload<O>,
}

type BoxedHandler<I, O> = Arc<
    dyn Fn(
            I,
            Progress,
            AbortController,
        )
            -> Pin<Box<dyn Future<Output = Result<O, DispatchError>> + Send>>
        + Send
        + Sync,
>;

/// Runs an async handler whenever a reactive input changes, exposing the
/// result as a reactive `loading | ready | failed` state.
///
/// ```
/// # use std::time::Duration;
/// # use dispatcher::Dispatcher;
/// # use whispr::Cell;
/// # tokio_test::block_on(async move {
/// let query = Cell::new(String::from("a"));
/// let results = Dispatcher::new(&query, Duration::ZERO, |q: String, _progress, _abort| async move {
///     Ok(format!("results for {q}"))
/// });
///
/// query.set("ab".into());
/// results.ready().await;
/// assert_eq!(results.data().get(), Some("results for ab".into()));
/// # });
/// ```
///
/// The input cell's own equality filter provides change detection: writing an
/// equal value does not re-dispatch. Within one synchronous burst of input
/// writes, each write aborts the run before it, so only the last value's run
/// can ever publish.
pub struct Dispatcher<I, O> {
    state: Cell<DispatchState<O>>,
    _input_sub: Arc<Subscription>,
    marker: PhantomData<fn(I)>,
}

impl<I, O> Clone for Dispatcher<I, O> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
            _input_sub: Arc::clone(&self._input_sub),
            marker: PhantomData,
        }
    }
}

impl<I, O> Dispatcher<I, O>
where
    I: Clone + PartialEq + Send + Sync + 'static,
    O: Clone + PartialEq + Send + Sync + 'static,
{
    /// Subscribes to `input` and dispatches eagerly for its current value,
    /// then again on every change.
    ///
    /// `debounce` delays the handler invocation after each change; a change
    /// arriving within the window aborts the pending run, so a burst of
    /// changes costs one handler invocation. `Duration::ZERO` skips the wait
    /// entirely.
    ///
    /// Must be called within a tokio runtime.
    pub fn new<F, Fut>(input: &Cell<I>, debounce: Duration, handler: F) -> Self
    where
        F: Fn(I, Progress, AbortController) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<O, DispatchError>> + Send + 'static,
    {
        let handler: BoxedHandler<I, O> = Arc::new(
            move |input, progress, controller| {
                Box::pin(handler(input, progress, controller))
            },
        );
        let state = Cell::new(DispatchState {
            controller: AbortController::new(),
            payload: DispatchPayload::Loading { progress: 0.0 },
        });

        let input_sub = input.subscribe({
            let state = state.clone();
            let handler = Arc::clone(&handler);
            move |value: &I| {
                dispatch(&state, &handler, debounce, value.clone())
            }
        });
        dispatch(&state, &handler, debounce, input.get());

        Self {
            state,
            _input_sub: Arc::new(input_sub),
            marker: PhantomData,
        }
    }
}

impl<I, O> Dispatcher<I, O>
where
    O: Clone + PartialEq + Send + Sync + 'static,
{
    /// The full dispatch state, controller included.
    pub fn state(&self) -> ReadCell<DispatchState<O>> {
        self.state.read_only()
    }

    /// A derived cell projecting the ready payload's data, `None` otherwise.
    pub fn data(&self) -> ReadCell<Option<O>> {
        self.state
            .map(|state| state.payload.data().cloned())
    }

    pub fn is_loading(&self) -> bool {
        self.state.with(|state| state.payload.is_loading())
    }

    /// Resolves when the payload is next not loading (immediately if it
    /// already is not).
    pub fn ready(&self) -> impl Future<Output = ()> + Send + 'static {
        let state = self.state.clone();
        async move {
            if state.with(|s| !s.payload.is_loading()) {
                return;
            }
            let (tx, rx) = oneshot::channel();
            let tx = Mutex::new(Some(tx));
            let _sub = state.subscribe(move |s| {
                if !s.payload.is_loading() {
                    if let Some(tx) = tx.lock().or_poisoned().take() {
                        let _ = tx.send(());
                    }
                }
            });
            // the state may have settled between the check and the subscribe
            if state.with(|s| !s.payload.is_loading()) {
                return;
            }
            let _ = rx.await;
        }
    }
}

/// One dispatch: a synchronous reset followed by an asynchronous tail.
///
/// The reset aborts the previous run's controller, installs a fresh one, and
/// publishes `Loading { progress: 0 }` before returning, so every synchronous
/// subscriber of the state cell observes the loading transition before the
/// dispatcher suspends.
fn dispatch<I, O>(
    state: &Cell<DispatchState<O>>,
    handler: &BoxedHandler<I, O>,
    debounce: Duration,
    value: I,
) where
    I: Send + 'static,
    O: Clone + PartialEq + Send + Sync + 'static,
{
    state.with(|s| s.controller.clone()).abort();
    let controller = AbortController::new();
    state.set(DispatchState {
        controller: controller.clone(),
        payload: DispatchPayload::Loading { progress: 0.0 },
    });

    // Publishes on behalf of this run only: once this run's controller is
    // aborted, a later dispatch owns the state cell and this run's updates
    // are dropped.
    let publish = {
        let state = state.clone();
        let controller = controller.clone();
        Arc::new(move |payload: DispatchPayload<O>| {
            if controller.is_aborted() {
                return;
            }
            state.set(DispatchState {
                controller: controller.clone(),
                payload,
            });
        })
    };

    let (abort_tx, mut abort_rx) = oneshot::channel::<()>();
    controller.on_abort(move || {
        let _ = abort_tx.send(());
    });

    let handler = Arc::clone(handler);
    tokio::spawn(async move {
        if !debounce.is_zero() {
            tokio::time::sleep(debounce).await;
        }
        if controller.is_aborted() {
            tracing::trace!("dispatch superseded before its handler ran");
            return;
        }

        let progress = Progress::new({
            let publish = Arc::clone(&publish);
            move |fraction| {
                publish(DispatchPayload::Loading { progress: fraction })
            }
        });
        let mut work =
            handler(value, progress, controller.clone()).fuse();
        futures::select! {
            _ = abort_rx => {}
            result = work => match result {
                Ok(data) => publish(DispatchPayload::Ready { data }),
                Err(error) => publish(DispatchPayload::Failed { error }),
            },
        }
    });
}
