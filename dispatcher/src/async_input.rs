use crate::{
    dispatch::{DispatchPayload, Dispatcher},
    error::DispatchError,
    time_cell::now_ms,
};
use std::{
    future::Future,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};
use whispr::{Cell, ReadCell, Subscription};

/// The timestamped configuration attached to an [`AsyncInputValue`].
///
/// `ts` is a monotonic indicator of the configuration that produced the
/// surrounding result: a value with a higher `ts` supersedes any value with a
/// lower one.
#[derive(Clone, Debug, PartialEq)]
pub struct Meta<C> {
    pub ts: u64,
    pub config: C,
}

/// A result together with the configuration (and timestamp) it was computed
/// from.
#[derive(Clone, Debug, PartialEq)]
pub struct AsyncInputValue<C, R> {
    pub result: R,
    pub meta: Meta<C>,
}

/// Coordinates a synchronously editable config with an asynchronously
/// computed result.
///
/// The caller owns an external cell of [`AsyncInputValue`]; the gateway owns
/// an internal `(config, ts)` pair. Edits through [`AsyncInput::set_config`]
/// update the internal config immediately and schedule a recomputation; the
/// external cell is only ever written with results whose timestamp is
/// strictly newer than what it currently holds, so stale completions are
/// discarded and the timestamps it observes strictly increase. The config
/// edit itself never waits on the handler.
///
/// Timestamps come from a local counter seeded from the external value's
/// `ts` and advanced by `max(previous + 1, wall_clock_ms)`, so a wall clock
/// that stalls or jumps backwards cannot break monotonicity.
pub struct AsyncInput<C, R> {
    external: Cell<AsyncInputValue<C, R>>,
    meta: Cell<Meta<C>>,
    pending: Cell<bool>,
    last_ts: Arc<AtomicU64>,
    _dispatcher: Dispatcher<Meta<C>, AsyncInputValue<C, R>>,
    _subs: Vec<Subscription>,
}

impl<C, R> AsyncInput<C, R>
where
    C: Clone + PartialEq + Send + Sync + 'static,
    R: Clone + PartialEq + Send + Sync + 'static,
{
    pub fn new<H, Fut>(
        external: &Cell<AsyncInputValue<C, R>>,
        handler: H,
    ) -> Self
    where
        H: Fn(C) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, DispatchError>> + Send + 'static,
    {
        let external = external.clone();
        let initial_meta = external.with(|value| value.meta.clone());
        let last_ts = Arc::new(AtomicU64::new(initial_meta.ts));
        let meta = Cell::new(initial_meta);
        let pending = Cell::new(false);
        let mut subs = Vec::new();

        // Any change to the internal meta marks the gateway pending. This
        // subscription is attached before the dispatcher's, so the pending
        // flag is already set when the recomputation starts.
        subs.push(meta.subscribe({
            let pending = pending.clone();
            move |_| pending.set(true)
        }));

        // Recompute through a debounce-0 dispatcher; the result is wrapped
        // with the meta captured at dispatch time.
        let dispatcher = Dispatcher::new(&meta, Duration::ZERO, {
            move |meta: Meta<C>, _progress, _controller| {
                let work = handler(meta.config.clone());
                async move {
                    let result = work.await?;
                    Ok(AsyncInputValue { result, meta })
                }
            }
        });

        subs.push(dispatcher.state().subscribe({
            let external = external.clone();
            let pending = pending.clone();
            move |state| match &state.payload {
                DispatchPayload::Ready { data: wrapped } => {
                    let external_ts = external.with(|value| value.meta.ts);
                    if wrapped.meta.ts > external_ts {
                        external.set(wrapped.clone());
                    } else {
                        tracing::trace!(
                            ts = wrapped.meta.ts,
                            external_ts,
                            "discarding stale async input result"
                        );
                    }
                    pending.set(false);
                }
                DispatchPayload::Failed { .. } => pending.set(false),
                DispatchPayload::Loading { .. } => {}
            }
        }));

        // Another writer may push a fresher value into the external cell;
        // adopt its meta when it is strictly newer than ours.
        subs.push(external.subscribe({
            let meta = meta.clone();
            let last_ts = Arc::clone(&last_ts);
            move |value: &AsyncInputValue<C, R>| {
                if value.meta.ts > meta.with(|m| m.ts) {
                    last_ts.fetch_max(value.meta.ts, Ordering::SeqCst);
                    meta.set(value.meta.clone());
                }
            }
        }));

        Self {
            external,
            meta,
            pending,
            last_ts,
            _dispatcher: dispatcher,
            _subs: subs,
        }
    }

    /// The config as the caller currently edits it, independent of any
    /// recomputation in flight.
    pub fn config(&self) -> C {
        self.meta.with(|meta| meta.config.clone())
    }

    /// Applies `updater` to a copy of the current config, stamps it with a
    /// fresh timestamp, and schedules recomputation. Returns the new
    /// timestamp.
    pub fn set_config(&self, updater: impl FnOnce(&mut C)) -> u64 {
        let mut config = self.meta.with(|meta| meta.config.clone());
        updater(&mut config);
        let ts = self.next_ts();
        self.meta.set(Meta { ts, config });
        ts
    }

    /// The latest resolved result, or `None` while a recomputation is
    /// pending.
    pub fn result(&self) -> Option<R> {
        if self.pending.get() {
            None
        } else {
            Some(self.external.with(|value| value.result.clone()))
        }
    }

    /// True from the moment the config changes until the recomputation for
    /// it (or for a fresher config) has been processed.
    pub fn pending(&self) -> ReadCell<bool> {
        self.pending.read_only()
    }

    fn next_ts(&self) -> u64 {
        let now = now_ms();
        let previous = self.last_ts.load(Ordering::SeqCst);
        let next = previous.saturating_add(1).max(now);
        self.last_ts.store(next, Ordering::SeqCst);
        next
    }
}
