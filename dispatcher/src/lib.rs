//! Turns a reactive input cell and an async function into a reactive
//! `loading | ready | failed` state.
//!
//! A [`Dispatcher`] subscribes to a [`whispr::Cell`] and re-runs its handler
//! whenever the input actually changes, after an optional debounce window.
//! Each run is guarded by an [`AbortController`]: starting a new run aborts
//! the previous one, and an aborted run can never write into the state cell
//! again, no matter when its future eventually resolves. The handler receives
//! a [`Progress`] reporter and the run's own controller, so long-running work
//! can publish progress and bail out early when superseded.
//!
//! Failures do not propagate as panics or returned errors: they are stored in
//! the state payload as [`DispatchError`], and subscribers observe them like
//! any other state transition.
//!
//! On top of the dispatcher, [`AsyncInput`] coordinates a synchronously
//! editable config with an asynchronously produced result, discarding stale
//! completions by timestamp, and [`TimeCell`] is an explicit start/stop
//! service exposing the wall clock as a cell.

mod abort;
mod async_input;
mod dispatch;
mod error;
mod time_cell;

pub use abort::{AbortController, Progress};
pub use async_input::{AsyncInput, AsyncInputValue, Meta};
pub use dispatch::{DispatchPayload, DispatchState, Dispatcher};
pub use error::DispatchError;
pub use time_cell::{now_ms, TimeCell};
