//! Whispr is a reactive cell: a single-writer container for one value that
//! publishes changes to its subscribers.
//!
//! The contract is deliberately small:
//! - A [`Cell`] holds a value of type `T` and compares writes against the
//!   current value with `PartialEq`. A write that does not change the value
//!   notifies nobody.
//! - Subscribers run **synchronously and in subscription order** when a value
//!   actually changes, before the writer regains control. Everything built on
//!   top of Whispr (dispatchers, storage indexes, clients) relies on that
//!   ordering.
//! - [`ReadCell`] is the read-only view of a cell, and [`ReadCell::map`]
//!   derives a new read-only cell that recomputes whenever its source changes,
//!   with its own equality filter.
//!
//! Cells are handles: cloning a cell clones the handle, not the value, and
//! two clones of the same cell compare equal.
//!
//! ```
//! use whispr::Cell;
//!
//! let count = Cell::new(0);
//! let doubled = count.read_only().map(|n| n * 2);
//!
//! count.set(2);
//! assert_eq!(doubled.get(), 4);
//!
//! count.update(|n| *n += 1);
//! assert_eq!(count.get(), 3);
//! ```
//!
//! Cells are not a concurrency primitive. Writers are expected to be few and
//! serial; concurrent writers from multiple tasks produce an undefined order
//! between them (but no memory unsafety). Reentrant reads from inside a
//! subscriber are fine; reentrant writes to the same cell are not supported.

mod cell;
mod subscribers;

pub use cell::{Cell, ReadCell, Subscription};
