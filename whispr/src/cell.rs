use crate::subscribers::SubscriberSet;
use or_poisoned::OrPoisoned;
use core::fmt::{Debug, Formatter};
use std::{
    hash::Hash,
    sync::{Arc, RwLock},
};

/// A single-writer reactive container for one value.
///
/// Writes are filtered by value equality: [`Cell::set`] and [`Cell::update`]
/// compare the new value against the current one and do nothing when they are
/// equal. When the value does change, every subscriber runs synchronously, in
/// subscription order, before the write call returns.
///
/// `Cell` is a handle over a shared allocation: it is `Clone` but not `Copy`,
/// and clones refer to the same value. Handle equality (`PartialEq`) is
/// identity, not value equality.
pub struct Cell<T> {
    pub(crate) value: Arc<RwLock<T>>,
    pub(crate) subscribers: Arc<RwLock<SubscriberSet<T>>>,
}

impl<T> Clone for Cell<T> {
    fn clone(&self) -> Self {
        Self {
            value: Arc::clone(&self.value),
            subscribers: Arc::clone(&self.subscribers),
        }
    }
}

impl<T> Debug for Cell<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Cell")
            .field("type", &std::any::type_name::<T>())
            .field("value", &Arc::as_ptr(&self.value))
            .finish()
    }
}

impl<T> PartialEq for Cell<T> {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.value, &other.value)
    }
}

impl<T> Eq for Cell<T> {}

impl<T> Hash for Cell<T> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        std::ptr::hash(&Arc::as_ptr(&self.value), state);
    }
}

impl<T> Default for Cell<T>
where
    T: Default,
{
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T> Cell<T> {
    pub fn new(value: T) -> Self {
        Self {
            value: Arc::new(RwLock::new(value)),
            subscribers: Arc::new(RwLock::new(SubscriberSet::new())),
        }
    }

    /// Applies `f` to the current value without cloning it.
    pub fn with<U>(&self, f: impl FnOnce(&T) -> U) -> U {
        f(&self.value.read().or_poisoned())
    }

    /// Returns a read-only view over the same value.
    pub fn read_only(&self) -> ReadCell<T> {
        ReadCell {
            value: Arc::clone(&self.value),
            subscribers: Arc::clone(&self.subscribers),
        }
    }
}

impl<T> Cell<T>
where
    T: Clone,
{
    /// Clones the current value out of the cell.
    pub fn get(&self) -> T {
        self.value.read().or_poisoned().clone()
    }

    /// Attaches a subscriber that runs synchronously on every actual change.
    ///
    /// The subscriber is detached when the returned [`Subscription`] is
    /// dropped; call [`Subscription::forget`] to keep it for the lifetime of
    /// the cell. The subscriber is *not* called with the current value at
    /// subscription time, only on subsequent changes.
    pub fn subscribe(
        &self,
        f: impl Fn(&T) + Send + Sync + 'static,
    ) -> Subscription
    where
        T: Send + Sync + 'static,
    {
        let id = self
            .subscribers
            .write()
            .or_poisoned()
            .insert(Arc::new(f));
        let set = Arc::downgrade(&self.subscribers);
        Subscription {
            remove: Some(Box::new(move || {
                if let Some(set) = set.upgrade() {
                    set.write().or_poisoned().remove(id);
                }
            })),
        }
    }

    fn notify(&self) {
        let callbacks = self.subscribers.read().or_poisoned().snapshot();
        if callbacks.is_empty() {
            return;
        }
        // Clone the value out so no lock is held while subscribers run; a
        // subscriber may read this cell or write other cells reentrantly.
        let value = self.value.read().or_poisoned().clone();
        for callback in callbacks {
            callback(&value);
        }
    }
}

impl<T> Cell<T>
where
    T: Clone + PartialEq,
{
    /// Replaces the value, notifying subscribers only if it actually changed.
    pub fn set(&self, value: T) {
        let changed = {
            let mut guard = self.value.write().or_poisoned();
            if *guard == value {
                false
            } else {
                *guard = value;
                true
            }
        };
        if changed {
            self.notify();
        }
    }

    /// Mutates the value in place, with the same equality filter as
    /// [`Cell::set`].
    pub fn update(&self, f: impl FnOnce(&mut T)) {
        let changed = {
            let mut guard = self.value.write().or_poisoned();
            let before = guard.clone();
            f(&mut guard);
            *guard != before
        };
        if changed {
            self.notify();
        }
    }
}

/// The read-only half of a [`Cell`]: it can be read, subscribed to, and
/// mapped into further derived cells, but not written.
pub struct ReadCell<T> {
    pub(crate) value: Arc<RwLock<T>>,
    pub(crate) subscribers: Arc<RwLock<SubscriberSet<T>>>,
}

impl<T> Clone for ReadCell<T> {
    fn clone(&self) -> Self {
        Self {
            value: Arc::clone(&self.value),
            subscribers: Arc::clone(&self.subscribers),
        }
    }
}

impl<T> Debug for ReadCell<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ReadCell")
            .field("type", &std::any::type_name::<T>())
            .field("value", &Arc::as_ptr(&self.value))
            .finish()
    }
}

impl<T> PartialEq for ReadCell<T> {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.value, &other.value)
    }
}

impl<T> Eq for ReadCell<T> {}

impl<T> From<Cell<T>> for ReadCell<T> {
    fn from(cell: Cell<T>) -> Self {
        cell.read_only()
    }
}

impl<T> ReadCell<T> {
    pub fn with<U>(&self, f: impl FnOnce(&T) -> U) -> U {
        f(&self.value.read().or_poisoned())
    }
}

impl<T> ReadCell<T>
where
    T: Clone,
{
    pub fn get(&self) -> T {
        self.value.read().or_poisoned().clone()
    }
}

impl<T> ReadCell<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// See [`Cell::subscribe`].
    pub fn subscribe(
        &self,
        f: impl Fn(&T) + Send + Sync + 'static,
    ) -> Subscription {
        let writer = Cell {
            value: Arc::clone(&self.value),
            subscribers: Arc::clone(&self.subscribers),
        };
        writer.subscribe(f)
    }

    /// Derives a read-only cell whose value is `f` applied to this cell's
    /// value.
    ///
    /// The derived cell recomputes synchronously whenever the source changes
    /// and applies its own equality filter, so a source change that maps to
    /// an equal output notifies nobody downstream. The derived cell stays
    /// attached for the lifetime of the source.
    pub fn map<U>(
        &self,
        f: impl Fn(&T) -> U + Send + Sync + 'static,
    ) -> ReadCell<U>
    where
        U: Clone + PartialEq + Send + Sync + 'static,
    {
        let derived = Cell::new(self.with(&f));
        self.subscribe({
            let derived = derived.clone();
            move |value| derived.set(f(value))
        })
        .forget();
        derived.read_only()
    }
}

impl<T> Cell<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// See [`ReadCell::map`].
    pub fn map<U>(
        &self,
        f: impl Fn(&T) -> U + Send + Sync + 'static,
    ) -> ReadCell<U>
    where
        U: Clone + PartialEq + Send + Sync + 'static,
    {
        self.read_only().map(f)
    }
}

/// Detaches its subscriber when dropped.
pub struct Subscription {
    remove: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    /// Keeps the subscriber attached for the lifetime of its cell.
    pub fn forget(mut self) {
        self.remove = None;
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(remove) = self.remove.take() {
            remove();
        }
    }
}

impl Debug for Subscription {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.remove.is_some())
            .finish()
    }
}
