use std::sync::Arc;

pub(crate) type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// The set of callbacks attached to one cell.
///
/// Insertion order is notification order. Entries are stored behind `Arc` so
/// that a notification pass can snapshot the set and run the callbacks
/// without holding the set's lock, which lets a subscriber subscribe or
/// unsubscribe reentrantly.
pub(crate) struct SubscriberSet<T> {
    next_id: u64,
    entries: Vec<(u64, Callback<T>)>,
}

impl<T> SubscriberSet<T> {
    pub(crate) fn new() -> Self {
        Self {
            next_id: 0,
            entries: Vec::new(),
        }
    }

    pub(crate) fn insert(&mut self, callback: Callback<T>) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.entries.push((id, callback));
        id
    }

    pub(crate) fn remove(&mut self, id: u64) {
        self.entries.retain(|(entry_id, _)| *entry_id != id);
    }

    pub(crate) fn snapshot(&self) -> Vec<Callback<T>> {
        self.entries
            .iter()
            .map(|(_, callback)| Arc::clone(callback))
            .collect()
    }
}
