use crate::{
    error::StorageError,
    persistence::Persistence,
};
use dispatcher::{DispatchError, Dispatcher};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::{
    fmt::{Debug, Formatter},
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};
use whispr::{Cell, ReadCell};

/// How long an item coalesces updates before flushing to persistence.
pub(crate) const FLUSH_DEBOUNCE: Duration = Duration::from_millis(500);

/// The persisted shape of one item.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ItemData<T> {
    pub key: String,
    pub data: T,
    pub rev: u64,
    pub deleted: bool,
}

/// One revisioned document in an [`Appstorage`](crate::Appstorage).
///
/// The item's state lives in a cell; [`Item::update`] and [`Item::remove`]
/// bump the revision, which arms a debounced background flush. An explicit
/// [`Item::flush`] writes immediately and propagates errors; the background
/// flush logs and keeps the unflushed state for the next attempt.
pub struct Item<T> {
    inner: Arc<ItemInner<T>>,
}

struct ItemInner<T> {
    storage_key: String,
    cell: Cell<ItemData<T>>,
    /// Highest revision known to be in persistence for this key.
    persisted_rev: Arc<AtomicU64>,
    /// Set when a debounced flush fails, so the store's refresh pass can
    /// retry it instead of losing the write.
    flush_failed: Arc<AtomicBool>,
    persistence: Arc<dyn Persistence>,
    _flush: Dispatcher<ItemData<T>, u64>,
}

impl<T> Clone for Item<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Debug for Item<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Item")
            .field("storage_key", &self.inner.storage_key)
            .finish_non_exhaustive()
    }
}

/// Item equality is identity; the index cell relies on this to notify only
/// when membership actually changes.
impl<T> PartialEq for Item<T> {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<T> Eq for Item<T> {}

impl<T> Item<T>
where
    T: Clone
        + PartialEq
        + Default
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static,
{
    /// A brand-new item; its first revision is 1 so it flushes even over an
    /// empty persistence layer.
    pub(crate) fn create(
        persistence: Arc<dyn Persistence>,
        storage_key: String,
        key: String,
        data: T,
    ) -> Self {
        Self::with_state(
            persistence,
            storage_key,
            ItemData {
                key,
                data,
                rev: 1,
                deleted: false,
            },
            0,
        )
    }

    /// An item instantiated from an existing persisted record.
    pub(crate) fn load(
        persistence: Arc<dyn Persistence>,
        storage_key: String,
        data: ItemData<T>,
    ) -> Self {
        let persisted_rev = data.rev;
        Self::with_state(persistence, storage_key, data, persisted_rev)
    }

    fn with_state(
        persistence: Arc<dyn Persistence>,
        storage_key: String,
        data: ItemData<T>,
        persisted_rev: u64,
    ) -> Self {
        let cell = Cell::new(data);
        let persisted_rev = Arc::new(AtomicU64::new(persisted_rev));
        let flush_failed = Arc::new(AtomicBool::new(false));
        let flush = Dispatcher::new(&cell, FLUSH_DEBOUNCE, {
            let persistence = Arc::clone(&persistence);
            let persisted_rev = Arc::clone(&persisted_rev);
            let flush_failed = Arc::clone(&flush_failed);
            let storage_key = storage_key.clone();
            move |data: ItemData<T>, _progress, _abort| {
                let persistence = Arc::clone(&persistence);
                let persisted_rev = Arc::clone(&persisted_rev);
                let flush_failed = Arc::clone(&flush_failed);
                let storage_key = storage_key.clone();
                async move {
                    if data.rev <= persisted_rev.load(Ordering::SeqCst) {
                        return Ok(data.rev);
                    }
                    let outcome = serde_json::to_string(&data)
                        .map_err(DispatchError::from)
                        .and_then(|text| {
                            persistence
                                .set(&storage_key, &text)
                                .map_err(DispatchError::from)
                        });
                    match outcome {
                        Ok(()) => {
                            persisted_rev
                                .fetch_max(data.rev, Ordering::SeqCst);
                            tracing::debug!(
                                key = %data.key,
                                rev = data.rev,
                                "flushed item"
                            );
                            Ok(data.rev)
                        }
                        Err(error) => {
                            flush_failed.store(true, Ordering::SeqCst);
                            Err(error)
                        }
                    }
                }
            }
        });
        Self {
            inner: Arc::new(ItemInner {
                storage_key,
                cell,
                persisted_rev,
                flush_failed,
                persistence,
                _flush: flush,
            }),
        }
    }

    pub fn key(&self) -> String {
        self.inner.cell.with(|data| data.key.clone())
    }

    pub fn data(&self) -> T {
        self.inner.cell.with(|data| data.data.clone())
    }

    pub fn rev(&self) -> u64 {
        self.inner.cell.with(|data| data.rev)
    }

    pub fn is_deleted(&self) -> bool {
        self.inner.cell.with(|data| data.deleted)
    }

    pub fn cell(&self) -> ReadCell<ItemData<T>> {
        self.inner.cell.read_only()
    }

    /// Replaces the data, bumping the revision and clearing any tombstone.
    pub fn update(&self, data: T) {
        self.inner.cell.update(|current| {
            current.data = data;
            current.rev += 1;
            current.deleted = false;
        });
    }

    /// Tombstones the item: the revision is bumped, the data reset to its
    /// default, and the record stays in persistence until cleanup.
    pub fn remove(&self) {
        self.inner.cell.update(|current| {
            current.data = T::default();
            current.rev += 1;
            current.deleted = true;
        });
    }

    /// Writes the current state to persistence now if it is newer than what
    /// is persisted. Errors propagate to the caller.
    pub fn flush(&self) -> Result<(), StorageError> {
        let data = self.inner.cell.get();
        if data.rev <= self.inner.persisted_rev.load(Ordering::SeqCst) {
            return Ok(());
        }
        let text = serde_json::to_string(&data).map_err(|err| {
            StorageError::Serialize {
                key: data.key.clone(),
                message: err.to_string(),
            }
        })?;
        self.inner.persistence.set(&self.inner.storage_key, &text)?;
        self.inner
            .persisted_rev
            .fetch_max(data.rev, Ordering::SeqCst);
        Ok(())
    }

    /// Retries a flush that failed in the background. A repeated failure
    /// re-arms the flag for the next refresh pass.
    pub(crate) fn retry_failed_flush(&self) {
        if !self.inner.flush_failed.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Err(error) = self.flush() {
            self.inner.flush_failed.store(true, Ordering::SeqCst);
            tracing::warn!(
                key = %self.inner.storage_key,
                %error,
                "background flush retry failed"
            );
        }
    }

    /// Adopts the persisted record when another process has written a
    /// strictly newer revision.
    pub(crate) fn refresh_from_persistence(
        &self,
    ) -> Result<(), StorageError> {
        let Some(text) = self.inner.persistence.get(&self.inner.storage_key)?
        else {
            return Ok(());
        };
        let persisted: ItemData<T> =
            serde_json::from_str(&text).map_err(|err| StorageError::Corrupt {
                key: self.inner.storage_key.clone(),
                message: err.to_string(),
            })?;
        if persisted.rev > self.inner.cell.with(|data| data.rev) {
            self.inner
                .persisted_rev
                .fetch_max(persisted.rev, Ordering::SeqCst);
            self.inner.cell.set(persisted);
        }
        Ok(())
    }
}
