use crate::{
    error::StorageError,
    item::{Item, ItemData},
    persistence::Persistence,
};
use once_cell::sync::Lazy;
use or_poisoned::OrPoisoned;
use serde::{de::DeserializeOwned, Serialize};
use std::{
    any::Any,
    collections::{BTreeMap, HashMap},
    sync::{Arc, Mutex},
    time::Duration,
};
use tokio::task::JoinHandle;
use whispr::{Cell, ReadCell};

/// How often the background task rescans persistence.
const REFRESH_PERIOD: Duration = Duration::from_millis(200);

/// Process-wide registry backing [`Appstorage::instance`]. Entries are
/// type-erased because stores of different item types share one map.
static INSTANCES: Lazy<Mutex<HashMap<String, Box<dyn Any + Send + Sync>>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

/// A per-prefix directory over a flat persistence layer.
///
/// The store owns every [`Item`] under its prefix and exposes the live ones
/// (tombstones excluded) through a reactive index. A background task rescans
/// persistence every 200 ms: newly-seen keys are instantiated, items whose
/// persisted revision is newer are reloaded, tombstones are dropped from the
/// index, and failed background flushes are retried. The index cell only
/// notifies when membership actually changes.
pub struct Appstorage<T> {
    inner: Arc<StoreInner<T>>,
}

struct StoreInner<T> {
    prefix: String,
    persistence: Arc<dyn Persistence>,
    items: Mutex<BTreeMap<String, Item<T>>>,
    index: Cell<BTreeMap<String, Item<T>>>,
    refresh_task: Mutex<Option<JoinHandle<()>>>,
}

impl<T> Drop for StoreInner<T> {
    fn drop(&mut self) {
        if let Ok(mut task) = self.refresh_task.lock() {
            if let Some(task) = task.take() {
                task.abort();
            }
        }
    }
}

impl<T> Clone for Appstorage<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Appstorage<T>
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
    /// Opens the store, scans persistence once synchronously, and starts the
    /// background refresh task.
    ///
    /// Must be called within a tokio runtime.
    pub fn open(
        persistence: Arc<dyn Persistence>,
        prefix: impl Into<String>,
    ) -> Result<Self, StorageError> {
        let store = Self {
            inner: Arc::new(StoreInner {
                prefix: prefix.into(),
                persistence,
                items: Mutex::new(BTreeMap::new()),
                index: Cell::new(BTreeMap::new()),
                refresh_task: Mutex::new(None),
            }),
        };
        store.refresh()?;

        let task = tokio::spawn({
            // the task must not keep the store alive
            let weak = Arc::downgrade(&store.inner);
            async move {
                let mut interval = tokio::time::interval(REFRESH_PERIOD);
                interval.set_missed_tick_behavior(
                    tokio::time::MissedTickBehavior::Skip,
                );
                loop {
                    interval.tick().await;
                    let Some(inner) = weak.upgrade() else { break };
                    let store = Appstorage { inner };
                    if let Err(error) = store.refresh() {
                        tracing::warn!(
                            prefix = %store.inner.prefix,
                            %error,
                            "background storage refresh failed"
                        );
                    }
                }
            }
        });
        *store.inner.refresh_task.lock().or_poisoned() = Some(task);
        Ok(store)
    }

    /// The process-wide singleton for `prefix`, opening it over
    /// `persistence()` on first use.
    pub fn instance(
        prefix: &str,
        persistence: impl FnOnce() -> Arc<dyn Persistence>,
    ) -> Result<Self, StorageError> {
        let mut registry = INSTANCES.lock().or_poisoned();
        if let Some(existing) = registry.get(prefix) {
            return existing
                .downcast_ref::<Self>()
                .cloned()
                .ok_or_else(|| StorageError::WrongType(prefix.to_string()));
        }
        let store = Self::open(persistence(), prefix)?;
        registry.insert(prefix.to_string(), Box::new(store.clone()));
        Ok(store)
    }

    /// The live items under this prefix, tombstones excluded.
    pub fn index(&self) -> ReadCell<BTreeMap<String, Item<T>>> {
        self.inner.index.read_only()
    }

    /// Creates an item. A key that already holds a live item is a caller
    /// error; a tombstoned key is revived, continuing its revision sequence.
    pub fn add(
        &self,
        key: impl Into<String>,
        data: T,
    ) -> Result<Item<T>, StorageError> {
        let key = key.into();
        let storage_key = self.storage_key(&key);
        let mut items = self.inner.items.lock().or_poisoned();

        if let Some(existing) = items.get(&key) {
            if !existing.is_deleted() {
                return Err(StorageError::KeyExists(key));
            }
            let item = existing.clone();
            drop(items);
            item.update(data);
            self.rebuild_index();
            return Ok(item);
        }

        // the key may exist in persistence without having been seen yet
        if let Some(text) = self.inner.persistence.get(&storage_key)? {
            let persisted: ItemData<T> = serde_json::from_str(&text)
                .map_err(|err| StorageError::Corrupt {
                    key: key.clone(),
                    message: err.to_string(),
                })?;
            if !persisted.deleted {
                return Err(StorageError::KeyExists(key));
            }
            let item = Item::load(
                Arc::clone(&self.inner.persistence),
                storage_key,
                persisted,
            );
            items.insert(key, item.clone());
            drop(items);
            item.update(data);
            self.rebuild_index();
            return Ok(item);
        }

        let item = Item::create(
            Arc::clone(&self.inner.persistence),
            storage_key,
            key.clone(),
            data,
        );
        items.insert(key, item.clone());
        drop(items);
        self.rebuild_index();
        Ok(item)
    }

    /// Reads a live item. A missing or tombstoned key is a caller error.
    pub fn get(&self, key: &str) -> Result<Item<T>, StorageError> {
        let items = self.inner.items.lock().or_poisoned();
        match items.get(key) {
            Some(item) if !item.is_deleted() => Ok(item.clone()),
            _ => Err(StorageError::NoSuchKey(key.to_string())),
        }
    }

    /// Flushes every item with unpersisted state, propagating the first
    /// error.
    pub fn flush(&self) -> Result<(), StorageError> {
        let items: Vec<Item<T>> = {
            let items = self.inner.items.lock().or_poisoned();
            items.values().cloned().collect()
        };
        for item in items {
            item.flush()?;
        }
        Ok(())
    }

    /// One refresh pass: instantiate newly-seen keys, merge newer persisted
    /// revisions, retry pending flushes, and rebuild the index.
    pub fn refresh(&self) -> Result<(), StorageError> {
        let keys = self.inner.persistence.keys()?;
        {
            let mut items = self.inner.items.lock().or_poisoned();
            for storage_key in &keys {
                let Some(key) = storage_key.strip_prefix(&self.inner.prefix)
                else {
                    continue;
                };
                if items.contains_key(key) {
                    continue;
                }
                let Some(text) = self.inner.persistence.get(storage_key)?
                else {
                    continue;
                };
                let persisted: ItemData<T> = serde_json::from_str(&text)
                    .map_err(|err| StorageError::Corrupt {
                        key: key.to_string(),
                        message: err.to_string(),
                    })?;
                items.insert(
                    key.to_string(),
                    Item::load(
                        Arc::clone(&self.inner.persistence),
                        storage_key.clone(),
                        persisted,
                    ),
                );
            }
        }

        let snapshot: Vec<Item<T>> = {
            let items = self.inner.items.lock().or_poisoned();
            items.values().cloned().collect()
        };
        for item in &snapshot {
            item.refresh_from_persistence()?;
            item.retry_failed_flush();
        }

        self.rebuild_index();
        Ok(())
    }

    fn rebuild_index(&self) {
        let index: BTreeMap<String, Item<T>> = {
            let items = self.inner.items.lock().or_poisoned();
            items
                .iter()
                .filter(|(_, item)| !item.is_deleted())
                .map(|(key, item)| (key.clone(), item.clone()))
                .collect()
        };
        self.inner.index.set(index);
    }

    fn storage_key(&self, key: &str) -> String {
        format!("{}{}", self.inner.prefix, key)
    }
}
