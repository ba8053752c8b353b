use crate::persistence::PersistenceError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    /// Creating an item under a key that already holds a live item.
    #[error("key `{0}` already exists")]
    KeyExists(String),
    /// Reading an item that does not exist or is tombstoned.
    #[error("no such key `{0}`")]
    NoSuchKey(String),
    /// A persisted record that does not parse as an item of this store's
    /// type.
    #[error("corrupt record at `{key}`: {message}")]
    Corrupt { key: String, message: String },
    /// The per-prefix singleton was already opened with a different item
    /// type.
    #[error("prefix `{0}` is already open with a different item type")]
    WrongType(String),
    #[error("could not serialize record for `{key}`: {message}")]
    Serialize { key: String, message: String },
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}
