//! Persistence boundary for the PKI object.

// Lock guards are held for the whole read-compare-write of one key.
#![allow(clippy::significant_drop_tightening)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use thiserror::Error;
use tracing::{debug, info};

use crate::object::PkiObject;

/// Result type for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Store failures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    /// The backend could not be reached.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The object changed since it was read.
    #[error("version conflict on '{key}': expected {expected}, found {actual}")]
    Conflict {
        /// Object key.
        key: String,
        /// Version the caller read.
        expected: u64,
        /// Version currently stored.
        actual: u64,
    },

    /// `create` on a key that already exists.
    #[error("object already exists: {0}")]
    AlreadyExists(String),

    /// `update` on a key that does not exist.
    #[error("object not found: {0}")]
    NotFound(String),
}

/// A value with the version token it was read at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Versioned<T> {
    /// Opaque, strictly increasing per key.
    pub version: u64,
    /// The value.
    pub value: T,
}

/// Versioned key/object store with compare-and-swap updates.
pub trait PkiStore {
    /// Reads an object.
    fn get(&self, key: &str) -> StoreResult<Option<Versioned<PkiObject>>>;

    /// Creates an object that must not exist yet. Returns the new version.
    fn create(&self, key: &str, object: PkiObject) -> StoreResult<u64>;

    /// Replaces an object if it is still at `expected_version`. Returns the
    /// new version.
    fn update(&self, key: &str, object: PkiObject, expected_version: u64) -> StoreResult<u64>;
}

/// In-memory [`PkiStore`].
pub struct MemoryStore {
    objects: RwLock<HashMap<String, Versioned<PkiObject>>>,
    unavailable: AtomicBool,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            objects: RwLock::new(HashMap::new()),
            unavailable: AtomicBool::new(false),
        }
    }

    /// Makes every operation fail with [`StoreError::Unavailable`] until
    /// cleared.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Returns the number of stored objects.
    #[must_use]
    pub fn len(&self) -> usize {
        self.objects.read().map(|o| o.len()).unwrap_or(0)
    }

    /// Returns true if the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_available(&self) -> StoreResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store marked unavailable".into()));
        }
        Ok(())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("count", &self.len())
            .finish_non_exhaustive()
    }
}

impl PkiStore for MemoryStore {
    fn get(&self, key: &str) -> StoreResult<Option<Versioned<PkiObject>>> {
        self.check_available()?;
        let objects = self
            .objects
            .read()
            .map_err(|e| StoreError::Unavailable(format!("failed to acquire read lock: {e}")))?;
        Ok(objects.get(key).cloned())
    }

    fn create(&self, key: &str, object: PkiObject) -> StoreResult<u64> {
        self.check_available()?;
        let mut objects = self
            .objects
            .write()
            .map_err(|e| StoreError::Unavailable(format!("failed to acquire write lock: {e}")))?;

        if objects.contains_key(key) {
            return Err(StoreError::AlreadyExists(key.to_owned()));
        }
        objects.insert(key.to_owned(), Versioned { version: 1, value: object });

        info!(key, "PKI object created");
        Ok(1)
    }

    fn update(&self, key: &str, object: PkiObject, expected_version: u64) -> StoreResult<u64> {
        self.check_available()?;
        let mut objects = self
            .objects
            .write()
            .map_err(|e| StoreError::Unavailable(format!("failed to acquire write lock: {e}")))?;

        let entry = objects
            .get_mut(key)
            .ok_or_else(|| StoreError::NotFound(key.to_owned()))?;
        if entry.version != expected_version {
            return Err(StoreError::Conflict {
                key: key.to_owned(),
                expected: expected_version,
                actual: entry.version,
            });
        }
        entry.version += 1;
        entry.value = object;

        debug!(key, version = entry.version, "PKI object updated");
        Ok(entry.version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::ObjectMeta;

    fn object(label: &str) -> PkiObject {
        PkiObject {
            metadata: ObjectMeta::default().with_label("rev", label),
            data: [("ca.crt".to_string(), b"pem".to_vec())].into_iter().collect(),
        }
    }

    #[test]
    fn store_new_is_empty() {
        let store = MemoryStore::new();
        assert!(store.is_empty());
        assert_eq!(store.get("pki").unwrap(), None);
    }

    #[test]
    fn create_then_get() {
        let store = MemoryStore::new();
        assert_eq!(store.create("pki", object("1")).unwrap(), 1);

        let read = store.get("pki").unwrap().unwrap();
        assert_eq!(read.version, 1);
        assert_eq!(read.value, object("1"));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn create_twice_fails() {
        let store = MemoryStore::new();
        store.create("pki", object("1")).unwrap();
        assert_eq!(
            store.create("pki", object("2")),
            Err(StoreError::AlreadyExists("pki".into()))
        );
    }

    #[test]
    fn update_bumps_version() {
        let store = MemoryStore::new();
        let v1 = store.create("pki", object("1")).unwrap();
        let v2 = store.update("pki", object("2"), v1).unwrap();

        assert_eq!(v2, 2);
        assert_eq!(store.get("pki").unwrap().unwrap().value, object("2"));
    }

    #[test]
    fn stale_update_conflicts() {
        let store = MemoryStore::new();
        let v1 = store.create("pki", object("1")).unwrap();
        store.update("pki", object("2"), v1).unwrap();

        let result = store.update("pki", object("3"), v1);
        assert_eq!(
            result,
            Err(StoreError::Conflict {
                key: "pki".into(),
                expected: 1,
                actual: 2,
            })
        );
        assert_eq!(store.get("pki").unwrap().unwrap().value, object("2"));
    }

    #[test]
    fn update_missing_fails() {
        let store = MemoryStore::new();
        assert_eq!(
            store.update("pki", object("1"), 1),
            Err(StoreError::NotFound("pki".into()))
        );
    }

    #[test]
    fn unavailable_store_fails_everything() {
        let store = MemoryStore::new();
        store.create("pki", object("1")).unwrap();
        store.set_unavailable(true);

        assert!(matches!(store.get("pki"), Err(StoreError::Unavailable(_))));
        assert!(matches!(store.update("pki", object("2"), 1), Err(StoreError::Unavailable(_))));

        store.set_unavailable(false);
        assert!(store.get("pki").unwrap().is_some());
    }

    #[test]
    fn store_debug_format() {
        let debug = format!("{:?}", MemoryStore::default());
        assert!(debug.contains("MemoryStore"));
        assert!(debug.contains("count"));
    }
}
