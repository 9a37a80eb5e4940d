//! Tagged, first-writer-wins registry backing the resource cache.

use parking_lot::RwLock;
use std::collections::HashMap;

use crate::tags::{Tag, TagPattern, Tags};

/// An entry in a [`Store`].
#[derive(Debug, Clone)]
pub struct StorageEntry<D> {
    pub data: D,
    pub tags: Tags,
}

/// Options for inserting an entry with [`Store::get_or_set`].
#[derive(Debug, Clone, Default)]
pub struct StorageEntryOptions {
    /// Tags attached to the entry when it is created.
    pub tags: Vec<Tag>,
}

/// A keyed registry where the first writer of a key wins.
///
/// Entries are never replaced or evicted; they stay until [`clear`](Self::clear).
/// Tags are attached at insertion time and only used to select entries.
///
/// `D` is cloned out of the store on every read, so it is typically an `Arc`.
pub struct Store<D> {
    entries: RwLock<HashMap<String, StorageEntry<D>>>,
}

impl<D: Clone> Store<D> {
    /// Create an empty store.
    pub fn new() -> Self {
        Store {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Return the entry for `key`, building and inserting it if missing.
    ///
    /// When the key exists, `builder` is not called and `options` are ignored.
    pub fn get_or_set(
        &self,
        key: &str,
        builder: impl FnOnce() -> D,
        options: StorageEntryOptions,
    ) -> D {
        if let Some(existing) = self.get(key) {
            return existing;
        }

        let mut entries = self.entries.write();
        // Another writer may have inserted between the read and the write lock.
        let entry = entries.entry(key.to_string()).or_insert_with(|| {
            tracing::debug!(key, tags = options.tags.len(), "inserting store entry");
            StorageEntry {
                data: builder(),
                tags: Tags::new(options.tags),
            }
        });
        entry.data.clone()
    }

    /// The entry stored under `key`, if any.
    pub fn get(&self, key: &str) -> Option<D> {
        self.entries.read().get(key).map(|entry| entry.data.clone())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.read().contains_key(key)
    }

    /// Tags of the entry stored under `key`.
    pub fn tags(&self, key: &str) -> Option<Tags> {
        self.entries.read().get(key).map(|entry| entry.tags.clone())
    }

    /// All entries, or only those with at least one tag matching `pattern`.
    pub fn get_all(&self, pattern: Option<&TagPattern>) -> Vec<D> {
        self.entries
            .read()
            .values()
            .filter(|entry| pattern.is_none_or(|pattern| entry.tags.matching(pattern)))
            .map(|entry| entry.data.clone())
            .collect()
    }

    /// All entries whose data satisfies `predicate`.
    pub fn find_by(&self, predicate: impl Fn(&D) -> bool) -> Vec<D> {
        self.entries
            .read()
            .values()
            .filter(|entry| predicate(&entry.data))
            .map(|entry| entry.data.clone())
            .collect()
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Drop all entries.
    pub fn clear(&self) {
        let removed = {
            let mut entries = self.entries.write();
            std::mem::take(&mut *entries)
        };
        tracing::debug!(count = removed.len(), "cleared store");
    }
}

impl<D: Clone> Default for Store<D> {
    fn default() -> Self {
        Self::new()
    }
}
