use std::collections::BTreeMap;

use thiserror::Error;

use crate::traits::KvStore;

/// In-memory storage backend.
///
/// All data is stored in a `BTreeMap` — nothing touches disk.
/// Ideal for testing and prototyping.
///
/// # Example
///
/// ```
/// use state_store::{KvStore, MemoryStore};
///
/// let mut store = MemoryStore::new();
/// store.set("app:settings", "dark").unwrap();
///
/// let data = store.get("app:settings").unwrap().unwrap();
/// assert_eq!(data, "dark");
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryStore {
    entries: BTreeMap<String, String>,
}

/// Error type for the in-memory backend.
///
/// This backend never actually fails, but the trait requires an error type.
#[derive(Debug, Clone, Error)]
#[error("MemoryStore error: {0}")]
pub struct MemoryError(String);

impl MemoryStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if the store holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Borrow every entry, ordered by key.
    pub fn entries(&self) -> &BTreeMap<String, String> {
        &self.entries
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for MemoryStore {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            entries: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

impl KvStore for MemoryStore {
    type Error = MemoryError;

    fn get(&self, key: &str) -> Result<Option<String>, Self::Error> {
        Ok(self.entries.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), Self::Error> {
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn delete(&mut self, key: &str) -> Result<(), Self::Error> {
        self.entries.remove(key);
        Ok(())
    }

    fn list_keys(&self) -> Result<Vec<String>, Self::Error> {
        Ok(self.entries.keys().cloned().collect())
    }

    fn exists(&self, key: &str) -> Result<bool, Self::Error> {
        Ok(self.entries.contains_key(key))
    }

    fn list_keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, Self::Error> {
        Ok(self
            .entries
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_get_delete() {
        let mut store = MemoryStore::new();

        store.set("k1", "hello").unwrap();
        assert_eq!(store.get("k1").unwrap(), Some("hello".to_string()));

        store.set("k1", "world").unwrap();
        assert_eq!(store.get("k1").unwrap(), Some("world".to_string()));

        store.delete("k1").unwrap();
        assert_eq!(store.get("k1").unwrap(), None);
    }

    #[test]
    fn delete_missing_is_ok() {
        let mut store = MemoryStore::new();
        assert!(store.delete("nope").is_ok());
        assert!(store.is_empty());
    }

    #[test]
    fn list_keys_sorted() {
        let mut store = MemoryStore::new();
        store.set("b", "2").unwrap();
        store.set("a", "1").unwrap();
        assert_eq!(store.list_keys().unwrap(), vec!["a", "b"]);
    }

    #[test]
    fn prefix_listing() {
        let mut store = MemoryStore::new();
        store.set("app:a", "1").unwrap();
        store.set("app:b", "2").unwrap();
        store.set("apq", "3").unwrap();
        store.set("other:c", "4").unwrap();

        assert_eq!(
            store.list_keys_with_prefix("app:").unwrap(),
            vec!["app:a", "app:b"]
        );
        assert!(store.list_keys_with_prefix("zzz").unwrap().is_empty());
    }

    #[test]
    fn exists() {
        let mut store = MemoryStore::new();
        assert!(!store.exists("k").unwrap());
        store.set("k", "v").unwrap();
        assert!(store.exists("k").unwrap());
    }

    #[test]
    fn collect_from_pairs() {
        let store: MemoryStore = [("x", "1"), ("y", "2")].into_iter().collect();
        assert_eq!(store.len(), 2);
        assert_eq!(store.get("y").unwrap().as_deref(), Some("2"));
    }

    #[test]
    fn works_through_mut_ref() {
        fn write<S: KvStore>(mut s: S) {
            s.set("via-ref", "ok").unwrap();
        }
        let mut store = MemoryStore::new();
        write(&mut store);
        assert!(store.exists("via-ref").unwrap());
    }
}
