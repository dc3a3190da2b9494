use core::fmt;

/// Core trait for the persisted application store.
///
/// Every backend implements this trait. Keys and values are plain strings;
/// the store does not interpret them. Namespacing is a key-prefix
/// convention owned by the caller.
///
/// All operations are synchronous and unpaginated.
pub trait KvStore {
    /// Error type for this backend.
    type Error: fmt::Debug + fmt::Display;

    /// Retrieve the value stored under `key`.
    /// Returns `None` if the key does not exist.
    fn get(&self, key: &str) -> Result<Option<String>, Self::Error>;

    /// Store `value` under `key`, replacing any previous value.
    fn set(&mut self, key: &str, value: &str) -> Result<(), Self::Error>;

    /// Delete `key`. Deleting an absent key is not an error.
    fn delete(&mut self, key: &str) -> Result<(), Self::Error>;

    /// List every key in the store.
    fn list_keys(&self) -> Result<Vec<String>, Self::Error>;

    /// Check if a key exists.
    fn exists(&self, key: &str) -> Result<bool, Self::Error> {
        Ok(self.get(key)?.is_some())
    }

    /// List the keys starting with `prefix`, in ascending order.
    fn list_keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, Self::Error> {
        let mut keys: Vec<String> = self
            .list_keys()?
            .into_iter()
            .filter(|k| k.starts_with(prefix))
            .collect();
        keys.sort();
        Ok(keys)
    }
}

impl<S: KvStore + ?Sized> KvStore for &mut S {
    type Error = S::Error;

    fn get(&self, key: &str) -> Result<Option<String>, Self::Error> {
        (**self).get(key)
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), Self::Error> {
        (**self).set(key, value)
    }

    fn delete(&mut self, key: &str) -> Result<(), Self::Error> {
        (**self).delete(key)
    }

    fn list_keys(&self) -> Result<Vec<String>, Self::Error> {
        (**self).list_keys()
    }

    fn exists(&self, key: &str) -> Result<bool, Self::Error> {
        (**self).exists(key)
    }
}
