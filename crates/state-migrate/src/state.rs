use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::error::StepError;

/// The application state handed to each migration step.
///
/// It is the whole namespaced key/value map, minus the ledger and
/// snapshot keys. Values are the raw strings found in the store; records
/// are usually JSON, so there are helpers for reading and editing them.
///
/// ```
/// use state_migrate::StoreState;
///
/// let mut state = StoreState::new();
/// state.set("app:user", r#"{"name":"ada"}"#);
/// state
///     .update_json("app:user", |user| {
///         user["theme"] = "dark".into();
///     })
///     .unwrap();
///
/// let user: serde_json::Value = state.get_json("app:user").unwrap().unwrap();
/// assert_eq!(user["theme"], "dark");
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreState {
    entries: BTreeMap<String, String>,
}

impl StoreState {
    /// An empty state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap an existing key/value map.
    pub fn from_entries(entries: BTreeMap<String, String>) -> Self {
        Self { entries }
    }

    /// Raw value stored under `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    /// Insert or replace a raw value, returning the previous one.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.entries.insert(key.into(), value.into())
    }

    /// Remove `key`, returning its value.
    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.entries.remove(key)
    }

    /// Check if `key` is present.
    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Keys starting with `prefix`, in order.
    pub fn keys_with_prefix<'a>(&'a self, prefix: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.entries
            .range(prefix.to_string()..)
            .take_while(move |(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.as_str())
    }

    /// Borrow the underlying map.
    pub fn entries(&self) -> &BTreeMap<String, String> {
        &self.entries
    }

    /// Consume into the underlying map.
    pub fn into_entries(self) -> BTreeMap<String, String> {
        self.entries
    }

    /// Decode the JSON record under `key`. `Ok(None)` if the key is absent.
    pub fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StepError> {
        match self.entries.get(key) {
            Some(raw) => Ok(Some(serde_json::from_str(raw)?)),
            None => Ok(None),
        }
    }

    /// Encode `value` as JSON and store it under `key`.
    pub fn set_json<T: Serialize>(&mut self, key: &str, value: &T) -> Result<(), StepError> {
        let raw = serde_json::to_string(value)?;
        self.entries.insert(key.to_string(), raw);
        Ok(())
    }

    /// Edit the JSON record under `key` in place.
    ///
    /// Returns `Ok(false)` without calling `f` if the key is absent, and an
    /// error if the stored value is not valid JSON.
    pub fn update_json<F>(&mut self, key: &str, f: F) -> Result<bool, StepError>
    where
        F: FnOnce(&mut Value),
    {
        let Some(raw) = self.entries.get_mut(key) else {
            return Ok(false);
        };
        let mut value: Value = serde_json::from_str(raw)?;
        f(&mut value);
        *raw = serde_json::to_string(&value)?;
        Ok(true)
    }

    /// What must be written to and deleted from a store holding `self` so
    /// that it holds `next` instead.
    pub(crate) fn changes_to<'a>(&self, next: &'a StoreState) -> StateChanges<'a> {
        let upserts = next
            .entries
            .iter()
            .filter(|(k, v)| self.entries.get(*k) != Some(*v))
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        let removals = self
            .entries
            .keys()
            .filter(|k| !next.entries.contains_key(*k))
            .cloned()
            .collect();
        StateChanges { upserts, removals }
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for StoreState {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            entries: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct StateChanges<'a> {
    pub upserts: Vec<(&'a str, &'a str)>,
    pub removals: Vec<String>,
}

impl StateChanges<'_> {
    pub fn is_empty(&self) -> bool {
        self.upserts.is_empty() && self.removals.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Profile {
        name: String,
        #[serde(default)]
        theme: Option<String>,
    }

    #[test]
    fn json_helpers() {
        let mut state = StoreState::new();
        state
            .set_json(
                "app:profile",
                &Profile {
                    name: "ada".into(),
                    theme: None,
                },
            )
            .unwrap();

        let loaded: Profile = state.get_json("app:profile").unwrap().unwrap();
        assert_eq!(loaded.name, "ada");
        assert!(state.get_json::<Profile>("app:missing").unwrap().is_none());
    }

    #[test]
    fn update_json_absent_and_invalid() {
        let mut state: StoreState = [("app:broken", "{not json")].into_iter().collect();
        assert!(!state.update_json("app:absent", |_| {}).unwrap());
        assert!(state.update_json("app:broken", |_| {}).is_err());
        assert_eq!(state.get("app:broken"), Some("{not json"));
    }

    #[test]
    fn prefix_iteration() {
        let state: StoreState = [("app:a", "1"), ("app:b", "2"), ("apq", "3")]
            .into_iter()
            .collect();
        let keys: Vec<_> = state.keys_with_prefix("app:").collect();
        assert_eq!(keys, vec!["app:a", "app:b"]);
    }

    #[test]
    fn changes_between_states() {
        let before: StoreState = [("a", "1"), ("b", "2"), ("c", "3")].into_iter().collect();
        let after: StoreState = [("a", "1"), ("b", "20"), ("d", "4")].into_iter().collect();

        let changes = before.changes_to(&after);
        assert_eq!(changes.upserts, vec![("b", "20"), ("d", "4")]);
        assert_eq!(changes.removals, vec!["c".to_string()]);
        assert!(before.changes_to(&before).is_empty());
    }
}
