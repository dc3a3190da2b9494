use serde::Deserialize;

use crate::version::Version;

/// Default key prefix that marks application-owned entries.
pub const DEFAULT_NAMESPACE: &str = "app:";

/// Suffix (after the namespace) of the default ledger key.
const LEDGER_SUFFIX: &str = "__schema_version";

/// Infix (after the namespace) of every snapshot key.
pub(crate) const SNAPSHOT_INFIX: &str = "__snapshot__:";

/// Default number of snapshots kept after pruning.
pub const DEFAULT_SNAPSHOT_RETENTION: usize = 3;

/// Configuration for the migration subsystem.
///
/// Deserializable so the hosting application can embed it in its own
/// config file; every field falls back to its default when omitted.
///
/// ```
/// use state_migrate::{MigrationConfig, Version};
///
/// let config: MigrationConfig =
///     serde_json::from_str(r#"{ "namespace": "notes:", "snapshot_retention": 5 }"#).unwrap();
/// assert_eq!(config.ledger_key, "notes:__schema_version");
/// assert_eq!(config.default_version, Version::new(1, 0, 0));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "RawConfig")]
pub struct MigrationConfig {
    /// Key prefix of the application's persisted entries.
    pub namespace: String,
    /// Key holding the applied schema version.
    pub ledger_key: String,
    /// Older ledger locations removed whenever the ledger is written.
    pub legacy_ledger_keys: Vec<String>,
    /// Version reported for a store with no (or an unreadable) ledger.
    pub default_version: Version,
    /// Number of snapshots kept; never less than 1.
    pub snapshot_retention: usize,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self::for_namespace(DEFAULT_NAMESPACE)
    }
}

impl MigrationConfig {
    /// Defaults for a given namespace; the ledger key is derived from it.
    pub fn for_namespace(namespace: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            ledger_key: format!("{namespace}{LEDGER_SUFFIX}"),
            legacy_ledger_keys: Vec::new(),
            default_version: Version::new(1, 0, 0),
            snapshot_retention: DEFAULT_SNAPSHOT_RETENTION,
        }
    }

    /// Set the ledger key.
    pub fn with_ledger_key(mut self, key: &str) -> Self {
        self.ledger_key = key.to_string();
        self
    }

    /// Add a stale ledger location to clean up on every ledger write.
    pub fn with_legacy_ledger_key(mut self, key: &str) -> Self {
        self.legacy_ledger_keys.push(key.to_string());
        self
    }

    /// Set the default version.
    pub fn with_default_version(mut self, version: Version) -> Self {
        self.default_version = version;
        self
    }

    /// Set how many snapshots survive pruning.
    pub fn with_snapshot_retention(mut self, retention: usize) -> Self {
        self.snapshot_retention = retention;
        self
    }

    /// Prefix shared by every snapshot key.
    pub fn snapshot_prefix(&self) -> String {
        format!("{}{SNAPSHOT_INFIX}", self.namespace)
    }
}

/// Wire shape of the config: a ledger key left out follows the namespace.
#[derive(Deserialize)]
#[serde(default)]
struct RawConfig {
    namespace: String,
    ledger_key: Option<String>,
    legacy_ledger_keys: Vec<String>,
    default_version: Version,
    snapshot_retention: usize,
}

impl Default for RawConfig {
    fn default() -> Self {
        let base = MigrationConfig::default();
        Self {
            namespace: base.namespace,
            ledger_key: None,
            legacy_ledger_keys: base.legacy_ledger_keys,
            default_version: base.default_version,
            snapshot_retention: base.snapshot_retention,
        }
    }
}

impl From<RawConfig> for MigrationConfig {
    fn from(raw: RawConfig) -> Self {
        let mut config = MigrationConfig::for_namespace(&raw.namespace);
        if let Some(key) = raw.ledger_key {
            config.ledger_key = key;
        }
        config.legacy_ledger_keys = raw.legacy_ledger_keys;
        config.default_version = raw.default_version;
        config.snapshot_retention = raw.snapshot_retention;
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = MigrationConfig::default();
        assert_eq!(config.namespace, "app:");
        assert_eq!(config.ledger_key, "app:__schema_version");
        assert_eq!(config.default_version, Version::new(1, 0, 0));
        assert_eq!(config.snapshot_retention, 3);
        assert_eq!(config.snapshot_prefix(), "app:__snapshot__:");
    }

    #[test]
    fn deserialize_empty_object_is_default() {
        let config: MigrationConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, MigrationConfig::default());
    }

    #[test]
    fn deserialize_overrides() {
        let config: MigrationConfig = serde_json::from_str(
            r#"{
                "namespace": "notes:",
                "ledger_key": "meta:version",
                "legacy_ledger_keys": ["notes:version"],
                "default_version": "0.9"
            }"#,
        )
        .unwrap();
        assert_eq!(config.ledger_key, "meta:version");
        assert_eq!(config.legacy_ledger_keys, vec!["notes:version"]);
        assert_eq!(config.default_version, Version::new(0, 9, 0));
        assert_eq!(config.snapshot_retention, DEFAULT_SNAPSHOT_RETENTION);
    }

    #[test]
    fn deserialize_rejects_bad_default_version() {
        let result = serde_json::from_str::<MigrationConfig>(r#"{ "default_version": "x" }"#);
        assert!(result.is_err());
    }

    #[test]
    fn builder_setters() {
        let config = MigrationConfig::for_namespace("x:")
            .with_ledger_key("x:v")
            .with_legacy_ledger_key("x:old_v")
            .with_default_version(Version::new(0, 0, 0))
            .with_snapshot_retention(1);
        assert_eq!(config.ledger_key, "x:v");
        assert_eq!(config.legacy_ledger_keys, vec!["x:old_v"]);
        assert_eq!(config.snapshot_retention, 1);
    }
}
