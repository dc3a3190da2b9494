use log::{debug, warn};
use state_store::KvStore;

use crate::config::MigrationConfig;
use crate::error::MigrationError;
use crate::version::Version;

/// Reads and writes the persisted "current schema version" record.
///
/// The ledger is created lazily: a store without a ledger entry (or with
/// an unreadable one) is reported at the configured default version, and
/// reading never writes anything back.
#[derive(Debug, Clone)]
pub struct VersionLedger {
    key: String,
    legacy_keys: Vec<String>,
    default_version: Version,
}

impl VersionLedger {
    /// Create a ledger over the keys named in `config`.
    pub fn new(config: &MigrationConfig) -> Self {
        Self {
            key: config.ledger_key.clone(),
            legacy_keys: config.legacy_ledger_keys.clone(),
            default_version: config.default_version,
        }
    }

    /// Key the ledger is written under.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Version assumed when no readable record exists.
    pub fn default_version(&self) -> Version {
        self.default_version
    }

    /// The applied schema version.
    ///
    /// Missing or malformed content yields the default. Only a failing
    /// store read is an error.
    pub fn current<S: KvStore>(&self, store: &S) -> Result<Version, MigrationError> {
        let raw = store
            .get(&self.key)
            .map_err(|e| MigrationError::LedgerReadError(e.to_string()))?;

        match raw {
            None => {
                debug!(
                    "no ledger at `{}`, assuming v{}",
                    self.key, self.default_version
                );
                Ok(self.default_version)
            }
            Some(raw) => match Version::parse(&raw) {
                Ok(version) => Ok(version),
                Err(e) => {
                    warn!(
                        "ignoring malformed ledger at `{}` ({e}), assuming v{}",
                        self.key, self.default_version
                    );
                    Ok(self.default_version)
                }
            },
        }
    }

    /// Record `version` as applied.
    ///
    /// Every previous ledger record, including legacy locations, is deleted
    /// before the new value is written, so exactly one entry remains.
    pub fn set_current<S: KvStore>(
        &self,
        store: &mut S,
        version: &Version,
    ) -> Result<(), MigrationError> {
        let write_err = |e: S::Error| MigrationError::LedgerWriteError {
            version: *version,
            reason: e.to_string(),
        };

        for key in self.legacy_keys.iter().chain(core::iter::once(&self.key)) {
            store.delete(key).map_err(write_err)?;
        }
        store
            .set(&self.key, &version.to_string())
            .map_err(write_err)?;

        debug!("ledger `{}` now at v{version}", self.key);
        Ok(())
    }

    /// Keys this ledger owns (current and legacy).
    pub(crate) fn owns(&self, key: &str) -> bool {
        key == self.key || self.legacy_keys.iter().any(|k| k == key)
    }
}
