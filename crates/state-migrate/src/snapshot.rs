//! Full-namespace backups taken before a migration run.
//!
//! A snapshot is one aggregate JSON record holding every application key
//! and its raw value, written under `{namespace}__snapshot__:{millis}`.
//! Only the newest `snapshot_retention` snapshots are kept.

use std::collections::BTreeMap;

use chrono::Utc;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use state_store::KvStore;

use crate::config::MigrationConfig;
use crate::error::MigrationError;

/// Width of the zero-padded timestamp embedded in snapshot keys.
const TIMESTAMP_WIDTH: usize = 20;

/// Stored form of a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct SnapshotRecord {
    /// Milliseconds since the Unix epoch.
    created_at: i64,
    entries: BTreeMap<String, String>,
}

/// A snapshot as found in the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotInfo {
    /// Store key of the aggregate record.
    pub key: String,
    /// Milliseconds since the Unix epoch, taken from the key.
    pub created_at: i64,
    /// Number of captured pairs, `None` if the record cannot be decoded.
    pub entry_count: Option<usize>,
}

/// Creates, prunes and restores snapshots of the application namespace.
#[derive(Debug, Clone)]
pub struct SnapshotManager {
    namespace: String,
    prefix: String,
    ledger_keys: Vec<String>,
    retention: usize,
}

impl SnapshotManager {
    /// Create a manager for the namespace and ledger keys in `config`.
    pub fn new(config: &MigrationConfig) -> Self {
        if config.snapshot_retention == 0 {
            warn!("snapshot retention of 0 would discard the rollback point, keeping 1");
        }
        let mut ledger_keys = vec![config.ledger_key.clone()];
        ledger_keys.extend(config.legacy_ledger_keys.iter().cloned());
        Self {
            namespace: config.namespace.clone(),
            prefix: config.snapshot_prefix(),
            ledger_keys,
            retention: config.snapshot_retention.max(1),
        }
    }

    /// How many snapshots survive a prune.
    pub fn retention(&self) -> usize {
        self.retention
    }

    /// Check if `key` is a snapshot record.
    pub fn is_snapshot_key(&self, key: &str) -> bool {
        key.starts_with(&self.prefix)
    }

    fn key_for(&self, created_at: i64) -> String {
        format!("{}{created_at:0width$}", self.prefix, width = TIMESTAMP_WIDTH)
    }

    fn timestamp_of(&self, key: &str) -> Option<i64> {
        key.strip_prefix(&self.prefix)?.parse().ok()
    }

    /// Snapshot keys with their timestamps, newest first.
    fn stamped_keys<S: KvStore>(&self, store: &S) -> Result<Vec<(i64, String)>, S::Error> {
        let mut stamped: Vec<(i64, String)> = store
            .list_keys_with_prefix(&self.prefix)?
            .into_iter()
            .filter_map(|key| match self.timestamp_of(&key) {
                Some(created_at) => Some((created_at, key)),
                None => {
                    warn!("ignoring snapshot key without a timestamp: `{key}`");
                    None
                }
            })
            .collect();
        stamped.sort_by(|a, b| b.0.cmp(&a.0));
        Ok(stamped)
    }

    fn describe<S: KvStore>(
        &self,
        store: &S,
        created_at: i64,
        key: String,
    ) -> Result<SnapshotInfo, S::Error> {
        let entry_count = store
            .get(&key)?
            .and_then(|payload| serde_json::from_str::<SnapshotRecord>(&payload).ok())
            .map(|record| record.entries.len());
        if entry_count.is_none() {
            warn!("snapshot `{key}` is unreadable");
        }
        Ok(SnapshotInfo {
            key,
            created_at,
            entry_count,
        })
    }

    /// Every snapshot in the store, newest first.
    pub fn list_snapshots<S: KvStore>(&self, store: &S) -> Result<Vec<SnapshotInfo>, S::Error> {
        self.stamped_keys(store)?
            .into_iter()
            .map(|(created_at, key)| self.describe(store, created_at, key))
            .collect()
    }

    /// The most recent snapshot, if any.
    pub fn latest<S: KvStore>(&self, store: &S) -> Result<Option<SnapshotInfo>, S::Error> {
        match self.stamped_keys(store)?.into_iter().next() {
            Some((created_at, key)) => self.describe(store, created_at, key).map(Some),
            None => Ok(None),
        }
    }

    /// Keys covered by a snapshot: the namespace (minus snapshots) plus
    /// the ledger keys, wherever they live.
    fn covered_keys<S: KvStore>(&self, store: &S) -> Result<Vec<String>, S::Error> {
        let mut keys: Vec<String> = store
            .list_keys_with_prefix(&self.namespace)?
            .into_iter()
            .filter(|k| !self.is_snapshot_key(k))
            .collect();
        for key in &self.ledger_keys {
            if !key.starts_with(&self.namespace) && store.exists(key)? {
                keys.push(key.clone());
            }
        }
        Ok(keys)
    }

    /// Capture the namespace into a new snapshot, then prune old ones.
    ///
    /// Nothing but the new snapshot record is written before this returns
    /// successfully, so a failure here leaves application data untouched.
    pub fn create_snapshot<S: KvStore>(&self, store: &mut S) -> Result<SnapshotInfo, MigrationError> {
        let write_err = |e: S::Error| MigrationError::SnapshotWriteError(e.to_string());

        let mut entries = BTreeMap::new();
        for key in self.covered_keys(store).map_err(write_err)? {
            if let Some(value) = store.get(&key).map_err(write_err)? {
                entries.insert(key, value);
            }
        }

        // Keep keys strictly ordered even when the clock does not advance
        let mut created_at = Utc::now().timestamp_millis();
        if let Some(&(newest, _)) = self.stamped_keys(store).map_err(write_err)?.first() {
            if created_at <= newest {
                created_at = newest.checked_add(1).ok_or_else(|| {
                    MigrationError::SnapshotWriteError(format!(
                        "newest snapshot timestamp {newest} cannot be exceeded"
                    ))
                })?;
            }
        }

        let record = SnapshotRecord {
            created_at,
            entries,
        };
        let payload = serde_json::to_string(&record)
            .map_err(|e| MigrationError::SnapshotWriteError(e.to_string()))?;
        let key = self.key_for(created_at);
        store.set(&key, &payload).map_err(write_err)?;

        let entry_count = record.entries.len();
        info!("snapshot `{key}` captured {entry_count} entries");

        self.prune(store);
        Ok(SnapshotInfo {
            key,
            created_at,
            entry_count: Some(entry_count),
        })
    }

    /// Delete snapshots beyond the retention count, oldest first, and
    /// return how many were deleted.
    ///
    /// Failures are logged and left for the next prune; compare
    /// [`list_snapshots`](Self::list_snapshots) with
    /// [`retention`](Self::retention) to see whether any remain.
    pub fn prune<S: KvStore>(&self, store: &mut S) -> usize {
        let stamped = match self.stamped_keys(store) {
            Ok(stamped) => stamped,
            Err(e) => {
                warn!("could not list snapshots for pruning: {e}");
                return 0;
            }
        };
        let mut pruned = 0;
        for (_, key) in stamped.into_iter().skip(self.retention) {
            match store.delete(&key) {
                Ok(()) => {
                    debug!("pruned snapshot `{key}`");
                    pruned += 1;
                }
                Err(e) => warn!("could not prune snapshot `{key}`: {e}"),
            }
        }
        pruned
    }

    /// Overwrite the namespace with the most recent snapshot.
    ///
    /// Every captured pair is written back verbatim and every covered key
    /// missing from the snapshot is deleted. The snapshot itself is kept.
    pub fn restore_latest<S: KvStore>(&self, store: &mut S) -> Result<SnapshotInfo, MigrationError> {
        let restore_err = |e: S::Error| MigrationError::RestoreError(e.to_string());

        let (created_at, key) = self
            .stamped_keys(store)
            .map_err(restore_err)?
            .into_iter()
            .next()
            .ok_or(MigrationError::NoSnapshotAvailable)?;

        let payload = store
            .get(&key)
            .map_err(restore_err)?
            .ok_or_else(|| MigrationError::RestoreError(format!("snapshot `{key}` vanished")))?;
        let record: SnapshotRecord = serde_json::from_str(&payload).map_err(|e| {
            MigrationError::RestoreError(format!("snapshot `{key}` is corrupt: {e}"))
        })?;

        let current = self.covered_keys(store).map_err(restore_err)?;

        for (key, value) in &record.entries {
            store.set(key, value).map_err(restore_err)?;
        }
        for key in current.iter().filter(|k| !record.entries.contains_key(*k)) {
            debug!("restore: removing `{key}` absent from snapshot");
            store.delete(key).map_err(restore_err)?;
        }

        let entry_count = record.entries.len();
        info!("restored {entry_count} entries from snapshot `{key}`");
        Ok(SnapshotInfo {
            key,
            created_at,
            entry_count: Some(entry_count),
        })
    }
}
