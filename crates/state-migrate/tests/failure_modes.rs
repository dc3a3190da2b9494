//! Runs against a store that fails on demand: snapshot failures must be
//! harmless, ledger failures must roll back, and a failed rollback must be
//! reported as needing intervention.

use std::cell::Cell;

use state_migrate::{
    FnStep, MigrationConfig, MigrationError, MigrationRunner, MigrationStep, RunOutcome,
    StoreState, Version,
};
use state_store::{KvStore, MemoryStore};

#[derive(Debug, thiserror::Error)]
#[error("injected fault on `{0}`")]
struct Fault(String);

/// Wraps a `MemoryStore` and fails writes whose key matches a rule.
#[derive(Default)]
struct FaultyStore {
    inner: MemoryStore,
    /// Fail writes to keys starting with this prefix.
    fail_write_prefix: Option<String>,
    /// Fail every write attempt from this index on.
    writes_before_failure: Option<usize>,
    /// Fail only the write attempt with this index.
    fail_nth_write: Option<usize>,
    writes: Cell<usize>,
    fail_reads: bool,
    /// Reads of this key fail once it has been written.
    unreadable_after_write: Option<String>,
    poisoned: bool,
}

impl FaultyStore {
    fn seeded() -> Self {
        Self {
            inner: [
                ("app:__schema_version", "1.0.0"),
                ("app:record_y", r#"{"id":1}"#),
            ]
            .into_iter()
            .collect(),
            ..Self::default()
        }
    }

    fn check_write(&self, key: &str) -> Result<(), Fault> {
        if let Some(prefix) = &self.fail_write_prefix {
            if key.starts_with(prefix.as_str()) {
                return Err(Fault(key.to_string()));
            }
        }
        let attempt = self.writes.get();
        self.writes.set(attempt + 1);
        let past_limit = self.writes_before_failure.map_or(false, |limit| attempt >= limit);
        if past_limit || self.fail_nth_write == Some(attempt) {
            return Err(Fault(key.to_string()));
        }
        Ok(())
    }
}

impl KvStore for FaultyStore {
    type Error = Fault;

    fn get(&self, key: &str) -> Result<Option<String>, Self::Error> {
        let poisoned = self.poisoned && self.unreadable_after_write.as_deref() == Some(key);
        if self.fail_reads || poisoned {
            return Err(Fault(key.to_string()));
        }
        Ok(self.inner.get(key).unwrap_or_default())
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), Self::Error> {
        self.check_write(key)?;
        if self.unreadable_after_write.as_deref() == Some(key) {
            self.poisoned = true;
        }
        self.inner
            .set(key, value)
            .map_err(|_| Fault(key.to_string()))
    }

    fn delete(&mut self, key: &str) -> Result<(), Self::Error> {
        self.check_write(key)?;
        self.inner
            .delete(key)
            .map_err(|_| Fault(key.to_string()))
    }

    fn list_keys(&self) -> Result<Vec<String>, Self::Error> {
        if self.fail_reads {
            return Err(Fault("*".to_string()));
        }
        Ok(self.inner.list_keys().unwrap_or_default())
    }
}

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn touch(version: &str, key: &'static str) -> Box<dyn MigrationStep> {
    FnStep::new(version, move |mut state: StoreState| {
        state.set(key, "touched");
        Ok(state)
    })
    .unwrap()
    .boxed()
}

fn fail(version: &str) -> Box<dyn MigrationStep> {
    FnStep::new(version, |_| Err("boom".into())).unwrap().boxed()
}

fn runner(steps: Vec<Box<dyn MigrationStep>>) -> MigrationRunner {
    MigrationRunner::builder(MigrationConfig::default())
        .register_many(steps)
        .build()
        .unwrap()
}

#[test]
fn snapshot_write_failure_changes_nothing() {
    init_logging();
    let runner = runner(vec![touch("1.1.0", "app:record_y")]);
    let mut store = FaultyStore {
        fail_write_prefix: Some("app:__snapshot__:".into()),
        ..FaultyStore::seeded()
    };
    let before = store.inner.clone();

    let report = runner.run(&mut store, None, None);

    assert_eq!(report.outcome, RunOutcome::Failed);
    assert!(!report.requires_intervention());
    assert_eq!(report.steps_applied, 0);
    assert_eq!(report.final_version, Version::new(1, 0, 0));
    assert!(matches!(
        report.error,
        Some(MigrationError::SnapshotWriteError(_))
    ));
    assert_eq!(store.inner, before);
}

#[test]
fn ledger_write_failure_rolls_back() {
    init_logging();
    let runner = runner(vec![touch("1.1.0", "app:record_y")]);
    // Write 0 is the snapshot, write 1 the step's record, write 2 the
    // ledger's delete.
    let mut store = FaultyStore {
        fail_nth_write: Some(2),
        ..FaultyStore::seeded()
    };
    let before = store.inner.clone();

    let report = runner.run(&mut store, None, None);

    assert_eq!(report.outcome, RunOutcome::RolledBack);
    assert!(matches!(
        report.error,
        Some(MigrationError::LedgerWriteError { version, .. }) if version == Version::new(1, 1, 0)
    ));
    let app_state: Vec<_> = store
        .inner
        .entries()
        .iter()
        .filter(|(k, _)| !k.starts_with("app:__snapshot__:"))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    let expected: Vec<_> = before
        .entries()
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    assert_eq!(app_state, expected);
}

#[test]
fn failed_rollback_requires_intervention() {
    init_logging();
    let runner = runner(vec![touch("1.1.0", "app:record_y")]);
    // Everything after the step's record write fails, restore included.
    let mut store = FaultyStore {
        writes_before_failure: Some(2),
        ..FaultyStore::seeded()
    };

    let report = runner.run(&mut store, None, None);

    assert_eq!(report.outcome, RunOutcome::Failed);
    assert!(report.requires_intervention());
    assert!(matches!(
        report.error,
        Some(MigrationError::LedgerWriteError { .. })
    ));
    assert!(matches!(
        report.restore_error,
        Some(MigrationError::RestoreError(_))
    ));
    assert_eq!(report.final_version, Version::new(1, 0, 0));
    // Partially migrated: the record changed, the ledger did not
    assert_eq!(
        store.inner.get("app:record_y").unwrap().as_deref(),
        Some("touched")
    );
    assert_eq!(
        store.inner.get("app:__schema_version").unwrap().as_deref(),
        Some("1.0.0")
    );
}

#[test]
fn failed_rollback_reports_recorded_version_not_requested_start() {
    init_logging();
    let runner = runner(vec![
        touch("1.1.0", "app:record_y"),
        touch("1.2.0", "app:record_y"),
    ]);
    let mut store = FaultyStore {
        writes_before_failure: Some(2),
        ..FaultyStore::seeded()
    };

    let report = runner.run(&mut store, Some(&Version::new(1, 1, 0)), None);

    assert!(report.requires_intervention());
    assert_eq!(report.steps_applied, 0);
    assert_eq!(report.final_version, Version::new(1, 0, 0));
}

#[test]
fn unreadable_ledger_after_rollback_reports_pre_run_version() {
    init_logging();
    let runner = runner(vec![touch("1.1.0", "app:record_y"), fail("1.2.0")]);
    // The restore rewrites the ledger, after which it cannot be read back.
    let mut store = FaultyStore {
        unreadable_after_write: Some("app:__schema_version".into()),
        ..FaultyStore::seeded()
    };

    let report = runner.run(&mut store, Some(&Version::new(1, 1, 0)), None);

    assert_eq!(report.outcome, RunOutcome::RolledBack);
    assert!(!report.requires_intervention());
    assert_eq!(report.final_version, Version::new(1, 0, 0));
    assert_eq!(
        store.inner.get("app:__schema_version").unwrap().as_deref(),
        Some("1.0.0")
    );
}

#[test]
fn persisting_step_result_failure_is_step_error() {
    init_logging();
    let runner = runner(vec![touch("1.1.0", "app:new_record")]);
    let mut store = FaultyStore {
        fail_write_prefix: Some("app:new_record".into()),
        ..FaultyStore::seeded()
    };

    let report = runner.run(&mut store, None, None);

    assert_eq!(report.outcome, RunOutcome::RolledBack);
    match report.error {
        Some(MigrationError::StepApplyError { version, reason }) => {
            assert_eq!(version, Version::new(1, 1, 0));
            assert!(reason.contains("app:new_record"), "{reason}");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(!store.inner.exists("app:new_record").unwrap());
    assert_eq!(
        store.inner.get("app:__schema_version").unwrap().as_deref(),
        Some("1.0.0")
    );
}

#[test]
fn unreadable_ledger_fails_before_planning() {
    init_logging();
    let runner = runner(vec![touch("1.1.0", "app:record_y")]);
    let mut store = FaultyStore {
        fail_reads: true,
        ..FaultyStore::seeded()
    };

    let report = runner.run(&mut store, None, None);
    assert_eq!(report.outcome, RunOutcome::Failed);
    assert!(matches!(
        report.error,
        Some(MigrationError::LedgerReadError(_))
    ));
    assert_eq!(store.writes.get(), 0);
}

#[test]
fn restore_without_any_snapshot_is_reported() {
    init_logging();
    let runner = runner(vec![]);
    let mut store = MemoryStore::new();
    assert_eq!(
        runner.snapshots().restore_latest(&mut store).unwrap_err(),
        MigrationError::NoSnapshotAvailable
    );
}
