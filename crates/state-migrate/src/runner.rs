use core::fmt;

use log::{debug, error, info, warn};
use state_store::KvStore;

use crate::config::MigrationConfig;
use crate::error::MigrationError;
use crate::ledger::VersionLedger;
use crate::registry::{MigrationRegistry, MigrationStep};
use crate::snapshot::SnapshotManager;
use crate::state::StoreState;
use crate::version::Version;

/// Phases a run moves through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunState {
    Idle,
    Planning,
    Snapshotting,
    Applying(usize),
    Committed,
    RolledBack,
    Failed,
}

struct RunTracker {
    state: RunState,
}

impl RunTracker {
    fn new() -> Self {
        Self {
            state: RunState::Idle,
        }
    }

    fn enter(&mut self, next: RunState) {
        match next {
            RunState::Applying(idx) if idx > 0 => {
                debug!("migration run: step {idx} done, applying step {}", idx + 1)
            }
            _ => debug!("migration run: {:?} -> {next:?}", self.state),
        }
        self.state = next;
    }
}

/// Terminal state of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every planned step applied (possibly none).
    Committed,
    /// A step failed and the store was restored to its pre-run snapshot.
    RolledBack,
    /// The run failed. If it failed while applying steps and the restore
    /// failed too, the store is partially migrated.
    Failed,
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Committed => write!(f, "committed"),
            Self::RolledBack => write!(f, "rolled back"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// What a call to [`MigrationRunner::run`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationReport {
    pub outcome: RunOutcome,
    /// Steps whose effects remain in the store.
    pub steps_applied: usize,
    /// Schema version the store is at after the run.
    pub final_version: Version,
    /// Why the run did not commit.
    pub error: Option<MigrationError>,
    /// Why the automatic rollback failed, if it did.
    pub restore_error: Option<MigrationError>,
}

impl MigrationReport {
    fn committed(steps_applied: usize, final_version: Version) -> Self {
        Self {
            outcome: RunOutcome::Committed,
            steps_applied,
            final_version,
            error: None,
            restore_error: None,
        }
    }

    fn failed(final_version: Version, error: MigrationError) -> Self {
        Self {
            outcome: RunOutcome::Failed,
            steps_applied: 0,
            final_version,
            error: Some(error),
            restore_error: None,
        }
    }

    /// Every planned step committed.
    pub fn success(&self) -> bool {
        self.outcome == RunOutcome::Committed
    }

    /// The store may mix old- and new-schema data; start-up should halt.
    pub fn requires_intervention(&self) -> bool {
        self.outcome == RunOutcome::Failed && self.restore_error.is_some()
    }

    /// `Ok((steps_applied, final_version))` for a committed run, the
    /// original error otherwise.
    pub fn into_result(self) -> Result<(usize, Version), MigrationError> {
        match self.error {
            None => Ok((self.steps_applied, self.final_version)),
            Some(e) => Err(e),
        }
    }
}

/// Upgrades a store to the newest registered schema version.
///
/// Build one at start-up, register every step, then call
/// [`run`](Self::run) once before anything else reads persisted state.
/// The runner holds no lock: callers must not run two against one store.
///
/// # Example
///
/// ```
/// use state_migrate::{FnStep, MigrationConfig, MigrationRunner, Version};
/// use state_store::{KvStore, MemoryStore};
///
/// let runner = MigrationRunner::builder(MigrationConfig::default())
///     .register(
///         FnStep::new("1.1.0", |mut state| {
///             state.set("app:greeting", "hello");
///             Ok(state)
///         })
///         .unwrap()
///         .boxed(),
///     )
///     .build()
///     .unwrap();
///
/// let mut store = MemoryStore::new();
/// let report = runner.run(&mut store, None, None);
/// assert!(report.success());
/// assert_eq!(report.final_version, Version::new(1, 1, 0));
/// assert_eq!(store.get("app:greeting").unwrap().as_deref(), Some("hello"));
/// ```
pub struct MigrationRunner {
    config: MigrationConfig,
    registry: MigrationRegistry,
    ledger: VersionLedger,
    snapshots: SnapshotManager,
}

/// Builder for a [`MigrationRunner`] with its steps.
pub struct MigrationRunnerBuilder {
    runner: MigrationRunner,
    error: Option<MigrationError>,
}

impl MigrationRunnerBuilder {
    /// Register a migration step. Registration errors surface from `build`.
    pub fn register(mut self, step: Box<dyn MigrationStep>) -> Self {
        if self.error.is_none() {
            self.error = self.runner.register(step).err();
        }
        self
    }

    /// Register several steps in order.
    pub fn register_many<I>(mut self, steps: I) -> Self
    where
        I: IntoIterator<Item = Box<dyn MigrationStep>>,
    {
        if self.error.is_none() {
            self.error = self.runner.register_many(steps).err();
        }
        self
    }

    /// Build the runner, failing with the first registration error.
    pub fn build(self) -> Result<MigrationRunner, MigrationError> {
        match self.error {
            Some(e) => Err(e),
            None => Ok(self.runner),
        }
    }
}

impl MigrationRunner {
    /// Create a runner with no steps.
    pub fn new(config: MigrationConfig) -> Self {
        Self {
            registry: MigrationRegistry::new(config.default_version),
            ledger: VersionLedger::new(&config),
            snapshots: SnapshotManager::new(&config),
            config,
        }
    }

    /// Create a builder for registering steps fluently.
    pub fn builder(config: MigrationConfig) -> MigrationRunnerBuilder {
        MigrationRunnerBuilder {
            runner: Self::new(config),
            error: None,
        }
    }

    /// Register a migration step.
    pub fn register(&mut self, step: Box<dyn MigrationStep>) -> Result<(), MigrationError> {
        self.registry.register(step)
    }

    /// Register several steps in order, stopping at the first failure.
    pub fn register_many<I>(&mut self, steps: I) -> Result<(), MigrationError>
    where
        I: IntoIterator<Item = Box<dyn MigrationStep>>,
    {
        self.registry.register_many(steps)
    }

    /// Configuration the runner was built with.
    pub fn config(&self) -> &MigrationConfig {
        &self.config
    }

    /// Registered steps.
    pub fn registry(&self) -> &MigrationRegistry {
        &self.registry
    }

    /// Ledger the runner reads and advances.
    pub fn ledger(&self) -> &VersionLedger {
        &self.ledger
    }

    /// Snapshot manager used for the pre-run backup.
    pub fn snapshots(&self) -> &SnapshotManager {
        &self.snapshots
    }

    /// The recorded version and where a run starts: the explicit version
    /// if given, never below the ledger, so a step never re-runs over state
    /// it already produced.
    fn start_version<S: KvStore>(
        &self,
        store: &S,
        from: Option<&Version>,
    ) -> Result<(Version, Version), MigrationError> {
        let current = self.ledger.current(store)?;
        let start = match from {
            Some(requested) if *requested < current => {
                warn!(
                    "requested start v{requested} is below ledger v{current}, \
                     starting at v{current}"
                );
                current
            }
            Some(requested) => *requested,
            None => current,
        };
        Ok((current, start))
    }

    /// The versions a run would apply, without touching the store.
    pub fn plan<S: KvStore>(
        &self,
        store: &S,
        from: Option<&Version>,
        to: Option<&Version>,
    ) -> Result<Vec<Version>, MigrationError> {
        let (_, from) = self.start_version(store, from)?;
        Ok(self
            .registry
            .pending_steps(&from, to)
            .iter()
            .map(|s| s.target_version())
            .collect())
    }

    /// Upgrade `store` from `from` (default: the ledger) up to `to`
    /// (default: the newest registered step).
    ///
    /// A snapshot is taken before the first mutation. Steps run one at a
    /// time in ascending order, and the ledger is advanced after each. If a
    /// step fails, the snapshot is restored automatically.
    pub fn run<S: KvStore>(
        &self,
        store: &mut S,
        from: Option<&Version>,
        to: Option<&Version>,
    ) -> MigrationReport {
        let mut run = RunTracker::new();
        run.enter(RunState::Planning);

        let (recorded, start) = match self.start_version(store, from) {
            Ok(versions) => versions,
            Err(e) => {
                warn!("migration planning failed: {e}");
                run.enter(RunState::Failed);
                return MigrationReport::failed(self.ledger.default_version(), e);
            }
        };

        let plan = self.registry.pending_steps(&start, to);
        if plan.is_empty() {
            run.enter(RunState::Committed);
            debug!("schema at v{recorded}, nothing to migrate from v{start}");
            return MigrationReport::committed(0, recorded);
        }

        info!(
            "migrating v{start} -> v{} ({} step(s))",
            plan[plan.len() - 1].target_version(),
            plan.len()
        );

        run.enter(RunState::Snapshotting);
        if let Err(e) = self.snapshots.create_snapshot(store) {
            warn!("migration aborted before any change: {e}");
            run.enter(RunState::Failed);
            return MigrationReport::failed(recorded, e);
        }

        let mut state = match self.load_state(store) {
            Ok(state) => state,
            Err(e) => {
                let failure = MigrationError::StepApplyError {
                    version: plan[0].target_version(),
                    reason: format!("could not load state: {e}"),
                };
                return self.roll_back(store, &mut run, failure, 0, recorded, recorded);
            }
        };

        let mut applied = 0;
        let mut version = recorded;
        for (idx, step) in plan.iter().enumerate() {
            run.enter(RunState::Applying(idx));
            match self.apply_step(store, *step, state) {
                Ok(next) => {
                    state = next;
                    applied += 1;
                    version = step.target_version();
                }
                Err(e) => return self.roll_back(store, &mut run, e, applied, version, recorded),
            }
        }

        run.enter(RunState::Committed);
        info!("schema now at v{version} after {applied} step(s)");
        MigrationReport::committed(applied, version)
    }

    /// Apply one step, persist its result and advance the ledger.
    fn apply_step<S: KvStore>(
        &self,
        store: &mut S,
        step: &dyn MigrationStep,
        current: StoreState,
    ) -> Result<StoreState, MigrationError> {
        let target = step.target_version();
        match step.description() {
            Some(desc) => info!("applying v{target}: {desc}"),
            None => info!("applying v{target}"),
        }

        let step_err = |reason: String| MigrationError::StepApplyError {
            version: target,
            reason,
        };

        let next = step
            .apply(current.clone())
            .map_err(|e| step_err(e.to_string()))?;

        if let Some(key) = next.iter().map(|(k, _)| k).find(|k| !self.is_state_key(k)) {
            return Err(step_err(format!(
                "step produced key `{key}` outside the application state"
            )));
        }

        let changes = current.changes_to(&next);
        debug!(
            "v{target}: {} write(s), {} delete(s)",
            changes.upserts.len(),
            changes.removals.len()
        );
        for (key, value) in &changes.upserts {
            store
                .set(key, value)
                .map_err(|e| step_err(format!("persisting `{key}`: {e}")))?;
        }
        for key in &changes.removals {
            store
                .delete(key)
                .map_err(|e| step_err(format!("deleting `{key}`: {e}")))?;
        }

        self.ledger.set_current(store, &target)?;
        Ok(next)
    }

    /// Restore the pre-run snapshot after a failure inside the apply phase.
    fn roll_back<S: KvStore>(
        &self,
        store: &mut S,
        run: &mut RunTracker,
        failure: MigrationError,
        applied: usize,
        reached: Version,
        recorded: Version,
    ) -> MigrationReport {
        run.enter(RunState::Failed);
        warn!("{failure}; rolling back to the pre-run snapshot");

        match self.snapshots.restore_latest(store) {
            Ok(snapshot) => {
                run.enter(RunState::RolledBack);
                let final_version = match self.ledger.current(store) {
                    Ok(version) => version,
                    Err(e) => {
                        warn!(
                            "could not re-read the ledger after rollback, \
                             reporting pre-run v{recorded}: {e}"
                        );
                        recorded
                    }
                };
                warn!(
                    "rolled back to `{}`, schema remains at v{final_version}",
                    snapshot.key
                );
                MigrationReport {
                    outcome: RunOutcome::RolledBack,
                    steps_applied: 0,
                    final_version,
                    error: Some(failure),
                    restore_error: None,
                }
            }
            Err(restore) => {
                error!(
                    "UNRECOVERABLE: rollback after `{failure}` failed: {restore}; \
                     store is partially migrated at v{reached} and needs manual repair"
                );
                MigrationReport {
                    outcome: RunOutcome::Failed,
                    steps_applied: applied,
                    final_version: reached,
                    error: Some(failure),
                    restore_error: Some(restore),
                }
            }
        }
    }

    /// Application keys as seen by steps: the namespace minus ledger and
    /// snapshot records.
    fn is_state_key(&self, key: &str) -> bool {
        key.starts_with(&self.config.namespace)
            && !self.ledger.owns(key)
            && !self.snapshots.is_snapshot_key(key)
    }

    fn load_state<S: KvStore>(&self, store: &S) -> Result<StoreState, S::Error> {
        let mut state = StoreState::new();
        for key in store.list_keys_with_prefix(&self.config.namespace)? {
            if !self.is_state_key(&key) {
                continue;
            }
            if let Some(value) = store.get(&key)? {
                state.set(key, value);
            }
        }
        Ok(state)
    }
}
