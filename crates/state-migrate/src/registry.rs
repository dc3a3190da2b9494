use log::debug;

use crate::error::{MigrationError, StepError};
use crate::state::StoreState;
use crate::version::Version;

/// A single migration step that moves persisted state to `target_version`.
///
/// Each step receives the complete [`StoreState`] produced by the previous
/// step (or loaded from the store) and returns the state it wants persisted.
/// A step targeting `V` only runs while the ledger is below `V`.
pub trait MigrationStep: Send + Sync {
    /// Version the state is at once this step has succeeded.
    fn target_version(&self) -> Version;

    /// Human-readable summary, used in logs and listings.
    fn description(&self) -> Option<&str> {
        None
    }

    /// Transform the state.
    fn apply(&self, state: StoreState) -> Result<StoreState, StepError>;
}

type ApplyFn = dyn Fn(StoreState) -> Result<StoreState, StepError> + Send + Sync;

/// A [`MigrationStep`] backed by a closure.
///
/// ```
/// use state_migrate::{FnStep, MigrationStep, StoreState};
///
/// let step = FnStep::new("1.1.0", |mut state: StoreState| {
///     state.set("app:flag", "on");
///     Ok(state)
/// })
/// .unwrap()
/// .with_description("turn the flag on");
///
/// assert_eq!(step.target_version().to_string(), "1.1.0");
/// let out = step.apply(StoreState::new()).unwrap();
/// assert_eq!(out.get("app:flag"), Some("on"));
/// ```
pub struct FnStep {
    version: Version,
    description: Option<String>,
    apply: Box<ApplyFn>,
}

impl FnStep {
    /// Build a step from a version string and a closure.
    pub fn new<F>(version: &str, apply: F) -> Result<Self, MigrationError>
    where
        F: Fn(StoreState) -> Result<StoreState, StepError> + Send + Sync + 'static,
    {
        Ok(Self::with_version(Version::parse(version)?, apply))
    }

    /// Build a step from an already parsed version.
    pub fn with_version<F>(version: Version, apply: F) -> Self
    where
        F: Fn(StoreState) -> Result<StoreState, StepError> + Send + Sync + 'static,
    {
        Self {
            version,
            description: None,
            apply: Box::new(apply),
        }
    }

    /// Attach a human-readable description.
    pub fn with_description(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }

    /// Box the step for registration.
    pub fn boxed(self) -> Box<dyn MigrationStep> {
        Box::new(self)
    }
}

impl MigrationStep for FnStep {
    fn target_version(&self) -> Version {
        self.version
    }

    fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    fn apply(&self, state: StoreState) -> Result<StoreState, StepError> {
        (self.apply)(state)
    }
}

/// Ordered collection of migration steps.
///
/// Steps are kept sorted by target version and are unique per version.
/// The registry is filled once at start-up and only grows.
pub struct MigrationRegistry {
    steps: Vec<Box<dyn MigrationStep>>,
    default_version: Version,
}

impl MigrationRegistry {
    /// Create an empty registry. `default_version` is what
    /// [`latest_version`](Self::latest_version) reports while it is empty.
    pub fn new(default_version: Version) -> Self {
        Self {
            steps: Vec::new(),
            default_version,
        }
    }

    /// Register a migration step.
    ///
    /// Fails with [`MigrationError::DuplicateVersion`] if a step targeting
    /// the same version is already registered.
    pub fn register(&mut self, step: Box<dyn MigrationStep>) -> Result<(), MigrationError> {
        let version = step.target_version();
        if self.steps.iter().any(|s| s.target_version() == version) {
            return Err(MigrationError::DuplicateVersion(version));
        }
        debug!("registered migration step v{version}");
        self.steps.push(step);
        // Keep sorted by target version; the plan is a filtered view
        self.steps.sort_by_key(|s| s.target_version());
        Ok(())
    }

    /// Register steps in argument order, stopping at the first failure.
    /// Steps before the failing one stay registered.
    pub fn register_many<I>(&mut self, steps: I) -> Result<(), MigrationError>
    where
        I: IntoIterator<Item = Box<dyn MigrationStep>>,
    {
        for step in steps {
            self.register(step)?;
        }
        Ok(())
    }

    /// The execution plan from `from` up to an optional inclusive ceiling.
    ///
    /// Returns the steps with `from < target_version <= to`, ascending.
    pub fn pending_steps(&self, from: &Version, to: Option<&Version>) -> Vec<&dyn MigrationStep> {
        self.steps
            .iter()
            .map(|s| s.as_ref())
            .filter(|s| s.target_version() > *from)
            .filter(|s| to.map_or(true, |ceiling| s.target_version() <= *ceiling))
            .collect()
    }

    /// Check if any step is pending from `from`.
    pub fn needs_migration(&self, from: &Version) -> bool {
        self.steps
            .last()
            .map_or(false, |s| s.target_version() > *from)
    }

    /// Newest registered target version, or the default when empty.
    pub fn latest_version(&self) -> Version {
        self.steps
            .last()
            .map_or(self.default_version, |s| s.target_version())
    }

    /// List all registered steps as `(version, description)` pairs, in order.
    pub fn registered_steps(&self) -> Vec<(Version, Option<String>)> {
        self.steps
            .iter()
            .map(|s| (s.target_version(), s.description().map(str::to_string)))
            .collect()
    }

    /// Number of registered steps.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}
