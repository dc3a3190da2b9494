//! # state-migrate
//!
//! Versioned, in-place migrations of persisted application state, with an
//! automatic rollback to a pre-run snapshot if a step fails.
//!
//! The application keeps its durable state in a plain key-value store
//! ([`state_store::KvStore`]). When the schema of that state changes, the
//! application registers a [`MigrationStep`] targeting the new version, and
//! at start-up a [`MigrationRunner`] brings the store up to date.
//!
//! ## How It Works
//!
//! 1. The **ledger** records the schema version the store is at.
//! 2. The **registry** keeps steps sorted by target version; the steps
//!    above the ledger version form the **plan**.
//! 3. Before the first change, the whole namespace is captured in a
//!    **snapshot**. Only the newest few snapshots are kept.
//! 4. Steps run one at a time, in ascending order. After each, its result
//!    is persisted and the ledger advances to its version.
//! 5. If a step fails, the snapshot is restored and the failure reported.
//!
//! ## Key Concepts
//!
//! - **Single flight**: one runner, run once, before anything else reads
//!   the store. There is no locking.
//! - **Idempotent**: a second run with no new steps finds an empty plan.
//! - **Explicit state**: steps receive and return a [`StoreState`].
//!
//! ## Quick Start
//!
//! ```
//! use state_migrate::{FnStep, MigrationConfig, MigrationRunner};
//! use state_store::{KvStore, MemoryStore};
//!
//! let mut runner = MigrationRunner::new(MigrationConfig::default());
//! runner
//!     .register(
//!         FnStep::new("1.1.0", |mut state| {
//!             state.update_json("app:user", |user| user["theme"] = "light".into())?;
//!             Ok(state)
//!         })?
//!         .with_description("add theme to user")
//!         .boxed(),
//!     )?;
//!
//! let mut store = MemoryStore::new();
//! store.set("app:user", r#"{"name":"ada"}"#).unwrap();
//!
//! let report = runner.run(&mut store, None, None);
//! assert!(report.success());
//! assert_eq!(report.final_version.to_string(), "1.1.0");
//! # Ok::<(), state_migrate::MigrationError>(())
//! ```

mod config;
mod error;
mod ledger;
mod registry;
mod runner;
mod snapshot;
mod state;
mod version;

pub use config::{MigrationConfig, DEFAULT_NAMESPACE, DEFAULT_SNAPSHOT_RETENTION};
pub use error::{MigrationError, StepError};
pub use ledger::VersionLedger;
pub use registry::{FnStep, MigrationRegistry, MigrationStep};
pub use runner::{MigrationReport, MigrationRunner, MigrationRunnerBuilder, RunOutcome};
pub use snapshot::{SnapshotInfo, SnapshotManager};
pub use state::StoreState;
pub use version::{compare, Version};

// Re-export proc macros when the `macros` feature is enabled.
#[cfg(feature = "macros")]
pub use state_migrate_macros::migration;
