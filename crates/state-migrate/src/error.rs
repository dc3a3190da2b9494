use thiserror::Error;

use crate::version::Version;

/// Error returned by a migration step's `apply`.
///
/// Steps are free to fail with any error type; the runner wraps it into
/// [`MigrationError::StepApplyError`] together with the step's target version.
pub type StepError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Error during version handling, registration, snapshotting or a run.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MigrationError {
    /// A version string has a non-numeric, empty or surplus component.
    #[error("invalid version format `{input}`: {reason}")]
    InvalidVersionFormat { input: String, reason: String },
    /// A step targeting this version is already registered.
    #[error("a migration step targeting v{0} is already registered")]
    DuplicateVersion(Version),
    /// A step failed, or persisting its result failed.
    #[error("migration to v{version} failed: {reason}")]
    StepApplyError { version: Version, reason: String },
    /// The ledger could not be read from the store.
    #[error("failed to read schema version ledger: {0}")]
    LedgerReadError(String),
    /// The ledger could not be advanced after a successful step.
    #[error("failed to record schema version v{version}: {reason}")]
    LedgerWriteError { version: Version, reason: String },
    /// The pre-run snapshot could not be captured or written.
    #[error("failed to write snapshot: {0}")]
    SnapshotWriteError(String),
    /// `restore_latest` found no snapshot to restore.
    #[error("no snapshot available to restore")]
    NoSnapshotAvailable,
    /// A snapshot exists but could not be written back.
    #[error("failed to restore snapshot: {0}")]
    RestoreError(String),
}

impl MigrationError {
    pub(crate) fn invalid_version(input: &str, reason: impl Into<String>) -> Self {
        Self::InvalidVersionFormat {
            input: input.to_string(),
            reason: reason.into(),
        }
    }

    /// The target version of the step this error belongs to, if any.
    pub fn version(&self) -> Option<&Version> {
        match self {
            Self::DuplicateVersion(v) => Some(v),
            Self::StepApplyError { version, .. } | Self::LedgerWriteError { version, .. } => {
                Some(version)
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_carries_version_and_cause() {
        let err = MigrationError::StepApplyError {
            version: Version::new(1, 2, 0),
            reason: "missing field".into(),
        };
        assert_eq!(err.to_string(), "migration to v1.2.0 failed: missing field");
        assert_eq!(err.version(), Some(&Version::new(1, 2, 0)));
    }

    #[test]
    fn snapshot_errors_have_no_version() {
        assert_eq!(MigrationError::NoSnapshotAvailable.version(), None);
        assert_eq!(
            MigrationError::SnapshotWriteError("disk full".into()).to_string(),
            "failed to write snapshot: disk full"
        );
    }
}
