//! Dotted `major.minor.patch` schema versions and their total order.

use core::cmp::Ordering;
use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::MigrationError;

/// An immutable schema version `major.minor.patch`.
///
/// Missing components parse as `0`, so `"2"` and `"2.0"` both equal
/// `2.0.0`. Ordering compares `major`, then `minor`, then `patch`.
///
/// # Example
///
/// ```
/// use state_migrate::Version;
///
/// let v: Version = "1.2".parse().unwrap();
/// assert_eq!(v, Version::new(1, 2, 0));
/// assert_eq!(v.to_string(), "1.2.0");
/// assert!(v < Version::new(1, 10, 0));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Version {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
}

impl Version {
    /// Build a version from its three components.
    pub const fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Parse a dotted version string.
    ///
    /// Fails with [`MigrationError::InvalidVersionFormat`] if any present
    /// component is not a non-negative integer, or if there are more than
    /// three components.
    pub fn parse(input: &str) -> Result<Self, MigrationError> {
        let trimmed = input.trim();
        let mut parts = [0u64; 3];
        for (idx, raw) in trimmed.split('.').enumerate() {
            if idx >= parts.len() {
                return Err(MigrationError::invalid_version(
                    input,
                    "more than three components",
                ));
            }
            if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
                return Err(MigrationError::invalid_version(
                    input,
                    format!("component `{raw}` is not numeric"),
                ));
            }
            parts[idx] = raw
                .parse()
                .map_err(|e| MigrationError::invalid_version(input, format!("{e}")))?;
        }
        Ok(Self::new(parts[0], parts[1], parts[2]))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl FromStr for Version {
    type Err = MigrationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for Version {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Version {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}

/// Compare two dotted version strings.
///
/// ```
/// use core::cmp::Ordering;
/// use state_migrate::compare;
///
/// assert_eq!(compare("1.2", "1.2.0").unwrap(), Ordering::Equal);
/// assert_eq!(compare("1.10.0", "1.9.9").unwrap(), Ordering::Greater);
/// assert!(compare("1.x", "1.0").is_err());
/// ```
pub fn compare(a: &str, b: &str) -> Result<Ordering, MigrationError> {
    Ok(Version::parse(a)?.cmp(&Version::parse(b)?))
}
