//! # state-store
//!
//! Plain key-value persistence backends for
//! [`state-migrate`](https://docs.rs/state-migrate).
//!
//! The application's durable state lives in a flat, string-keyed store.
//! Migration code and the rest of the application only ever touch it through
//! the four primitives of [`KvStore`]: `get`, `set`, `delete` and `list_keys`.
//!
//! ## Quick Start
//!
//! ```
//! use state_store::{KvStore, MemoryStore};
//!
//! let mut store = MemoryStore::new();
//! store.set("app:profile", r#"{"name":"ada"}"#).unwrap();
//! let data = store.get("app:profile").unwrap();
//! assert_eq!(data.as_deref(), Some(r#"{"name":"ada"}"#));
//! ```
//!
//! ## Backends
//!
//! | Backend | Feature flag | Use case |
//! |---------|-------------|----------|
//! | [`MemoryStore`] | *(always available)* | Testing, prototyping |
//! | `SqliteStore` | `sqlite` | Desktop, mobile, edge Linux |

mod memory;
#[cfg(feature = "sqlite")]
mod sqlite;
mod traits;

pub use memory::{MemoryError, MemoryStore};
#[cfg(feature = "sqlite")]
pub use sqlite::{JournalMode, SqliteConfig, SqliteError, SqliteStore};
pub use traits::KvStore;
