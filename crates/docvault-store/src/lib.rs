//! docvault Store — SQLite document store with session-scoped transactions.
//!
//! Holds user profiles, per-user document metadata (dedup hash, storage
//! path) and the journal of cross-store writes. The vector index is a
//! separate store; nothing here spans both.

pub mod schema;
pub mod session;
pub mod sqlite;
pub mod types;

pub use session::StoreSession;
pub use sqlite::DocumentStore;
pub use types::*;
