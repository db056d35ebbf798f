//! docvault Index — vector collections split into per-user partitions.
//!
//! [`VectorIndex`] is the seam the pipelines program against. Its provided
//! methods carry the load retry, threshold filtering and the bounded
//! delete-by-filter loop, so every backend gets the same semantics.
//! [`SqliteVectorIndex`] persists rows in SQLite and searches loaded
//! partitions as in-memory `ndarray` matrices.

pub mod distance;
pub mod filter;
pub mod index;
pub mod schema;
pub mod sqlite;
pub mod types;

pub use filter::Filter;
pub use index::VectorIndex;
pub use sqlite::SqliteVectorIndex;
pub use types::*;
