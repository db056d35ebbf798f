//! docvault Runtime — the pipelines wired to their stores.
//!
//! [`Services`] owns the store, index, embedder and extractor handles and
//! hands out the short-lived pipeline components that borrow them.

pub mod email;
pub mod reconcile;
pub mod retrieve;
pub mod services;
pub mod users;

pub use reconcile::{ReconcileReport, Reconciler};
pub use retrieve::{RankedHit, Retrieval, Retriever};
pub use services::Services;
pub use users::UserManager;
