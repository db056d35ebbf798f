//! docvault core — error taxonomy, configuration, storage layout.

pub mod config;
pub mod error;
pub mod layout;

pub use config::{CollectionSettings, DataPaths, DocVaultConfig, EmbedderKind, EmbedderSettings, MetricType};
pub use error::{Error, ErrorKind, Result};
