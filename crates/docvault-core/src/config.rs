//! Configuration and data directory management.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::{Error, Result};

/// Paths to all docvault data directories.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataPaths {
    /// Root data directory (e.g., `volumes/docvault/`).
    pub root: PathBuf,
    /// Per-user uploaded files (`root/user_files/`).
    pub files: PathBuf,
    /// Document store directory (`root/metadata/`).
    pub metadata: PathBuf,
    /// Vector index directory (`root/vectors/`).
    pub vectors: PathBuf,
}

impl DataPaths {
    /// Create data paths from a root directory. Creates directories if needed.
    pub fn new(root: impl AsRef<Path>) -> std::io::Result<Self> {
        let root = root.as_ref().to_path_buf();
        let paths = Self {
            files: root.join("user_files"),
            metadata: root.join("metadata"),
            vectors: root.join("vectors"),
            root,
        };
        paths.ensure_dirs()?;
        Ok(paths)
    }

    fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.files)?;
        std::fs::create_dir_all(&self.metadata)?;
        std::fs::create_dir_all(&self.vectors)?;
        Ok(())
    }
}

/// Similarity metric used by the vector collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MetricType {
    /// Inner product. Embeddings are expected to be L2-normalized.
    Ip,
    L2,
    Cosine,
}

impl MetricType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ip => "IP",
            Self::L2 => "L2",
            Self::Cosine => "COSINE",
        }
    }
}

impl FromStr for MetricType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "IP" => Ok(Self::Ip),
            "L2" => Ok(Self::L2),
            "COSINE" => Ok(Self::Cosine),
            other => Err(Error::Config(format!("unknown metric type: {}", other))),
        }
    }
}

impl std::fmt::Display for MetricType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shape and index parameters of the shared vector collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionSettings {
    pub name: String,
    pub dim: usize,
    pub metric: MetricType,
    pub index_type: String,
    /// HNSW `M`.
    pub hnsw_m: usize,
    /// HNSW `efConstruction`.
    pub hnsw_ef_construction: usize,
    /// HNSW `ef` used at search time.
    pub search_ef: usize,
}

impl Default for CollectionSettings {
    fn default() -> Self {
        Self {
            name: format!("collection_{:05}", 1),
            dim: 384,
            metric: MetricType::Ip,
            index_type: "HNSW".to_string(),
            hnsw_m: 8,
            hnsw_ef_construction: 64,
            search_ef: 32,
        }
    }
}

/// Which embedding backend to construct at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbedderKind {
    /// Local feature-hashing embedder, no model files needed.
    Hashing,
    /// Remote feature-extraction endpoint.
    Http,
    /// Local ONNX model (requires the `onnx` feature).
    Onnx,
}

impl FromStr for EmbedderKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "hashing" | "local" => Ok(Self::Hashing),
            "http" | "remote" => Ok(Self::Http),
            "onnx" => Ok(Self::Onnx),
            other => Err(Error::Config(format!("unknown embedder backend: {}", other))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbedderSettings {
    pub kind: EmbedderKind,
    /// Endpoint for the `http` backend.
    pub api_url: Option<String>,
    /// Bearer token for the `http` backend.
    #[serde(skip_serializing)]
    pub api_token: Option<String>,
    /// Directory with `model.onnx` and `tokenizer.json` for the `onnx` backend.
    pub model_dir: PathBuf,
    /// Inputs longer than this many characters are truncated before embedding.
    pub max_input_chars: usize,
}

/// Top-level docvault configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocVaultConfig {
    /// HTTP server port.
    pub port: u16,
    /// Data directory paths.
    pub data_paths: DataPaths,
    pub collection: CollectionSettings,
    pub embedder: EmbedderSettings,
    /// Characters per chunk.
    pub chunk_size: usize,
    /// Search results at or beyond this distance are dropped.
    pub distance_threshold: f32,
    /// Replica count requested when loading a partition.
    pub load_replicas: usize,
    /// Row budget for loaded partitions across the collection.
    pub max_loaded_rows: usize,
    /// Page size for the delete-by-filter loop.
    pub delete_page_size: usize,
    /// Iteration cap for the delete-by-filter loop.
    pub delete_max_iterations: usize,
    /// Staged journal entries younger than this are treated as in flight.
    pub journal_grace_secs: i64,
}

impl DocVaultConfig {
    /// Create configuration from environment and defaults.
    pub fn from_env(data_dir: impl AsRef<Path>) -> Result<Self> {
        Self::from_lookup(data_dir, |key| std::env::var(key).ok())
    }

    /// Create configuration reading variables through `lookup`.
    pub fn from_lookup<F>(data_dir: impl AsRef<Path>, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let data_paths = DataPaths::new(data_dir)?;

        let mut collection = CollectionSettings::default();
        if let Some(name) = lookup("DOCVAULT_COLLECTION") {
            collection.name = name;
        }
        collection.dim = parse_or(&lookup, "DOCVAULT_EMBEDDING_DIM", collection.dim)?;
        if let Some(metric) = lookup("DOCVAULT_METRIC") {
            collection.metric = metric.parse()?;
        }

        let kind = match lookup("DOCVAULT_EMBEDDER") {
            Some(k) => k.parse()?,
            None => EmbedderKind::Hashing,
        };
        let embedder = EmbedderSettings {
            kind,
            api_url: lookup("HF_API_URL"),
            api_token: lookup("HF_API_TOKEN"),
            model_dir: lookup("DOCVAULT_MODEL_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| data_paths.root.join("models")),
            max_input_chars: parse_or(&lookup, "DOCVAULT_EMBED_MAX_CHARS", 2048)?,
        };

        let config = Self {
            port: parse_or(&lookup, "PORT", 8000)?,
            data_paths,
            collection,
            embedder,
            chunk_size: parse_or(&lookup, "DOCVAULT_CHUNK_SIZE", 1024)?,
            distance_threshold: parse_or(&lookup, "DOCVAULT_DISTANCE_THRESHOLD", 1.0)?,
            load_replicas: parse_or(&lookup, "DOCVAULT_LOAD_REPLICAS", 1)?,
            max_loaded_rows: parse_or(&lookup, "DOCVAULT_MAX_LOADED_ROWS", 1_000_000)?,
            delete_page_size: parse_or(&lookup, "DOCVAULT_DELETE_PAGE_SIZE", 10_000)?,
            delete_max_iterations: parse_or(&lookup, "DOCVAULT_DELETE_MAX_ITERATIONS", 1_000)?,
            journal_grace_secs: parse_or(&lookup, "DOCVAULT_JOURNAL_GRACE_SECS", 300)?,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(Error::Config("chunk size must be positive".into()));
        }
        if self.collection.dim == 0 {
            return Err(Error::Config("embedding dimension must be positive".into()));
        }
        if self.delete_page_size == 0 || self.delete_max_iterations == 0 {
            return Err(Error::Config("delete paging must be positive".into()));
        }
        Ok(())
    }
}

fn parse_or<T, F>(lookup: &F, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| Error::Config(format!("{} has an invalid value: {}", key, raw))),
        None => Ok(default),
    }
}
