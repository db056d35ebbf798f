//! Row, hit and collection types for the vector index.

use serde::{Deserialize, Serialize};

use docvault_core::{CollectionSettings, MetricType};

/// HNSW build and search parameters recorded with a collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexParams {
    #[serde(rename = "M")]
    pub m: usize,
    #[serde(rename = "efConstruction")]
    pub ef_construction: usize,
    pub ef: usize,
}

/// Shape of a collection: every row's vector must have `dim` components.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionSpec {
    pub name: String,
    pub dim: usize,
    pub metric: MetricType,
    pub index_type: String,
    pub params: IndexParams,
}

impl From<&CollectionSettings> for CollectionSpec {
    fn from(settings: &CollectionSettings) -> Self {
        Self {
            name: settings.name.clone(),
            dim: settings.dim,
            metric: settings.metric,
            index_type: settings.index_type.clone(),
            params: IndexParams {
                m: settings.hnsw_m,
                ef_construction: settings.hnsw_ef_construction,
                ef: settings.search_ef,
            },
        }
    }
}

/// A chunk to insert. The index assigns the row id.
#[derive(Debug, Clone)]
pub struct VectorRow {
    pub vector: Vec<f32>,
    pub doc_id: String,
    pub user_id: String,
    pub content: String,
}

/// Scalar fields of a stored row, as returned by `query`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RowRef {
    pub id: i64,
    pub doc_id: String,
    pub user_id: String,
}

/// One search candidate. Smaller distance means closer.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub id: i64,
    pub distance: f32,
    pub doc_id: String,
    pub user_id: String,
    pub content: String,
}

/// Outcome of a thresholded search, one hit list per query vector.
#[derive(Debug, Clone)]
pub enum SearchOutcome {
    /// The partition yielded no candidates at all.
    NoCandidates,
    /// Candidates existed but none were under the distance threshold.
    NoMatches,
    Matches(Vec<Vec<SearchHit>>),
}

/// Result of a delete-by-filter drain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    pub deleted: usize,
    /// Query rounds issued, including the final empty one.
    pub iterations: usize,
}
