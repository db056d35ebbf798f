//! Record types for users, documents and journal entries.

use serde::{Deserialize, Serialize};

/// A registered user's profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: String,
    pub name: String,
    pub email: String,
    pub created_at: i64,
}

/// Metadata for one ingested content unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub content_hash: String,
    pub storage_path: String,
    /// Number of vector rows written for this document.
    pub chunk_count: i64,
    pub created_at: i64,
}

/// Lifecycle of a cross-store ingestion write.
///
/// `Staged` is recorded before the store session opens. The session flips
/// it to `Committed` together with the document insert, so a crash leaves
/// it `Staged` for the reconciliation sweep to resolve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteState {
    Staged,
    Committed,
    Failed,
}

impl WriteState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Staged => "staged",
            Self::Committed => "committed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "staged" => Some(Self::Staged),
            "committed" => Some(Self::Committed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// A journal entry for one document's dual-store write.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingWrite {
    pub doc_id: String,
    pub user_id: String,
    pub partition: String,
    pub storage_path: String,
    pub chunk_count: i64,
    pub state: WriteState,
    pub attempts: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Store-level statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreStats {
    pub total_users: i64,
    pub total_documents: i64,
    pub staged_writes: i64,
    pub failed_writes: i64,
    pub db_path: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_state_strings() {
        for state in [WriteState::Staged, WriteState::Committed, WriteState::Failed] {
            assert_eq!(WriteState::parse(state.as_str()), Some(state));
        }
        assert_eq!(WriteState::parse("applied"), None);
    }
}
