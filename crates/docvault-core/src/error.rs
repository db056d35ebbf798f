//! Error types for docvault.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("User not found: {0}")]
    UserNotFound(String),

    #[error("User already exists: {0}")]
    DuplicateUser(String),

    #[error("Invalid email: {0}")]
    InvalidEmail(String),

    #[error("Unsupported content: {0}")]
    UnsupportedContent(String),

    #[error("Extraction error: {0}")]
    Extraction(String),

    #[error("Document not found: {0}")]
    DocumentNotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// A registered user is missing state that registration always creates.
    #[error("Data integrity violation: {0}")]
    DataIntegrity(String),

    #[error("Vector index error: {0}")]
    VectorIndex(String),

    /// The index refused to load a partition because of its memory budget.
    #[error("Vector index memory limit: {0}")]
    IndexMemoryLimit(String),

    #[error("Store transaction error: {0}")]
    StoreTransaction(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Inference error: {0}")]
    Inference(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Coarse classification used at API boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    BadRequest,
    Internal,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UserNotFound(_) | Self::DocumentNotFound(_) => ErrorKind::NotFound,
            Self::DuplicateUser(_)
            | Self::InvalidEmail(_)
            | Self::UnsupportedContent(_)
            | Self::Extraction(_)
            | Self::InvalidInput(_) => ErrorKind::BadRequest,
            _ => ErrorKind::Internal,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_classification() {
        assert_eq!(Error::UserNotFound("u".into()).kind(), ErrorKind::NotFound);
        assert_eq!(Error::DocumentNotFound("d".into()).kind(), ErrorKind::NotFound);
        assert_eq!(Error::DuplicateUser("u".into()).kind(), ErrorKind::BadRequest);
        assert_eq!(Error::InvalidEmail("x".into()).kind(), ErrorKind::BadRequest);
        assert_eq!(Error::DataIntegrity("p".into()).kind(), ErrorKind::Internal);
        assert_eq!(Error::VectorIndex("rpc".into()).kind(), ErrorKind::Internal);
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: Error = io.into();
        assert!(matches!(err, Error::Io(_)));
        assert_eq!(err.kind(), ErrorKind::Internal);
    }
}
