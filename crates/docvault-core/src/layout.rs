//! Naming of per-user partitions, directories and stored files.

use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

const PARTITION_PREFIX: &str = "partition_";
const USER_DIR_PREFIX: &str = "user_";

/// Longest accepted user id (the vector record's `user_id` field width).
pub const MAX_USER_ID_LEN: usize = 128;

/// Vector index partition that holds a user's chunks.
pub fn partition_name(user_id: &str) -> String {
    format!("{}{}", PARTITION_PREFIX, user_id)
}

/// Inverse of [`partition_name`]. `None` for partitions not owned by a user.
pub fn user_id_from_partition(partition: &str) -> Option<&str> {
    partition
        .strip_prefix(PARTITION_PREFIX)
        .filter(|id| !id.is_empty())
}

/// Storage directory for a user's raw files.
pub fn user_dir(files_root: &Path, user_id: &str) -> PathBuf {
    files_root.join(format!("{}{}", USER_DIR_PREFIX, user_id))
}

/// Path of a document's raw bytes: `<user dir>/<doc_id><extension>`.
pub fn document_path(files_root: &Path, user_id: &str, doc_id: &str, extension: &str) -> PathBuf {
    user_dir(files_root, user_id).join(format!("{}{}", doc_id, extension))
}

/// User ids end up in partition and directory names, so keep them to a safe alphabet.
pub fn validate_user_id(user_id: &str) -> Result<()> {
    if user_id.is_empty() || user_id.len() > MAX_USER_ID_LEN {
        return Err(Error::InvalidInput(format!(
            "user id must be 1 to {} characters",
            MAX_USER_ID_LEN
        )));
    }
    if !user_id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(Error::InvalidInput(format!(
            "user id {} may only contain letters, digits, '_' and '-'",
            user_id
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partition_round_trip() {
        assert_eq!(partition_name("u1"), "partition_u1");
        assert_eq!(user_id_from_partition("partition_u1"), Some("u1"));
        assert_eq!(user_id_from_partition("_default"), None);
        assert_eq!(user_id_from_partition("partition_"), None);
    }

    #[test]
    fn test_paths() {
        let root = Path::new("/data/user_files");
        assert_eq!(user_dir(root, "u1"), PathBuf::from("/data/user_files/user_u1"));
        assert_eq!(
            document_path(root, "u1", "abc", ".pdf"),
            PathBuf::from("/data/user_files/user_u1/abc.pdf")
        );
    }

    #[test]
    fn test_validate_user_id() {
        assert!(validate_user_id("alice_01-x").is_ok());
        assert!(validate_user_id("").is_err());
        assert!(validate_user_id("../etc").is_err());
        assert!(validate_user_id("a b").is_err());
        assert!(validate_user_id(&"x".repeat(129)).is_err());
    }
}
