//! User lifecycle: registration, removal and document deletion.
//!
//! Metadata changes commit first; vector drains and file removal follow.
//! A crash in between leaves orphans the reconciliation sweep can find,
//! never a live record pointing at purged data.

use std::path::Path;

use serde::Serialize;
use tracing::{info, warn};

use crate::email::normalize_email;
use crate::services::Services;
use docvault_core::layout::{partition_name, user_dir, validate_user_id};
use docvault_core::{Error, Result};
use docvault_index::{DrainReport, Filter};
use docvault_store::{DocumentRecord, UserRecord};

/// Counts from wiping every user.
#[derive(Debug, Clone, Default, Serialize)]
pub struct WipeReport {
    pub users: usize,
    pub documents: usize,
    pub partitions: usize,
}

pub struct UserManager<'a> {
    services: &'a Services,
}

impl<'a> UserManager<'a> {
    pub fn new(services: &'a Services) -> Self {
        Self { services }
    }

    fn collection(&self) -> &str {
        &self.services.config.collection.name
    }

    fn files_root(&self) -> &Path {
        &self.services.config.data_paths.files
    }

    /// Create the user record, partition and storage directory.
    pub fn register(&self, user_id: &str, name: &str, email: &str) -> Result<UserRecord> {
        validate_user_id(user_id)?;

        let session = self.services.store.session()?;
        if session.find_user(user_id)?.is_some() {
            return Err(Error::DuplicateUser(user_id.to_string()));
        }
        let user = UserRecord {
            id: user_id.to_string(),
            name: name.trim().to_string(),
            email: normalize_email(email)?,
            created_at: chrono::Utc::now().timestamp_millis(),
        };
        session.insert_user(&user)?;

        let partition = partition_name(user_id);
        self.services
            .index
            .ensure_partition(self.collection(), &partition)?;
        std::fs::create_dir_all(user_dir(self.files_root(), user_id))?;
        session.commit()?;

        info!("Registered user {} with partition {}", user_id, partition);
        Ok(user)
    }

    /// Delete the user and all their documents, then drop their partition and directory.
    /// Returns how many documents were removed.
    pub fn unregister(&self, user_id: &str) -> Result<usize> {
        let session = self.services.store.session()?;
        if session.find_user(user_id)?.is_none() {
            return Err(Error::UserNotFound(user_id.to_string()));
        }
        let documents = session.delete_documents_for_user(user_id)?;
        session.delete_user(user_id)?;
        session.commit()?;

        let partition = partition_name(user_id);
        let index = &self.services.index;
        if let Err(e) = index
            .release_partition(self.collection(), &partition)
            .and_then(|_| index.drop_partition(self.collection(), &partition))
        {
            warn!("Failed to drop partition {}: {}", partition, e);
        }
        let dir = user_dir(self.files_root(), user_id);
        if let Err(e) = std::fs::remove_dir_all(&dir) {
            warn!("Failed to remove {}: {}", dir.display(), e);
        }

        info!("Unregistered user {} ({} documents)", user_id, documents);
        Ok(documents)
    }

    pub fn get_user(&self, user_id: &str) -> Result<UserRecord> {
        self.services
            .store
            .find_user(user_id)?
            .ok_or_else(|| Error::UserNotFound(user_id.to_string()))
    }

    pub fn list_users(&self) -> Result<Vec<UserRecord>> {
        self.services.store.list_users()
    }

    pub fn get_document(&self, user_id: &str, doc_id: &str) -> Result<DocumentRecord> {
        self.get_user(user_id)?;
        self.services
            .store
            .find_document(doc_id)?
            .filter(|d| d.user_id == user_id)
            .ok_or_else(|| Error::DocumentNotFound(doc_id.to_string()))
    }

    pub fn list_documents(&self, user_id: &str) -> Result<Vec<DocumentRecord>> {
        self.get_user(user_id)?;
        self.services.store.list_documents(user_id)
    }

    /// Remove one document: metadata, then its chunks, then its file.
    pub fn delete_document(&self, user_id: &str, doc_id: &str) -> Result<DrainReport> {
        let session = self.services.store.session()?;
        if session.find_user(user_id)?.is_none() {
            return Err(Error::UserNotFound(user_id.to_string()));
        }
        let doc = session
            .find_document(doc_id)?
            .filter(|d| d.user_id == user_id)
            .ok_or_else(|| Error::DocumentNotFound(doc_id.to_string()))?;
        session.delete_document(doc_id)?;
        session.commit()?;

        let report = self.drain(user_id, &Filter::doc(doc_id).and(Filter::user(user_id)))?;
        match std::fs::remove_file(&doc.storage_path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove {}: {}", doc.storage_path, e),
        }

        info!(
            "Deleted document {} of user {} ({} chunks)",
            doc_id, user_id, report.deleted
        );
        Ok(report)
    }

    /// Remove every document of a user. The user's directory is kept, empty.
    pub fn delete_all_documents(&self, user_id: &str) -> Result<DrainReport> {
        let session = self.services.store.session()?;
        if session.find_user(user_id)?.is_none() {
            return Err(Error::UserNotFound(user_id.to_string()));
        }
        let documents = session.delete_documents_for_user(user_id)?;
        session.commit()?;

        let report = self.drain(user_id, &Filter::user(user_id))?;
        empty_dir(&user_dir(self.files_root(), user_id))?;

        info!(
            "Deleted {} documents of user {} ({} chunks)",
            documents, user_id, report.deleted
        );
        Ok(report)
    }

    /// Remove every user, document, partition and stored file.
    pub fn delete_all_users(&self) -> Result<WipeReport> {
        let session = self.services.store.session()?;
        let (users, documents) = session.delete_all()?;
        session.commit()?;

        let index = &self.services.index;
        let collection = self.collection();
        index.release_collection(collection)?;
        let mut partitions = 0;
        for partition in index.list_partitions(collection)? {
            match index.drop_partition(collection, &partition) {
                Ok(()) => partitions += 1,
                Err(e) => warn!("Failed to drop partition {}: {}", partition, e),
            }
        }

        let root = self.files_root();
        if root.exists() {
            std::fs::remove_dir_all(root)?;
        }
        std::fs::create_dir_all(root)?;

        info!(
            "Removed all users: {} users, {} documents, {} partitions",
            users, documents, partitions
        );
        Ok(WipeReport {
            users,
            documents,
            partitions,
        })
    }

    fn drain(&self, user_id: &str, filter: &Filter) -> Result<DrainReport> {
        let config = &self.services.config;
        let partition = partition_name(user_id);
        self.services
            .index
            .load_partition(self.collection(), &partition, config.load_replicas)?;
        self.services.index.delete_by_filter(
            self.collection(),
            &partition,
            filter,
            config.delete_page_size,
            config.delete_max_iterations,
        )
    }
}

fn empty_dir(dir: &Path) -> Result<()> {
    if !dir.exists() {
        std::fs::create_dir_all(dir)?;
        return Ok(());
    }
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            std::fs::remove_dir_all(&path)?;
        } else {
            std::fs::remove_file(&path)?;
        }
    }
    Ok(())
}
