//! Transactional store sessions.

use parking_lot::MutexGuard;
use rusqlite::{params, Connection};
use tracing::warn;

use crate::sqlite::{self, db_err, is_constraint_violation};
use crate::types::*;
use docvault_core::{Error, Result};

/// One `BEGIN IMMEDIATE` transaction on the document store.
///
/// Holds the store's connection lock for its whole lifetime. Dropping a
/// session without [`commit`](Self::commit) rolls it back.
pub struct StoreSession<'a> {
    conn: MutexGuard<'a, Connection>,
    finished: bool,
}

impl<'a> StoreSession<'a> {
    pub(crate) fn begin(conn: MutexGuard<'a, Connection>) -> Result<Self> {
        conn.execute_batch("BEGIN IMMEDIATE")
            .map_err(|e| Error::StoreTransaction(format!("begin failed: {}", e)))?;
        Ok(Self {
            conn,
            finished: false,
        })
    }

    pub fn commit(mut self) -> Result<()> {
        self.finished = true;
        if let Err(e) = self.conn.execute_batch("COMMIT") {
            if let Err(rollback) = self.conn.execute_batch("ROLLBACK") {
                warn!("Rollback after failed commit failed: {}", rollback);
            }
            return Err(Error::StoreTransaction(format!("commit failed: {}", e)));
        }
        Ok(())
    }

    pub fn rollback(mut self) -> Result<()> {
        self.finished = true;
        self.conn
            .execute_batch("ROLLBACK")
            .map_err(|e| Error::StoreTransaction(format!("rollback failed: {}", e)))
    }

    // ---------------------------------------------------------------
    // Users
    // ---------------------------------------------------------------

    pub fn find_user(&self, user_id: &str) -> Result<Option<UserRecord>> {
        sqlite::find_user(&self.conn, user_id)
    }

    pub fn insert_user(&self, user: &UserRecord) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO users (id, name, email, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![user.id, user.name, user.email, user.created_at],
            )
            .map_err(|e| {
                if is_constraint_violation(&e) {
                    Error::DuplicateUser(user.id.clone())
                } else {
                    db_err(e)
                }
            })?;
        Ok(())
    }

    pub fn delete_user(&self, user_id: &str) -> Result<bool> {
        let count = self
            .conn
            .execute("DELETE FROM users WHERE id = ?1", params![user_id])
            .map_err(db_err)?;
        Ok(count > 0)
    }

    // ---------------------------------------------------------------
    // Documents
    // ---------------------------------------------------------------

    pub fn find_document(&self, doc_id: &str) -> Result<Option<DocumentRecord>> {
        sqlite::find_document(&self.conn, doc_id)
    }

    pub fn find_document_by_hash(
        &self,
        user_id: &str,
        content_hash: &str,
    ) -> Result<Option<DocumentRecord>> {
        sqlite::find_document_by_hash(&self.conn, user_id, content_hash)
    }

    /// Insert a document. Returns `false` when the user already holds the same content.
    pub fn insert_document(&self, doc: &DocumentRecord) -> Result<bool> {
        let result = self.conn.execute(
            "INSERT INTO documents (id, user_id, name, content_hash, storage_path, chunk_count, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                doc.id,
                doc.user_id,
                doc.name,
                doc.content_hash,
                doc.storage_path,
                doc.chunk_count,
                doc.created_at
            ],
        );
        match result {
            Ok(_) => Ok(true),
            Err(e) if is_constraint_violation(&e) => Ok(false),
            Err(e) => Err(db_err(e)),
        }
    }

    pub fn delete_document(&self, doc_id: &str) -> Result<bool> {
        let count = self
            .conn
            .execute("DELETE FROM documents WHERE id = ?1", params![doc_id])
            .map_err(db_err)?;
        Ok(count > 0)
    }

    pub fn delete_documents_for_user(&self, user_id: &str) -> Result<usize> {
        self.conn
            .execute("DELETE FROM documents WHERE user_id = ?1", params![user_id])
            .map_err(db_err)
    }

    /// Delete every user and document. Returns `(users, documents)` removed.
    pub fn delete_all(&self) -> Result<(usize, usize)> {
        let docs = self
            .conn
            .execute("DELETE FROM documents", [])
            .map_err(db_err)?;
        let users = self.conn.execute("DELETE FROM users", []).map_err(db_err)?;
        Ok((users, docs))
    }

    // ---------------------------------------------------------------
    // Journal
    // ---------------------------------------------------------------

    pub fn set_write_state(&self, doc_id: &str, state: WriteState, error: Option<&str>) -> Result<bool> {
        sqlite::set_write_state(&self.conn, doc_id, state, error)
    }
}

impl Drop for StoreSession<'_> {
    fn drop(&mut self) {
        if !self.finished {
            if let Err(e) = self.conn.execute_batch("ROLLBACK") {
                warn!("Session rollback on drop failed: {}", e);
            }
        }
    }
}
