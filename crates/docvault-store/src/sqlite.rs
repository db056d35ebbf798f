//! SQLite-backed document store.
//!
//! Reads go through [`DocumentStore`] directly; multi-record writes go
//! through a [`StoreSession`], which wraps one `BEGIN IMMEDIATE` transaction.

use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::info;

use crate::schema::SCHEMA_SQL;
use crate::session::StoreSession;
use crate::types::*;
use docvault_core::{Error, Result};

/// Document store holding users, document metadata and the write journal.
pub struct DocumentStore {
    conn: Mutex<Connection>,
    db_path: PathBuf,
}

impl DocumentStore {
    /// Open or create the store.
    ///
    /// `db_dir` is the directory (e.g., `data/metadata/`). The file will be `db_dir/documents.db`.
    pub fn open(db_dir: impl AsRef<Path>) -> Result<Self> {
        let db_dir = db_dir.as_ref();
        std::fs::create_dir_all(db_dir)?;
        let db_path = db_dir.join("documents.db");

        let conn = Connection::open(&db_path).map_err(db_err)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA busy_timeout = 5000;",
        )
        .map_err(db_err)?;
        Self::init_schema(&conn)?;

        let store = Self {
            conn: Mutex::new(conn),
            db_path,
        };
        let stats = store.stats()?;
        info!(
            "DocumentStore initialized: {} users, {} documents, {} staged writes, path={}",
            stats.total_users,
            stats.total_documents,
            stats.staged_writes,
            store.db_path.display()
        );
        Ok(store)
    }

    /// Open a throwaway in-memory store.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            db_path: PathBuf::from(":memory:"),
        })
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(SCHEMA_SQL)
            .map_err(|e| Error::Database(format!("Schema init failed: {}", e)))
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Begin a transaction. Other store calls block until the session ends,
    /// so keep sessions to store work only.
    pub fn session(&self) -> Result<StoreSession<'_>> {
        StoreSession::begin(self.conn.lock())
    }

    // ---------------------------------------------------------------
    // Reads
    // ---------------------------------------------------------------

    pub fn find_user(&self, user_id: &str) -> Result<Option<UserRecord>> {
        find_user(&self.conn.lock(), user_id)
    }

    pub fn user_exists(&self, user_id: &str) -> Result<bool> {
        Ok(self.find_user(user_id)?.is_some())
    }

    pub fn list_users(&self) -> Result<Vec<UserRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare_cached("SELECT id, name, email, created_at FROM users ORDER BY created_at, id")
            .map_err(db_err)?;
        let rows = stmt.query_map([], row_to_user).map_err(db_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(db_err)
    }

    pub fn find_document(&self, doc_id: &str) -> Result<Option<DocumentRecord>> {
        find_document(&self.conn.lock(), doc_id)
    }

    pub fn find_document_by_hash(
        &self,
        user_id: &str,
        content_hash: &str,
    ) -> Result<Option<DocumentRecord>> {
        find_document_by_hash(&self.conn.lock(), user_id, content_hash)
    }

    pub fn list_documents(&self, user_id: &str) -> Result<Vec<DocumentRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare_cached(
                "SELECT id, user_id, name, content_hash, storage_path, chunk_count, created_at \
                 FROM documents WHERE user_id = ?1 ORDER BY created_at, id",
            )
            .map_err(db_err)?;
        let rows = stmt.query_map(params![user_id], row_to_document).map_err(db_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(db_err)
    }

    /// Count documents, optionally for one user.
    pub fn count_documents(&self, user_id: Option<&str>) -> Result<i64> {
        let conn = self.conn.lock();
        let count = match user_id {
            Some(uid) => conn.query_row(
                "SELECT COUNT(*) FROM documents WHERE user_id = ?1",
                params![uid],
                |row| row.get(0),
            ),
            None => conn.query_row("SELECT COUNT(*) FROM documents", [], |row| row.get(0)),
        }
        .map_err(db_err)?;
        Ok(count)
    }

    // ---------------------------------------------------------------
    // Write journal
    // ---------------------------------------------------------------

    /// Record a write as `staged`. Committed immediately, outside any session.
    pub fn stage_write(
        &self,
        doc_id: &str,
        user_id: &str,
        partition: &str,
        storage_path: &str,
        chunk_count: i64,
    ) -> Result<PendingWrite> {
        let now = now_millis();
        let write = PendingWrite {
            doc_id: doc_id.to_string(),
            user_id: user_id.to_string(),
            partition: partition.to_string(),
            storage_path: storage_path.to_string(),
            chunk_count,
            state: WriteState::Staged,
            attempts: 0,
            error: None,
            created_at: now,
            updated_at: now,
        };
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO pending_writes \
             (doc_id, user_id, partition_name, storage_path, chunk_count, state, attempts, error, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, NULL, ?7, ?7)",
            params![
                write.doc_id,
                write.user_id,
                write.partition,
                write.storage_path,
                write.chunk_count,
                write.state.as_str(),
                now
            ],
        )
        .map_err(db_err)?;
        Ok(write)
    }

    pub fn set_write_state(&self, doc_id: &str, state: WriteState, error: Option<&str>) -> Result<bool> {
        set_write_state(&self.conn.lock(), doc_id, state, error)
    }

    /// Remove a journal entry whose write turned out to be a no-op.
    pub fn discard_write(&self, doc_id: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM pending_writes WHERE doc_id = ?1", params![doc_id])
            .map_err(db_err)?;
        Ok(())
    }

    /// Record a new vector row count after a document was re-indexed.
    pub fn update_chunk_count(&self, doc_id: &str, chunk_count: i64) -> Result<bool> {
        let conn = self.conn.lock();
        let count = conn
            .execute(
                "UPDATE documents SET chunk_count = ?1 WHERE id = ?2",
                params![chunk_count, doc_id],
            )
            .map_err(db_err)?;
        Ok(count > 0)
    }

    /// Bump the retry counter of a journal entry.
    pub fn record_attempt(&self, doc_id: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE pending_writes SET attempts = attempts + 1, updated_at = ?1 WHERE doc_id = ?2",
            params![now_millis(), doc_id],
        )
        .map_err(db_err)?;
        Ok(())
    }

    pub fn find_write(&self, doc_id: &str) -> Result<Option<PendingWrite>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare_cached(&format!("{} WHERE doc_id = ?1", PENDING_SELECT))
            .map_err(db_err)?;
        let write = stmt
            .query_row(params![doc_id], row_to_pending)
            .optional()
            .map_err(db_err)?;
        Ok(write)
    }

    /// Journal entries in `state`, oldest first.
    pub fn writes_in_state(&self, state: WriteState) -> Result<Vec<PendingWrite>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare_cached(&format!("{} WHERE state = ?1 ORDER BY created_at", PENDING_SELECT))
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![state.as_str()], row_to_pending)
            .map_err(db_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(db_err)
    }

    /// Drop finished journal entries older than `before_millis`.
    pub fn prune_writes(&self, before_millis: i64) -> Result<usize> {
        let conn = self.conn.lock();
        conn.execute(
            "DELETE FROM pending_writes WHERE state != 'staged' AND updated_at < ?1",
            params![before_millis],
        )
        .map_err(db_err)
    }

    pub fn stats(&self) -> Result<StoreStats> {
        let conn = self.conn.lock();
        let count = |sql: &str| -> Result<i64> {
            conn.query_row(sql, [], |row| row.get(0)).map_err(db_err)
        };
        Ok(StoreStats {
            total_users: count("SELECT COUNT(*) FROM users")?,
            total_documents: count("SELECT COUNT(*) FROM documents")?,
            staged_writes: count("SELECT COUNT(*) FROM pending_writes WHERE state = 'staged'")?,
            failed_writes: count("SELECT COUNT(*) FROM pending_writes WHERE state = 'failed'")?,
            db_path: self.db_path.display().to_string(),
        })
    }
}

// ---------------------------------------------------------------
// Statements shared by the store and its sessions
// ---------------------------------------------------------------

const PENDING_SELECT: &str = "SELECT doc_id, user_id, partition_name, storage_path, chunk_count, \
     state, attempts, error, created_at, updated_at FROM pending_writes";

pub(crate) fn db_err(e: rusqlite::Error) -> Error {
    Error::Database(e.to_string())
}

pub(crate) fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

pub(crate) fn is_constraint_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _) if err.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

pub(crate) fn find_user(conn: &Connection, user_id: &str) -> Result<Option<UserRecord>> {
    conn.prepare_cached("SELECT id, name, email, created_at FROM users WHERE id = ?1")
        .map_err(db_err)?
        .query_row(params![user_id], row_to_user)
        .optional()
        .map_err(db_err)
}

pub(crate) fn find_document(conn: &Connection, doc_id: &str) -> Result<Option<DocumentRecord>> {
    conn.prepare_cached(
        "SELECT id, user_id, name, content_hash, storage_path, chunk_count, created_at \
         FROM documents WHERE id = ?1",
    )
    .map_err(db_err)?
    .query_row(params![doc_id], row_to_document)
    .optional()
    .map_err(db_err)
}

pub(crate) fn find_document_by_hash(
    conn: &Connection,
    user_id: &str,
    content_hash: &str,
) -> Result<Option<DocumentRecord>> {
    conn.prepare_cached(
        "SELECT id, user_id, name, content_hash, storage_path, chunk_count, created_at \
         FROM documents WHERE user_id = ?1 AND content_hash = ?2",
    )
    .map_err(db_err)?
    .query_row(params![user_id, content_hash], row_to_document)
    .optional()
    .map_err(db_err)
}

pub(crate) fn set_write_state(
    conn: &Connection,
    doc_id: &str,
    state: WriteState,
    error: Option<&str>,
) -> Result<bool> {
    let count = conn
        .execute(
            "UPDATE pending_writes SET state = ?1, error = ?2, updated_at = ?3 WHERE doc_id = ?4",
            params![state.as_str(), error, now_millis(), doc_id],
        )
        .map_err(db_err)?;
    Ok(count > 0)
}

fn row_to_user(row: &Row<'_>) -> rusqlite::Result<UserRecord> {
    Ok(UserRecord {
        id: row.get(0)?,
        name: row.get(1)?,
        email: row.get(2)?,
        created_at: row.get(3)?,
    })
}

fn row_to_document(row: &Row<'_>) -> rusqlite::Result<DocumentRecord> {
    Ok(DocumentRecord {
        id: row.get(0)?,
        user_id: row.get(1)?,
        name: row.get(2)?,
        content_hash: row.get(3)?,
        storage_path: row.get(4)?,
        chunk_count: row.get(5)?,
        created_at: row.get(6)?,
    })
}

fn row_to_pending(row: &Row<'_>) -> rusqlite::Result<PendingWrite> {
    let state: String = row.get(5)?;
    Ok(PendingWrite {
        doc_id: row.get(0)?,
        user_id: row.get(1)?,
        partition: row.get(2)?,
        storage_path: row.get(3)?,
        chunk_count: row.get(4)?,
        // Unknown states only come from a newer schema; treat them as unresolved.
        state: WriteState::parse(&state).unwrap_or(WriteState::Staged),
        attempts: row.get(6)?,
        error: row.get(7)?,
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
    })
}
