//! SQLite-backed vector index with in-memory partition matrices.
//!
//! Rows live in a SQLite file. Loading a partition reads its rows into an
//! `ndarray` matrix that serves search, query, count and delete until the
//! partition is released. A row budget across all loaded partitions stands
//! in for the memory limit of a dedicated vector server.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use ndarray::{Array2, ArrayView1, Axis};
use parking_lot::Mutex;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use tracing::{debug, info};

use crate::distance::{decode_vector, distances, encode_vector};
use crate::filter::Filter;
use crate::index::VectorIndex;
use crate::schema::SCHEMA_SQL;
use crate::types::*;
use docvault_core::{Error, MetricType, Result};

type PartitionKey = (String, String);

/// A partition's rows held in memory, in ascending id order.
struct LoadedPartition {
    metric: MetricType,
    dim: usize,
    ids: Vec<i64>,
    doc_ids: Vec<String>,
    user_ids: Vec<String>,
    contents: Vec<String>,
    matrix: Array2<f32>,
    norms: Vec<f32>,
}

impl LoadedPartition {
    fn empty(metric: MetricType, dim: usize) -> Self {
        Self {
            metric,
            dim,
            ids: Vec::new(),
            doc_ids: Vec::new(),
            user_ids: Vec::new(),
            contents: Vec::new(),
            matrix: Array2::zeros((0, dim)),
            norms: Vec::new(),
        }
    }

    fn len(&self) -> usize {
        self.ids.len()
    }

    fn push(&mut self, id: i64, doc_id: String, user_id: String, content: String, vector: &[f32]) -> Result<()> {
        let row = ArrayView1::from(vector);
        if self.matrix.nrows() == 0 {
            self.matrix = row.insert_axis(Axis(0)).to_owned();
        } else {
            self.matrix
                .push(Axis(0), row)
                .map_err(|e| Error::Internal(format!("Matrix append failed: {}", e)))?;
        }
        self.norms.push(row.dot(&row).sqrt());
        self.ids.push(id);
        self.doc_ids.push(doc_id);
        self.user_ids.push(user_id);
        self.contents.push(content);
        Ok(())
    }

    /// Drop rows whose id is in `remove`. Returns how many were dropped.
    fn remove(&mut self, remove: &HashSet<i64>) -> usize {
        let keep: Vec<usize> = (0..self.len())
            .filter(|&i| !remove.contains(&self.ids[i]))
            .collect();
        let removed = self.len() - keep.len();
        if removed == 0 {
            return 0;
        }
        self.matrix = self.matrix.select(Axis(0), &keep);
        self.norms = keep.iter().map(|&i| self.norms[i]).collect();
        self.ids = keep.iter().map(|&i| self.ids[i]).collect();
        self.doc_ids = keep.iter().map(|&i| self.doc_ids[i].clone()).collect();
        self.user_ids = keep.iter().map(|&i| self.user_ids[i].clone()).collect();
        self.contents = keep.iter().map(|&i| self.contents[i].clone()).collect();
        removed
    }

    fn matching(&self, filter: &Filter) -> impl Iterator<Item = usize> + '_ {
        let filter = filter.clone();
        (0..self.len()).filter(move |&i| filter.matches(&self.doc_ids[i], &self.user_ids[i]))
    }
}

/// Vector index persisted in `vectors.db`.
pub struct SqliteVectorIndex {
    conn: Mutex<Connection>,
    /// Lock order: `loaded` before `conn`.
    loaded: Mutex<HashMap<PartitionKey, LoadedPartition>>,
    max_loaded_rows: usize,
    db_path: PathBuf,
}

impl SqliteVectorIndex {
    /// Open or create the index under `dir` (file `dir/vectors.db`).
    pub fn open(dir: impl AsRef<Path>, max_loaded_rows: usize) -> Result<Self> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;
        let db_path = dir.join("vectors.db");

        let conn = Connection::open(&db_path).map_err(db_err)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA busy_timeout = 5000;",
        )
        .map_err(db_err)?;
        conn.execute_batch(SCHEMA_SQL)
            .map_err(|e| Error::Database(format!("Schema init failed: {}", e)))?;

        info!(
            "Vector index opened at {} (row budget {})",
            db_path.display(),
            max_loaded_rows
        );
        Ok(Self {
            conn: Mutex::new(conn),
            loaded: Mutex::new(HashMap::new()),
            max_loaded_rows,
            db_path,
        })
    }

    pub fn open_in_memory(max_loaded_rows: usize) -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        conn.execute_batch(SCHEMA_SQL)
            .map_err(|e| Error::Database(format!("Schema init failed: {}", e)))?;
        Ok(Self {
            conn: Mutex::new(conn),
            loaded: Mutex::new(HashMap::new()),
            max_loaded_rows,
            db_path: PathBuf::from(":memory:"),
        })
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    pub fn is_loaded(&self, collection: &str, partition: &str) -> bool {
        self.loaded.lock().contains_key(&key(collection, partition))
    }

    /// Rows currently held in memory across all loaded partitions.
    pub fn loaded_rows(&self) -> usize {
        self.loaded.lock().values().map(LoadedPartition::len).sum()
    }

    /// Stored rows in a partition, loaded or not.
    pub fn stored_rows(&self, collection: &str, partition: &str) -> Result<usize> {
        let conn = self.conn.lock();
        let n: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM vectors WHERE collection = ?1 AND partition_name = ?2",
                params![collection, partition],
                |row| row.get(0),
            )
            .map_err(db_err)?;
        Ok(n as usize)
    }

    fn require_partition(conn: &Connection, collection: &str, partition: &str) -> Result<CollectionSpec> {
        let spec = collection_spec(conn, collection)?
            .ok_or_else(|| Error::VectorIndex(format!("collection {} does not exist", collection)))?;
        if !partition_exists(conn, collection, partition)? {
            return Err(Error::VectorIndex(format!(
                "partition {} does not exist in {}",
                partition, collection
            )));
        }
        Ok(spec)
    }
}

fn key(collection: &str, partition: &str) -> PartitionKey {
    (collection.to_string(), partition.to_string())
}

fn db_err(e: rusqlite::Error) -> Error {
    Error::Database(e.to_string())
}

fn not_loaded(collection: &str, partition: &str) -> Error {
    Error::VectorIndex(format!("partition {}/{} is not loaded", collection, partition))
}

fn collection_spec(conn: &Connection, name: &str) -> Result<Option<CollectionSpec>> {
    let row = conn
        .query_row(
            "SELECT dim, metric, index_type, index_params FROM collections WHERE name = ?1",
            params![name],
            |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            },
        )
        .optional()
        .map_err(db_err)?;

    match row {
        None => Ok(None),
        Some((dim, metric, index_type, params)) => Ok(Some(CollectionSpec {
            name: name.to_string(),
            dim: dim as usize,
            metric: metric.parse()?,
            index_type,
            params: serde_json::from_str(&params)?,
        })),
    }
}

fn partition_exists(conn: &Connection, collection: &str, partition: &str) -> Result<bool> {
    let n: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM partitions WHERE collection = ?1 AND name = ?2",
            params![collection, partition],
            |row| row.get(0),
        )
        .map_err(db_err)?;
    Ok(n > 0)
}

impl VectorIndex for SqliteVectorIndex {
    fn ensure_collection(&self, spec: &CollectionSpec) -> Result<()> {
        let conn = self.conn.lock();
        if let Some(existing) = collection_spec(&conn, &spec.name)? {
            if existing.dim != spec.dim || existing.metric != spec.metric {
                return Err(Error::Config(format!(
                    "collection {} exists with dim={} metric={}, requested dim={} metric={}",
                    spec.name, existing.dim, existing.metric, spec.dim, spec.metric
                )));
            }
            return Ok(());
        }

        conn.execute(
            "INSERT INTO collections (name, dim, metric, index_type, index_params, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                spec.name,
                spec.dim as i64,
                spec.metric.as_str(),
                spec.index_type,
                serde_json::to_string(&spec.params)?,
                chrono::Utc::now().timestamp_millis()
            ],
        )
        .map_err(db_err)?;
        info!(
            "Created collection {} (dim={}, metric={}, index={})",
            spec.name, spec.dim, spec.metric, spec.index_type
        );
        Ok(())
    }

    fn has_collection(&self, collection: &str) -> Result<bool> {
        Ok(collection_spec(&self.conn.lock(), collection)?.is_some())
    }

    fn has_partition(&self, collection: &str, partition: &str) -> Result<bool> {
        partition_exists(&self.conn.lock(), collection, partition)
    }

    fn ensure_partition(&self, collection: &str, partition: &str) -> Result<()> {
        let conn = self.conn.lock();
        if collection_spec(&conn, collection)?.is_none() {
            return Err(Error::VectorIndex(format!("collection {} does not exist", collection)));
        }
        let created = conn
            .execute(
                "INSERT OR IGNORE INTO partitions (collection, name, created_at) VALUES (?1, ?2, ?3)",
                params![collection, partition, chrono::Utc::now().timestamp_millis()],
            )
            .map_err(db_err)?;
        if created > 0 {
            debug!("Created partition {}/{}", collection, partition);
        }
        Ok(())
    }

    fn list_partitions(&self, collection: &str) -> Result<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare_cached("SELECT name FROM partitions WHERE collection = ?1 ORDER BY name")
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![collection], |row| row.get(0))
            .map_err(db_err)?;
        rows.collect::<rusqlite::Result<Vec<String>>>().map_err(db_err)
    }

    fn drop_partition(&self, collection: &str, partition: &str) -> Result<()> {
        let loaded = self.loaded.lock();
        if loaded.contains_key(&key(collection, partition)) {
            return Err(Error::VectorIndex(format!(
                "partition {}/{} must be released before it is dropped",
                collection, partition
            )));
        }
        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(db_err)?;
        let rows = tx
            .execute(
                "DELETE FROM vectors WHERE collection = ?1 AND partition_name = ?2",
                params![collection, partition],
            )
            .map_err(db_err)?;
        tx.execute(
            "DELETE FROM partitions WHERE collection = ?1 AND name = ?2",
            params![collection, partition],
        )
        .map_err(db_err)?;
        tx.commit().map_err(db_err)?;
        debug!("Dropped partition {}/{} ({} rows)", collection, partition, rows);
        Ok(())
    }

    fn try_load_partition(&self, collection: &str, partition: &str, replicas: usize) -> Result<()> {
        let mut loaded = self.loaded.lock();
        if loaded.contains_key(&key(collection, partition)) {
            return Ok(());
        }

        let conn = self.conn.lock();
        let spec = Self::require_partition(&conn, collection, partition)?;
        let stored: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM vectors WHERE collection = ?1 AND partition_name = ?2",
                params![collection, partition],
                |row| row.get(0),
            )
            .map_err(db_err)?;
        let in_memory: usize = loaded.values().map(LoadedPartition::len).sum();
        if in_memory + stored as usize > self.max_loaded_rows {
            return Err(Error::IndexMemoryLimit(format!(
                "loading {} rows of {}/{} would exceed the budget of {} ({} loaded)",
                stored, collection, partition, self.max_loaded_rows, in_memory
            )));
        }

        let mut stmt = conn
            .prepare_cached(
                "SELECT id, doc_id, user_id, content, embedding FROM vectors \
                 WHERE collection = ?1 AND partition_name = ?2 ORDER BY id",
            )
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![collection, partition], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, Vec<u8>>(4)?,
                ))
            })
            .map_err(db_err)?;

        let mut part = LoadedPartition::empty(spec.metric, spec.dim);
        let mut flat: Vec<f32> = Vec::with_capacity(stored as usize * spec.dim);
        for row in rows {
            let (id, doc_id, user_id, content, blob) = row.map_err(db_err)?;
            let vector = decode_vector(&blob);
            if vector.len() != spec.dim {
                return Err(Error::VectorIndex(format!(
                    "row {} has {} components, collection {} expects {}",
                    id,
                    vector.len(),
                    collection,
                    spec.dim
                )));
            }
            part.norms.push(vector.iter().map(|v| v * v).sum::<f32>().sqrt());
            flat.extend_from_slice(&vector);
            part.ids.push(id);
            part.doc_ids.push(doc_id);
            part.user_ids.push(user_id);
            part.contents.push(content);
        }
        part.matrix = Array2::from_shape_vec((part.ids.len(), spec.dim), flat)
            .map_err(|e| Error::Internal(format!("Matrix build failed: {}", e)))?;

        debug!(
            "Loaded partition {}/{}: {} rows, {} replica(s)",
            collection,
            partition,
            part.len(),
            replicas
        );
        loaded.insert(key(collection, partition), part);
        Ok(())
    }

    fn release_partition(&self, collection: &str, partition: &str) -> Result<()> {
        if self.loaded.lock().remove(&key(collection, partition)).is_some() {
            debug!("Released partition {}/{}", collection, partition);
        }
        Ok(())
    }

    fn release_collection(&self, collection: &str) -> Result<()> {
        let mut loaded = self.loaded.lock();
        let before = loaded.len();
        loaded.retain(|(c, _), _| c != collection);
        debug!("Released {} partition(s) of {}", before - loaded.len(), collection);
        Ok(())
    }

    fn insert(&self, collection: &str, partition: &str, rows: &[VectorRow]) -> Result<Vec<i64>> {
        let mut loaded = self.loaded.lock();
        let mut conn = self.conn.lock();
        let spec = Self::require_partition(&conn, collection, partition)?;
        if let Some(bad) = rows.iter().find(|r| r.vector.len() != spec.dim) {
            return Err(Error::InvalidInput(format!(
                "vector has {} components, collection {} expects {}",
                bad.vector.len(),
                collection,
                spec.dim
            )));
        }
        if rows.is_empty() {
            return Ok(Vec::new());
        }

        let tx = conn.transaction().map_err(db_err)?;
        let mut ids = Vec::with_capacity(rows.len());
        {
            let mut stmt = tx
                .prepare_cached(
                    "INSERT INTO vectors (collection, partition_name, doc_id, user_id, content, embedding) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                )
                .map_err(db_err)?;
            for row in rows {
                stmt.execute(params![
                    collection,
                    partition,
                    row.doc_id,
                    row.user_id,
                    row.content,
                    encode_vector(&row.vector)
                ])
                .map_err(db_err)?;
                ids.push(tx.last_insert_rowid());
            }
        }
        tx.commit().map_err(db_err)?;

        if let Some(part) = loaded.get_mut(&key(collection, partition)) {
            for (id, row) in ids.iter().zip(rows) {
                part.push(
                    *id,
                    row.doc_id.clone(),
                    row.user_id.clone(),
                    row.content.clone(),
                    &row.vector,
                )?;
            }
        }
        debug!("Inserted {} rows into {}/{}", ids.len(), collection, partition);
        Ok(ids)
    }

    fn raw_search(
        &self,
        collection: &str,
        partition: &str,
        queries: &[Vec<f32>],
        k: usize,
        filter: &Filter,
    ) -> Result<Vec<Vec<SearchHit>>> {
        let loaded = self.loaded.lock();
        let part = loaded
            .get(&key(collection, partition))
            .ok_or_else(|| not_loaded(collection, partition))?;

        let mut results = Vec::with_capacity(queries.len());
        for query in queries {
            if query.len() != part.dim {
                return Err(Error::InvalidInput(format!(
                    "query has {} components, collection {} expects {}",
                    query.len(),
                    collection,
                    part.dim
                )));
            }
            if part.len() == 0 || k == 0 {
                results.push(Vec::new());
                continue;
            }

            let dist = distances(
                part.metric,
                part.matrix.view(),
                ArrayView1::from(&part.norms[..]),
                ArrayView1::from(&query[..]),
            );
            let mut ranked: Vec<(usize, f32)> = part.matching(filter).map(|i| (i, dist[i])).collect();
            ranked.sort_by(|a, b| a.1.total_cmp(&b.1));
            ranked.truncate(k);

            results.push(
                ranked
                    .into_iter()
                    .map(|(i, distance)| SearchHit {
                        id: part.ids[i],
                        distance,
                        doc_id: part.doc_ids[i].clone(),
                        user_id: part.user_ids[i].clone(),
                        content: part.contents[i].clone(),
                    })
                    .collect(),
            );
        }
        Ok(results)
    }

    fn query(
        &self,
        collection: &str,
        partition: &str,
        filter: &Filter,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<RowRef>> {
        let loaded = self.loaded.lock();
        let part = loaded
            .get(&key(collection, partition))
            .ok_or_else(|| not_loaded(collection, partition))?;
        Ok(part
            .matching(filter)
            .skip(offset)
            .take(limit)
            .map(|i| RowRef {
                id: part.ids[i],
                doc_id: part.doc_ids[i].clone(),
                user_id: part.user_ids[i].clone(),
            })
            .collect())
    }

    fn count(&self, collection: &str, partition: &str, filter: &Filter) -> Result<usize> {
        let loaded = self.loaded.lock();
        let part = loaded
            .get(&key(collection, partition))
            .ok_or_else(|| not_loaded(collection, partition))?;
        Ok(part.matching(filter).count())
    }

    fn delete_ids(&self, collection: &str, partition: &str, ids: &[i64]) -> Result<usize> {
        let mut loaded = self.loaded.lock();
        let part = loaded
            .get_mut(&key(collection, partition))
            .ok_or_else(|| not_loaded(collection, partition))?;
        if ids.is_empty() {
            return Ok(0);
        }

        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(db_err)?;
        let mut deleted = 0;
        // Stay well under SQLite's bound-parameter limit.
        for batch in ids.chunks(500) {
            let placeholders = vec!["?"; batch.len()].join(",");
            let sql = format!(
                "DELETE FROM vectors WHERE collection = ? AND partition_name = ? AND id IN ({})",
                placeholders
            );
            let args = [collection.to_string(), partition.to_string()]
                .into_iter()
                .map(rusqlite::types::Value::Text)
                .chain(batch.iter().map(|id| rusqlite::types::Value::Integer(*id)));
            deleted += tx.execute(&sql, params_from_iter(args)).map_err(db_err)?;
        }
        tx.commit().map_err(db_err)?;

        let remove: HashSet<i64> = ids.iter().copied().collect();
        part.remove(&remove);
        Ok(deleted)
    }
}
