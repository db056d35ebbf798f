//! Reconciliation sweep between the document store, the vector index and
//! the files root.
//!
//! The stores share no transaction, so a crash or a failed best-effort
//! cleanup can leave orphans on either side. The sweep resolves stale
//! journal entries first, then repairs partitions, then compares every
//! user's vectors against their document records.

use std::collections::{BTreeSet, HashSet};
use std::path::Path;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::services::Services;
use docvault_core::layout::{partition_name, user_dir, user_id_from_partition};
use docvault_core::Result;
use docvault_index::{Filter, VectorIndex};
use docvault_store::{DocumentRecord, PendingWrite, UserRecord, WriteState};

/// What one sweep found and fixed.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReconcileReport {
    /// Stale staged writes whose document turned out to be committed.
    pub writes_confirmed: usize,
    /// Stale staged writes that never committed and were rolled back.
    pub writes_abandoned: usize,
    pub partitions_created: usize,
    pub directories_created: usize,
    pub partitions_dropped: usize,
    /// Vector rows whose document no longer exists.
    pub orphan_rows_purged: usize,
    pub documents_reindexed: usize,
    /// Records removed because their stored file was gone.
    pub documents_removed: usize,
    pub writes_pruned: usize,
    /// Per-item failures; the sweep continues past them.
    pub errors: Vec<String>,
}

pub struct Reconciler<'a> {
    services: &'a Services,
}

impl<'a> Reconciler<'a> {
    pub fn new(services: &'a Services) -> Self {
        Self { services }
    }

    fn collection(&self) -> &str {
        &self.services.config.collection.name
    }

    fn index(&self) -> &dyn VectorIndex {
        self.services.index.as_ref()
    }

    pub fn run(&self) -> Result<ReconcileReport> {
        let mut report = ReconcileReport::default();
        let cutoff = chrono::Utc::now().timestamp_millis()
            - self.services.config.journal_grace_secs * 1000;

        self.resolve_stale_writes(cutoff, &mut report)?;

        let users = self.services.store.list_users()?;
        self.repair_partitions(&users, &mut report)?;

        for user in &users {
            if let Err(e) = self.check_user_vectors(user, &mut report) {
                warn!("Reconciling vectors of user {} failed: {}", user.id, e);
                report.errors.push(format!("user {}: {}", user.id, e));
            }
        }

        report.writes_pruned = self.services.store.prune_writes(cutoff)?;

        info!(
            "Reconciliation: {} writes confirmed, {} abandoned, {} partitions created, {} dropped, \
             {} orphan rows purged, {} documents reindexed, {} removed, {} errors",
            report.writes_confirmed,
            report.writes_abandoned,
            report.partitions_created,
            report.partitions_dropped,
            report.orphan_rows_purged,
            report.documents_reindexed,
            report.documents_removed,
            report.errors.len()
        );
        Ok(report)
    }

    /// Settle staged writes older than `cutoff`. Younger ones are still in flight.
    fn resolve_stale_writes(&self, cutoff: i64, report: &mut ReconcileReport) -> Result<()> {
        for write in self.services.store.writes_in_state(WriteState::Staged)? {
            if write.created_at > cutoff {
                continue;
            }
            self.services.store.record_attempt(&write.doc_id)?;
            match self.resolve_write(&write) {
                Ok(true) => report.writes_confirmed += 1,
                Ok(false) => report.writes_abandoned += 1,
                Err(e) => {
                    warn!("Could not resolve staged write {}: {}", write.doc_id, e);
                    report.errors.push(format!("write {}: {}", write.doc_id, e));
                }
            }
        }
        Ok(())
    }

    fn resolve_write(&self, write: &PendingWrite) -> Result<bool> {
        let store = &self.services.store;
        if let Some(doc) = store.find_document(&write.doc_id)? {
            if self.chunk_rows(&doc)? != doc.chunk_count as usize {
                self.services.ingester().reindex_document(&doc)?;
            }
            store.set_write_state(&write.doc_id, WriteState::Committed, None)?;
            debug!("Confirmed staged write {}", write.doc_id);
            return Ok(true);
        }

        if self.index().has_partition(self.collection(), &write.partition)? {
            self.purge(&write.partition, Filter::doc(&write.doc_id).and(Filter::user(&write.user_id)))?;
        }
        remove_if_present(Path::new(&write.storage_path))?;
        store.set_write_state(
            &write.doc_id,
            WriteState::Failed,
            Some("abandoned before the document was committed"),
        )?;
        debug!("Rolled back staged write {}", write.doc_id);
        Ok(false)
    }

    /// Give every user a partition and directory; drop partitions nobody owns.
    fn repair_partitions(&self, users: &[UserRecord], report: &mut ReconcileReport) -> Result<()> {
        let collection = self.collection();
        let index = self.index();
        let files_root = &self.services.config.data_paths.files;

        for user in users {
            let partition = partition_name(&user.id);
            if !index.has_partition(collection, &partition)? {
                warn!("User {} had no partition, recreating {}", user.id, partition);
                index.ensure_partition(collection, &partition)?;
                report.partitions_created += 1;
            }
            let dir = user_dir(files_root, &user.id);
            if !dir.is_dir() {
                warn!("User {} had no directory, recreating {}", user.id, dir.display());
                std::fs::create_dir_all(&dir)?;
                report.directories_created += 1;
            }
        }

        let known: HashSet<&str> = users.iter().map(|u| u.id.as_str()).collect();
        for partition in index.list_partitions(collection)? {
            let owned = user_id_from_partition(&partition).is_some_and(|id| known.contains(id));
            if owned {
                continue;
            }
            let dropped = index
                .release_partition(collection, &partition)
                .and_then(|_| index.drop_partition(collection, &partition));
            match dropped {
                Ok(()) => {
                    warn!("Dropped partition {} with no owning user", partition);
                    report.partitions_dropped += 1;
                }
                Err(e) => report.errors.push(format!("partition {}: {}", partition, e)),
            }
        }
        Ok(())
    }

    /// Purge rows of unknown documents and repair documents with the wrong row count.
    ///
    /// Vectors are scanned before staged writes and documents are read. An
    /// ingest stages its write before inserting vectors and commits its
    /// record after, so any doc id seen in the scan is by then either a
    /// staged write, a committed document, or garbage.
    fn check_user_vectors(&self, user: &UserRecord, report: &mut ReconcileReport) -> Result<()> {
        let config = &self.services.config;
        let partition = partition_name(&user.id);
        self.index()
            .load_partition(self.collection(), &partition, config.load_replicas)?;
        let indexed = self.indexed_doc_ids(&partition)?;

        // Staged writes before documents: a write that commits in between
        // shows up in one of the two reads.
        let store = &self.services.store;
        let in_flight: HashSet<String> = store
            .writes_in_state(WriteState::Staged)?
            .into_iter()
            .filter(|w| w.user_id == user.id)
            .map(|w| w.doc_id)
            .collect();
        let documents = store.list_documents(&user.id)?;
        let known: HashSet<&str> = documents.iter().map(|d| d.id.as_str()).collect();
        let orphans: Vec<String> = indexed
            .into_iter()
            .filter(|id| !known.contains(id.as_str()) && !in_flight.contains(id))
            .collect();
        if !orphans.is_empty() {
            warn!(
                "Partition {} holds rows of {} unknown documents",
                partition,
                orphans.len()
            );
            let drained = self.purge(&partition, Filter::docs(orphans).and(Filter::user(&user.id)))?;
            report.orphan_rows_purged += drained;
        }

        for doc in &documents {
            let rows = self.chunk_rows(doc)?;
            if rows == doc.chunk_count as usize {
                continue;
            }
            warn!(
                "Document {} has {} rows, expected {}",
                doc.id, rows, doc.chunk_count
            );
            if Path::new(&doc.storage_path).is_file() {
                match self.services.ingester().reindex_document(doc) {
                    Ok(_) => report.documents_reindexed += 1,
                    Err(e) => report.errors.push(format!("document {}: {}", doc.id, e)),
                }
            } else {
                self.remove_document(doc, &partition)?;
                report.documents_removed += 1;
            }
        }
        Ok(())
    }

    /// Distinct doc ids present in a loaded partition.
    fn indexed_doc_ids(&self, partition: &str) -> Result<BTreeSet<String>> {
        let config = &self.services.config;
        let page_size = config.delete_page_size;
        let mut ids = BTreeSet::new();
        let mut offset = 0;
        for _ in 0..config.delete_max_iterations {
            let page = self
                .index()
                .query(self.collection(), partition, &Filter::All, offset, page_size)?;
            let len = page.len();
            ids.extend(page.into_iter().map(|row| row.doc_id));
            if len < page_size {
                break;
            }
            offset += len;
        }
        Ok(ids)
    }

    fn chunk_rows(&self, doc: &DocumentRecord) -> Result<usize> {
        let partition = partition_name(&doc.user_id);
        self.index().load_partition(
            self.collection(),
            &partition,
            self.services.config.load_replicas,
        )?;
        self.index().count(
            self.collection(),
            &partition,
            &Filter::doc(&doc.id).and(Filter::user(&doc.user_id)),
        )
    }

    fn remove_document(&self, doc: &DocumentRecord, partition: &str) -> Result<()> {
        let session = self.services.store.session()?;
        session.delete_document(&doc.id)?;
        session.commit()?;
        self.purge(partition, Filter::doc(&doc.id).and(Filter::user(&doc.user_id)))?;
        warn!("Removed document {} whose file {} is gone", doc.id, doc.storage_path);
        Ok(())
    }

    fn purge(&self, partition: &str, filter: Filter) -> Result<usize> {
        let config = &self.services.config;
        self.index()
            .load_partition(self.collection(), partition, config.load_replicas)?;
        let report = self.index().delete_by_filter(
            self.collection(),
            partition,
            &filter,
            config.delete_page_size,
            config.delete_max_iterations,
        )?;
        Ok(report.deleted)
    }
}

fn remove_if_present(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use parking_lot::Mutex;

    use crate::services::tests::{test_config, test_services_with};
    use docvault_index::{CollectionSpec, RowRef, SearchHit, SqliteVectorIndex, VectorRow};
    use docvault_infer::HashingEmbedder;
    use docvault_ingest::{ContentExtractor, ContentSource, IngestSettings, Ingester};
    use docvault_store::DocumentStore;

    type QueryHook = Box<dyn FnOnce(&SqliteVectorIndex) + Send>;

    /// Real index that runs a one-shot hook against itself before the next
    /// `query`, which is how the sweep scans a partition.
    struct HookedIndex {
        inner: SqliteVectorIndex,
        before_query: Mutex<Option<QueryHook>>,
    }

    impl VectorIndex for HookedIndex {
        fn ensure_collection(&self, spec: &CollectionSpec) -> Result<()> {
            self.inner.ensure_collection(spec)
        }
        fn has_collection(&self, c: &str) -> Result<bool> {
            self.inner.has_collection(c)
        }
        fn has_partition(&self, c: &str, p: &str) -> Result<bool> {
            self.inner.has_partition(c, p)
        }
        fn ensure_partition(&self, c: &str, p: &str) -> Result<()> {
            self.inner.ensure_partition(c, p)
        }
        fn list_partitions(&self, c: &str) -> Result<Vec<String>> {
            self.inner.list_partitions(c)
        }
        fn drop_partition(&self, c: &str, p: &str) -> Result<()> {
            self.inner.drop_partition(c, p)
        }
        fn try_load_partition(&self, c: &str, p: &str, replicas: usize) -> Result<()> {
            self.inner.try_load_partition(c, p, replicas)
        }
        fn release_partition(&self, c: &str, p: &str) -> Result<()> {
            self.inner.release_partition(c, p)
        }
        fn release_collection(&self, c: &str) -> Result<()> {
            self.inner.release_collection(c)
        }
        fn insert(&self, c: &str, p: &str, rows: &[VectorRow]) -> Result<Vec<i64>> {
            self.inner.insert(c, p, rows)
        }
        fn raw_search(&self, c: &str, p: &str, q: &[Vec<f32>], k: usize, f: &Filter) -> Result<Vec<Vec<SearchHit>>> {
            self.inner.raw_search(c, p, q, k, f)
        }
        fn query(&self, c: &str, p: &str, f: &Filter, offset: usize, limit: usize) -> Result<Vec<RowRef>> {
            let hook = self.before_query.lock().take();
            if let Some(hook) = hook {
                hook(&self.inner);
            }
            self.inner.query(c, p, f, offset, limit)
        }
        fn count(&self, c: &str, p: &str, f: &Filter) -> Result<usize> {
            self.inner.count(c, p, f)
        }
        fn delete_ids(&self, c: &str, p: &str, ids: &[i64]) -> Result<usize> {
            self.inner.delete_ids(c, p, ids)
        }
    }

    fn hooked_services() -> (Services, Arc<HookedIndex>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(&dir, &[("DOCVAULT_JOURNAL_GRACE_SECS", "0")]);
        let store = DocumentStore::open(&config.data_paths.metadata).unwrap();
        let index = Arc::new(HookedIndex {
            inner: SqliteVectorIndex::open_in_memory(config.max_loaded_rows).unwrap(),
            before_query: Mutex::new(None),
        });
        let embedder = Arc::new(HashingEmbedder::new(
            config.collection.dim,
            config.embedder.max_input_chars,
        ));
        let services = Services::new(
            config,
            Arc::new(store),
            index.clone(),
            embedder,
            Arc::new(ContentExtractor::with_defaults()),
        )
        .unwrap();
        (services, index, dir)
    }

    fn services() -> (Services, tempfile::TempDir) {
        test_services_with(&[("DOCVAULT_JOURNAL_GRACE_SECS", "0")])
    }

    fn stray_row(services: &Services, user_id: &str, doc_id: &str) {
        let row = VectorRow {
            vector: vec![0.5; services.config.collection.dim],
            doc_id: doc_id.into(),
            user_id: user_id.into(),
            content: "stray".into(),
        };
        services
            .index
            .insert(&services.config.collection.name, &partition_name(user_id), &[row])
            .unwrap();
    }

    fn rows(services: &Services, user_id: &str, filter: &Filter) -> usize {
        let collection = &services.config.collection.name;
        let partition = partition_name(user_id);
        services.index.load_partition(collection, &partition, 1).unwrap();
        services.index.count(collection, &partition, filter).unwrap()
    }

    #[test]
    fn test_clean_state_is_noop() {
        let (services, _dir) = services();
        services.users().register("u1", "A", "a@example.com").unwrap();
        services
            .ingester()
            .ingest("u1", ContentSource::file("a.txt", b"fine".to_vec()))
            .unwrap();

        let report = services.reconciler().run().unwrap();
        assert_eq!(report.orphan_rows_purged, 0);
        assert_eq!(report.documents_reindexed, 0);
        assert_eq!(report.partitions_dropped, 0);
        assert!(report.errors.is_empty());
        assert_eq!(services.store.count_documents(Some("u1")).unwrap(), 1);
    }

    #[test]
    fn test_purges_orphan_vectors() {
        let (services, _dir) = services();
        services.users().register("u1", "A", "a@example.com").unwrap();
        stray_row(&services, "u1", "no-such-doc");
        stray_row(&services, "u1", "no-such-doc");

        let report = services.reconciler().run().unwrap();
        assert_eq!(report.orphan_rows_purged, 2);
        assert_eq!(rows(&services, "u1", &Filter::All), 0);
    }

    #[test]
    fn test_abandoned_staged_write_is_rolled_back() {
        let (services, _dir) = services();
        services.users().register("u1", "A", "a@example.com").unwrap();
        let path = user_dir(&services.config.data_paths.files, "u1").join("d1.txt");
        std::fs::write(&path, b"half written").unwrap();
        stray_row(&services, "u1", "d1");
        services
            .store
            .stage_write("d1", "u1", "partition_u1", &path.to_string_lossy(), 1)
            .unwrap();

        let report = services.reconciler().run().unwrap();
        assert_eq!(report.writes_abandoned, 1);
        assert!(!path.exists());
        assert_eq!(rows(&services, "u1", &Filter::doc("d1")), 0);
        let write = services.store.find_write("d1").unwrap().unwrap();
        assert_eq!(write.state, WriteState::Failed);
        assert_eq!(write.attempts, 1);

        // Settled entries stay visible until a later sweep prunes them.
        std::thread::sleep(std::time::Duration::from_millis(5));
        let again = services.reconciler().run().unwrap();
        assert_eq!(again.writes_pruned, 1);
        assert!(services.store.find_write("d1").unwrap().is_none());
    }

    #[test]
    fn test_staged_write_with_committed_document_is_confirmed() {
        let (services, _dir) = services();
        services.users().register("u1", "A", "a@example.com").unwrap();
        let result = services
            .ingester()
            .ingest("u1", ContentSource::file("a.txt", "z".repeat(2100).into_bytes()))
            .unwrap();
        let doc_id = result.embedded[0].doc_id.clone();
        services
            .store
            .set_write_state(&doc_id, WriteState::Staged, None)
            .unwrap();

        // Lose one of the three rows.
        let collection = &services.config.collection.name;
        services.index.load_partition(collection, "partition_u1", 1).unwrap();
        let first = services
            .index
            .query(collection, "partition_u1", &Filter::doc(&doc_id), 0, 1)
            .unwrap();
        services
            .index
            .delete_ids(collection, "partition_u1", &[first[0].id])
            .unwrap();

        let report = services.reconciler().run().unwrap();
        assert_eq!(report.writes_confirmed, 1);
        assert_eq!(rows(&services, "u1", &Filter::doc(&doc_id)), 3);
    }

    #[test]
    fn test_young_staged_rows_are_left_alone() {
        let (services, _dir) = test_services_with(&[("DOCVAULT_JOURNAL_GRACE_SECS", "3600")]);
        services.users().register("u1", "A", "a@example.com").unwrap();
        stray_row(&services, "u1", "inflight");
        services
            .store
            .stage_write("inflight", "u1", "partition_u1", "/nonexistent/inflight.txt", 1)
            .unwrap();

        let report = services.reconciler().run().unwrap();
        assert_eq!(report.orphan_rows_purged, 0);
        assert_eq!(rows(&services, "u1", &Filter::doc("inflight")), 1);
        assert_eq!(
            services.store.find_write("inflight").unwrap().unwrap().state,
            WriteState::Staged
        );
    }

    #[test]
    fn test_repairs_partitions_and_directories() {
        let (services, _dir) = services();
        services.users().register("u1", "A", "a@example.com").unwrap();
        let collection = &services.config.collection.name;
        services.index.drop_partition(collection, "partition_u1").unwrap();
        std::fs::remove_dir_all(user_dir(&services.config.data_paths.files, "u1")).unwrap();
        services.index.ensure_partition(collection, "partition_zombie").unwrap();

        let report = services.reconciler().run().unwrap();
        assert_eq!(report.partitions_created, 1);
        assert_eq!(report.directories_created, 1);
        assert_eq!(report.partitions_dropped, 1);
        assert_eq!(
            services.index.list_partitions(collection).unwrap(),
            vec!["partition_u1".to_string()]
        );
    }

    #[test]
    fn test_document_without_file_or_rows_is_removed() {
        let (services, _dir) = services();
        services.users().register("u1", "A", "a@example.com").unwrap();
        let result = services
            .ingester()
            .ingest("u1", ContentSource::file("a.txt", b"short lived".to_vec()))
            .unwrap();
        let doc = services
            .store
            .find_document(&result.embedded[0].doc_id)
            .unwrap()
            .unwrap();
        std::fs::remove_file(&doc.storage_path).unwrap();
        let collection = &services.config.collection.name;
        services.index.load_partition(collection, "partition_u1", 1).unwrap();
        services
            .index
            .delete_by_filter(collection, "partition_u1", &Filter::doc(&doc.id), 10, 10)
            .unwrap();

        let report = services.reconciler().run().unwrap();
        assert_eq!(report.documents_removed, 1);
        assert!(services.store.find_document(&doc.id).unwrap().is_none());
    }

    #[test]
    fn test_ingest_committed_during_scan_keeps_its_vectors() {
        let (services, index, _dir) = hooked_services();
        services.users().register("u1", "A", "a@example.com").unwrap();

        let store = services.store.clone();
        let embedder = services.embedder.clone();
        let extractor = services.extractor.clone();
        let settings = IngestSettings::from_config(&services.config);
        *index.before_query.lock() = Some(Box::new(move |inner: &SqliteVectorIndex| {
            let ingester = Ingester::new(&store, inner, embedder.as_ref(), &extractor, settings);
            let result = ingester
                .ingest("u1", ContentSource::file("late.txt", b"arrived mid sweep".to_vec()))
                .unwrap();
            assert_eq!(result.embedded_count(), 1);
        }));

        let report = services.reconciler().run().unwrap();
        assert!(index.before_query.lock().is_none());
        assert_eq!(report.orphan_rows_purged, 0);
        assert_eq!(report.documents_removed, 0);
        assert!(report.errors.is_empty());

        let docs = services.users().list_documents("u1").unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(
            rows(&services, "u1", &Filter::doc(&docs[0].id)),
            docs[0].chunk_count as usize
        );
    }

    #[test]
    fn test_write_staged_during_scan_is_in_flight() {
        let (services, index, _dir) = hooked_services();
        services.users().register("u1", "A", "a@example.com").unwrap();

        let store = services.store.clone();
        let collection = services.config.collection.name.clone();
        let dim = services.config.collection.dim;
        *index.before_query.lock() = Some(Box::new(move |inner: &SqliteVectorIndex| {
            store
                .stage_write("late", "u1", "partition_u1", "/nonexistent/late.txt", 1)
                .unwrap();
            let row = VectorRow {
                vector: vec![0.5; dim],
                doc_id: "late".into(),
                user_id: "u1".into(),
                content: "late".into(),
            };
            inner.insert(&collection, "partition_u1", &[row]).unwrap();
        }));

        let report = services.reconciler().run().unwrap();
        assert_eq!(report.orphan_rows_purged, 0);
        assert_eq!(rows(&services, "u1", &Filter::doc("late")), 1);

        // Once it outlives the grace period the next sweep rolls it back.
        std::thread::sleep(std::time::Duration::from_millis(5));
        let again = services.reconciler().run().unwrap();
        assert_eq!(again.writes_abandoned, 1);
        assert_eq!(rows(&services, "u1", &Filter::doc("late")), 0);
    }
}
