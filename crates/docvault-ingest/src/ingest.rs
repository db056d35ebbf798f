//! Ingestion pipeline: source → bytes → dedup → text → chunks → vectors.
//!
//! Each unit is written to three places: the raw file under the user's
//! directory, the user's vector partition, and the document store. The file
//! and vectors go first, outside any store session; the session only
//! re-checks dedup, inserts the record and commits, so the store lock is
//! never held across file or index I/O. A document record therefore never
//! becomes visible before its vectors. Anything written before a failed or
//! lost commit is cleaned up explicitly, and the write journal records what
//! happened for the reconciliation sweep.

use std::path::{Path, PathBuf};

use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::chunking::chunk_text;
use crate::extract::{ContentExtractor, ContentSource, ExtractedContent};
use crate::file;
use docvault_core::layout::{document_path, partition_name};
use docvault_core::{DocVaultConfig, Error, Result};
use docvault_index::{DrainReport, Filter, VectorIndex, VectorRow};
use docvault_infer::EmbedderBackend;
use docvault_store::{DocumentRecord, DocumentStore, WriteState};

/// Knobs the pipeline needs from the global configuration.
#[derive(Debug, Clone)]
pub struct IngestSettings {
    pub collection: String,
    pub files_root: PathBuf,
    pub chunk_size: usize,
    pub load_replicas: usize,
    pub delete_page_size: usize,
    pub delete_max_iterations: usize,
}

impl IngestSettings {
    pub fn from_config(config: &DocVaultConfig) -> Self {
        Self {
            collection: config.collection.name.clone(),
            files_root: config.data_paths.files.clone(),
            chunk_size: config.chunk_size,
            load_replicas: config.load_replicas,
            delete_page_size: config.delete_page_size,
            delete_max_iterations: config.delete_max_iterations,
        }
    }
}

/// A unit that was stored and indexed.
#[derive(Debug, Clone, Serialize)]
pub struct IngestedUnit {
    pub name: String,
    pub doc_id: String,
    pub chunks: usize,
}

/// A unit that was not stored, with the reason.
#[derive(Debug, Clone, Serialize)]
pub struct UnitFailure {
    pub unit: String,
    pub reason: String,
}

/// Per-unit outcome of a batch.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestResult {
    pub embedded: Vec<IngestedUnit>,
    /// Units whose content the user already holds.
    pub skipped: Vec<String>,
    /// Units refused before any work (unsupported type or URL).
    pub rejected: Vec<UnitFailure>,
    pub failed: Vec<UnitFailure>,
}

impl IngestResult {
    pub fn embedded_count(&self) -> usize {
        self.embedded.len()
    }

    /// Rejected and failed units together.
    pub fn failed_count(&self) -> usize {
        self.rejected.len() + self.failed.len()
    }
}

enum UnitOutcome {
    Embedded(IngestedUnit),
    Skipped,
}

/// A unit that passed extraction, dedup and embedding.
struct PreparedUnit {
    content: ExtractedContent,
    hash: String,
    chunks: Vec<String>,
    vectors: Vec<Vec<f32>>,
}

/// Runs ingestion against borrowed store, index and embedder handles.
pub struct Ingester<'a> {
    store: &'a DocumentStore,
    index: &'a dyn VectorIndex,
    embedder: &'a dyn EmbedderBackend,
    extractor: &'a ContentExtractor,
    settings: IngestSettings,
}

impl<'a> Ingester<'a> {
    pub fn new(
        store: &'a DocumentStore,
        index: &'a dyn VectorIndex,
        embedder: &'a dyn EmbedderBackend,
        extractor: &'a ContentExtractor,
        settings: IngestSettings,
    ) -> Self {
        Self {
            store,
            index,
            embedder,
            extractor,
            settings,
        }
    }

    pub fn ingest(&self, user_id: &str, source: ContentSource) -> Result<IngestResult> {
        self.ingest_batch(user_id, &[source])
    }

    /// Ingest every unit independently. Only a missing user or partition
    /// fails the whole call.
    pub fn ingest_batch(&self, user_id: &str, sources: &[ContentSource]) -> Result<IngestResult> {
        let partition = self.check_user(user_id)?;
        let mut result = IngestResult::default();

        for source in sources {
            let unit = source.label().to_string();
            match self.ingest_unit(user_id, &partition, source) {
                Ok(UnitOutcome::Embedded(done)) => result.embedded.push(done),
                Ok(UnitOutcome::Skipped) => result.skipped.push(unit),
                Err(Error::UnsupportedContent(reason)) => {
                    debug!("Rejected {}: {}", unit, reason);
                    result.rejected.push(UnitFailure { unit, reason });
                }
                Err(e) => {
                    warn!("Failed to ingest {} for user {}: {}", unit, user_id, e);
                    result.failed.push(UnitFailure {
                        unit,
                        reason: e.to_string(),
                    });
                }
            }
        }

        info!(
            "Ingest for user {}: {} embedded, {} skipped, {} rejected, {} failed",
            user_id,
            result.embedded.len(),
            result.skipped.len(),
            result.rejected.len(),
            result.failed.len()
        );
        Ok(result)
    }

    /// Rebuild a document's vectors from its stored file. Returns the new chunk count.
    pub fn reindex_document(&self, doc: &DocumentRecord) -> Result<usize> {
        let bytes = std::fs::read(&doc.storage_path)?;
        let text = file::decode(&bytes, &file::file_extension(&doc.storage_path))?;
        let chunks = chunk_text(&text, self.settings.chunk_size)?;
        let vectors = self.embed_chunks(&chunks)?;

        let partition = partition_name(&doc.user_id);
        let purged = self.purge_vectors(&partition, &doc.id, &doc.user_id)?;
        let rows = vector_rows(&doc.id, &doc.user_id, chunks, vectors);
        self.index.insert(&self.settings.collection, &partition, &rows)?;
        self.store.update_chunk_count(&doc.id, rows.len() as i64)?;

        info!(
            "Reindexed document {}: replaced {} rows with {}",
            doc.id,
            purged.deleted,
            rows.len()
        );
        Ok(rows.len())
    }

    fn check_user(&self, user_id: &str) -> Result<String> {
        if !self.store.user_exists(user_id)? {
            return Err(Error::UserNotFound(user_id.to_string()));
        }
        let partition = partition_name(user_id);
        if !self
            .index
            .has_partition(&self.settings.collection, &partition)?
        {
            return Err(Error::DataIntegrity(format!(
                "user {} has no partition {}",
                user_id, partition
            )));
        }
        Ok(partition)
    }

    fn ingest_unit(&self, user_id: &str, partition: &str, source: &ContentSource) -> Result<UnitOutcome> {
        let unit = match self.prepare(user_id, source)? {
            Some(unit) => unit,
            None => return Ok(UnitOutcome::Skipped),
        };

        let doc_id = uuid::Uuid::new_v4().to_string();
        let path = document_path(
            &self.settings.files_root,
            user_id,
            &doc_id,
            &unit.content.extension,
        );
        let storage_path = path.to_string_lossy().into_owned();
        self.store.stage_write(
            &doc_id,
            user_id,
            partition,
            &storage_path,
            unit.chunks.len() as i64,
        )?;

        let chunk_count = unit.chunks.len();
        let name = unit.content.name.clone();
        match self.commit_unit(user_id, partition, &doc_id, &path, unit) {
            Ok(true) => {
                debug!("Stored {} as {} ({} chunks)", name, doc_id, chunk_count);
                Ok(UnitOutcome::Embedded(IngestedUnit {
                    name,
                    doc_id,
                    chunks: chunk_count,
                }))
            }
            Ok(false) => {
                debug!("{} was stored concurrently for user {}", name, user_id);
                self.remove_artifacts(user_id, partition, &doc_id, &path);
                self.store.discard_write(&doc_id)?;
                Ok(UnitOutcome::Skipped)
            }
            Err(e) => {
                self.undo_unit(user_id, partition, &doc_id, &path, &e);
                Err(e)
            }
        }
    }

    /// Extract, dedup, decode, chunk and embed. `None` means the user already holds the content.
    fn prepare(&self, user_id: &str, source: &ContentSource) -> Result<Option<PreparedUnit>> {
        let content = self.extractor.extract(source)?;
        let hash = content_hash(&content.bytes);
        if let Some(existing) = self.store.find_document_by_hash(user_id, &hash)? {
            debug!("{} duplicates document {}, skipping", content.name, existing.id);
            return Ok(None);
        }

        let text = file::decode(&content.bytes, &content.extension)?;
        let chunks = chunk_text(&text, self.settings.chunk_size)?;
        if chunks.is_empty() {
            return Err(Error::Extraction(format!(
                "{} has no extractable text",
                content.name
            )));
        }
        let vectors = self.embed_chunks(&chunks)?;

        Ok(Some(PreparedUnit {
            content,
            hash,
            chunks,
            vectors,
        }))
    }

    /// Write the file and vectors, then commit the record in a short store session.
    /// Returns `false` when the dedup re-check finds the content already stored.
    fn commit_unit(
        &self,
        user_id: &str,
        partition: &str,
        doc_id: &str,
        path: &Path,
        unit: PreparedUnit,
    ) -> Result<bool> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        std::fs::write(path, &unit.content.bytes)?;

        let chunk_count = unit.chunks.len() as i64;
        let rows = vector_rows(doc_id, user_id, unit.chunks, unit.vectors);
        self.index
            .insert(&self.settings.collection, partition, &rows)?;

        let record = DocumentRecord {
            id: doc_id.to_string(),
            user_id: user_id.to_string(),
            name: unit.content.name,
            content_hash: unit.hash,
            storage_path: path.to_string_lossy().into_owned(),
            chunk_count,
            created_at: chrono::Utc::now().timestamp_millis(),
        };

        let session = self.store.session()?;
        if session
            .find_document_by_hash(user_id, &record.content_hash)?
            .is_some()
        {
            session.rollback()?;
            return Ok(false);
        }
        // UNIQUE(user_id, content_hash) catches writers from other processes.
        if !session.insert_document(&record)? {
            session.rollback()?;
            return Ok(false);
        }
        session.set_write_state(doc_id, WriteState::Committed, None)?;
        session.commit()?;
        Ok(true)
    }

    /// Best-effort cleanup after a failed write. No record was committed.
    fn undo_unit(&self, user_id: &str, partition: &str, doc_id: &str, path: &Path, cause: &Error) {
        self.remove_artifacts(user_id, partition, doc_id, path);
        if let Err(e) = self
            .store
            .set_write_state(doc_id, WriteState::Failed, Some(&cause.to_string()))
        {
            warn!("Failed to mark write {} as failed: {}", doc_id, e);
        }
    }

    /// Remove the file and vectors of a write that never committed.
    fn remove_artifacts(&self, user_id: &str, partition: &str, doc_id: &str, path: &Path) {
        if path.exists() {
            if let Err(e) = std::fs::remove_file(path) {
                warn!("Failed to remove {}: {}", path.display(), e);
            }
        }
        if let Err(e) = self.purge_vectors(partition, doc_id, user_id) {
            warn!("Failed to purge vectors of {}: {}", doc_id, e);
        }
    }

    fn purge_vectors(&self, partition: &str, doc_id: &str, user_id: &str) -> Result<DrainReport> {
        let collection = &self.settings.collection;
        self.index
            .load_partition(collection, partition, self.settings.load_replicas)?;
        self.index.delete_by_filter(
            collection,
            partition,
            &Filter::doc(doc_id).and(Filter::user(user_id)),
            self.settings.delete_page_size,
            self.settings.delete_max_iterations,
        )
    }

    fn embed_chunks(&self, chunks: &[String]) -> Result<Vec<Vec<f32>>> {
        let inputs: Vec<&str> = chunks.iter().map(String::as_str).collect();
        let vectors = self.embedder.embed_batch(&inputs)?;
        if vectors.len() != chunks.len() {
            return Err(Error::Inference(format!(
                "{} returned {} embeddings for {} chunks",
                self.embedder.name(),
                vectors.len(),
                chunks.len()
            )));
        }
        Ok(vectors)
    }
}

fn vector_rows(doc_id: &str, user_id: &str, chunks: Vec<String>, vectors: Vec<Vec<f32>>) -> Vec<VectorRow> {
    chunks
        .into_iter()
        .zip(vectors)
        .map(|(content, vector)| VectorRow {
            vector,
            doc_id: doc_id.to_string(),
            user_id: user_id.to_string(),
            content,
        })
        .collect()
}

/// SHA-256 of the raw bytes, hex encoded.
pub fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;

    use crate::fetch::{PageFetcher, TranscriptFetcher};
    use docvault_core::layout::user_dir;
    use docvault_core::CollectionSettings;
    use docvault_index::{CollectionSpec, RowRef, SearchHit, SqliteVectorIndex};
    use docvault_infer::HashingEmbedder;
    use docvault_store::UserRecord;
    use parking_lot::Mutex;

    const COLLECTION: &str = "collection_test";
    const DIM: usize = 16;

    struct Pages;

    impl PageFetcher for Pages {
        fn fetch_html(&self, url: &str) -> Result<String> {
            if url.contains("down") {
                return Err(Error::Extraction(format!("Failed to fetch {}", url)));
            }
            Ok(format!("<p>Page at {}</p>", url))
        }
    }

    struct Transcripts;

    impl TranscriptFetcher for Transcripts {
        fn fetch_transcript(&self, _video_id: &str, _langs: &[String]) -> Result<String> {
            Ok("a transcript".into())
        }
    }

    type InsertHook = Box<dyn FnOnce(&SqliteVectorIndex) + Send>;

    /// Delegates to a real index, counting inserts and optionally failing them.
    /// A one-shot hook can run against the inner index before the next insert.
    struct FlakyIndex {
        inner: SqliteVectorIndex,
        fail_inserts: AtomicBool,
        inserts: AtomicUsize,
        before_insert: Mutex<Option<InsertHook>>,
    }

    impl VectorIndex for FlakyIndex {
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
            self.inserts.fetch_add(1, Ordering::SeqCst);
            let hook = self.before_insert.lock().take();
            if let Some(hook) = hook {
                hook(&self.inner);
            }
            let ids = self.inner.insert(c, p, rows)?;
            if self.fail_inserts.load(Ordering::SeqCst) {
                return Err(Error::VectorIndex("insert rpc timed out".into()));
            }
            Ok(ids)
        }
        fn raw_search(&self, c: &str, p: &str, q: &[Vec<f32>], k: usize, f: &Filter) -> Result<Vec<Vec<SearchHit>>> {
            self.inner.raw_search(c, p, q, k, f)
        }
        fn query(&self, c: &str, p: &str, f: &Filter, offset: usize, limit: usize) -> Result<Vec<RowRef>> {
            self.inner.query(c, p, f, offset, limit)
        }
        fn count(&self, c: &str, p: &str, f: &Filter) -> Result<usize> {
            self.inner.count(c, p, f)
        }
        fn delete_ids(&self, c: &str, p: &str, ids: &[i64]) -> Result<usize> {
            self.inner.delete_ids(c, p, ids)
        }
    }

    struct Fixture {
        store: Arc<DocumentStore>,
        index: FlakyIndex,
        embedder: HashingEmbedder,
        extractor: ContentExtractor,
        settings: IngestSettings,
        _dir: tempfile::TempDir,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let store = Arc::new(DocumentStore::open(dir.path().join("metadata")).unwrap());
            let index = FlakyIndex {
                inner: SqliteVectorIndex::open_in_memory(100_000).unwrap(),
                fail_inserts: AtomicBool::new(false),
                inserts: AtomicUsize::new(0),
                before_insert: Mutex::new(None),
            };
            let settings = CollectionSettings {
                name: COLLECTION.into(),
                dim: DIM,
                ..Default::default()
            };
            index.ensure_collection(&CollectionSpec::from(&settings)).unwrap();

            let fixture = Self {
                store,
                index,
                embedder: HashingEmbedder::new(DIM, 2048),
                extractor: ContentExtractor::new(Arc::new(Pages), Arc::new(Transcripts)),
                settings: IngestSettings {
                    collection: COLLECTION.into(),
                    files_root: dir.path().join("user_files"),
                    chunk_size: 1024,
                    load_replicas: 1,
                    delete_page_size: 100,
                    delete_max_iterations: 100,
                },
                _dir: dir,
            };
            fixture.register("u1");
            fixture
        }

        fn register(&self, user_id: &str) {
            let session = self.store.session().unwrap();
            session
                .insert_user(&UserRecord {
                    id: user_id.into(),
                    name: "Test".into(),
                    email: "t@example.com".into(),
                    created_at: 0,
                })
                .unwrap();
            session.commit().unwrap();
            self.index
                .ensure_partition(COLLECTION, &partition_name(user_id))
                .unwrap();
            std::fs::create_dir_all(user_dir(&self.settings.files_root, user_id)).unwrap();
        }

        fn ingester(&self) -> Ingester<'_> {
            Ingester::new(
                &self.store,
                &self.index,
                &self.embedder,
                &self.extractor,
                self.settings.clone(),
            )
        }

        fn rows(&self, user_id: &str) -> usize {
            self.index
                .inner
                .stored_rows(COLLECTION, &partition_name(user_id))
                .unwrap()
        }
    }

    #[test]
    fn test_chunks_file_and_vectors() {
        let fx = Fixture::new();
        let text = "abcdefghij".repeat(300);
        let result = fx
            .ingester()
            .ingest("u1", ContentSource::file("notes.txt", text.clone().into_bytes()))
            .unwrap();

        assert_eq!(result.embedded_count(), 1);
        let unit = &result.embedded[0];
        assert_eq!(unit.name, "notes.txt");
        assert_eq!(unit.chunks, 3);
        assert_eq!(fx.rows("u1"), 3);

        let doc = fx.store.find_document(&unit.doc_id).unwrap().unwrap();
        assert_eq!(doc.chunk_count, 3);
        assert_eq!(doc.content_hash, content_hash(text.as_bytes()));
        assert!(doc.storage_path.ends_with(&format!("user_u1/{}.txt", unit.doc_id)));
        assert_eq!(std::fs::read_to_string(&doc.storage_path).unwrap(), text);

        let write = fx.store.find_write(&unit.doc_id).unwrap().unwrap();
        assert_eq!(write.state, WriteState::Committed);
    }

    #[test]
    fn test_second_ingest_is_skipped() {
        let fx = Fixture::new();
        let source = ContentSource::file("a.txt", b"same bytes".to_vec());
        fx.ingester().ingest("u1", source.clone()).unwrap();
        let inserts = fx.index.inserts.load(Ordering::SeqCst);

        let again = fx.ingester().ingest("u1", source).unwrap();
        assert_eq!(again.embedded_count(), 0);
        assert_eq!(again.skipped, vec!["a.txt".to_string()]);
        assert_eq!(fx.index.inserts.load(Ordering::SeqCst), inserts);
        assert_eq!(fx.store.count_documents(Some("u1")).unwrap(), 1);
        assert_eq!(fx.rows("u1"), 1);
    }

    #[test]
    fn test_same_content_for_two_users() {
        let fx = Fixture::new();
        fx.register("u2");
        let source = ContentSource::file("a.txt", b"shared".to_vec());
        assert_eq!(fx.ingester().ingest("u1", source.clone()).unwrap().embedded_count(), 1);
        assert_eq!(fx.ingester().ingest("u2", source).unwrap().embedded_count(), 1);
        assert_eq!(fx.rows("u1"), 1);
        assert_eq!(fx.rows("u2"), 1);
    }

    #[test]
    fn test_batch_units_are_independent() {
        let fx = Fixture::new();
        let result = fx
            .ingester()
            .ingest_batch(
                "u1",
                &[
                    ContentSource::file("ok.txt", b"fine".to_vec()),
                    ContentSource::file("image.png", b"\x89PNG".to_vec()),
                    ContentSource::HtmlUrl("https://down.example.com".into()),
                    ContentSource::file("empty.txt", Vec::new()),
                    ContentSource::HtmlUrl("https://example.com/page".into()),
                ],
            )
            .unwrap();

        assert_eq!(result.embedded_count(), 2);
        assert_eq!(result.embedded[1].name, "https://example.com/page");
        assert_eq!(result.rejected.len(), 1);
        assert_eq!(result.rejected[0].unit, "image.png");
        assert_eq!(result.failed.len(), 2);
        assert_eq!(result.failed_count(), 3);
        assert_eq!(fx.store.count_documents(Some("u1")).unwrap(), 2);
    }

    #[test]
    fn test_unknown_user_and_missing_partition() {
        let fx = Fixture::new();
        let err = fx
            .ingester()
            .ingest("ghost", ContentSource::file("a.txt", b"x".to_vec()))
            .unwrap_err();
        assert!(matches!(err, Error::UserNotFound(_)));

        fx.index.drop_partition(COLLECTION, &partition_name("u1")).unwrap();
        let err = fx
            .ingester()
            .ingest("u1", ContentSource::file("a.txt", b"x".to_vec()))
            .unwrap_err();
        assert!(matches!(err, Error::DataIntegrity(_)));
        assert_eq!(fx.index.inserts.load(Ordering::SeqCst), 0);
        assert_eq!(fx.store.count_documents(None).unwrap(), 0);
    }

    #[test]
    fn test_failed_index_write_leaves_nothing_behind() {
        let fx = Fixture::new();
        fx.index.fail_inserts.store(true, Ordering::SeqCst);

        let result = fx
            .ingester()
            .ingest("u1", ContentSource::file("a.txt", b"doomed".to_vec()))
            .unwrap();
        assert_eq!(result.failed.len(), 1);
        assert!(result.failed[0].reason.contains("timed out"));

        assert_eq!(fx.store.count_documents(Some("u1")).unwrap(), 0);
        assert_eq!(fx.rows("u1"), 0);
        let dir = user_dir(&fx.settings.files_root, "u1");
        assert_eq!(std::fs::read_dir(dir).unwrap().count(), 0);

        let failed = fx.store.writes_in_state(WriteState::Failed).unwrap();
        assert_eq!(failed.len(), 1);
        assert!(failed[0].error.as_deref().unwrap_or("").contains("timed out"));

        // The content was never stored, so a retry goes through.
        fx.index.fail_inserts.store(false, Ordering::SeqCst);
        let retry = fx
            .ingester()
            .ingest("u1", ContentSource::file("a.txt", b"doomed".to_vec()))
            .unwrap();
        assert_eq!(retry.embedded_count(), 1);
    }

    #[test]
    fn test_concurrent_duplicate_loses_at_commit() {
        let fx = Fixture::new();
        let source = ContentSource::file("a.txt", b"raced content".to_vec());

        // Another writer stores the same content while this ingest is
        // between its dedup pre-check and its commit.
        let store = fx.store.clone();
        let settings = fx.settings.clone();
        let rival_source = source.clone();
        let rival_doc = Arc::new(Mutex::new(None));
        let rival_doc_out = rival_doc.clone();
        *fx.index.before_insert.lock() = Some(Box::new(move |inner: &SqliteVectorIndex| {
            let embedder = HashingEmbedder::new(DIM, 2048);
            let extractor = ContentExtractor::new(Arc::new(Pages), Arc::new(Transcripts));
            let rival = Ingester::new(&store, inner, &embedder, &extractor, settings);
            let result = rival.ingest("u1", rival_source).unwrap();
            assert_eq!(result.embedded_count(), 1);
            *rival_doc_out.lock() = Some(result.embedded[0].doc_id.clone());
        }));

        let result = fx.ingester().ingest("u1", source).unwrap();
        assert_eq!(result.embedded_count(), 0);
        assert_eq!(result.skipped, vec!["a.txt".to_string()]);

        let winner = rival_doc.lock().clone().unwrap();
        let docs = fx.store.list_documents("u1").unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].id, winner);

        // Only the winner's rows, file and journal entry remain.
        assert_eq!(fx.rows("u1"), 1);
        fx.index
            .load_partition(COLLECTION, &partition_name("u1"), 1)
            .unwrap();
        let rows = fx
            .index
            .query(COLLECTION, &partition_name("u1"), &Filter::All, 0, 10)
            .unwrap();
        assert!(rows.iter().all(|r| r.doc_id == winner));
        let dir = user_dir(&fx.settings.files_root, "u1");
        assert_eq!(std::fs::read_dir(dir).unwrap().count(), 1);

        let committed = fx.store.writes_in_state(WriteState::Committed).unwrap();
        assert_eq!(committed.len(), 1);
        assert_eq!(committed[0].doc_id, winner);
        assert!(fx.store.writes_in_state(WriteState::Staged).unwrap().is_empty());
        assert!(fx.store.writes_in_state(WriteState::Failed).unwrap().is_empty());
    }

    #[test]
    fn test_reindex_document() {
        let fx = Fixture::new();
        let result = fx
            .ingester()
            .ingest("u1", ContentSource::file("a.txt", "x".repeat(2500).into_bytes()))
            .unwrap();
        let doc = fx
            .store
            .find_document(&result.embedded[0].doc_id)
            .unwrap()
            .unwrap();

        // Lose one vector row.
        fx.index
            .load_partition(COLLECTION, &partition_name("u1"), 1)
            .unwrap();
        let rows = fx
            .index
            .query(COLLECTION, &partition_name("u1"), &Filter::doc(&doc.id), 0, 1)
            .unwrap();
        fx.index
            .delete_ids(COLLECTION, &partition_name("u1"), &[rows[0].id])
            .unwrap();
        assert_eq!(fx.rows("u1"), 2);

        let mut small = fx.settings.clone();
        small.chunk_size = 500;
        let ingester = Ingester::new(&fx.store, &fx.index, &fx.embedder, &fx.extractor, small);
        assert_eq!(ingester.reindex_document(&doc).unwrap(), 5);
        assert_eq!(fx.rows("u1"), 5);
        assert_eq!(fx.store.find_document(&doc.id).unwrap().unwrap().chunk_count, 5);
    }

    #[test]
    fn test_content_hash() {
        assert_eq!(
            content_hash(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
