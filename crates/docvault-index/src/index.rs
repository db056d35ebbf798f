//! The `VectorIndex` trait.

use std::collections::HashSet;

use tracing::{debug, warn};

use crate::filter::Filter;
use crate::types::*;
use docvault_core::{Error, Result};

/// A vector store organised as collections of named partitions.
///
/// Partitions must exist before inserts and be loaded before
/// `raw_search`, `query`, `count` or `delete_ids`. Load state is shared by
/// every caller; there is no per-caller ownership of a loaded partition.
pub trait VectorIndex: Send + Sync {
    /// Create the collection if missing. Fails if it exists with a different shape.
    fn ensure_collection(&self, spec: &CollectionSpec) -> Result<()>;
    fn has_collection(&self, collection: &str) -> Result<bool>;

    fn has_partition(&self, collection: &str, partition: &str) -> Result<bool>;
    fn ensure_partition(&self, collection: &str, partition: &str) -> Result<()>;
    fn list_partitions(&self, collection: &str) -> Result<Vec<String>>;
    /// Drop a partition and all its rows. The partition must be released first.
    fn drop_partition(&self, collection: &str, partition: &str) -> Result<()>;

    /// Single load attempt. Fails with `IndexMemoryLimit` when over budget.
    fn try_load_partition(&self, collection: &str, partition: &str, replicas: usize) -> Result<()>;
    fn release_partition(&self, collection: &str, partition: &str) -> Result<()>;
    fn release_collection(&self, collection: &str) -> Result<()>;

    /// Insert rows, returning the assigned ids in input order.
    fn insert(&self, collection: &str, partition: &str, rows: &[VectorRow]) -> Result<Vec<i64>>;

    /// Top-`k` candidates per query vector, ascending by distance, without thresholding.
    fn raw_search(
        &self,
        collection: &str,
        partition: &str,
        queries: &[Vec<f32>],
        k: usize,
        filter: &Filter,
    ) -> Result<Vec<Vec<SearchHit>>>;

    /// Matching rows in id order.
    fn query(
        &self,
        collection: &str,
        partition: &str,
        filter: &Filter,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<RowRef>>;

    fn count(&self, collection: &str, partition: &str, filter: &Filter) -> Result<usize>;

    /// Delete rows by id, returning how many existed.
    fn delete_ids(&self, collection: &str, partition: &str, ids: &[i64]) -> Result<usize>;

    /// Load a partition. On a memory-limit failure, releases every
    /// partition of the collection and retries exactly once.
    fn load_partition(&self, collection: &str, partition: &str, replicas: usize) -> Result<()> {
        match self.try_load_partition(collection, partition, replicas) {
            Err(Error::IndexMemoryLimit(msg)) => {
                warn!(
                    "Loading {}/{} hit the memory limit ({}), releasing collection and retrying",
                    collection, partition, msg
                );
                self.release_collection(collection)?;
                self.try_load_partition(collection, partition, replicas)
            }
            other => other,
        }
    }

    /// Search and drop hits at or beyond `distance_threshold`.
    fn search(
        &self,
        collection: &str,
        partition: &str,
        queries: &[Vec<f32>],
        k: usize,
        distance_threshold: f32,
        filter: &Filter,
    ) -> Result<SearchOutcome> {
        let raw = self.raw_search(collection, partition, queries, k, filter)?;
        if raw.iter().all(|hits| hits.is_empty()) {
            return Ok(SearchOutcome::NoCandidates);
        }

        let filtered: Vec<Vec<SearchHit>> = raw
            .into_iter()
            .map(|mut hits| {
                hits.retain(|h| h.distance < distance_threshold);
                hits.sort_by(|a, b| a.distance.total_cmp(&b.distance));
                hits
            })
            .collect();

        if filtered.iter().all(|hits| hits.is_empty()) {
            Ok(SearchOutcome::NoMatches)
        } else {
            Ok(SearchOutcome::Matches(filtered))
        }
    }

    /// Delete every row matching `filter`, one page of ids at a time.
    ///
    /// Stops at the first empty page. Fails if `max_iterations` pages are
    /// consumed without draining, or if a page returns an id that was
    /// already deleted (the query is not converging).
    fn delete_by_filter(
        &self,
        collection: &str,
        partition: &str,
        filter: &Filter,
        page_size: usize,
        max_iterations: usize,
    ) -> Result<DrainReport> {
        if page_size == 0 {
            return Err(Error::InvalidInput("delete page size must be positive".into()));
        }
        let mut report = DrainReport::default();
        let mut deleted: HashSet<i64> = HashSet::new();

        while report.iterations < max_iterations {
            let page = self.query(collection, partition, filter, 0, page_size)?;
            report.iterations += 1;
            if page.is_empty() {
                debug!(
                    "Drained {} rows from {}/{} where {} in {} iterations",
                    report.deleted, collection, partition, filter, report.iterations
                );
                return Ok(report);
            }

            let ids: Vec<i64> = page.iter().map(|r| r.id).collect();
            if let Some(id) = ids.iter().find(|id| deleted.contains(id)) {
                return Err(Error::VectorIndex(format!(
                    "row {} reappeared after deletion while draining {}/{} where {}",
                    id, collection, partition, filter
                )));
            }
            self.delete_ids(collection, partition, &ids)?;
            report.deleted += ids.len();
            deleted.extend(ids);
        }

        Err(Error::VectorIndex(format!(
            "delete where {} on {}/{} did not converge after {} iterations ({} rows deleted)",
            filter, collection, partition, max_iterations, report.deleted
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Answers every query with the same rows and never deletes anything.
    struct StuckIndex;

    impl VectorIndex for StuckIndex {
        fn ensure_collection(&self, _spec: &CollectionSpec) -> Result<()> {
            Ok(())
        }
        fn has_collection(&self, _c: &str) -> Result<bool> {
            Ok(true)
        }
        fn has_partition(&self, _c: &str, _p: &str) -> Result<bool> {
            Ok(true)
        }
        fn ensure_partition(&self, _c: &str, _p: &str) -> Result<()> {
            Ok(())
        }
        fn list_partitions(&self, _c: &str) -> Result<Vec<String>> {
            Ok(Vec::new())
        }
        fn drop_partition(&self, _c: &str, _p: &str) -> Result<()> {
            Ok(())
        }
        fn try_load_partition(&self, _c: &str, _p: &str, _replicas: usize) -> Result<()> {
            Ok(())
        }
        fn release_partition(&self, _c: &str, _p: &str) -> Result<()> {
            Ok(())
        }
        fn release_collection(&self, _c: &str) -> Result<()> {
            Ok(())
        }
        fn insert(&self, _c: &str, _p: &str, _rows: &[VectorRow]) -> Result<Vec<i64>> {
            Ok(Vec::new())
        }
        fn raw_search(
            &self,
            _c: &str,
            _p: &str,
            queries: &[Vec<f32>],
            _k: usize,
            _f: &Filter,
        ) -> Result<Vec<Vec<SearchHit>>> {
            Ok(vec![Vec::new(); queries.len()])
        }
        fn query(&self, _c: &str, _p: &str, _f: &Filter, _offset: usize, _limit: usize) -> Result<Vec<RowRef>> {
            Ok(vec![RowRef {
                id: 7,
                doc_id: "d".into(),
                user_id: "u".into(),
            }])
        }
        fn count(&self, _c: &str, _p: &str, _f: &Filter) -> Result<usize> {
            Ok(1)
        }
        fn delete_ids(&self, _c: &str, _p: &str, _ids: &[i64]) -> Result<usize> {
            Ok(0)
        }
    }

    #[test]
    fn test_drain_detects_rows_that_do_not_go_away() {
        let err = StuckIndex
            .delete_by_filter("c", "p", &Filter::user("u"), 10, 100)
            .unwrap_err();
        assert!(matches!(err, Error::VectorIndex(msg) if msg.contains("reappeared")));
    }

    #[test]
    fn test_drain_rejects_zero_page_size() {
        assert!(matches!(
            StuckIndex.delete_by_filter("c", "p", &Filter::user("u"), 0, 100),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn test_search_with_no_rows_has_no_candidates() {
        let outcome = StuckIndex
            .search("c", "p", &[vec![1.0]], 5, 1.0, &Filter::All)
            .unwrap();
        assert!(matches!(outcome, SearchOutcome::NoCandidates));
    }
}
