//! Retrieval: embed a query and rank a user's chunks against it.

use serde::Serialize;
use tracing::debug;

use crate::services::Services;
use docvault_core::layout::partition_name;
use docvault_core::{Error, Result};
use docvault_index::{Filter, SearchOutcome};

/// One ranked chunk.
#[derive(Debug, Clone, Serialize)]
pub struct RankedHit {
    pub distance: f32,
    pub doc_id: String,
    pub user_id: String,
    pub content: String,
}

/// Search outcome. Empty results are not errors.
#[derive(Debug, Clone)]
pub enum Retrieval {
    /// The user's partition holds nothing that passes the filter.
    NoEntries,
    /// Candidates existed, but none was under the distance threshold.
    NoMatches,
    /// Hits in ascending distance order.
    Ranked(Vec<RankedHit>),
}

impl Retrieval {
    pub fn hits(&self) -> &[RankedHit] {
        match self {
            Self::Ranked(hits) => hits,
            _ => &[],
        }
    }
}

pub struct Retriever<'a> {
    services: &'a Services,
}

impl<'a> Retriever<'a> {
    pub fn new(services: &'a Services) -> Self {
        Self { services }
    }

    /// Top-`k` chunks of `user_id` closest to `query`. An empty `doc_ids`
    /// searches every document of the user.
    pub fn search(&self, user_id: &str, query: &str, k: usize, doc_ids: &[String]) -> Result<Retrieval> {
        if k == 0 {
            return Err(Error::InvalidInput("top_k must be positive".into()));
        }
        let services = self.services;
        if !services.store.user_exists(user_id)? {
            return Err(Error::UserNotFound(user_id.to_string()));
        }

        let collection = &services.config.collection.name;
        let partition = partition_name(user_id);
        if !services.index.has_partition(collection, &partition)? {
            return Err(Error::DataIntegrity(format!(
                "user {} has no partition {}",
                user_id, partition
            )));
        }
        services
            .index
            .load_partition(collection, &partition, services.config.load_replicas)?;

        let vector = services.query_embedder.embed(query)?;
        let mut filter = Filter::user(user_id);
        if !doc_ids.is_empty() {
            filter = filter.and(Filter::docs(doc_ids));
        }

        let outcome = services.index.search(
            collection,
            &partition,
            &[vector],
            k,
            services.config.distance_threshold,
            &filter,
        )?;
        let retrieval = match outcome {
            SearchOutcome::NoCandidates => Retrieval::NoEntries,
            SearchOutcome::NoMatches => Retrieval::NoMatches,
            SearchOutcome::Matches(per_query) => Retrieval::Ranked(
                per_query
                    .into_iter()
                    .next()
                    .unwrap_or_default()
                    .into_iter()
                    .map(|hit| RankedHit {
                        distance: hit.distance,
                        doc_id: hit.doc_id,
                        user_id: hit.user_id,
                        content: hit.content,
                    })
                    .collect(),
            ),
        };
        debug!(
            "Search for user {} where {}: {} hits",
            user_id,
            filter,
            retrieval.hits().len()
        );
        Ok(retrieval)
    }
}
