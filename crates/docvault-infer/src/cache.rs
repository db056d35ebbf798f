//! Query embedding cache.
//!
//! Repeated search queries skip the backend. Entries expire after a TTL and
//! the least recently used one is evicted at capacity.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::embedder::EmbedderBackend;
use docvault_core::Result;

struct CacheEntry {
    embedding: Vec<f32>,
    inserted_at: Instant,
}

struct CacheInner {
    entries: HashMap<String, CacheEntry>,
    order: VecDeque<String>,
    max_size: usize,
    ttl: Duration,
}

impl CacheInner {
    fn touch(&mut self, key: &str) {
        if let Some(pos) = self.order.iter().position(|k| k == key) {
            if let Some(k) = self.order.remove(pos) {
                self.order.push_back(k);
            }
        }
    }

    fn forget(&mut self, key: &str) {
        self.entries.remove(key);
        self.order.retain(|k| k != key);
    }
}

/// Embedder wrapper that memoizes `embed` results.
///
/// Batch calls (document chunks) bypass the cache.
pub struct CachedEmbedder {
    inner: Arc<dyn EmbedderBackend>,
    cache: Mutex<CacheInner>,
    label: String,
}

impl CachedEmbedder {
    pub fn new(inner: Arc<dyn EmbedderBackend>, max_size: usize, ttl: Duration) -> Self {
        let label = format!("cached({})", inner.name());
        Self {
            inner,
            cache: Mutex::new(CacheInner {
                entries: HashMap::with_capacity(max_size),
                order: VecDeque::with_capacity(max_size),
                max_size,
                ttl,
            }),
            label,
        }
    }

    /// 1000 entries, 1 hour TTL.
    pub fn with_defaults(inner: Arc<dyn EmbedderBackend>) -> Self {
        Self::new(inner, 1000, Duration::from_secs(3600))
    }

    fn get(&self, text: &str) -> Option<Vec<f32>> {
        let mut cache = self.cache.lock();
        let expired = cache
            .entries
            .get(text)
            .map(|e| e.inserted_at.elapsed() >= cache.ttl)?;
        if expired {
            cache.forget(text);
            return None;
        }
        cache.touch(text);
        cache.entries.get(text).map(|e| e.embedding.clone())
    }

    fn put(&self, text: &str, embedding: Vec<f32>) {
        let mut cache = self.cache.lock();
        if cache.max_size == 0 {
            return;
        }
        cache.forget(text);
        while cache.entries.len() >= cache.max_size {
            match cache.order.pop_front() {
                Some(oldest) => {
                    cache.entries.remove(&oldest);
                }
                None => break,
            }
        }
        cache.order.push_back(text.to_string());
        cache.entries.insert(
            text.to_string(),
            CacheEntry {
                embedding,
                inserted_at: Instant::now(),
            },
        );
    }

    pub fn len(&self) -> usize {
        self.cache.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl EmbedderBackend for CachedEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if let Some(hit) = self.get(text) {
            return Ok(hit);
        }
        let embedding = self.inner.embed(text)?;
        self.put(text, embedding.clone());
        Ok(embedding)
    }

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        self.inner.embed_batch(texts)
    }

    fn dimension(&self) -> usize {
        self.inner.dimension()
    }

    fn name(&self) -> &str {
        &self.label
    }
}
