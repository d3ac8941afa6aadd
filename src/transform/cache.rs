//! Transform cache
//!
//! Content-addressed store mapping source hash to transformed module
//! fragments. The cache is the only state shared across builds: create one
//! handle per process (or per test) and pass it to each bundler. Entries are
//! keyed by `TransformOptions::source_hash`, so content or option changes
//! invalidate naturally.
//!
//! Concurrency contract: lookups take per-hash cells, never a cache-wide
//! lock, and at most one transform runs per hash at a time - concurrent
//! callers for the same hash await the first caller's result.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::OnceCell;
use tracing::debug;

use super::TransformedModule;
use crate::error::Result;

const DEFAULT_CAPACITY: usize = 2048;

/// Lifetime hit/miss counters for one cache handle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
}

impl CacheStats {
    fn new(hits: u64, misses: u64) -> Self {
        let total = hits + misses;
        let hit_rate = if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        };
        Self {
            hits,
            misses,
            hit_rate,
        }
    }
}

struct CacheCell {
    cell: OnceCell<Arc<TransformedModule>>,
    last_used: AtomicU64,
}

impl CacheCell {
    fn new(tick: u64) -> Self {
        Self {
            cell: OnceCell::new(),
            last_used: AtomicU64::new(tick),
        }
    }
}

/// Shared, size-bounded transform cache.
pub struct TransformCache {
    entries: DashMap<String, Arc<CacheCell>>,
    capacity: usize,
    tick: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl TransformCache {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Cache bounded to `capacity` entries; least-recently-used entries are
    /// evicted past that. Eviction only drops the cache's own reference, so
    /// fragments already handed to an in-progress build stay valid.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: DashMap::new(),
            capacity: capacity.max(1),
            tick: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Look up `hash`, running `transform` on a miss. Returns the fragment
    /// and whether this was a hit. Concurrent callers with the same hash
    /// share one transform invocation.
    pub async fn get_or_transform<F, Fut>(
        &self,
        hash: &str,
        transform: F,
    ) -> Result<(Arc<TransformedModule>, bool)>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<TransformedModule>>,
    {
        let tick = self.tick.fetch_add(1, Ordering::Relaxed);
        let cell = self
            .entries
            .entry(hash.to_string())
            .or_insert_with(|| Arc::new(CacheCell::new(tick)))
            .clone();

        let hit = cell.cell.initialized();
        let value = cell
            .cell
            .get_or_try_init(|| async { transform().await.map(Arc::new) })
            .await?
            .clone();
        cell.last_used.store(tick, Ordering::Relaxed);

        if hit {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            self.evict_over_capacity(hash);
        }

        Ok((value, hit))
    }

    /// Non-counting read, for callers that only want to peek.
    pub fn lookup(&self, hash: &str) -> Option<Arc<TransformedModule>> {
        self.entries
            .get(hash)
            .and_then(|cell| cell.cell.get().cloned())
    }

    /// Non-counting insert of an already-transformed fragment.
    pub fn store(&self, hash: &str, fragment: TransformedModule) {
        let tick = self.tick.fetch_add(1, Ordering::Relaxed);
        let cell = self
            .entries
            .entry(hash.to_string())
            .or_insert_with(|| Arc::new(CacheCell::new(tick)))
            .clone();
        let _ = cell.cell.set(Arc::new(fragment));
        self.evict_over_capacity(hash);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats::new(
            self.hits.load(Ordering::Relaxed),
            self.misses.load(Ordering::Relaxed),
        )
    }

    /// Drop least-recently-used entries until back under capacity.
    /// In-flight (uninitialized) cells are never evicted - their waiters
    /// hold the cell anyway.
    fn evict_over_capacity(&self, keep: &str) {
        while self.entries.len() > self.capacity {
            let mut victim: Option<(String, u64)> = None;
            for entry in self.entries.iter() {
                if entry.key() == keep || !entry.value().cell.initialized() {
                    continue;
                }
                let used = entry.value().last_used.load(Ordering::Relaxed);
                if victim.as_ref().map(|(_, t)| used < *t).unwrap_or(true) {
                    victim = Some((entry.key().clone(), used));
                }
            }

            match victim {
                Some((key, _)) => {
                    debug!("evicting transform cache entry {}", &key[..key.len().min(12)]);
                    self.entries.remove(&key);
                }
                None => break,
            }
        }
    }
}

impl Default for TransformCache {
    fn default() -> Self {
        Self::new()
    }
}
