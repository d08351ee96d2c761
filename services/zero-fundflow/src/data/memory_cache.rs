//! Process-memory tier of the fund-flow cache.
//!
//! Entries live for the lifetime of the process: a `(signal kind, period)`
//! pair is fetched at most once per run. There is no TTL.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use super::{Dataset, FlowPeriod, SignalKind};

type CacheKey = (SignalKind, FlowPeriod);

/// In-memory dataset cache
#[derive(Default)]
pub struct MemoryCache {
    entries: RwLock<HashMap<CacheKey, Arc<Dataset>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a cached dataset.
    pub fn get(&self, kind: SignalKind, period: FlowPeriod) -> Option<Arc<Dataset>> {
        let found = self
            .entries
            .read()
            .ok()
            .and_then(|cache| cache.get(&(kind, period)).cloned());

        let counter = if found.is_some() { &self.hits } else { &self.misses };
        counter.fetch_add(1, Ordering::Relaxed);

        found
    }

    /// Cache a dataset, replacing any previous entry for the key.
    pub fn insert(&self, kind: SignalKind, period: FlowPeriod, dataset: Arc<Dataset>) {
        if let Ok(mut cache) = self.entries.write() {
            cache.insert((kind, period), dataset);
        }
    }

    /// Drop every entry.
    pub fn clear(&self) {
        if let Ok(mut cache) = self.entries.write() {
            cache.clear();
        }
    }

    pub fn stats(&self) -> MemoryCacheStats {
        MemoryCacheStats {
            entries: self.entries.read().map(|c| c.len()).unwrap_or(0),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

/// Memory cache counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryCacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
}

impl std::fmt::Display for MemoryCacheStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "MemoryCache: {} entries, {} hits, {} misses",
            self.entries, self.hits, self.misses
        )
    }
}
