//! Content-keyed cache of raw percentile columns
//!
//! Entries are keyed by (table fingerprint, stratum, feature) and hold the raw
//! leave-one-out ranks, so category policy changes never need invalidation.
//! Seeing a new table fingerprint drops every entry of the previous table.
//!
//! The map sits behind an `RwLock`: lookups share the read lock, inserts take
//! the write lock. A column may be computed twice by racing callers; the
//! first insert wins and both get identical data.

use crate::measurement::TableFingerprint;
use crate::percentile::RankedColumn;
use crate::strata::StratumKey;
use fnv::FnvHashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, trace};

/// Identity of one cached column
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub table: TableFingerprint,
    pub stratum: StratumKey,
    pub feature: String,
}

impl CacheKey {
    pub fn new(table: TableFingerprint, stratum: StratumKey, feature: impl Into<String>) -> Self {
        Self {
            table,
            stratum,
            feature: feature.into(),
        }
    }
}

#[derive(Debug, Default)]
struct CacheState {
    table: Option<TableFingerprint>,
    entries: FnvHashMap<CacheKey, Arc<RankedColumn>>,
}

/// Hit/miss counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

/// Shared, thread-safe cache of ranked columns
#[derive(Debug, Default)]
pub struct PercentileCache {
    state: RwLock<CacheState>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl PercentileCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &CacheKey) -> Option<Arc<RankedColumn>> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state.entries.get(key).cloned()
    }

    /// Return the cached column or compute and store it
    pub fn get_or_compute<F>(&self, key: CacheKey, compute: F) -> Arc<RankedColumn>
    where
        F: FnOnce() -> RankedColumn,
    {
        if let Some(column) = self.get(&key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            trace!("Cache hit for {} / {}", key.stratum, key.feature);
            return column;
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        let column = Arc::new(compute());

        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if state.table != Some(key.table) {
            if !state.entries.is_empty() {
                debug!(
                    "Table changed ({}), dropping {} cached columns",
                    key.table,
                    state.entries.len()
                );
            }
            state.entries.retain(|k, _| k.table == key.table);
            state.table = Some(key.table);
        }
        state.entries.entry(key).or_insert(column).clone()
    }

    /// Drop every entry
    pub fn clear(&self) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.entries.clear();
        state.table = None;
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: state.entries.len(),
        }
    }
}
