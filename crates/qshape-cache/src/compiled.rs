//! Compiled query artifacts and the plan cache holding them
//!
//! This is NOT a result cache: artifacts are executors that still run on
//! every call. Keys are derived from the query shape, so calls differing
//! only in parameter values share one artifact.

use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use qshape_expr::{DataType, Expr};

use crate::store::{ExecutionMode, QueryExecutor};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    model_identity: String,
    mode: ExecutionMode,
    shape: String,
}

impl CacheKey {
    pub fn new(model_identity: impl Into<String>, mode: ExecutionMode, shape: &Expr) -> Self {
        Self {
            model_identity: model_identity.into(),
            mode,
            shape: shape.to_string(),
        }
    }

    pub fn shape_text(&self) -> &str {
        &self.shape
    }

    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    /// SHA-256 over the key's parts, for logs
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.model_identity.as_bytes());
        hasher.update([0u8]);
        hasher.update(format!("{:?}", self.mode).as_bytes());
        hasher.update([0u8]);
        hasher.update(self.shape.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

/// Immutable artifact shared by every call hitting the same key
#[derive(Debug)]
pub struct CompiledQuery {
    result_element_type: DataType,
    executor: QueryExecutor,
}

impl CompiledQuery {
    pub fn new(result_element_type: DataType, executor: QueryExecutor) -> Self {
        Self {
            result_element_type,
            executor,
        }
    }

    pub fn result_element_type(&self) -> &DataType {
        &self.result_element_type
    }

    pub fn executor(&self) -> &QueryExecutor {
        &self.executor
    }
}

/// Statistics about cache performance
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CacheStats {
    pub hits: usize,
    pub misses: usize,
    pub evictions: usize,
    pub size: usize,
    pub hit_rate: f64,
}

impl CacheStats {
    fn new(hits: usize, misses: usize, evictions: usize, size: usize) -> Self {
        let total = hits + misses;
        let hit_rate = if total > 0 { hits as f64 / total as f64 } else { 0.0 };
        Self {
            hits,
            misses,
            evictions,
            size,
            hit_rate,
        }
    }
}

/// Storage policy for compiled artifacts
pub trait PlanCache: Send + Sync {
    fn get(&self, key: &CacheKey) -> Option<Arc<CompiledQuery>>;

    /// Insert unless the key is already present; returns whichever artifact is stored
    fn get_or_insert(&self, key: CacheKey, compiled: Arc<CompiledQuery>) -> Arc<CompiledQuery>;

    fn stats(&self) -> CacheStats;

    fn clear(&self);
}

/// Thread-safe in-memory plan cache with bounded size
pub struct MemoryPlanCache {
    entries: RwLock<HashMap<CacheKey, Arc<CompiledQuery>>>,
    max_entries: usize,
    hits: AtomicUsize,
    misses: AtomicUsize,
    evictions: AtomicUsize,
}

impl MemoryPlanCache {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            max_entries,
            hits: AtomicUsize::new(0),
            misses: AtomicUsize::new(0),
            evictions: AtomicUsize::new(0),
        }
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(key)
    }
}

impl PlanCache for MemoryPlanCache {
    fn get(&self, key: &CacheKey) -> Option<Arc<CompiledQuery>> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        match entries.get(key) {
            Some(compiled) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(compiled.clone())
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    fn get_or_insert(&self, key: CacheKey, compiled: Arc<CompiledQuery>) -> Arc<CompiledQuery> {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);

        if let Some(existing) = entries.get(&key) {
            return existing.clone();
        }

        if self.max_entries > 0 && entries.len() >= self.max_entries {
            // Simple eviction: drop an arbitrary entry
            if let Some(victim) = entries.keys().next().cloned() {
                entries.remove(&victim);
                self.evictions.fetch_add(1, Ordering::Relaxed);
            }
        }

        entries.insert(key, compiled.clone());
        compiled
    }

    fn stats(&self) -> CacheStats {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        CacheStats::new(
            self.hits.load(Ordering::Relaxed),
            self.misses.load(Ordering::Relaxed),
            self.evictions.load(Ordering::Relaxed),
            entries.len(),
        )
    }

    fn clear(&self) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

/// Stores nothing; every call compiles
#[derive(Default)]
pub struct NoPlanCache {
    misses: AtomicUsize,
}

impl PlanCache for NoPlanCache {
    fn get(&self, _key: &CacheKey) -> Option<Arc<CompiledQuery>> {
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    fn get_or_insert(&self, _key: CacheKey, compiled: Arc<CompiledQuery>) -> Arc<CompiledQuery> {
        compiled
    }

    fn stats(&self) -> CacheStats {
        CacheStats::new(0, self.misses.load(Ordering::Relaxed), 0, 0)
    }

    fn clear(&self) {}
}
