//! Two-tier artifact cache facade.
//!
//! `load` and `save` never fail from the caller's point of view: an
//! unreadable source, a missing table that cannot be recreated, exhausted
//! lock retries or an undecodable payload all come back as a miss or a
//! dropped write, logged through `tracing`.

use crate::config::CacheConfig;
use crate::error::Result;
use crate::key::{compose_key, namespace_prefix, CacheKey, Namespace, TableName};
use crate::memory::MemoryTier;
use crate::retry::RetryExecutor;
use crate::schema::SchemaManager;
use crate::signature::{signature_of, Signature};
use crate::store::{ArtifactStore, RowWrite, SqliteStore};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// What a `save` call managed to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    /// Source was unreadable; nothing cached.
    Skipped,
    /// Cached in memory only; the persistent write failed.
    MemoryOnly,
    /// Cached in memory and persisted.
    Persisted,
}

/// Snapshot of cache counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub memory_hits: u64,
    pub store_hits: u64,
    pub misses: u64,
    /// Loads and saves skipped because the source could not be stat'ed.
    pub skipped_absent: u64,
    pub store_lookups: u64,
    pub store_writes: u64,
    pub read_failures: u64,
    pub write_failures: u64,
    pub schema_recoveries: u64,
    pub memory_entries: usize,
    pub memory_capacity: usize,
}

#[derive(Debug, Default)]
struct Counters {
    memory_hits: AtomicU64,
    store_hits: AtomicU64,
    misses: AtomicU64,
    skipped_absent: AtomicU64,
    store_lookups: AtomicU64,
    store_writes: AtomicU64,
    read_failures: AtomicU64,
    write_failures: AtomicU64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

/// Signature-keyed cache with an in-process tier over a shared SQLite file.
///
/// Construct once per process (or application context) and share by
/// reference or `Arc`.
///
/// # Example
///
/// ```rust,no_run
/// use artifact_cache::{ArtifactCache, Namespace};
///
/// let cache = ArtifactCache::new("/srv/data/runtime_cache.db");
/// let ns = Namespace::new("price_summary").unwrap();
/// let source = "/srv/data/prices.csv";
///
/// let summary = match cache.load(&ns, source, "005930") {
///     Some(hit) => hit,
///     None => {
///         let fresh = String::from("computed from prices.csv");
///         cache.save(&ns, source, "005930", &fresh);
///         fresh
///     }
/// };
/// # let _ = summary;
/// ```
pub struct ArtifactCache {
    config: CacheConfig,
    memory: MemoryTier,
    store: Arc<dyn ArtifactStore>,
    schema: Arc<SchemaManager>,
    retry: RetryExecutor,
    counters: Counters,
}

impl std::fmt::Debug for ArtifactCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArtifactCache")
            .field("location", &self.store.location())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ArtifactCache {
    /// Cache backed by `db_path` with default configuration.
    ///
    /// Does not touch the disk; the store opens on first use.
    pub fn new(db_path: impl Into<PathBuf>) -> Self {
        let config = CacheConfig::default();
        let store = SqliteStore::new(db_path, config.busy_timeout());
        Self::assemble(config, Arc::new(store), Arc::default(), None)
    }

    pub fn builder(db_path: impl Into<PathBuf>) -> ArtifactCacheBuilder {
        ArtifactCacheBuilder::new(db_path)
    }

    fn assemble(
        config: CacheConfig,
        store: Arc<dyn ArtifactStore>,
        schema: Arc<SchemaManager>,
        retry: Option<RetryExecutor>,
    ) -> Self {
        let retry = retry.unwrap_or_else(|| RetryExecutor::new(config.retry.clone()));
        Self {
            memory: MemoryTier::new(config.memory_capacity),
            config,
            store,
            schema,
            retry,
            counters: Counters::default(),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Path of the backing store file.
    pub fn location(&self) -> &Path {
        self.store.location()
    }

    /// Cached payload for `entity_id` derived from the current `source_path`.
    pub fn load(
        &self,
        namespace: &Namespace,
        source_path: impl AsRef<Path>,
        entity_id: &str,
    ) -> Option<String> {
        let source_path = source_path.as_ref();
        let Some(signature) = signature_of(source_path) else {
            bump(&self.counters.skipped_absent);
            debug!("Source {} unreadable; bypassing cache", source_path.display());
            return None;
        };
        let key = compose_key(namespace, source_path, entity_id);

        if let Some(payload) = self.memory.get(key.as_str(), &signature) {
            bump(&self.counters.memory_hits);
            return Some(payload);
        }

        match self.load_persisted(&namespace.table(), &key, &signature) {
            Some(payload) => {
                bump(&self.counters.store_hits);
                self.memory.put(key.as_str(), signature, payload.clone());
                Some(payload)
            }
            None => {
                bump(&self.counters.misses);
                debug!("Cache miss for {}", key);
                None
            }
        }
    }

    fn load_persisted(
        &self,
        table: &TableName,
        key: &CacheKey,
        signature: &Signature,
    ) -> Option<String> {
        bump(&self.counters.store_lookups);
        let result = self
            .schema
            .run(self.store.as_ref(), &self.retry, table, |store| {
                store.load(table, key, signature)
            });

        result.unwrap_or_else(|e| {
            bump(&self.counters.read_failures);
            warn!("Cache read for {} failed, treating as miss: {}", key, e);
            None
        })
    }

    /// Cache `payload` for `entity_id`, fingerprinted against `source_path`.
    ///
    /// `payload` must already reflect the current contents of `source_path`.
    pub fn save(
        &self,
        namespace: &Namespace,
        source_path: impl AsRef<Path>,
        entity_id: &str,
        payload: &str,
    ) -> SaveOutcome {
        let source_path = source_path.as_ref();
        let Some(signature) = signature_of(source_path) else {
            bump(&self.counters.skipped_absent);
            debug!("Source {} unreadable; not caching", source_path.display());
            return SaveOutcome::Skipped;
        };
        let key = compose_key(namespace, source_path, entity_id);
        self.memory.put(key.as_str(), signature, payload.to_string());

        let table = namespace.table();
        let source = source_path.to_string_lossy();
        let row = RowWrite {
            key: &key,
            dataset: namespace.as_str(),
            source_path: &source,
            entity_id,
            signature,
            payload,
        };

        let written = self
            .schema
            .run(self.store.as_ref(), &self.retry, &table, |store| {
                store.upsert(&table, &row)
            });
        if let Err(e) = written {
            bump(&self.counters.write_failures);
            warn!("Cache write for {} dropped: {}", key, e);
            return SaveOutcome::MemoryOnly;
        }
        bump(&self.counters.store_writes);

        let max_rows = self.config.max_rows;
        let pruned = self
            .schema
            .run(self.store.as_ref(), &self.retry, &table, |store| {
                store.prune(&table, max_rows)
            });
        if let Err(e) = pruned {
            warn!("Pruning {} failed: {}", table, e);
        }

        SaveOutcome::Persisted
    }

    /// Decode a cached JSON payload. Undecodable payloads are misses.
    pub fn load_json<T: DeserializeOwned>(
        &self,
        namespace: &Namespace,
        source_path: impl AsRef<Path>,
        entity_id: &str,
    ) -> Option<T> {
        let raw = self.load(namespace, source_path, entity_id)?;
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                debug!(
                    "Cached payload for {}/{} is not valid JSON for the requested type: {}",
                    namespace, entity_id, e
                );
                None
            }
        }
    }

    /// Cache `value` as JSON.
    pub fn save_json<T: Serialize + ?Sized>(
        &self,
        namespace: &Namespace,
        source_path: impl AsRef<Path>,
        entity_id: &str,
        value: &T,
    ) -> SaveOutcome {
        match serde_json::to_string(value) {
            Ok(payload) => self.save(namespace, source_path, entity_id, &payload),
            Err(e) => {
                warn!("Failed to encode {}/{} for caching: {}", namespace, entity_id, e);
                SaveOutcome::Skipped
            }
        }
    }

    /// Return the cached payload, or compute, cache and return a fresh one.
    ///
    /// `compute` returning `None` means there is nothing to cache.
    pub fn get_or_compute(
        &self,
        namespace: &Namespace,
        source_path: impl AsRef<Path>,
        entity_id: &str,
        compute: impl FnOnce() -> Option<String>,
    ) -> Option<String> {
        let source_path = source_path.as_ref();
        if let Some(hit) = self.load(namespace, source_path, entity_id) {
            return Some(hit);
        }
        let fresh = compute()?;
        self.save(namespace, source_path, entity_id, &fresh);
        Some(fresh)
    }

    /// Empty the memory tier. The shared store is left alone.
    pub fn clear(&self) {
        self.memory.clear();
    }

    pub fn stats(&self) -> CacheStats {
        let c = &self.counters;
        CacheStats {
            memory_hits: c.memory_hits.load(Ordering::Relaxed),
            store_hits: c.store_hits.load(Ordering::Relaxed),
            misses: c.misses.load(Ordering::Relaxed),
            skipped_absent: c.skipped_absent.load(Ordering::Relaxed),
            store_lookups: c.store_lookups.load(Ordering::Relaxed),
            store_writes: c.store_writes.load(Ordering::Relaxed),
            read_failures: c.read_failures.load(Ordering::Relaxed),
            write_failures: c.write_failures.load(Ordering::Relaxed),
            schema_recoveries: self.schema.recoveries(),
            memory_entries: self.memory.len(),
            memory_capacity: self.memory.capacity(),
        }
    }

    // Operator operations. These surface errors instead of degrading.

    /// Row counts per namespace table in the store.
    pub fn namespace_rows(&self) -> Result<Vec<(TableName, u64)>> {
        let tables = self.retry.run(|| self.store.list_tables()).0?;
        tables
            .into_iter()
            .map(|table| -> Result<(TableName, u64)> {
                let count = self.retry.run(|| self.store.row_count(&table)).0?;
                Ok((table, count))
            })
            .collect()
    }

    /// Prune one namespace to `max_rows`, returning rows deleted.
    pub fn prune_namespace(&self, namespace: &Namespace, max_rows: usize) -> Result<usize> {
        let table = namespace.table();
        let deleted = self
            .schema
            .run(self.store.as_ref(), &self.retry, &table, |store| {
                store.prune(&table, max_rows)
            })?;
        Ok(deleted)
    }

    /// Delete every persisted row of one namespace and drop that
    /// namespace's memory entries. Other namespaces keep theirs.
    pub fn purge_namespace(&self, namespace: &Namespace) -> Result<usize> {
        let table = namespace.table();
        let deleted = self
            .schema
            .run(self.store.as_ref(), &self.retry, &table, |store| {
                store.purge(&table)
            })?;
        self.memory.remove_prefixed(&namespace_prefix(namespace));
        Ok(deleted)
    }
}

/// Builder for configuring an [`ArtifactCache`].
///
/// # Example
///
/// ```rust,no_run
/// use artifact_cache::{ArtifactCache, CacheConfig, SchemaManager};
/// use std::sync::Arc;
///
/// let schema = Arc::new(SchemaManager::new());
/// let cache = ArtifactCache::builder("/srv/data/runtime_cache.db")
///     .config(CacheConfig::default().with_max_rows(2_000))
///     .schema_manager(schema.clone())
///     .build()?;
/// # Ok::<(), artifact_cache::CacheError>(())
/// ```
pub struct ArtifactCacheBuilder {
    db_path: PathBuf,
    config: CacheConfig,
    schema: Option<Arc<SchemaManager>>,
    store: Option<Arc<dyn ArtifactStore>>,
    retry_sleeper: Option<Box<dyn Fn(Duration) + Send + Sync>>,
}

impl ArtifactCacheBuilder {
    pub fn new(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
            config: CacheConfig::default(),
            schema: None,
            store: None,
            retry_sleeper: None,
        }
    }

    pub fn config(mut self, config: CacheConfig) -> Self {
        self.config = config;
        self
    }

    /// Share schema readiness with other caches on the same file.
    pub fn schema_manager(mut self, schema: Arc<SchemaManager>) -> Self {
        self.schema = Some(schema);
        self
    }

    /// Use a custom backend instead of SQLite at `db_path`.
    pub fn store(mut self, store: Arc<dyn ArtifactStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Replace the blocking sleep between retries.
    pub fn retry_sleeper(mut self, sleeper: impl Fn(Duration) + Send + Sync + 'static) -> Self {
        self.retry_sleeper = Some(Box::new(sleeper));
        self
    }

    pub fn build(self) -> Result<ArtifactCache> {
        self.config.validate()?;

        let store: Arc<dyn ArtifactStore> = match self.store {
            Some(store) => store,
            None => Arc::new(SqliteStore::new(self.db_path, self.config.busy_timeout())),
        };
        let mut retry = RetryExecutor::new(self.config.retry.clone());
        if let Some(sleeper) = self.retry_sleeper {
            retry = retry.with_sleeper(sleeper);
        }

        Ok(ArtifactCache::assemble(
            self.config,
            store,
            self.schema.unwrap_or_default(),
            Some(retry),
        ))
    }
}
