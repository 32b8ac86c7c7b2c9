//! Lazy schema creation and one-shot self-repair.
//!
//! Readiness is tracked per `(store file, table)`. Share one
//! [`SchemaManager`] (via `Arc`) between caches that point at the same file
//! so DDL runs once per table per process.

use crate::key::TableName;
use crate::retry::RetryExecutor;
use crate::store::{ArtifactStore, StoreError, StoreResult};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

#[derive(Debug, Default)]
pub struct SchemaManager {
    ready: Mutex<HashSet<(PathBuf, TableName)>>,
    /// Memoized canonical forms of store paths.
    normalized: Mutex<HashMap<PathBuf, PathBuf>>,
    recoveries: AtomicU64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl SchemaManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Canonicalize the parent directory and keep the file name, since the
    /// file itself may not exist yet.
    fn normalize(&self, path: &Path) -> PathBuf {
        if let Some(known) = lock(&self.normalized).get(path) {
            return known.clone();
        }

        let canonical = match (path.parent(), path.file_name()) {
            (Some(parent), Some(name)) => {
                let parent = if parent.as_os_str().is_empty() {
                    Path::new(".")
                } else {
                    parent
                };
                parent.canonicalize().ok().map(|dir| dir.join(name))
            }
            _ => None,
        };

        match canonical {
            Some(canonical) => {
                lock(&self.normalized).insert(path.to_path_buf(), canonical.clone());
                canonical
            }
            None => path.to_path_buf(),
        }
    }

    pub fn is_ready(&self, path: &Path, table: &TableName) -> bool {
        let key = (self.normalize(path), table.clone());
        lock(&self.ready).contains(&key)
    }

    /// Forget that `table` in `path` is ready.
    pub fn invalidate(&self, path: &Path, table: &TableName) {
        let key = (self.normalize(path), table.clone());
        lock(&self.ready).remove(&key);
    }

    /// Number of missing-schema recoveries performed.
    pub fn recoveries(&self) -> u64 {
        self.recoveries.load(Ordering::Relaxed)
    }

    /// Create `table` in `store` unless already marked ready.
    pub fn ensure_ready(
        &self,
        store: &dyn ArtifactStore,
        retry: &RetryExecutor,
        table: &TableName,
    ) -> StoreResult<()> {
        let key = (self.normalize(store.location()), table.clone());
        if lock(&self.ready).contains(&key) {
            return Ok(());
        }

        // Lock not held across DDL; a concurrent duplicate is a no-op.
        let (result, _) = retry.run(|| store.create_schema(table));
        result?;
        lock(&self.ready).insert(key);
        debug!("Schema ready for {} in {}", table, store.location().display());
        Ok(())
    }

    fn attempt<T>(
        &self,
        store: &dyn ArtifactStore,
        retry: &RetryExecutor,
        table: &TableName,
        op: &mut impl FnMut(&dyn ArtifactStore) -> StoreResult<T>,
    ) -> StoreResult<T> {
        self.ensure_ready(store, retry, table)?;
        retry.run(|| op(store)).0
    }

    /// Run `op` against `table`, creating the schema first if needed.
    ///
    /// Lock contention is retried by `retry`. A missing table triggers one
    /// recovery: readiness is dropped, the connection reopened, the schema
    /// recreated and the whole retried operation run again. A second
    /// failure is returned as is.
    pub fn run<T>(
        &self,
        store: &dyn ArtifactStore,
        retry: &RetryExecutor,
        table: &TableName,
        mut op: impl FnMut(&dyn ArtifactStore) -> StoreResult<T>,
    ) -> StoreResult<T> {
        match self.attempt(store, retry, table, &mut op) {
            Err(StoreError::MissingSchema(message)) => {
                warn!(
                    "Cache table {} missing in {} ({}); recreating schema",
                    table,
                    store.location().display(),
                    message
                );
                self.recoveries.fetch_add(1, Ordering::Relaxed);
                self.invalidate(store.location(), table);
                store.reset_connection();
                self.attempt(store, retry, table, &mut op)
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::{compose_key, Namespace};
    use crate::retry::RetryPolicy;
    use crate::signature::Signature;
    use crate::store::SqliteStore;
    use rusqlite::Connection;
    use std::time::Duration;
    use tempfile::TempDir;

    fn setup() -> (TempDir, SqliteStore, RetryExecutor, TableName) {
        let temp = TempDir::new().unwrap();
        let store = SqliteStore::new(temp.path().join("cache.db"), Duration::from_millis(200));
        let retry = RetryExecutor::new(RetryPolicy::default()).with_sleeper(|_| {});
        let table = Namespace::new("schema_test").unwrap().table();
        (temp, store, retry, table)
    }

    #[test]
    fn test_ensure_ready_marks_table() {
        let (_temp, store, retry, table) = setup();
        let manager = SchemaManager::new();

        assert!(!manager.is_ready(store.location(), &table));
        manager.ensure_ready(&store, &retry, &table).unwrap();
        assert!(manager.is_ready(store.location(), &table));

        manager.invalidate(store.location(), &table);
        assert!(!manager.is_ready(store.location(), &table));
    }

    #[test]
    fn test_equivalent_paths_share_readiness() {
        let (temp, store, retry, table) = setup();
        let manager = SchemaManager::new();
        manager.ensure_ready(&store, &retry, &table).unwrap();

        let dotted = temp.path().join(".").join("cache.db");
        assert!(manager.is_ready(&dotted, &table));
    }

    #[test]
    fn test_run_recovers_dropped_table_once() {
        let (_temp, store, retry, table) = setup();
        let manager = SchemaManager::new();
        manager.ensure_ready(&store, &retry, &table).unwrap();

        let other = Connection::open(store.location()).unwrap();
        other
            .execute_batch(&format!(r#"DROP TABLE "{table}""#))
            .unwrap();

        let key = compose_key(&Namespace::new("schema_test").unwrap(), Path::new("/s"), "A");
        let result = manager.run(&store, &retry, &table, |s| {
            s.load(&table, &key, &Signature::new(1, 1))
        });

        assert_eq!(result.unwrap(), None);
        assert_eq!(manager.recoveries(), 1);
        assert!(manager.is_ready(store.location(), &table));
    }

    #[test]
    fn test_second_missing_schema_is_returned() {
        let (_temp, store, retry, table) = setup();
        let manager = SchemaManager::new();
        let mut calls = 0;

        let result: StoreResult<()> = manager.run(&store, &retry, &table, |_| {
            calls += 1;
            Err(StoreError::MissingSchema("no such table".into()))
        });

        assert!(matches!(result, Err(StoreError::MissingSchema(_))));
        assert_eq!(calls, 2);
        assert_eq!(manager.recoveries(), 1);
    }

    #[test]
    fn test_other_errors_do_not_trigger_recovery() {
        let (_temp, store, retry, table) = setup();
        let manager = SchemaManager::new();
        let mut calls = 0;

        let result: StoreResult<()> = manager.run(&store, &retry, &table, |_| {
            calls += 1;
            Err(StoreError::Other("disk I/O error".into()))
        });

        assert!(matches!(result, Err(StoreError::Other(_))));
        assert_eq!(calls, 1);
        assert_eq!(manager.recoveries(), 0);
    }
}
