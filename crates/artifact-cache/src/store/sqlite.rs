//! SQLite-backed persistent tier.

use super::{ArtifactStore, RowWrite, StoreError, StoreResult};
use crate::key::{CacheKey, TableName, TABLE_PREFIX};
use crate::signature::Signature;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::ValueRef;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::debug;

/// SQLite-backed store, one table per namespace in a shared file.
///
/// The connection is opened on first use, so constructing a store never
/// touches the disk. Thread-safe via internal mutex on the connection;
/// cross-process safety comes from WAL mode plus the busy timeout.
pub struct SqliteStore {
    /// Database file path.
    path: PathBuf,
    /// Busy timeout applied to every connection.
    busy_timeout: Duration,
    /// Lazily opened connection (wrapped for thread safety).
    conn: Arc<Mutex<Option<Connection>>>,
    /// Last `updated_at` issued, so stamps from this store strictly increase.
    last_stamp: Mutex<Option<DateTime<Utc>>>,
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore")
            .field("path", &self.path)
            .field("busy_timeout", &self.busy_timeout)
            .finish_non_exhaustive()
    }
}

impl SqliteStore {
    pub fn new(path: impl Into<PathBuf>, busy_timeout: Duration) -> Self {
        Self {
            path: path.into(),
            busy_timeout,
            conn: Arc::new(Mutex::new(None)),
            last_stamp: Mutex::new(None),
        }
    }

    fn open(&self) -> StoreResult<Connection> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    StoreError::Other(format!(
                        "Failed to create cache directory {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }

        let conn = Connection::open(&self.path)?;
        Self::configure_connection(&conn, self.busy_timeout)?;
        debug!("Opened artifact cache store at {}", self.path.display());
        Ok(conn)
    }

    fn configure_connection(conn: &Connection, busy_timeout: Duration) -> rusqlite::Result<()> {
        // busy_timeout first so the journal-mode switch itself waits on locks.
        conn.execute_batch(&format!(
            "PRAGMA busy_timeout={};\n\
             PRAGMA journal_mode=WAL;\n\
             PRAGMA synchronous=NORMAL;\n\
             PRAGMA temp_store=MEMORY;",
            busy_timeout.as_millis(),
        ))
    }

    fn lock_conn(&self) -> StoreResult<MutexGuard<'_, Option<Connection>>> {
        self.conn.lock().map_err(|_| {
            StoreError::Other("Failed to acquire cache connection lock".to_string())
        })
    }

    fn with_conn<T>(
        &self,
        f: impl FnOnce(&Connection) -> rusqlite::Result<T>,
    ) -> StoreResult<T> {
        let mut guard = self.lock_conn()?;
        if guard.is_none() {
            *guard = Some(self.open()?);
        }
        match guard.as_ref() {
            Some(conn) => f(conn).map_err(StoreError::from_sqlite),
            None => Err(StoreError::Other("Cache connection unavailable".to_string())),
        }
    }

    fn next_stamp(&self) -> String {
        let now = Utc::now();
        let stamp = match self.last_stamp.lock() {
            Ok(mut last) => {
                let stamp = match *last {
                    Some(prev) if now <= prev => prev + chrono::Duration::nanoseconds(1),
                    _ => now,
                };
                *last = Some(stamp);
                stamp
            }
            Err(_) => now,
        };
        stamp.to_rfc3339_opts(SecondsFormat::Nanos, true)
    }
}

fn to_sql_size(size: u64) -> i64 {
    i64::try_from(size).unwrap_or(i64::MAX)
}

impl ArtifactStore for SqliteStore {
    fn location(&self) -> &Path {
        &self.path
    }

    fn create_schema(&self, table: &TableName) -> StoreResult<()> {
        let ddl = format!(
            r#"
            CREATE TABLE IF NOT EXISTS "{table}" (
                cache_key TEXT PRIMARY KEY,
                dataset TEXT NOT NULL,
                source_path TEXT NOT NULL,
                entity_id TEXT NOT NULL,
                sig_mtime_ns INTEGER NOT NULL,
                sig_size INTEGER NOT NULL,
                payload TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            -- Index for capacity-bounded pruning
            CREATE INDEX IF NOT EXISTS "{index}"
                ON "{table}"(updated_at);
            "#,
            table = table,
            index = table.updated_index(),
        );

        self.with_conn(|conn| conn.execute_batch(&ddl))?;
        debug!("Ensured cache table {} in {}", table, self.path.display());
        Ok(())
    }

    fn load(
        &self,
        table: &TableName,
        key: &CacheKey,
        signature: &Signature,
    ) -> StoreResult<Option<String>> {
        let sql = format!(
            r#"
            SELECT payload FROM "{table}"
            WHERE cache_key = ?1 AND sig_mtime_ns = ?2 AND sig_size = ?3
            LIMIT 1
            "#
        );

        let row: Option<Option<String>> = self.with_conn(|conn| {
            conn.query_row(
                &sql,
                params![key.as_str(), signature.mtime_ns, to_sql_size(signature.size)],
                |row| {
                    Ok(match row.get_ref(0)? {
                        ValueRef::Text(bytes) => String::from_utf8(bytes.to_vec()).ok(),
                        _ => None,
                    })
                },
            )
            .optional()
        })?;

        match row {
            Some(Some(payload)) => Ok(Some(payload)),
            Some(None) => {
                debug!("Undecodable payload for {} in {}; treating as miss", key, table);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    fn upsert(&self, table: &TableName, row: &RowWrite<'_>) -> StoreResult<()> {
        let sql = format!(
            r#"
            INSERT INTO "{table}"
                (cache_key, dataset, source_path, entity_id, sig_mtime_ns, sig_size, payload, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ON CONFLICT(cache_key) DO UPDATE SET
                dataset = excluded.dataset,
                source_path = excluded.source_path,
                entity_id = excluded.entity_id,
                sig_mtime_ns = excluded.sig_mtime_ns,
                sig_size = excluded.sig_size,
                payload = excluded.payload,
                updated_at = excluded.updated_at
            "#
        );
        let updated_at = self.next_stamp();

        self.with_conn(|conn| {
            conn.execute(
                &sql,
                params![
                    row.key.as_str(),
                    row.dataset,
                    row.source_path,
                    row.entity_id,
                    row.signature.mtime_ns,
                    to_sql_size(row.signature.size),
                    row.payload,
                    updated_at,
                ],
            )
        })?;
        Ok(())
    }

    fn prune(&self, table: &TableName, max_rows: usize) -> StoreResult<usize> {
        let keep = i64::try_from(max_rows).unwrap_or(i64::MAX);
        let count_sql = format!(r#"SELECT COUNT(*) FROM "{table}""#);
        let delete_sql = format!(
            r#"
            DELETE FROM "{table}"
            WHERE cache_key NOT IN (
                SELECT cache_key FROM "{table}"
                ORDER BY updated_at DESC
                LIMIT ?1
            )
            "#
        );

        let deleted = self.with_conn(|conn| {
            let count: i64 = conn.query_row(&count_sql, [], |row| row.get(0))?;
            if count <= keep {
                return Ok(0);
            }
            conn.execute(&delete_sql, params![keep])
        })?;

        if deleted > 0 {
            debug!("Pruned {} rows from {} (keeping {})", deleted, table, max_rows);
        }
        Ok(deleted)
    }

    fn row_count(&self, table: &TableName) -> StoreResult<u64> {
        let sql = format!(r#"SELECT COUNT(*) FROM "{table}""#);
        let count: i64 = self.with_conn(|conn| conn.query_row(&sql, [], |row| row.get(0)))?;
        Ok(count.max(0) as u64)
    }

    fn list_tables(&self) -> StoreResult<Vec<TableName>> {
        let pattern = format!("{}%", TABLE_PREFIX.replace('_', "\\_"));
        let names: Vec<String> = self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                r#"
                SELECT name FROM sqlite_master
                WHERE type = 'table' AND name LIKE ?1 ESCAPE '\'
                ORDER BY name
                "#,
            )?;
            let rows = stmt.query_map(params![pattern], |row| row.get::<_, String>(0))?;
            rows.collect()
        })?;

        Ok(names
            .iter()
            .filter_map(|name| TableName::from_existing(name))
            .collect())
    }

    fn purge(&self, table: &TableName) -> StoreResult<usize> {
        let sql = format!(r#"DELETE FROM "{table}""#);
        let deleted = self.with_conn(|conn| conn.execute(&sql, []))?;
        debug!("Purged {} rows from {}", deleted, table);
        Ok(deleted)
    }

    fn reset_connection(&self) {
        if let Ok(mut guard) = self.conn.lock() {
            if guard.take().is_some() {
                debug!("Dropped cache connection to {}", self.path.display());
            }
        }
    }
}
