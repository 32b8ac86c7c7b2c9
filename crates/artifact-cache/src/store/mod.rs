//! Persistent tier: backend trait and classified store errors.

mod sqlite;

pub use sqlite::SqliteStore;

use crate::key::{CacheKey, TableName};
use crate::signature::Signature;
use rusqlite::ErrorCode;
use std::path::Path;
use thiserror::Error;

/// Store failure, classified once at the driver boundary.
///
/// Schema repair branches on [`StoreError::MissingSchema`] and the retry
/// loop on [`StoreError::Busy`]; nothing downstream inspects messages.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("missing schema: {0}")]
    MissingSchema(String),

    #[error("store busy: {0}")]
    Busy(String),

    #[error("store error: {0}")]
    Other(String),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

impl StoreError {
    /// Classify a rusqlite error.
    pub fn from_sqlite(err: rusqlite::Error) -> Self {
        let message = err.to_string();
        match &err {
            rusqlite::Error::SqliteFailure(failure, detail) => {
                if matches!(
                    failure.code,
                    ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked
                ) {
                    return StoreError::Busy(message);
                }
                let detail = detail.as_deref().unwrap_or_default();
                if is_missing_table(detail) || is_missing_table(&message) {
                    return StoreError::MissingSchema(message);
                }
                StoreError::Other(message)
            }
            _ if is_missing_table(&message) => StoreError::MissingSchema(message),
            _ => StoreError::Other(message),
        }
    }

    pub fn is_busy(&self) -> bool {
        matches!(self, StoreError::Busy(_))
    }

    pub fn is_missing_schema(&self) -> bool {
        matches!(self, StoreError::MissingSchema(_))
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        StoreError::from_sqlite(err)
    }
}

fn is_missing_table(message: &str) -> bool {
    message.contains("no such table")
}

/// One row to upsert.
#[derive(Debug, Clone, Copy)]
pub struct RowWrite<'a> {
    pub key: &'a CacheKey,
    pub dataset: &'a str,
    pub source_path: &'a str,
    pub entity_id: &'a str,
    pub signature: Signature,
    pub payload: &'a str,
}

/// Backend for the persistent tier.
///
/// All operations are synchronous to match rusqlite's API. Implementations
/// must classify their failures into [`StoreError`].
pub trait ArtifactStore: Send + Sync {
    /// Path of the backing file, used to key schema readiness.
    fn location(&self) -> &Path;

    /// Create the table and its `updated_at` index if they do not exist.
    fn create_schema(&self, table: &TableName) -> StoreResult<()>;

    /// Payload stored under `key`, only if it was written with `signature`.
    fn load(
        &self,
        table: &TableName,
        key: &CacheKey,
        signature: &Signature,
    ) -> StoreResult<Option<String>>;

    /// Insert or overwrite the row for `row.key`, refreshing `updated_at`.
    fn upsert(&self, table: &TableName, row: &RowWrite<'_>) -> StoreResult<()>;

    /// Keep only the `max_rows` most recently updated rows.
    ///
    /// Returns the number of rows deleted.
    fn prune(&self, table: &TableName, max_rows: usize) -> StoreResult<usize>;

    fn row_count(&self, table: &TableName) -> StoreResult<u64>;

    /// Namespace tables present in the store.
    fn list_tables(&self) -> StoreResult<Vec<TableName>>;

    /// Delete every row of one namespace. Operator use only.
    fn purge(&self, table: &TableName) -> StoreResult<usize>;

    /// Drop any cached connection so the next call reopens the file.
    fn reset_connection(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::ffi;

    fn failure(code: i32, detail: Option<&str>) -> rusqlite::Error {
        rusqlite::Error::SqliteFailure(ffi::Error::new(code), detail.map(str::to_string))
    }

    #[test]
    fn test_classify_busy_and_locked() {
        assert!(StoreError::from_sqlite(failure(ffi::SQLITE_BUSY, None)).is_busy());
        assert!(
            StoreError::from_sqlite(failure(ffi::SQLITE_LOCKED, Some("database table is locked")))
                .is_busy()
        );
    }

    #[test]
    fn test_classify_missing_table() {
        let err = StoreError::from_sqlite(failure(
            ffi::SQLITE_ERROR,
            Some("no such table: artifact_cache_ohlcv"),
        ));
        assert!(err.is_missing_schema());
    }

    #[test]
    fn test_classify_other() {
        let err = StoreError::from_sqlite(failure(ffi::SQLITE_CONSTRAINT, Some("UNIQUE failed")));
        assert!(matches!(err, StoreError::Other(_)));
        assert!(matches!(
            StoreError::from_sqlite(rusqlite::Error::QueryReturnedNoRows),
            StoreError::Other(_)
        ));
    }
}
