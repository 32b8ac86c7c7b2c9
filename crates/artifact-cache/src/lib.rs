//! Artifact Cache - signature-keyed, two-tier cache for derived artifacts.
//!
//! Expensive values derived from source files (formatted summaries, parsed
//! name maps) are cached in an in-process tier and in a SQLite file shared
//! between processes. Freshness is gated by the source file's
//! `(mtime, size)` signature: when the source changes, old entries simply
//! stop matching.
//!
//! Cache failures never reach the caller. Every failure mode degrades to
//! "recompute as if nothing was cached".
//!
//! # Example
//!
//! ```rust,no_run
//! use artifact_cache::{runtime_cache_path, ArtifactCache, Namespace};
//!
//! let cache = ArtifactCache::new(runtime_cache_path("/srv/data"));
//! let names = Namespace::new("name_map").unwrap();
//!
//! let value = cache.get_or_compute(&names, "/srv/data/tickers.json", "all", || {
//!     Some(String::from("{\"005930\":\"Samsung Electronics\"}"))
//! });
//! assert!(value.is_some());
//! ```

pub mod config;
pub mod error;
pub mod key;
pub mod memory;
pub mod retry;
pub mod schema;
pub mod signature;
pub mod store;

mod cache;

pub use cache::{ArtifactCache, ArtifactCacheBuilder, CacheStats, SaveOutcome};
pub use config::{runtime_cache_path, CacheConfig, CacheDefaults};
pub use error::{CacheError, Result};
pub use key::{compose_key, namespace_prefix, CacheKey, Namespace, TableName};
pub use memory::MemoryTier;
pub use retry::{RetryExecutor, RetryPolicy, RetryStats};
pub use schema::SchemaManager;
pub use signature::{signature_of, Signature};
pub use store::{ArtifactStore, RowWrite, SqliteStore, StoreError, StoreResult};
