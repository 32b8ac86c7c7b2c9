//! Namespaces, table names and cache keys.

use crate::error::{CacheError, Result};
use std::fmt;
use std::path::Path;

/// Prefix shared by every namespace table in the store file.
pub const TABLE_PREFIX: &str = "artifact_cache_";

const MAX_NAMESPACE_LEN: usize = 48;

/// A validated dataset tag.
///
/// Each namespace gets its own table, so the tag is restricted to
/// characters that are safe inside an SQL identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Namespace(String);

impl Namespace {
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let invalid = |reason: &str| CacheError::InvalidNamespace {
            name: name.clone(),
            reason: reason.to_string(),
        };

        if name.is_empty() {
            return Err(invalid("must not be empty"));
        }
        if name.len() > MAX_NAMESPACE_LEN {
            return Err(invalid("longer than 48 characters"));
        }
        if let Some(c) = name
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || *c == '_'))
        {
            return Err(invalid(&format!("contains {c:?}")));
        }

        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn table(&self) -> TableName {
        TableName(format!("{TABLE_PREFIX}{}", self.0))
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Name of the backing table for one namespace.
///
/// Only constructed from a validated [`Namespace`] or from a name already
/// present in the store, so it can be interpolated into DDL.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TableName(String);

impl TableName {
    /// Recognize a table created by this crate. Returns `None` for anything else.
    pub fn from_existing(name: &str) -> Option<Self> {
        let namespace = name.strip_prefix(TABLE_PREFIX)?;
        Namespace::new(namespace).ok().map(|ns| ns.table())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The namespace this table belongs to.
    pub fn namespace(&self) -> &str {
        &self.0[TABLE_PREFIX.len()..]
    }

    pub fn updated_index(&self) -> String {
        format!("idx_{}_updated_at", self.0)
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque, case-sensitive cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Build the key for `entity_id` derived from `source_path` in `namespace`.
///
/// Layout is `<namespace>::<path>::<entity>`, where `<path>` is
/// `p<len>:<utf8>` or, for paths that are not valid UTF-8, `x<len>:<hex>`
/// over the raw OS bytes. The namespace cannot contain `:` and the path
/// carries its own length, so the entity id may contain anything.
pub fn compose_key(namespace: &Namespace, source_path: &Path, entity_id: &str) -> CacheKey {
    CacheKey(format!(
        "{}::{}::{}",
        namespace,
        encode_path(source_path),
        entity_id
    ))
}

/// Key prefix shared by every key of `namespace`.
pub fn namespace_prefix(namespace: &Namespace) -> String {
    format!("{namespace}::")
}

fn encode_path(path: &Path) -> String {
    let bytes = path.as_os_str().as_encoded_bytes();
    match std::str::from_utf8(bytes) {
        Ok(text) => format!("p{}:{}", text.len(), text),
        Err(_) => {
            let hex: String = bytes.iter().map(|b| format!("{b:02x}")).collect();
            format!("x{}:{}", bytes.len(), hex)
        }
    }
}
