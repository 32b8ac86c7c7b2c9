//! Source-file freshness signatures.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

/// `(mtime, size)` fingerprint of a source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Signature {
    /// Modification time in nanoseconds since the Unix epoch.
    pub mtime_ns: i64,
    /// File size in bytes.
    pub size: u64,
}

impl Signature {
    pub fn new(mtime_ns: i64, size: u64) -> Self {
        Self { mtime_ns, size }
    }
}

/// Fingerprint `path`, or `None` if it cannot be stat'ed.
///
/// `None` means "do not use the cache for this call".
pub fn signature_of(path: impl AsRef<Path>) -> Option<Signature> {
    let metadata = std::fs::metadata(path.as_ref()).ok()?;
    let modified = metadata.modified().ok()?;
    Some(Signature {
        mtime_ns: nanos_since_epoch(modified),
        size: metadata.len(),
    })
}

fn nanos_since_epoch(time: SystemTime) -> i64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(after) => i64::try_from(after.as_nanos()).unwrap_or(i64::MAX),
        Err(before) => i64::try_from(before.duration().as_nanos())
            .map(|n| -n)
            .unwrap_or(i64::MIN),
    }
}
