//! Memoized per-file line arrays, invalidated by (mtime_ns, size).
//!
//! Preview resolves anchors repeatedly against the same snapshot; this
//! cache avoids re-reading the file on every header. Staleness is checked
//! on every lookup, so an external edit is picked up on the next call.
//! Concurrent external writers are not defended against (single-operator
//! assumption).

use std::sync::Arc;
use std::time::UNIX_EPOCH;

use camino::{Utf8Path, Utf8PathBuf};
use moka::sync::Cache;

use crate::infra::io;

#[derive(Clone)]
struct CachedFile {
    mtime_ns: u128,
    size: u64,
    lines: Arc<Vec<String>>,
}

pub struct LineCache {
    cache: Cache<Utf8PathBuf, CachedFile>,
}

impl Default for LineCache {
    fn default() -> Self {
        Self::new()
    }
}

impl LineCache {
    pub fn new() -> Self {
        Self {
            cache: Cache::new(256),
        }
    }

    /// LF-normalized lines of `rel` under `root`, or `None` when the file
    /// is unreadable. Stale entries are transparently re-read.
    pub fn lines(&self, root: &Utf8Path, rel: &Utf8Path) -> Option<Arc<Vec<String>>> {
        let abs = root.join(rel);
        let meta = std::fs::metadata(abs.as_std_path()).ok()?;
        if !meta.is_file() {
            return None;
        }
        let mtime_ns = meta
            .modified()
            .ok()?
            .duration_since(UNIX_EPOCH)
            .ok()?
            .as_nanos();
        let size = meta.len();

        if let Some(hit) = self.cache.get(rel) {
            if hit.mtime_ns == mtime_ns && hit.size == size {
                return Some(hit.lines);
            }
        }

        let content = io::read_file_smart(abs.as_std_path()).ok()?;
        let text = content.as_str().ok()?;
        let lines = Arc::new(io::split_normalized(text));
        self.cache.insert(
            rel.to_path_buf(),
            CachedFile {
                mtime_ns,
                size,
                lines: Arc::clone(&lines),
            },
        );
        Some(lines)
    }

    /// Drop a single entry, e.g. after this process rewrote the file.
    pub fn invalidate(&self, rel: &Utf8Path) {
        self.cache.invalidate(rel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn caches_until_file_changes() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(dir.path()).unwrap();
        fs::write(root.join("a.txt"), "one\ntwo\n").unwrap();

        let cache = LineCache::new();
        let first = cache.lines(root, Utf8Path::new("a.txt")).unwrap();
        assert_eq!(first.as_slice(), ["one", "two"]);

        // Same metadata → same Arc.
        let again = cache.lines(root, Utf8Path::new("a.txt")).unwrap();
        assert!(Arc::ptr_eq(&first, &again));

        // Size change invalidates.
        fs::write(root.join("a.txt"), "one\ntwo\nthree\n").unwrap();
        let third = cache.lines(root, Utf8Path::new("a.txt")).unwrap();
        assert_eq!(third.as_slice(), ["one", "two", "three"]);
    }

    #[test]
    fn missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(dir.path()).unwrap();
        let cache = LineCache::new();
        assert!(cache.lines(root, Utf8Path::new("nope.txt")).is_none());
    }
}
