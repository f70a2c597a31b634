//! On-disk dependency cache.
//!
//! A flat directory of immutable artifacts, one file per key. Keys are produced
//! by the resolvers (the encoded URL for downloads, `<package>.js` for host
//! proxies) and must be plain file names. Entries are never expired here.

use hostjs_common::CacheError;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tempfile::NamedTempFile;

/// One cached artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub key: String,
    pub path: PathBuf,
    pub created_at: SystemTime,
}

/// Cache rooted at one directory. Cheap to clone; clones share the directory.
#[derive(Debug, Clone)]
pub struct DependencyCache {
    root: PathBuf,
}

impl DependencyCache {
    /// Opens the cache, creating its root directory if needed.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, CacheError> {
        let root = root.into();
        std::fs::create_dir_all(&root).map_err(|source| CacheError::CreateDir {
            path: root.clone(),
            source,
        })?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Where the artifact for `key` lives, whether or not it exists yet.
    pub fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }

    pub fn get(&self, key: &str) -> Option<PathBuf> {
        if !is_valid_key(key) {
            return None;
        }
        let path = self.path_for(key);
        path.is_file().then_some(path)
    }

    pub fn entry(&self, key: &str) -> Option<CacheEntry> {
        let path = self.get(key)?;
        let metadata = std::fs::metadata(&path).ok()?;
        let created_at = metadata.created().or_else(|_| metadata.modified()).ok()?;
        Some(CacheEntry {
            key: key.to_string(),
            path,
            created_at,
        })
    }

    /// Stores `bytes` under `key` and returns the artifact path.
    ///
    /// The content is written to a temporary file in the cache root and renamed
    /// into place, so readers never observe a partial artifact. Concurrent puts
    /// of the same key are fine: the last rename wins.
    pub fn put(&self, key: &str, bytes: &[u8]) -> Result<PathBuf, CacheError> {
        let write_error = |source| CacheError::Write {
            key: key.to_string(),
            source,
        };
        if !is_valid_key(key) {
            return Err(write_error(io::Error::new(
                io::ErrorKind::InvalidInput,
                "cache keys must be plain file names",
            )));
        }

        let path = self.path_for(key);
        let mut staged = NamedTempFile::new_in(&self.root).map_err(write_error)?;
        staged.write_all(bytes).map_err(write_error)?;
        staged.flush().map_err(write_error)?;
        staged
            .persist(&path)
            .map_err(|e| write_error(e.error))?;

        tracing::info!(key, path = %path.display(), size = bytes.len(), "Cached dependency");
        Ok(path)
    }
}

fn is_valid_key(key: &str) -> bool {
    !key.is_empty()
        && key != "."
        && key != ".."
        && !key.contains(['/', '\\'])
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_open_creates_root_eagerly() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("caches").join("dependencies-cache");
        let cache = DependencyCache::open(&root).unwrap();
        assert!(root.is_dir());
        assert_eq!(cache.root(), root.as_path());
    }

    #[test]
    fn test_get_misses_until_put() {
        let dir = TempDir::new().unwrap();
        let cache = DependencyCache::open(dir.path()).unwrap();
        assert_eq!(cache.get("abc"), None);

        let path = cache.put("abc", b"module.exports = 1;").unwrap();
        assert_eq!(cache.get("abc"), Some(path.clone()));
        assert_eq!(std::fs::read_to_string(path).unwrap(), "module.exports = 1;");
    }

    #[test]
    fn test_put_is_an_idempotent_overwrite() {
        let dir = TempDir::new().unwrap();
        let cache = DependencyCache::open(dir.path()).unwrap();
        let first = cache.put("lib", b"one").unwrap();
        let second = cache.put("lib", b"two").unwrap();
        assert_eq!(first, second);
        assert_eq!(std::fs::read_to_string(second).unwrap(), "two");
        // no staging files left behind
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_concurrent_puts_of_same_key() {
        let dir = TempDir::new().unwrap();
        let cache = DependencyCache::open(dir.path()).unwrap();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = cache.clone();
                std::thread::spawn(move || cache.put("shared", b"same content").unwrap())
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        let path = cache.get("shared").unwrap();
        assert_eq!(std::fs::read(path).unwrap(), b"same content");
    }

    #[test]
    fn test_rejects_path_like_keys() {
        let dir = TempDir::new().unwrap();
        let cache = DependencyCache::open(dir.path()).unwrap();
        assert!(cache.put("../escape", b"x").is_err());
        assert!(cache.put("", b"x").is_err());
        assert_eq!(cache.get("../escape"), None);
    }

    #[test]
    fn test_entry_reports_key_and_path() {
        let dir = TempDir::new().unwrap();
        let cache = DependencyCache::open(dir.path()).unwrap();
        let path = cache.put("java.util.List.js", b"module.exports = {};").unwrap();
        let entry = cache.entry("java.util.List.js").unwrap();
        assert_eq!(entry.key, "java.util.List.js");
        assert_eq!(entry.path, path);
        assert!(entry.created_at <= SystemTime::now());
    }
}
