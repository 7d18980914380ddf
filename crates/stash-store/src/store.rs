use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::io::{self, Cursor, Read, Write};
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::fs::{Filesystem, OsFilesystem};
use crate::path::{PathKey, PathTransform, TransformKind};

/// Root directory used when none is configured.
pub const DEFAULT_ROOT: &str = "/data/stash";

const LOCK_STRIPES: usize = 64;

/// Configuration for a [`Store`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub root: PathBuf,
    pub transform: TransformKind,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from(DEFAULT_ROOT),
            transform: TransformKind::default(),
        }
    }
}

/// Content store rooted at a directory.
///
/// Every operation recomputes the [`PathKey`] for its key and streams the
/// object through the configured [`Filesystem`]; nothing is cached between
/// calls. Operations on keys that share a first-level bucket are serialized,
/// so a write never races another write or a bucket delete on the same path.
pub struct Store {
    root: PathBuf,
    transform: Box<dyn PathTransform>,
    fs: Arc<dyn Filesystem>,
    locks: Vec<Mutex<()>>,
}

impl Store {
    /// Create a store on the local disk.
    pub fn new(config: StoreConfig) -> Self {
        Self::with_filesystem(config.root, config.transform.build(), Arc::new(OsFilesystem))
    }

    /// Create a store over an arbitrary filesystem. An empty root falls back
    /// to [`DEFAULT_ROOT`].
    pub fn with_filesystem(
        root: impl Into<PathBuf>,
        transform: Box<dyn PathTransform>,
        fs: Arc<dyn Filesystem>,
    ) -> Self {
        let mut root = root.into();
        if root.as_os_str().is_empty() {
            root = PathBuf::from(DEFAULT_ROOT);
        }
        Self {
            root,
            transform,
            fs,
            locks: (0..LOCK_STRIPES).map(|_| Mutex::new(())).collect(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn transform(&self) -> &dyn PathTransform {
        self.transform.as_ref()
    }

    /// Absolute location of the object stored under `key`.
    pub fn resolve(&self, key: &str) -> StoreResult<PathBuf> {
        let path_key = self.path_key(key)?;
        Ok(self.root.join(path_key.full_path()))
    }

    /// Check whether an object exists under `key`.
    ///
    /// Only a missing file yields `Ok(false)`; any other stat failure is
    /// returned as an error.
    pub fn has(&self, key: &str) -> StoreResult<bool> {
        let path_key = self.path_key(key)?;
        let _guard = self.lock(&path_key);
        match self.fs.stat(&self.root.join(path_key.full_path())) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Drain `source` and store it under `key`, replacing any existing
    /// object. Returns the number of bytes written.
    pub fn write(&self, key: &str, source: &mut dyn Read) -> StoreResult<u64> {
        let path_key = self.path_key(key)?;
        let full = self.root.join(path_key.full_path());

        let mut buf = Vec::new();
        source.read_to_end(&mut buf)?;

        let _guard = self.lock(&path_key);
        if let Some(parent) = full.parent() {
            self.fs.create_dir_all(parent)?;
        }
        let mut file = self.fs.create(&full)?;
        file.write_all(&buf)?;
        file.flush()?;

        let n = buf.len() as u64;
        debug!(bytes = n, path = %path_key, "object written");
        Ok(n)
    }

    /// Store an in-memory payload under `key`.
    pub fn write_bytes(&self, key: &str, data: &[u8]) -> StoreResult<u64> {
        self.write(key, &mut Cursor::new(data))
    }

    /// Read the whole object stored under `key` into memory.
    pub fn read(&self, key: &str) -> StoreResult<Cursor<Vec<u8>>> {
        let path_key = self.path_key(key)?;
        let _guard = self.lock(&path_key);
        let mut file = match self.fs.open(&self.root.join(path_key.full_path())) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(key.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        let mut buf = Vec::new();
        file.read_to_end(&mut buf)?;
        Ok(Cursor::new(buf))
    }

    pub fn read_to_vec(&self, key: &str) -> StoreResult<Vec<u8>> {
        self.read(key).map(Cursor::into_inner)
    }

    /// Delete the first-level bucket `key` lives in.
    ///
    /// Every other key whose path starts with the same top-level segment is
    /// removed along with it. Deleting a missing key succeeds.
    pub fn delete(&self, key: &str) -> StoreResult<()> {
        let path_key = self.path_key(key)?;
        let _guard = self.lock(&path_key);
        let target = match path_key.first_segment() {
            "" => self.root.join(&path_key.file_name),
            bucket => self.root.join(bucket),
        };
        self.fs.remove_all(&target)?;
        debug!(path = %path_key, bucket = %path_key.first_segment(), "object deleted");
        Ok(())
    }

    /// Remove the entire root directory and every object under it.
    pub fn clear(&self) -> StoreResult<()> {
        let _guards: Vec<MutexGuard<'_, ()>> = self
            .locks
            .iter()
            .map(|l| l.lock().unwrap_or_else(PoisonError::into_inner))
            .collect();
        self.fs.remove_all(&self.root)?;
        debug!(root = %self.root.display(), "store cleared");
        Ok(())
    }

    fn path_key(&self, key: &str) -> StoreResult<PathKey> {
        if key.is_empty() {
            return Err(invalid(key, "key is empty"));
        }
        let path_key = self.transform.transform(key);
        for part in path_key.segments.iter().chain(Some(&path_key.file_name)) {
            if part.is_empty() {
                return Err(invalid(key, "empty path component"));
            }
            if !Path::new(part)
                .components()
                .all(|c| matches!(c, Component::Normal(_)))
            {
                return Err(invalid(key, "path escapes the store root"));
            }
        }
        Ok(path_key)
    }

    fn lock(&self, path_key: &PathKey) -> MutexGuard<'_, ()> {
        let mut hasher = DefaultHasher::new();
        path_key.first_segment().hash(&mut hasher);
        let idx = (hasher.finish() as usize) % self.locks.len();
        self.locks[idx]
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

fn invalid(key: &str, reason: &str) -> StoreError {
    StoreError::InvalidKey {
        key: key.to_string(),
        reason: reason.to_string(),
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("root", &self.root)
            .field("transform", &self.transform.name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::MemoryFilesystem;
    use crate::path::{CasTransform, IdentityTransform};

    fn disk_store() -> (tempfile::TempDir, Store) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::new(StoreConfig {
            root: dir.path().join("data"),
            transform: TransformKind::ContentAddressed,
        });
        (dir, store)
    }

    fn memory_store(transform: Box<dyn PathTransform>) -> Store {
        Store::with_filesystem("/stash", transform, Arc::new(MemoryFilesystem::new()))
    }

    /// Find another key that lands in the same first-level bucket as `key`.
    fn bucket_sibling(t: &CasTransform, key: &str) -> String {
        let bucket = t.transform(key).first_segment().to_string();
        (0u64..)
            .map(|i| format!("sibling-{i}"))
            .find(|k| k != key && t.transform(k).first_segment() == bucket)
            .unwrap()
    }

    #[test]
    fn write_has_read_on_disk() {
        let (_dir, store) = disk_store();
        assert!(!store.has("hello").unwrap());

        let n = store.write_bytes("hello", b"some data").unwrap();
        assert_eq!(n, 9);
        assert!(store.has("hello").unwrap());

        let mut out = String::new();
        store.read("hello").unwrap().read_to_string(&mut out).unwrap();
        assert_eq!(out, "some data");
    }

    #[test]
    fn object_lands_under_sharded_path() {
        let (dir, store) = disk_store();
        store.write_bytes("hello", b"x").unwrap();
        let expected = dir
            .path()
            .join("data/aaf4c/61ddc/c5e8a/2dabe/de0f3/b482c/d9aea/9434d")
            .join("aaf4c61ddcc5e8a2dabede0f3b482cd9aea9434d");
        assert!(expected.is_file());
        assert_eq!(store.resolve("hello").unwrap(), expected);
    }

    #[test]
    fn overwrite_truncates() {
        let (_dir, store) = disk_store();
        store.write_bytes("k", b"a much longer payload").unwrap();
        store.write_bytes("k", b"short").unwrap();
        assert_eq!(store.read_to_vec("k").unwrap(), b"short");
    }

    #[test]
    fn empty_payload_round_trips() {
        let (_dir, store) = disk_store();
        assert_eq!(store.write_bytes("empty", b"").unwrap(), 0);
        assert!(store.has("empty").unwrap());
        assert!(store.read_to_vec("empty").unwrap().is_empty());
    }

    #[test]
    fn read_missing_is_not_found() {
        let (_dir, store) = disk_store();
        let err = store.read("ghost").unwrap_err();
        assert!(err.is_not_found());
        assert!(matches!(err, StoreError::NotFound(k) if k == "ghost"));
    }

    #[test]
    fn delete_removes_whole_bucket() {
        // Two-character shards keep the sibling search short.
        let dir = tempfile::tempdir().unwrap();
        let t = CasTransform::new(2);
        let store = Store::with_filesystem(dir.path(), Box::new(t), Arc::new(OsFilesystem));
        let sibling = bucket_sibling(&t, "hello");
        store.write_bytes("hello", b"1").unwrap();
        store.write_bytes(&sibling, b"2").unwrap();

        store.delete("hello").unwrap();
        assert!(!store.has("hello").unwrap());
        assert!(!store.has(&sibling).unwrap());
    }

    #[test]
    fn delete_leaves_other_buckets() {
        let store = memory_store(Box::new(CasTransform::default()));
        store.write_bytes("hello", b"1").unwrap();
        store.write_bytes("world", b"2").unwrap();
        assert_ne!(
            CasTransform::default().transform("hello").first_segment(),
            CasTransform::default().transform("world").first_segment()
        );

        store.delete("hello").unwrap();
        assert!(!store.has("hello").unwrap());
        assert!(store.has("world").unwrap());

        // Deleting again is fine.
        store.delete("hello").unwrap();
    }

    #[test]
    fn identity_transform_layout() {
        let fs = MemoryFilesystem::new();
        let store = Store::with_filesystem(
            "/stash",
            Box::new(IdentityTransform),
            Arc::new(fs.clone()),
        );
        store.write_bytes("photos", b"jpeg").unwrap();
        assert!(fs.stat(Path::new("/stash/photos/photos")).is_ok());
        assert_eq!(store.read_to_vec("photos").unwrap(), b"jpeg");
    }

    #[test]
    fn identity_delete_removes_top_level_directory() {
        let store = memory_store(Box::new(IdentityTransform));
        store.write_bytes("a/b", b"1").unwrap();
        store.write_bytes("a/c", b"2").unwrap();
        store.write_bytes("z/b", b"3").unwrap();

        store.delete("a/b").unwrap();
        assert!(!store.has("a/b").unwrap());
        assert!(!store.has("a/c").unwrap());
        assert!(store.has("z/b").unwrap());
    }

    #[test]
    fn nested_identity_keys_share_a_lock_stripe() {
        let store = memory_store(Box::new(IdentityTransform));
        let stripe = |key: &str| {
            let guard = store.lock(&store.path_key(key).unwrap());
            let idx = store
                .locks
                .iter()
                .position(|l| l.try_lock().is_err())
                .unwrap();
            drop(guard);
            idx
        };
        assert_eq!(stripe("a"), stripe("a/b"));
        assert_eq!(stripe("a/b"), stripe("a/c/d"));
    }

    #[test]
    fn identity_transform_rejects_escaping_keys() {
        let store = memory_store(Box::new(IdentityTransform));
        for key in ["../etc", "/abs", "a/../b", ""] {
            let err = store.write_bytes(key, b"x").unwrap_err();
            assert!(matches!(err, StoreError::InvalidKey { .. }), "key {key:?}");
        }
    }

    #[test]
    fn clear_removes_everything() {
        let (_dir, store) = disk_store();
        store.write_bytes("a", b"1").unwrap();
        store.write_bytes("b", b"2").unwrap();
        store.clear().unwrap();
        assert!(!store.has("a").unwrap());
        assert!(!store.has("b").unwrap());
        assert!(!store.root().exists());
    }

    #[test]
    fn empty_root_uses_default() {
        let store = Store::with_filesystem(
            "",
            Box::new(IdentityTransform),
            Arc::new(MemoryFilesystem::new()),
        );
        assert_eq!(store.root(), Path::new(DEFAULT_ROOT));
    }

    #[cfg(unix)]
    #[test]
    fn has_surfaces_non_not_found_errors() {
        // A file where a directory is expected yields ENOTDIR, not ENOENT.
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("photos"), b"not a dir").unwrap();
        let store = Store::with_filesystem(
            dir.path(),
            Box::new(IdentityTransform),
            Arc::new(OsFilesystem),
        );
        let err = store.has("photos").unwrap_err();
        assert!(matches!(err, StoreError::Io(_)));
    }

    #[test]
    fn concurrent_writers_same_key() {
        let store = Arc::new(memory_store(Box::new(CasTransform::default())));
        let handles: Vec<_> = (0u8..8)
            .map(|i| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    for _ in 0..20 {
                        store.write_bytes("shared", &[i; 256]).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        let data = store.read_to_vec("shared").unwrap();
        assert_eq!(data.len(), 256);
        assert!(data.iter().all(|b| *b == data[0]));
    }
}
