use std::collections::{HashMap, HashSet};
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

/// Minimal filesystem surface the store is built on.
///
/// Error kinds follow `std::fs`: a missing path is reported with
/// [`io::ErrorKind::NotFound`], everything else is a genuine failure.
pub trait Filesystem: Send + Sync {
    /// Create a directory and all missing parents. Idempotent.
    fn create_dir_all(&self, path: &Path) -> io::Result<()>;

    /// Open an existing file for reading.
    fn open(&self, path: &Path) -> io::Result<Box<dyn Read + Send>>;

    /// Create a file for writing, truncating any existing content.
    fn create(&self, path: &Path) -> io::Result<Box<dyn Write + Send>>;

    /// Remove a file or a directory tree. A missing path is not an error.
    fn remove_all(&self, path: &Path) -> io::Result<()>;

    /// Check that a path exists.
    fn stat(&self, path: &Path) -> io::Result<()>;
}

/// The local disk, through `std::fs`.
#[derive(Clone, Copy, Debug, Default)]
pub struct OsFilesystem;

impl Filesystem for OsFilesystem {
    fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        fs::create_dir_all(path)
    }

    fn open(&self, path: &Path) -> io::Result<Box<dyn Read + Send>> {
        Ok(Box::new(File::open(path)?))
    }

    fn create(&self, path: &Path) -> io::Result<Box<dyn Write + Send>> {
        Ok(Box::new(File::create(path)?))
    }

    fn remove_all(&self, path: &Path) -> io::Result<()> {
        let meta = match fs::symlink_metadata(path) {
            Ok(meta) => meta,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e),
        };
        if meta.is_dir() {
            fs::remove_dir_all(path)
        } else {
            fs::remove_file(path)
        }
    }

    fn stat(&self, path: &Path) -> io::Result<()> {
        fs::metadata(path).map(|_| ())
    }
}

#[derive(Default)]
struct MemoryState {
    files: HashMap<PathBuf, Vec<u8>>,
    dirs: HashSet<PathBuf>,
}

impl MemoryState {
    fn dir_exists(&self, path: &Path) -> bool {
        path.as_os_str().is_empty() || path == Path::new("/") || self.dirs.contains(path)
    }
}

/// In-memory filesystem for tests and embedding.
///
/// Files and directories live in a map behind a `RwLock`. Clones share the
/// same state.
#[derive(Clone, Default)]
pub struct MemoryFilesystem {
    state: Arc<RwLock<MemoryState>>,
}

impl MemoryFilesystem {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of files currently held.
    pub fn file_count(&self) -> usize {
        self.state.read().expect("lock poisoned").files.len()
    }
}

impl std::fmt::Debug for MemoryFilesystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryFilesystem")
            .field("file_count", &self.file_count())
            .finish()
    }
}

fn not_found(path: &Path) -> io::Error {
    io::Error::new(
        io::ErrorKind::NotFound,
        format!("{}: no such file or directory", path.display()),
    )
}

impl Filesystem for MemoryFilesystem {
    fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        let mut state = self.state.write().expect("lock poisoned");
        if state.files.contains_key(path) {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("{}: is a file", path.display()),
            ));
        }
        for ancestor in path.ancestors() {
            if ancestor.as_os_str().is_empty() {
                break;
            }
            state.dirs.insert(ancestor.to_path_buf());
        }
        Ok(())
    }

    fn open(&self, path: &Path) -> io::Result<Box<dyn Read + Send>> {
        let state = self.state.read().expect("lock poisoned");
        match state.files.get(path) {
            Some(data) => Ok(Box::new(io::Cursor::new(data.clone()))),
            None if state.dirs.contains(path) => Err(io::Error::new(
                io::ErrorKind::Other,
                format!("{}: is a directory", path.display()),
            )),
            None => Err(not_found(path)),
        }
    }

    fn create(&self, path: &Path) -> io::Result<Box<dyn Write + Send>> {
        let mut state = self.state.write().expect("lock poisoned");
        let parent = path.parent().unwrap_or(Path::new(""));
        if !state.dir_exists(parent) {
            return Err(not_found(parent));
        }
        state.files.insert(path.to_path_buf(), Vec::new());
        Ok(Box::new(MemoryFile {
            state: Arc::clone(&self.state),
            path: path.to_path_buf(),
        }))
    }

    fn remove_all(&self, path: &Path) -> io::Result<()> {
        let mut state = self.state.write().expect("lock poisoned");
        state.files.retain(|p, _| !p.starts_with(path));
        state.dirs.retain(|p| !p.starts_with(path));
        Ok(())
    }

    fn stat(&self, path: &Path) -> io::Result<()> {
        let state = self.state.read().expect("lock poisoned");
        if state.files.contains_key(path) || state.dirs.contains(path) {
            Ok(())
        } else {
            Err(not_found(path))
        }
    }
}

/// Write handle into a [`MemoryFilesystem`]; every write lands immediately.
struct MemoryFile {
    state: Arc<RwLock<MemoryState>>,
    path: PathBuf,
}

impl Write for MemoryFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.state.write().expect("lock poisoned");
        match state.files.get_mut(&self.path) {
            Some(data) => {
                data.extend_from_slice(buf);
                Ok(buf.len())
            }
            None => Err(not_found(&self.path)),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_create_requires_parent() {
        let fs = MemoryFilesystem::new();
        let err = fs.create(Path::new("/root/a/file")).err().unwrap();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);

        fs.create_dir_all(Path::new("/root/a")).unwrap();
        let mut w = fs.create(Path::new("/root/a/file")).unwrap();
        w.write_all(b"abc").unwrap();

        let mut out = String::new();
        fs.open(Path::new("/root/a/file"))
            .unwrap()
            .read_to_string(&mut out)
            .unwrap();
        assert_eq!(out, "abc");
    }

    #[test]
    fn memory_create_truncates() {
        let fs = MemoryFilesystem::new();
        fs.create_dir_all(Path::new("/d")).unwrap();
        fs.create(Path::new("/d/f")).unwrap().write_all(b"long content").unwrap();
        fs.create(Path::new("/d/f")).unwrap().write_all(b"x").unwrap();

        let mut out = Vec::new();
        fs.open(Path::new("/d/f")).unwrap().read_to_end(&mut out).unwrap();
        assert_eq!(out, b"x");
    }

    #[test]
    fn memory_remove_all_is_recursive() {
        let fs = MemoryFilesystem::new();
        fs.create_dir_all(Path::new("/r/a/b")).unwrap();
        fs.create(Path::new("/r/a/b/f1")).unwrap();
        fs.create_dir_all(Path::new("/r/c")).unwrap();
        fs.create(Path::new("/r/c/f2")).unwrap();

        fs.remove_all(Path::new("/r/a")).unwrap();
        assert_eq!(fs.stat(Path::new("/r/a")).unwrap_err().kind(), io::ErrorKind::NotFound);
        assert!(fs.stat(Path::new("/r/c/f2")).is_ok());
        assert_eq!(fs.file_count(), 1);

        // Missing paths are fine.
        fs.remove_all(Path::new("/nope")).unwrap();
    }

    #[test]
    fn os_remove_all_handles_files_and_missing() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("f");
        OsFilesystem.create(&file).unwrap().write_all(b"1").unwrap();
        OsFilesystem.stat(&file).unwrap();
        OsFilesystem.remove_all(&file).unwrap();
        assert_eq!(OsFilesystem.stat(&file).unwrap_err().kind(), io::ErrorKind::NotFound);
        OsFilesystem.remove_all(&file).unwrap();
    }
}
