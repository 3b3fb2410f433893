use std::fs;
use std::io;
use std::path::Path;

/// Filesystem primitives used by the tracker. Swappable so tests can fake failures.
pub trait Storage: Send + Sync {
    fn create_dir_all(&self, path: &Path) -> io::Result<()>;

    /// Write the full contents, replacing any existing file.
    fn write(&self, path: &Path, contents: &[u8]) -> io::Result<()>;

    fn exists(&self, path: &Path) -> bool;
}

/// The real local filesystem.
pub struct LocalStorage;

impl Storage for LocalStorage {
    fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        fs::create_dir_all(path)
    }

    fn write(&self, path: &Path, contents: &[u8]) -> io::Result<()> {
        fs::write(path, contents)
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }
}
