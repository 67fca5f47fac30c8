//! Filesystem verbs behind the snapshot codec.
//!
//! The codec performs every disk operation through [`SnapshotIo`] so tests
//! can fail any single step and verify that a half-written snapshot never
//! becomes visible.

use std::fs;
use std::io::{self, Write};
use std::path::Path;

/// The filesystem operations a snapshot write performs, in the order the
/// codec invokes them.
pub trait SnapshotIo: Send + Sync {
    /// Recursively creates a directory.
    fn create_dir_all(&self, path: &Path) -> io::Result<()>;

    /// Creates `path`, writes `data`, and fsyncs the file.
    fn write_file(&self, path: &Path, data: &[u8]) -> io::Result<()>;

    /// Fsyncs a directory so renames and file creations inside it are
    /// durable.
    fn sync_dir(&self, path: &Path) -> io::Result<()>;

    /// Atomically renames `from` to `to`.
    fn rename(&self, from: &Path, to: &Path) -> io::Result<()>;

    /// Recursively removes a directory. Used for cleanup; failures are
    /// logged, not propagated.
    fn remove_dir_all(&self, path: &Path) -> io::Result<()>;

    /// Reads an entire file.
    fn read_file(&self, path: &Path) -> io::Result<Vec<u8>>;

    /// True if the path exists.
    fn exists(&self, path: &Path) -> bool;
}

/// The real filesystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct FsIo;

impl SnapshotIo for FsIo {
    fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        fs::create_dir_all(path)
    }

    fn write_file(&self, path: &Path, data: &[u8]) -> io::Result<()> {
        let mut file = fs::File::create(path)?;
        file.write_all(data)?;
        file.sync_all()
    }

    #[cfg(unix)]
    fn sync_dir(&self, path: &Path) -> io::Result<()> {
        fs::File::open(path)?.sync_all()
    }

    #[cfg(not(unix))]
    fn sync_dir(&self, _path: &Path) -> io::Result<()> {
        // Directory handles cannot be fsynced portably off unix; the
        // per-file syncs still ran.
        Ok(())
    }

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        fs::rename(from, to)
    }

    fn remove_dir_all(&self, path: &Path) -> io::Result<()> {
        fs::remove_dir_all(path)
    }

    fn read_file(&self, path: &Path) -> io::Result<Vec<u8>> {
        fs::read(path)
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }
}
