//! Durable, atomic persistence of the entire index state.
//!
//! A snapshot is a directory:
//!
//! ```text
//! <prefix>/
//!   manifest.json     - versioned header: format version, config, stats
//!   graph.bin         - HNSW layers, adjacency, entry point, tombstones
//!   vectors.bin       - contiguous f32 embeddings, indexed by label
//!   documents.jsonl   - one record per live label
//!   checksum          - crc32 of each of the above files
//! ```
//!
//! Writes go to a unique `.tmp` sibling directory, every file and the
//! directory itself are fsynced, and an atomic rename commits the result.
//! A failure before the rename removes the `.tmp` and leaves any prior
//! snapshot untouched.

mod codec;
mod io;
mod manifest;

pub use codec::{read_snapshot, write_snapshot, LoadedSnapshot};
pub use io::{FsIo, SnapshotIo};
pub use manifest::{
    ChecksumFile, Manifest, CHECKSUM_ALGORITHM, FORMAT_VERSION, FORMAT_VERSION_MIN,
};

use thiserror::Error;

/// Errors that can occur during snapshot operations.
#[derive(Debug, Error)]
pub enum SnapshotError {
    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Snapshot format version outside the supported range.
    #[error("unsupported snapshot format version {found} (supported {min}..={max})")]
    VersionMismatch {
        /// Version found in the manifest.
        found: u32,
        /// Oldest supported version.
        min: u32,
        /// Newest supported version.
        max: u32,
    },

    /// A file's recomputed checksum does not match the recorded one.
    #[error("checksum mismatch for {file}: expected {expected:#010x}, got {actual:#010x}")]
    ChecksumMismatch {
        /// File name within the snapshot directory.
        file: String,
        /// Checksum recorded in the `checksum` file.
        expected: u32,
        /// Checksum recomputed from the file contents.
        actual: u32,
    },

    /// A required snapshot file is absent.
    #[error("snapshot file missing: {0}")]
    MissingFile(String),

    /// Structurally invalid snapshot contents.
    #[error("corrupted snapshot: {0}")]
    Corrupted(String),

    /// Serialization failed while writing a snapshot.
    #[error("serialization error: {0}")]
    Serialize(String),
}
