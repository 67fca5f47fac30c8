//! Snapshot manifest and checksum file formats.

use super::SnapshotError;
use crate::config::IndexConfig;
use crate::stats::IndexStats;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Current snapshot format version.
pub const FORMAT_VERSION: u32 = 3;

/// Oldest format version this reader accepts (current and two prior).
pub const FORMAT_VERSION_MIN: u32 = 1;

/// The only checksum algorithm written by this crate.
pub const CHECKSUM_ALGORITHM: &str = "crc32";

/// The versioned snapshot header, stored as `manifest.json`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    /// Snapshot format version.
    pub format_version: u32,

    /// When this snapshot was written (ms since the Unix epoch).
    pub created_at: u64,

    /// Full index configuration at snapshot time.
    pub config: IndexConfig,

    /// Statistics at snapshot time.
    pub stats: IndexStats,

    /// Checksum algorithm used by the `checksum` file.
    pub checksum_algorithm: String,
}

impl Manifest {
    /// Rejects manifests written by an unsupported format version.
    ///
    /// # Errors
    ///
    /// Returns [`SnapshotError::VersionMismatch`] when the version is newer
    /// than this reader or older than the migration window.
    pub fn check_version(&self) -> Result<(), SnapshotError> {
        if self.format_version < FORMAT_VERSION_MIN || self.format_version > FORMAT_VERSION {
            return Err(SnapshotError::VersionMismatch {
                found: self.format_version,
                min: FORMAT_VERSION_MIN,
                max: FORMAT_VERSION,
            });
        }
        Ok(())
    }
}

/// The `checksum` file: one crc32 per snapshot file.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChecksumFile {
    /// Checksum algorithm; must equal [`CHECKSUM_ALGORITHM`].
    pub algorithm: String,

    /// File name -> crc32 of its contents.
    pub files: BTreeMap<String, u32>,
}

impl ChecksumFile {
    /// Verifies `data` against the recorded checksum for `file`.
    ///
    /// # Errors
    ///
    /// [`SnapshotError::MissingFile`] if no checksum was recorded,
    /// [`SnapshotError::ChecksumMismatch`] if the contents changed.
    pub fn verify(&self, file: &str, data: &[u8]) -> Result<(), SnapshotError> {
        let expected = *self
            .files
            .get(file)
            .ok_or_else(|| SnapshotError::MissingFile(format!("checksum entry for {file}")))?;
        let actual = crc32fast::hash(data);
        if actual != expected {
            return Err(SnapshotError::ChecksumMismatch {
                file: file.to_string(),
                expected,
                actual,
            });
        }
        Ok(())
    }
}
