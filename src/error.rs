//! Unified error hierarchy.
//!
//! Component-level errors ([`GraphError`], [`StoreError`], [`SnapshotError`],
//! [`MetadataError`]) roll up into the public [`IndexError`], which exposes
//! one variant per caller-visible failure kind. User-visible failure is
//! structured: a stable [`kind`](IndexError::kind) string, a message, and
//! the offending `doc_id` where one exists — never a raw backtrace.
//!
//! Every error is either local-recoverable (state unchanged; retry with
//! different inputs) or state-preserving (the write rolled back before the
//! error surfaced). Only [`IndexError::Internal`] poisons the index.

use crate::hnsw::GraphError;
use crate::snapshot::SnapshotError;
use crate::store::metadata::MetadataError;
use crate::store::StoreError;
use thiserror::Error;

/// The unified error type for every index operation.
#[derive(Debug, Error)]
pub enum IndexError {
    /// A caller-supplied value is malformed: bad dimension, empty doc id,
    /// non-finite embedding component, invalid metadata.
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// What was wrong.
        message: String,
        /// The document the argument belonged to, when known.
        doc_id: Option<String>,
    },

    /// Configuration failed validation at `open`.
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    /// The document id is not present.
    #[error("document not found: {doc_id}")]
    NotFound {
        /// The missing id.
        doc_id: String,
    },

    /// The pressure policy could not make room for an insertion.
    #[error("capacity exhausted: {live} live + {deleted} deleted >= {max_elements}")]
    CapacityExhausted {
        /// Live documents at the time of failure.
        live: usize,
        /// Tombstoned labels at the time of failure.
        deleted: usize,
        /// The configured bound.
        max_elements: u64,
    },

    /// Filesystem failure outside the snapshot codec.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Snapshot read/write failure: corruption, checksum mismatch, rename
    /// failure.
    #[error(transparent)]
    Snapshot(SnapshotError),

    /// Snapshot format version outside the supported window.
    #[error("unsupported snapshot format version {found} (supported {min}..={max})")]
    VersionMismatch {
        /// Version found on disk.
        found: u32,
        /// Oldest supported version.
        min: u32,
        /// Newest supported version.
        max: u32,
    },

    /// The operation's deadline elapsed before it could start mutating.
    /// No side effects occurred.
    #[error("deadline exceeded")]
    DeadlineExceeded,

    /// The index is closed or poisoned; only `close` will succeed.
    #[error("index unavailable: {0}")]
    Unavailable(&'static str),

    /// An internal invariant was violated. The index transitions to
    /// `poisoned` and the violation is logged with enough context to
    /// reconstruct it.
    #[error("internal invariant violation: {0}")]
    Internal(String),
}

impl IndexError {
    /// A stable machine-readable kind string, for structured reporting
    /// across the bridge.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidArgument { .. } => "invalid_argument",
            Self::InvalidConfig(_) => "invalid_config",
            Self::NotFound { .. } => "not_found",
            Self::CapacityExhausted { .. } => "capacity_exhausted",
            Self::Io(_) | Self::Snapshot(_) => "io_error",
            Self::VersionMismatch { .. } => "version_mismatch",
            Self::DeadlineExceeded => "deadline_exceeded",
            Self::Unavailable(_) => "unavailable",
            Self::Internal(_) => "internal",
        }
    }

    /// The document id the failure is about, when one exists.
    #[must_use]
    pub fn doc_id(&self) -> Option<&str> {
        match self {
            Self::InvalidArgument { doc_id, .. } => doc_id.as_deref(),
            Self::NotFound { doc_id } => Some(doc_id),
            _ => None,
        }
    }

    /// Shorthand for an [`IndexError::InvalidArgument`] without a doc id.
    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
            doc_id: None,
        }
    }

    /// Shorthand for an [`IndexError::InvalidArgument`] tied to a document.
    pub(crate) fn invalid_for(doc_id: &str, message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
            doc_id: Some(doc_id.to_string()),
        }
    }
}

impl From<SnapshotError> for IndexError {
    fn from(err: SnapshotError) -> Self {
        match err {
            SnapshotError::VersionMismatch { found, min, max } => {
                Self::VersionMismatch { found, min, max }
            }
            other => Self::Snapshot(other),
        }
    }
}

impl From<MetadataError> for IndexError {
    fn from(err: MetadataError) -> Self {
        Self::invalid(err.to_string())
    }
}

impl From<GraphError> for IndexError {
    fn from(err: GraphError) -> Self {
        match err {
            GraphError::InvalidDimension { expected, actual } => Self::invalid(format!(
                "embedding has {actual} components, index expects {expected}"
            )),
            // Label bookkeeping is internal; a caller can never trigger it.
            other => Self::Internal(other.to_string()),
        }
    }
}

impl From<StoreError> for IndexError {
    fn from(err: StoreError) -> Self {
        // The manager validates inputs before they reach the store, so any
        // store error is a broken internal invariant.
        Self::Internal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_strings_stable() {
        assert_eq!(IndexError::invalid("x").kind(), "invalid_argument");
        assert_eq!(
            IndexError::NotFound {
                doc_id: "a".to_string()
            }
            .kind(),
            "not_found"
        );
        assert_eq!(IndexError::DeadlineExceeded.kind(), "deadline_exceeded");
    }

    #[test]
    fn test_version_mismatch_promoted() {
        let err: IndexError = SnapshotError::VersionMismatch {
            found: 9,
            min: 1,
            max: 3,
        }
        .into();
        assert_eq!(err.kind(), "version_mismatch");
    }

    #[test]
    fn test_checksum_failure_is_io_kind() {
        let err: IndexError = SnapshotError::ChecksumMismatch {
            file: "graph.bin".to_string(),
            expected: 1,
            actual: 2,
        }
        .into();
        assert_eq!(err.kind(), "io_error");
    }

    #[test]
    fn test_doc_id_attached() {
        let err = IndexError::invalid_for("a", "bad embedding");
        assert_eq!(err.doc_id(), Some("a"));
        assert!(err.to_string().contains("bad embedding"));
    }

    #[test]
    fn test_dimension_graph_error_is_invalid_argument() {
        let err: IndexError = GraphError::InvalidDimension {
            expected: 4,
            actual: 3,
        }
        .into();
        assert_eq!(err.kind(), "invalid_argument");
    }
}
