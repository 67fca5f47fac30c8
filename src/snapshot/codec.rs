//! Snapshot serialization and the atomic commit protocol.

use super::io::SnapshotIo;
use super::manifest::{ChecksumFile, Manifest, CHECKSUM_ALGORITHM, FORMAT_VERSION};
use super::SnapshotError;
use crate::config::IndexConfig;
use crate::hnsw::{HnswGraph, Label};
use crate::stats::IndexStats;
use crate::store::{metadata::MetadataValue, DocumentRecord, DocumentStore};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::ffi::OsString;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

const MANIFEST_FILE: &str = "manifest.json";
const GRAPH_FILE: &str = "graph.bin";
const VECTORS_FILE: &str = "vectors.bin";
const DOCUMENTS_FILE: &str = "documents.jsonl";
const CHECKSUM_FILE: &str = "checksum";

/// Distinguishes concurrent writers' temp directories.
static TMP_SEQ: AtomicU64 = AtomicU64::new(0);

/// One line of `documents.jsonl`.
#[derive(Debug, Serialize, Deserialize)]
struct DocumentLine {
    label: Label,
    doc_id: String,
    text: String,
    metadata: BTreeMap<String, MetadataValue>,
    created_at: u64,
    updated_at: u64,
}

/// A fully validated snapshot read back from disk.
#[derive(Debug)]
pub struct LoadedSnapshot {
    /// The parsed manifest.
    pub manifest: Manifest,
    /// The reconstructed graph.
    pub graph: HnswGraph,
    /// The reconstructed document store.
    pub store: DocumentStore,
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

/// Writes a complete snapshot of `graph` + `store` to `path`, atomically.
///
/// The caller passes a consistent view (the manager clones state under its
/// read lock); this function only does serialization and disk I/O.
///
/// # Errors
///
/// Any failure before the commit rename removes the temp directory and
/// leaves a prior snapshot at `path` untouched. Failures after the commit
/// rename (cleanup, parent fsync) are logged and swallowed: the new
/// snapshot is already durable and valid.
#[allow(clippy::too_many_arguments)]
pub fn write_snapshot(
    io: &dyn SnapshotIo,
    path: &Path,
    graph: &HnswGraph,
    store: &DocumentStore,
    config: &IndexConfig,
    stats: &IndexStats,
    created_at: u64,
) -> Result<(), SnapshotError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            io.create_dir_all(parent)?;
        }
    }

    let tmp = sibling(
        path,
        &format!(
            ".tmp.{}.{}",
            std::process::id(),
            TMP_SEQ.fetch_add(1, Ordering::Relaxed)
        ),
    );

    match write_contents(io, &tmp, path, graph, store, config, stats, created_at) {
        Ok(()) => {}
        Err(e) => {
            if let Err(cleanup) = io.remove_dir_all(&tmp) {
                if cleanup.kind() != ErrorKind::NotFound {
                    log::warn!("failed to clean up {}: {cleanup}", tmp.display());
                }
            }
            return Err(e);
        }
    }

    commit(io, &tmp, path)?;

    // Post-commit durability of the rename itself.
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            if let Err(e) = io.sync_dir(parent) {
                log::warn!("failed to sync {} after commit: {e}", parent.display());
            }
        }
    }

    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn write_contents(
    io: &dyn SnapshotIo,
    tmp: &Path,
    path: &Path,
    graph: &HnswGraph,
    store: &DocumentStore,
    config: &IndexConfig,
    stats: &IndexStats,
    created_at: u64,
) -> Result<(), SnapshotError> {
    io.create_dir_all(tmp)?;

    let mut config = config.clone();
    config.index_path = path.to_path_buf();

    let manifest = Manifest {
        format_version: FORMAT_VERSION,
        created_at,
        config,
        stats: stats.clone(),
        checksum_algorithm: CHECKSUM_ALGORITHM.to_string(),
    };
    let manifest_bytes = serde_json::to_vec_pretty(&manifest)
        .map_err(|e| SnapshotError::Serialize(e.to_string()))?;

    let graph_bytes =
        postcard::to_allocvec(graph).map_err(|e| SnapshotError::Serialize(e.to_string()))?;

    let vector_bytes: &[u8] = bytemuck::cast_slice(store.raw_vectors());

    let mut document_bytes = Vec::new();
    for (label, record) in store.iterate() {
        let line = DocumentLine {
            label,
            doc_id: record.doc_id.clone(),
            text: record.text.clone(),
            metadata: record.metadata.clone(),
            created_at: record.created_at,
            updated_at: record.updated_at,
        };
        let mut encoded = serde_json::to_vec(&line)
            .map_err(|e| SnapshotError::Serialize(e.to_string()))?;
        encoded.push(b'\n');
        document_bytes.extend_from_slice(&encoded);
    }

    let mut files = BTreeMap::new();
    files.insert(MANIFEST_FILE.to_string(), crc32fast::hash(&manifest_bytes));
    files.insert(GRAPH_FILE.to_string(), crc32fast::hash(&graph_bytes));
    files.insert(VECTORS_FILE.to_string(), crc32fast::hash(vector_bytes));
    files.insert(
        DOCUMENTS_FILE.to_string(),
        crc32fast::hash(&document_bytes),
    );
    let checksum_bytes = serde_json::to_vec_pretty(&ChecksumFile {
        algorithm: CHECKSUM_ALGORITHM.to_string(),
        files,
    })
    .map_err(|e| SnapshotError::Serialize(e.to_string()))?;

    io.write_file(&tmp.join(MANIFEST_FILE), &manifest_bytes)?;
    io.write_file(&tmp.join(GRAPH_FILE), &graph_bytes)?;
    io.write_file(&tmp.join(VECTORS_FILE), vector_bytes)?;
    io.write_file(&tmp.join(DOCUMENTS_FILE), &document_bytes)?;
    io.write_file(&tmp.join(CHECKSUM_FILE), &checksum_bytes)?;

    io.sync_dir(tmp)?;
    Ok(())
}

/// Swaps the temp directory into place.
///
/// An existing snapshot is first shuffled to `<path>.old`, then the temp
/// directory renamed over `path`, then the old directory removed. If the
/// second rename fails the old snapshot is restored.
fn commit(io: &dyn SnapshotIo, tmp: &Path, path: &Path) -> Result<(), SnapshotError> {
    if io.exists(path) {
        let old = sibling(path, ".old");
        if io.exists(&old) {
            // Stale leftover from an interrupted previous commit.
            if let Err(e) = io.remove_dir_all(&old) {
                let _ = io.remove_dir_all(tmp);
                return Err(e.into());
            }
        }
        if let Err(e) = io.rename(path, &old) {
            let _ = io.remove_dir_all(tmp);
            return Err(e.into());
        }

        if let Err(e) = io.rename(tmp, path) {
            // Put the previous snapshot back before reporting failure.
            if let Err(restore) = io.rename(&old, path) {
                log::warn!(
                    "failed to restore previous snapshot at {}: {restore}",
                    path.display()
                );
            }
            let _ = io.remove_dir_all(tmp);
            return Err(e.into());
        }

        if let Err(e) = io.remove_dir_all(&old) {
            log::warn!("failed to remove old snapshot {}: {e}", old.display());
        }
    } else if let Err(e) = io.rename(tmp, path) {
        let _ = io.remove_dir_all(tmp);
        return Err(e.into());
    }

    Ok(())
}

fn read_required(io: &dyn SnapshotIo, dir: &Path, name: &str) -> Result<Vec<u8>, SnapshotError> {
    io.read_file(&dir.join(name)).map_err(|e| {
        if e.kind() == ErrorKind::NotFound {
            SnapshotError::MissingFile(name.to_string())
        } else {
            SnapshotError::Io(e)
        }
    })
}

/// Reads and fully validates a snapshot directory.
///
/// Verification order: checksum file, then per-file checksums, then the
/// manifest version gate, then structural cross-checks between the store
/// and the graph (every live record references a live label, labels and
/// doc_ids are unique, the vector buffer covers every allocated slot).
///
/// # Errors
///
/// Returns a [`SnapshotError`] describing the first failed check. The
/// caller's in-memory state is never touched by this function.
pub fn read_snapshot(io: &dyn SnapshotIo, path: &Path) -> Result<LoadedSnapshot, SnapshotError> {
    let checksum_bytes = read_required(io, path, CHECKSUM_FILE)?;
    let checksums: ChecksumFile = serde_json::from_slice(&checksum_bytes)
        .map_err(|e| SnapshotError::Corrupted(format!("checksum file: {e}")))?;
    if checksums.algorithm != CHECKSUM_ALGORITHM {
        return Err(SnapshotError::Corrupted(format!(
            "unsupported checksum algorithm '{}'",
            checksums.algorithm
        )));
    }

    let manifest_bytes = read_required(io, path, MANIFEST_FILE)?;
    checksums.verify(MANIFEST_FILE, &manifest_bytes)?;
    let manifest: Manifest = serde_json::from_slice(&manifest_bytes)
        .map_err(|e| SnapshotError::Corrupted(format!("manifest: {e}")))?;
    manifest.check_version()?;

    let graph_bytes = read_required(io, path, GRAPH_FILE)?;
    checksums.verify(GRAPH_FILE, &graph_bytes)?;
    let graph: HnswGraph = postcard::from_bytes(&graph_bytes)
        .map_err(|e| SnapshotError::Corrupted(format!("graph: {e}")))?;

    let vector_bytes = read_required(io, path, VECTORS_FILE)?;
    checksums.verify(VECTORS_FILE, &vector_bytes)?;
    if vector_bytes.len() % 4 != 0 {
        return Err(SnapshotError::Corrupted(
            "vector payload is not a whole number of f32s".to_string(),
        ));
    }
    let vectors: Vec<f32> = match bytemuck::try_cast_slice::<u8, f32>(&vector_bytes) {
        Ok(floats) => floats.to_vec(),
        Err(_) => {
            // Misaligned source buffer: decode per element.
            vector_bytes
                .chunks_exact(4)
                .map(|chunk| {
                    let bytes: [u8; 4] = chunk.try_into().expect("chunks_exact guarantees 4 bytes");
                    f32::from_le_bytes(bytes)
                })
                .collect()
        }
    };

    let document_bytes = read_required(io, path, DOCUMENTS_FILE)?;
    checksums.verify(DOCUMENTS_FILE, &document_bytes)?;

    let dim = manifest.config.embedding_dim;
    if graph.params().dim as usize != dim {
        return Err(SnapshotError::Corrupted(format!(
            "graph dimension {} does not match config dimension {dim}",
            graph.params().dim
        )));
    }
    if vectors.len() != graph.node_count() * dim {
        return Err(SnapshotError::Corrupted(format!(
            "vector payload holds {} floats, expected {} ({} labels x {dim} dims)",
            vectors.len(),
            graph.node_count() * dim,
            graph.node_count()
        )));
    }

    let mut records: Vec<Option<DocumentRecord>> = vec![None; graph.node_count()];
    let mut seen_doc_ids: HashSet<String> = HashSet::new();
    let text = std::str::from_utf8(&document_bytes)
        .map_err(|e| SnapshotError::Corrupted(format!("documents.jsonl: {e}")))?;
    for line in text.lines().filter(|l| !l.trim().is_empty()) {
        let parsed: DocumentLine = serde_json::from_str(line)
            .map_err(|e| SnapshotError::Corrupted(format!("documents.jsonl: {e}")))?;
        let idx = parsed.label as usize;
        if idx >= records.len() {
            return Err(SnapshotError::Corrupted(format!(
                "record '{}' references unallocated label {}",
                parsed.doc_id, parsed.label
            )));
        }
        if graph.is_deleted(parsed.label) {
            return Err(SnapshotError::Corrupted(format!(
                "record '{}' references tombstoned label {}",
                parsed.doc_id, parsed.label
            )));
        }
        if records[idx].is_some() {
            return Err(SnapshotError::Corrupted(format!(
                "label {} appears twice in documents.jsonl",
                parsed.label
            )));
        }
        if !seen_doc_ids.insert(parsed.doc_id.clone()) {
            return Err(SnapshotError::Corrupted(format!(
                "doc_id '{}' appears twice in documents.jsonl",
                parsed.doc_id
            )));
        }
        records[idx] = Some(DocumentRecord {
            doc_id: parsed.doc_id,
            text: parsed.text,
            metadata: parsed.metadata,
            created_at: parsed.created_at,
            updated_at: parsed.updated_at,
        });
    }

    let live = records.iter().flatten().count();
    if live != graph.size() {
        return Err(SnapshotError::Corrupted(format!(
            "{live} live records but graph reports {} live labels",
            graph.size()
        )));
    }

    let store = DocumentStore::from_parts(dim, vectors, records);
    Ok(LoadedSnapshot {
        manifest,
        graph,
        store,
    })
}
