//! Atomicity of the snapshot commit protocol under injected I/O faults.
//!
//! Every mutating filesystem operation of a snapshot write is failed in
//! turn; after each failure the previous snapshot must still read back
//! fully valid, and with no previous snapshot the path must stay absent.
//! This simulates killing the process at any point during `save_as`.

use docvec::hnsw::{DistanceKind, HnswGraph, HnswParams};
use docvec::snapshot::{read_snapshot, write_snapshot, FsIo, SnapshotIo};
use docvec::stats::IndexStats;
use docvec::store::DocumentStore;
use docvec::IndexConfig;
use std::collections::BTreeMap;
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Wraps the real filesystem and fails the Nth mutating operation.
struct FaultyIo {
    inner: FsIo,
    ops: AtomicUsize,
    fail_at: Option<usize>,
}

impl FaultyIo {
    fn new(fail_at: Option<usize>) -> Self {
        Self {
            inner: FsIo,
            ops: AtomicUsize::new(0),
            fail_at,
        }
    }

    fn mutating_op(&self) -> io::Result<()> {
        let op = self.ops.fetch_add(1, Ordering::SeqCst);
        if Some(op) == self.fail_at {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                format!("injected fault at op {op}"),
            ));
        }
        Ok(())
    }

    fn op_count(&self) -> usize {
        self.ops.load(Ordering::SeqCst)
    }
}

impl SnapshotIo for FaultyIo {
    fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        self.mutating_op()?;
        self.inner.create_dir_all(path)
    }

    fn write_file(&self, path: &Path, data: &[u8]) -> io::Result<()> {
        self.mutating_op()?;
        self.inner.write_file(path, data)
    }

    fn sync_dir(&self, path: &Path) -> io::Result<()> {
        self.mutating_op()?;
        self.inner.sync_dir(path)
    }

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        self.mutating_op()?;
        self.inner.rename(from, to)
    }

    fn remove_dir_all(&self, path: &Path) -> io::Result<()> {
        // Cleanup is best-effort in the protocol; never inject here.
        self.inner.remove_dir_all(path)
    }

    fn read_file(&self, path: &Path) -> io::Result<Vec<u8>> {
        self.inner.read_file(path)
    }

    fn exists(&self, path: &Path) -> bool {
        self.inner.exists(path)
    }
}

fn build_state(count: usize, seed_text: &str) -> (HnswGraph, DocumentStore, IndexConfig) {
    let config = IndexConfig::new(2, "/tmp/docvec-atomicity");
    let params = HnswParams::new(2, 4, 16, 16, DistanceKind::L2Squared);
    let mut graph = HnswGraph::new(params, 42);
    let mut store = DocumentStore::new(2);

    for i in 0..count {
        let doc_id = format!("doc-{i}");
        #[allow(clippy::cast_precision_loss)]
        let embedding = [i as f32, 1.0];
        let label = store.assign_or_get_label(&doc_id);
        store
            .put(label, &doc_id, &embedding, seed_text, BTreeMap::new(), 1, 1)
            .unwrap();
        graph.insert(label, &embedding, &store).unwrap();
    }
    (graph, store, config)
}

#[test]
fn fault_at_every_step_preserves_previous_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("snap");

    // A valid previous generation.
    let (old_graph, old_store, config) = build_state(3, "old");
    write_snapshot(
        &FsIo,
        &path,
        &old_graph,
        &old_store,
        &config,
        &IndexStats::default(),
        1,
    )
    .unwrap();

    // Count the mutating ops of a clean overwrite.
    let (new_graph, new_store, _) = build_state(7, "new");
    let counter = FaultyIo::new(None);
    write_snapshot(
        &counter,
        &path,
        &new_graph,
        &new_store,
        &config,
        &IndexStats::default(),
        2,
    )
    .unwrap();
    let total_ops = counter.op_count();
    assert!(total_ops >= 8, "expected several mutating steps");

    // Restore the old generation, then fail each op in turn.
    write_snapshot(
        &FsIo,
        &path,
        &old_graph,
        &old_store,
        &config,
        &IndexStats::default(),
        1,
    )
    .unwrap();

    for fail_at in 0..total_ops {
        let io = FaultyIo::new(Some(fail_at));
        let result = write_snapshot(
            &io,
            &path,
            &new_graph,
            &new_store,
            &config,
            &IndexStats::default(),
            3,
        );

        let loaded = read_snapshot(&FsIo, &path)
            .unwrap_or_else(|e| panic!("snapshot unreadable after fault at op {fail_at}: {e}"));

        match result {
            // Failure: the previous generation must be fully intact.
            Err(_) => {
                assert_eq!(
                    loaded.store.len(),
                    3,
                    "fault at op {fail_at} corrupted the previous snapshot"
                );
                assert_eq!(loaded.store.get(0).unwrap().text, "old");
            }
            // Post-commit faults are swallowed; the new generation must be
            // complete.
            Ok(()) => {
                assert_eq!(loaded.store.len(), 7);
                assert_eq!(loaded.store.get(0).unwrap().text, "new");
                // Put the old generation back for the next iteration.
                write_snapshot(
                    &FsIo,
                    &path,
                    &old_graph,
                    &old_store,
                    &config,
                    &IndexStats::default(),
                    1,
                )
                .unwrap();
            }
        }
    }
}

#[test]
fn fault_with_no_previous_snapshot_leaves_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("snap");
    let (graph, store, config) = build_state(4, "only");

    let counter = FaultyIo::new(None);
    write_snapshot(
        &counter,
        &path,
        &graph,
        &store,
        &config,
        &IndexStats::default(),
        1,
    )
    .unwrap();
    let total_ops = counter.op_count();
    std::fs::remove_dir_all(&path).unwrap();

    for fail_at in 0..total_ops {
        let io = FaultyIo::new(Some(fail_at));
        let result = write_snapshot(
            &io,
            &path,
            &graph,
            &store,
            &config,
            &IndexStats::default(),
            1,
        );

        match result {
            Err(_) => {
                // Either nothing at the path, or nothing readable: a
                // partially materialized snapshot must never verify.
                if path.exists() {
                    panic!("fault at op {fail_at} left a committed directory behind an error");
                }
            }
            Ok(()) => {
                assert_eq!(read_snapshot(&FsIo, &path).unwrap().store.len(), 4);
                std::fs::remove_dir_all(&path).unwrap();
            }
        }
    }
}

#[test]
fn no_temp_directories_left_behind() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("snap");
    let (graph, store, config) = build_state(2, "x");

    let counter = FaultyIo::new(None);
    write_snapshot(
        &counter,
        &path,
        &graph,
        &store,
        &config,
        &IndexStats::default(),
        1,
    )
    .unwrap();
    let total_ops = counter.op_count();

    for fail_at in 0..total_ops {
        let io = FaultyIo::new(Some(fail_at));
        let _ = write_snapshot(
            &io,
            &path,
            &graph,
            &store,
            &config,
            &IndexStats::default(),
            1,
        );
    }

    let stragglers: Vec<_> = std::fs::read_dir(dir.path())
        .unwrap()
        .filter_map(Result::ok)
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .filter(|name| name.contains(".tmp."))
        .collect();
    assert!(
        stragglers.is_empty(),
        "temp directories left behind: {stragglers:?}"
    );
}
