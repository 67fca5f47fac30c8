//! Compaction: tombstones are reclaimed, labels renumbered, and search
//! quality preserved.

use docvec::{IndexConfig, VectorIndex};
use std::collections::BTreeMap;

fn index_with_docs(count: usize) -> VectorIndex {
    let mut config = IndexConfig::new(4, "/tmp/docvec-compaction");
    config.m = 8;
    config.ef_construction = 32;
    config.ef_search = 32;
    config.normalize_embeddings = false;
    let index = VectorIndex::open(config).unwrap();

    for i in 0..count {
        #[allow(clippy::cast_precision_loss)]
        let v = [
            i as f32,
            (i * i % 17) as f32,
            (i % 5) as f32,
            1.0,
        ];
        index
            .upsert(&format!("doc-{i}"), &v, &format!("text-{i}"), BTreeMap::new(), None)
            .unwrap();
    }
    index
}

#[test]
fn compact_removes_all_tombstones() {
    let index = index_with_docs(100);

    for i in 0..30 {
        index.remove(&format!("doc-{i}"), None).unwrap();
    }

    let before = index.stats(None).unwrap();
    assert_eq!(before.doc_count, 70);
    assert_eq!(before.deleted_count, 30);

    index.compact(None).unwrap();

    let after = index.stats(None).unwrap();
    assert_eq!(after.doc_count, 70);
    assert_eq!(after.deleted_count, 0);
    assert!(after.last_rebuild_at > 0);
}

#[test]
fn compact_preserves_content_and_timestamps() {
    let index = index_with_docs(10);

    let doc_before = index.get("doc-7", None).unwrap();

    for i in [1, 3, 5] {
        index.remove(&format!("doc-{i}"), None).unwrap();
    }
    index.compact(None).unwrap();

    let doc_after = index.get("doc-7", None).unwrap();
    assert_eq!(doc_after.embedding, doc_before.embedding);
    assert_eq!(doc_after.text, doc_before.text);
    assert_eq!(doc_after.created_at, doc_before.created_at);
    assert_eq!(doc_after.updated_at, doc_before.updated_at);

    for i in [1, 3, 5] {
        assert_eq!(
            index.get(&format!("doc-{i}"), None).unwrap_err().kind(),
            "not_found"
        );
    }
}

#[test]
fn compact_maintains_search_quality() {
    let index = index_with_docs(60);

    // Exact-match queries must come back on top after a delete-heavy
    // compaction.
    for i in 0..20 {
        index.remove(&format!("doc-{i}"), None).unwrap();
    }
    index.compact(None).unwrap();

    for i in [25, 33, 47, 59] {
        let doc = index.get(&format!("doc-{i}"), None).unwrap();
        let hits = index.search(&doc.embedding, 1, None, None).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].doc_id, format!("doc-{i}"), "self-query must rank first");
    }
}

#[test]
fn compact_empty_index_is_noop() {
    let index = index_with_docs(0);
    index.compact(None).unwrap();
    let stats = index.stats(None).unwrap();
    assert_eq!(stats.doc_count, 0);
    assert_eq!(stats.deleted_count, 0);
}

#[test]
fn compact_after_everything_removed() {
    let index = index_with_docs(8);
    for i in 0..8 {
        index.remove(&format!("doc-{i}"), None).unwrap();
    }
    index.compact(None).unwrap();

    let stats = index.stats(None).unwrap();
    assert_eq!(stats.doc_count, 0);
    assert_eq!(stats.deleted_count, 0);
    assert!(index.search(&[1.0, 0.0, 0.0, 0.0], 5, None, None).unwrap().is_empty());

    // The index keeps working after a full wipe.
    index
        .upsert("fresh", &[1.0, 2.0, 3.0, 4.0], "fresh", BTreeMap::new(), None)
        .unwrap();
    assert_eq!(index.stats(None).unwrap().doc_count, 1);
}
