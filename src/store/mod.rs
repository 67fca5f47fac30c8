//! Document store: doc_id <-> label mapping, records, and the embedding
//! buffer.
//!
//! # Memory Layout
//!
//! - `vectors`: flat `Vec<f32>` storing all embeddings contiguously,
//!   label-major. The store owns this buffer exclusively; the graph reads it
//!   through [`VectorProvider`].
//! - `records`: per-label document payloads; `None` marks an erased label
//!   whose vector slot is still needed for graph routing.
//! - `by_doc_id`: external id to label.
//!
//! Labels are allocated strictly monotonically and never reused until
//! compaction renumbers the whole index. This keeps snapshot diffs and debug
//! traces stable.

pub mod metadata;

use crate::hnsw::{Label, VectorProvider};
use self::metadata::MetadataValue;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;

/// Errors from document store operations.
///
/// These indicate misuse by the calling layer (the manager validates inputs
/// before they reach the store), so the manager maps them to internal
/// errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// Embedding length does not match the store's dimensionality.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Expected dimensions.
        expected: usize,
        /// Actual dimensions provided.
        actual: usize,
    },

    /// Label is not the next slot in the allocation sequence.
    #[error("label {0} is not the next allocatable slot")]
    LabelOutOfSequence(Label),
}

/// A stored document payload. The embedding lives in the store's flat
/// buffer, not here.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DocumentRecord {
    /// Externally chosen stable identifier.
    pub doc_id: String,

    /// Opaque text payload, returned verbatim on retrieval.
    pub text: String,

    /// String-keyed scalar metadata.
    pub metadata: BTreeMap<String, MetadataValue>,

    /// Creation timestamp (ms since the Unix epoch, monotonic per index).
    pub created_at: u64,

    /// Last update timestamp.
    pub updated_at: u64,
}

/// The document store.
#[derive(Clone, Debug, Default)]
pub struct DocumentStore {
    dim: usize,
    vectors: Vec<f32>,
    records: Vec<Option<DocumentRecord>>,
    by_doc_id: HashMap<String, Label>,
}

impl DocumentStore {
    /// Creates an empty store for embeddings of `dim` components.
    #[must_use]
    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            vectors: Vec::new(),
            records: Vec::new(),
            by_doc_id: HashMap::new(),
        }
    }

    /// Embedding dimensionality.
    #[must_use]
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Number of live documents.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_doc_id.len()
    }

    /// True if no live documents exist.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_doc_id.is_empty()
    }

    /// Total allocated label slots (live + erased).
    #[must_use]
    pub fn slot_count(&self) -> usize {
        self.records.len()
    }

    /// Label currently mapped to `doc_id`, if any.
    #[must_use]
    pub fn label_of(&self, doc_id: &str) -> Option<Label> {
        self.by_doc_id.get(doc_id).copied()
    }

    /// Returns the existing label for `doc_id`, or the next fresh label.
    ///
    /// A fresh label is not reserved until [`put`](Self::put) writes it; the
    /// caller holds the write lock for the whole sequence.
    #[must_use]
    pub fn assign_or_get_label(&self, doc_id: &str) -> Label {
        self.by_doc_id
            .get(doc_id)
            .copied()
            .unwrap_or(self.records.len() as Label)
    }

    /// The next fresh label, unconditionally. Used by the replace path,
    /// which never reuses the old label.
    #[must_use]
    pub fn allocate_label(&self) -> Label {
        self.records.len() as Label
    }

    /// Writes a record and its embedding under a fresh `label`.
    ///
    /// # Errors
    ///
    /// - [`StoreError::LabelOutOfSequence`] if `label` is not the next slot.
    /// - [`StoreError::DimensionMismatch`] on a wrong-sized embedding.
    #[allow(clippy::too_many_arguments)]
    pub fn put(
        &mut self,
        label: Label,
        doc_id: &str,
        embedding: &[f32],
        text: &str,
        metadata: BTreeMap<String, MetadataValue>,
        created_at: u64,
        updated_at: u64,
    ) -> Result<(), StoreError> {
        if label as usize != self.records.len() {
            return Err(StoreError::LabelOutOfSequence(label));
        }
        if embedding.len() != self.dim {
            return Err(StoreError::DimensionMismatch {
                expected: self.dim,
                actual: embedding.len(),
            });
        }

        self.vectors.extend_from_slice(embedding);
        self.records.push(Some(DocumentRecord {
            doc_id: doc_id.to_string(),
            text: text.to_string(),
            metadata,
            created_at,
            updated_at,
        }));
        self.by_doc_id.insert(doc_id.to_string(), label);
        Ok(())
    }

    /// Record stored under `label`, if the label is live.
    #[must_use]
    pub fn get(&self, label: Label) -> Option<&DocumentRecord> {
        self.records.get(label as usize).and_then(Option::as_ref)
    }

    /// Record and label for `doc_id`, if present.
    #[must_use]
    pub fn get_by_doc_id(&self, doc_id: &str) -> Option<(Label, &DocumentRecord)> {
        let label = self.label_of(doc_id)?;
        self.get(label).map(|r| (label, r))
    }

    /// Embedding slice for any allocated `label`, live or erased.
    ///
    /// Erased labels keep their vector so the graph can route through the
    /// tombstoned node until compaction.
    ///
    /// # Panics
    ///
    /// Panics if `label` was never allocated.
    #[must_use]
    pub fn embedding(&self, label: Label) -> &[f32] {
        let start = label as usize * self.dim;
        &self.vectors[start..start + self.dim]
    }

    /// Removes the record for `doc_id` and returns the freed label (for the
    /// caller to tombstone in the graph) along with the record.
    ///
    /// The vector slot is retained.
    pub fn erase(&mut self, doc_id: &str) -> Option<(Label, DocumentRecord)> {
        let label = self.by_doc_id.remove(doc_id)?;
        let record = self.records[label as usize].take();
        record.map(|r| (label, r))
    }

    /// Reinstates a previously erased record. Rollback path only.
    pub(crate) fn reinstate(&mut self, label: Label, record: DocumentRecord) {
        self.by_doc_id.insert(record.doc_id.clone(), label);
        self.records[label as usize] = Some(record);
    }

    /// Removes the most recently written label. Rollback path only: undoes
    /// a `put` whose graph insertion failed.
    pub(crate) fn discard_tail(&mut self, label: Label) {
        if label as usize + 1 != self.records.len() {
            return;
        }
        if let Some(Some(record)) = self.records.pop() {
            self.by_doc_id.remove(&record.doc_id);
        }
        self.vectors.truncate(self.records.len() * self.dim);
    }

    /// Iterates live records in ascending label order. This is the
    /// snapshotting order, so snapshot output is stable across runs.
    pub fn iterate(&self) -> impl Iterator<Item = (Label, &DocumentRecord)> {
        self.records
            .iter()
            .enumerate()
            .filter_map(|(i, r)| r.as_ref().map(|rec| (i as Label, rec)))
    }

    /// The raw label-major embedding buffer, including erased slots.
    #[must_use]
    pub fn raw_vectors(&self) -> &[f32] {
        &self.vectors
    }

    /// Approximate resident memory in bytes.
    #[must_use]
    pub fn memory_usage(&self) -> usize {
        let records: usize = self
            .records
            .iter()
            .flatten()
            .map(|r| r.doc_id.len() + r.text.len() + r.metadata.len() * 64)
            .sum();
        std::mem::size_of::<Self>()
            + self.vectors.capacity() * std::mem::size_of::<f32>()
            + records
    }

    /// Rebuilds a store from snapshot parts. Used only by the snapshot
    /// codec, which validates labels and doc_id uniqueness before calling.
    pub(crate) fn from_parts(
        dim: usize,
        vectors: Vec<f32>,
        records: Vec<Option<DocumentRecord>>,
    ) -> Self {
        let by_doc_id = records
            .iter()
            .enumerate()
            .filter_map(|(i, r)| r.as_ref().map(|rec| (rec.doc_id.clone(), i as Label)))
            .collect();
        Self {
            dim,
            vectors,
            records,
            by_doc_id,
        }
    }
}

impl VectorProvider for DocumentStore {
    fn vector(&self, label: Label) -> &[f32] {
        self.embedding(label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn put_doc(store: &mut DocumentStore, doc_id: &str, embedding: &[f32]) -> Label {
        let label = store.assign_or_get_label(doc_id);
        store
            .put(label, doc_id, embedding, "text", BTreeMap::new(), 1, 1)
            .unwrap();
        label
    }

    #[test]
    fn test_put_and_get() {
        let mut store = DocumentStore::new(2);
        let label = put_doc(&mut store, "a", &[1.0, 2.0]);

        assert_eq!(label, 0);
        assert_eq!(store.len(), 1);
        assert_eq!(store.get(label).unwrap().doc_id, "a");
        assert_eq!(store.embedding(label), &[1.0, 2.0]);
        assert_eq!(store.get_by_doc_id("a").unwrap().0, 0);
    }

    #[test]
    fn test_labels_monotonic() {
        let mut store = DocumentStore::new(2);
        assert_eq!(put_doc(&mut store, "a", &[1.0, 0.0]), 0);
        assert_eq!(put_doc(&mut store, "b", &[0.0, 1.0]), 1);

        // Erasing does not free the slot for reuse.
        store.erase("a").unwrap();
        assert_eq!(store.allocate_label(), 2);
    }

    #[test]
    fn test_erase_keeps_vector() {
        let mut store = DocumentStore::new(2);
        let label = put_doc(&mut store, "a", &[1.0, 2.0]);

        let (freed, record) = store.erase("a").unwrap();
        assert_eq!(freed, label);
        assert_eq!(record.doc_id, "a");
        assert!(store.get(label).is_none());
        assert_eq!(store.len(), 0);
        // Routing still needs the embedding.
        assert_eq!(store.embedding(label), &[1.0, 2.0]);
    }

    #[test]
    fn test_erase_missing() {
        let mut store = DocumentStore::new(2);
        assert!(store.erase("ghost").is_none());
    }

    #[test]
    fn test_reinstate_round_trip() {
        let mut store = DocumentStore::new(2);
        let label = put_doc(&mut store, "a", &[1.0, 2.0]);
        let (_, record) = store.erase("a").unwrap();
        store.reinstate(label, record);
        assert_eq!(store.get_by_doc_id("a").unwrap().0, label);
    }

    #[test]
    fn test_discard_tail() {
        let mut store = DocumentStore::new(2);
        put_doc(&mut store, "a", &[1.0, 2.0]);
        let label = put_doc(&mut store, "b", &[3.0, 4.0]);

        store.discard_tail(label);
        assert_eq!(store.len(), 1);
        assert_eq!(store.slot_count(), 1);
        assert!(store.label_of("b").is_none());
        assert_eq!(store.raw_vectors(), &[1.0, 2.0]);
    }

    #[test]
    fn test_put_out_of_sequence() {
        let mut store = DocumentStore::new(2);
        let err = store
            .put(3, "a", &[1.0, 2.0], "t", BTreeMap::new(), 1, 1)
            .unwrap_err();
        assert_eq!(err, StoreError::LabelOutOfSequence(3));
    }

    #[test]
    fn test_put_dimension_mismatch() {
        let mut store = DocumentStore::new(2);
        let err = store
            .put(0, "a", &[1.0], "t", BTreeMap::new(), 1, 1)
            .unwrap_err();
        assert_eq!(
            err,
            StoreError::DimensionMismatch {
                expected: 2,
                actual: 1
            }
        );
        assert_eq!(store.slot_count(), 0);
    }

    #[test]
    fn test_iterate_ascending_order() {
        let mut store = DocumentStore::new(1);
        put_doc(&mut store, "a", &[0.0]);
        put_doc(&mut store, "b", &[1.0]);
        put_doc(&mut store, "c", &[2.0]);
        store.erase("b").unwrap();

        let labels: Vec<Label> = store.iterate().map(|(l, _)| l).collect();
        assert_eq!(labels, vec![0, 2]);
    }
}
