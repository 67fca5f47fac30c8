//! The bridge adapter: a JSON-shaped surface over the index manager.
//!
//! Host layers (HTTP handlers, CLIs, language bindings, tests) that work in
//! loosely typed values talk to this one stable surface instead of the
//! typed manager contract. The bridge owns nothing but a handle and
//! reimplements no manager logic: it converts shapes on the way in, calls
//! exactly one manager operation, and converts the outcome (or the
//! structured error) on the way out.
//!
//! Errors always come back as `{"error": {"kind", "message", "doc_id"?}}`;
//! statuses as `{"status": "..."}` plus operation-specific fields. The
//! `load_from` statuses are the literal strings `loaded`,
//! `initialized_empty`, and `failed`.

use crate::error::IndexError;
use crate::manager::{
    BatchRecord, LoadOutcome, RemoveOutcome, SearchFilter, UpsertOutcome, VectorIndex,
};
use crate::store::metadata::MetadataValue;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::path::Path;

/// A thin JSON adapter over a [`VectorIndex`] handle.
#[derive(Clone)]
pub struct IndexBridge {
    index: VectorIndex,
}

impl IndexBridge {
    /// Wraps an index handle.
    #[must_use]
    pub fn new(index: VectorIndex) -> Self {
        Self { index }
    }

    /// The underlying handle.
    #[must_use]
    pub fn index(&self) -> &VectorIndex {
        &self.index
    }

    /// Upserts one document from a JSON object:
    /// `{"doc_id", "embedding": [..], "text", "metadata"?: {..}}`.
    ///
    /// Returns `{"status": "inserted" | "updated"}` or an error object.
    #[must_use]
    pub fn upsert(&self, document: &Value) -> Value {
        match self.upsert_impl(document) {
            Ok(outcome) => json!({ "status": outcome_str(outcome) }),
            Err(e) => error_value(&e),
        }
    }

    fn upsert_impl(&self, document: &Value) -> Result<UpsertOutcome, IndexError> {
        let doc_id = required_str(document, "doc_id")?;
        let embedding = required_embedding(document)?;
        let text = document
            .get("text")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let metadata = decode_metadata(document.get("metadata"))?;
        self.index
            .upsert(doc_id, &embedding, text, metadata, None)
    }

    /// Upserts a JSON array of documents, returning one status object per
    /// record: `{"doc_id", "status"}` or `{"doc_id", "error": {..}}`.
    #[must_use]
    pub fn upsert_batch(&self, documents: &Value) -> Value {
        let Some(entries) = documents.as_array() else {
            return error_value(&IndexError::invalid("expected an array of documents"));
        };

        let mut records = Vec::with_capacity(entries.len());
        let mut statuses: Vec<Value> = Vec::with_capacity(entries.len());
        for entry in entries {
            match decode_record(entry) {
                Ok(record) => records.push(record),
                Err(e) => statuses.push(json!({
                    "doc_id": entry.get("doc_id").and_then(Value::as_str).unwrap_or_default(),
                    "error": error_body(&e),
                })),
            }
        }

        match self.index.upsert_batch(records, None) {
            Ok(results) => {
                for status in results {
                    statuses.push(match status.result {
                        Ok(outcome) => json!({
                            "doc_id": status.doc_id,
                            "status": outcome_str(outcome),
                        }),
                        Err(e) => json!({
                            "doc_id": status.doc_id,
                            "error": error_body(&e),
                        }),
                    });
                }
                Value::Array(statuses)
            }
            Err(e) => error_value(&e),
        }
    }

    /// Removes a document. Returns `{"status": "removed" | "not_found"}`.
    #[must_use]
    pub fn remove(&self, doc_id: &str) -> Value {
        match self.index.remove(doc_id, None) {
            Ok(RemoveOutcome::Removed) => json!({ "status": "removed" }),
            Ok(RemoveOutcome::NotFound) => json!({ "status": "not_found" }),
            Err(e) => error_value(&e),
        }
    }

    /// Searches from a JSON request:
    /// `{"embedding": [..], "k", "filter"?: {key: scalar, ..}}`.
    ///
    /// Returns `{"results": [{"doc_id", "score", "text", "metadata"}, ..]}`.
    #[must_use]
    pub fn search(&self, request: &Value) -> Value {
        match self.search_impl(request) {
            Ok(results) => json!({ "results": results }),
            Err(e) => error_value(&e),
        }
    }

    fn search_impl(&self, request: &Value) -> Result<Vec<Value>, IndexError> {
        let embedding = required_embedding(request)?;
        let k = request
            .get("k")
            .and_then(Value::as_u64)
            .ok_or_else(|| IndexError::invalid("missing or non-integer field 'k'"))?;
        let k = usize::try_from(k)
            .map_err(|_| IndexError::invalid("field 'k' out of range"))?;

        let filter = match request.get("filter") {
            None | Some(Value::Null) => None,
            Some(value) => Some(decode_filter(value)?),
        };

        let hits = self
            .index
            .search(&embedding, k, filter.as_ref(), None)?;
        Ok(hits
            .into_iter()
            .map(|hit| {
                json!({
                    "doc_id": hit.doc_id,
                    "score": hit.score,
                    "text": hit.text,
                    "metadata": encode_metadata(&hit.metadata),
                })
            })
            .collect())
    }

    /// Fetches a document. Returns the full record or an error object.
    #[must_use]
    pub fn get(&self, doc_id: &str) -> Value {
        match self.index.get(doc_id, None) {
            Ok(doc) => json!({
                "doc_id": doc.doc_id,
                "embedding": doc.embedding,
                "text": doc.text,
                "metadata": encode_metadata(&doc.metadata),
                "created_at": doc.created_at,
                "updated_at": doc.updated_at,
            }),
            Err(e) => error_value(&e),
        }
    }

    /// Saves a snapshot. Returns `{"status": "saved"}` or an error object.
    #[must_use]
    pub fn save_as(&self, path: &str, update_default: bool) -> Value {
        match self
            .index
            .save_as(Path::new(path), update_default, None)
        {
            Ok(()) => json!({ "status": "saved" }),
            Err(e) => error_value(&e),
        }
    }

    /// Loads a snapshot. Returns `{"status": "loaded" | "initialized_empty"}`
    /// on success; on failure `{"status": "failed", "error": {..}}` with
    /// the in-memory state unchanged.
    #[must_use]
    pub fn load_from(&self, path: &str, update_default: bool) -> Value {
        match self
            .index
            .load_from(Path::new(path), update_default, None)
        {
            Ok(LoadOutcome::Loaded) => json!({ "status": "loaded" }),
            Ok(LoadOutcome::InitializedEmpty) => json!({ "status": "initialized_empty" }),
            Err(e) => json!({ "status": "failed", "error": error_body(&e) }),
        }
    }

    /// Rebuilds the index without tombstones.
    #[must_use]
    pub fn compact(&self) -> Value {
        match self.index.compact(None) {
            Ok(()) => json!({ "status": "compacted" }),
            Err(e) => error_value(&e),
        }
    }

    /// Current statistics as a JSON object.
    #[must_use]
    pub fn stats(&self) -> Value {
        match self.index.stats(None) {
            Ok(stats) => serde_json::to_value(stats).unwrap_or(Value::Null),
            Err(e) => error_value(&e),
        }
    }

    /// Current health as a JSON object.
    #[must_use]
    pub fn health(&self) -> Value {
        match self.index.health(None) {
            Ok(health) => serde_json::to_value(health).unwrap_or(Value::Null),
            Err(e) => error_value(&e),
        }
    }
}

fn outcome_str(outcome: UpsertOutcome) -> &'static str {
    match outcome {
        UpsertOutcome::Inserted => "inserted",
        UpsertOutcome::Updated => "updated",
    }
}

fn error_body(err: &IndexError) -> Value {
    let mut body = Map::new();
    body.insert("kind".to_string(), Value::from(err.kind()));
    body.insert("message".to_string(), Value::from(err.to_string()));
    if let Some(doc_id) = err.doc_id() {
        body.insert("doc_id".to_string(), Value::from(doc_id));
    }
    Value::Object(body)
}

fn error_value(err: &IndexError) -> Value {
    json!({ "error": error_body(err) })
}

fn required_str<'a>(value: &'a Value, field: &str) -> Result<&'a str, IndexError> {
    value
        .get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| IndexError::invalid(format!("missing or non-string field '{field}'")))
}

fn required_embedding(value: &Value) -> Result<Vec<f32>, IndexError> {
    let array = value
        .get("embedding")
        .and_then(Value::as_array)
        .ok_or_else(|| IndexError::invalid("missing or non-array field 'embedding'"))?;
    #[allow(clippy::cast_possible_truncation)]
    let components: Result<Vec<f32>, IndexError> = array
        .iter()
        .map(|v| {
            v.as_f64()
                .map(|f| f as f32)
                .ok_or_else(|| IndexError::invalid("embedding components must be numbers"))
        })
        .collect();
    components
}

fn decode_record(entry: &Value) -> Result<BatchRecord, IndexError> {
    Ok(BatchRecord {
        doc_id: required_str(entry, "doc_id")?.to_string(),
        embedding: required_embedding(entry)?,
        text: entry
            .get("text")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        metadata: decode_metadata(entry.get("metadata"))?,
    })
}

fn decode_scalar(key: &str, value: &Value) -> Result<MetadataValue, IndexError> {
    match value {
        Value::String(s) => Ok(MetadataValue::String(s.clone())),
        Value::Bool(b) => Ok(MetadataValue::Boolean(*b)),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(MetadataValue::Integer(i))
            } else if let Some(f) = n.as_f64() {
                Ok(MetadataValue::Float(f))
            } else {
                Err(IndexError::invalid(format!(
                    "metadata value for '{key}' is out of range"
                )))
            }
        }
        _ => Err(IndexError::invalid(format!(
            "metadata value for '{key}' must be a scalar"
        ))),
    }
}

fn decode_metadata(
    value: Option<&Value>,
) -> Result<BTreeMap<String, MetadataValue>, IndexError> {
    match value {
        None | Some(Value::Null) => Ok(BTreeMap::new()),
        Some(Value::Object(entries)) => entries
            .iter()
            .map(|(key, v)| decode_scalar(key, v).map(|mv| (key.clone(), mv)))
            .collect(),
        Some(_) => Err(IndexError::invalid("metadata must be an object")),
    }
}

fn decode_filter(value: &Value) -> Result<SearchFilter, IndexError> {
    let Some(entries) = value.as_object() else {
        return Err(IndexError::invalid("filter must be an object"));
    };
    let mut filter = SearchFilter::default();
    for (key, v) in entries {
        filter = filter.and_equals(key.clone(), decode_scalar(key, v)?);
    }
    Ok(filter)
}

fn encode_metadata(metadata: &BTreeMap<String, MetadataValue>) -> Value {
    let entries: Map<String, Value> = metadata
        .iter()
        .map(|(key, value)| {
            let v = match value {
                MetadataValue::String(s) => Value::from(s.clone()),
                MetadataValue::Integer(i) => Value::from(*i),
                MetadataValue::Float(f) => Value::from(*f),
                MetadataValue::Boolean(b) => Value::from(*b),
            };
            (key.clone(), v)
        })
        .collect();
    Value::Object(entries)
}
