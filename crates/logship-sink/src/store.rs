// Copyright 2025-Present Logship authors
// SPDX-License-Identifier: Apache-2.0

//! The document store behind the indexing sink.

use std::collections::HashMap;
use std::sync::Mutex;

use tracing::debug;

use logship_model::IndexDocument;

use crate::schema::SchemaMapping;

/// Per-batch write outcome: acked ids committed upstream, rejected ids
/// surfaced with their reason.
#[derive(Debug, Clone, Default)]
pub struct BatchResult {
    pub acked: Vec<String>,
    pub rejected: Vec<(String, String)>,
}

impl BatchResult {
    pub fn fully_acked(&self) -> bool {
        self.rejected.is_empty()
    }
}

#[derive(Default)]
struct IndexState {
    schema: SchemaMapping,
    docs: HashMap<String, IndexDocument>,
}

/// In-memory searchable store: one schema mapping and one id-keyed
/// document map per index name. Shared via `Arc` between the consumers
/// writing and the query surface reading.
#[derive(Default)]
pub struct IndexStore {
    indexes: Mutex<HashMap<String, IndexState>>,
}

impl IndexStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write a batch of documents to one index.
    ///
    /// Idempotent by document id: re-writing an id with the same body is a
    /// no-op reported as acked; a different body replaces the stored
    /// document wholesale. A schema rejection skips only the offending
    /// document.
    pub fn write_batch(&self, index: &str, documents: Vec<IndexDocument>) -> BatchResult {
        #[allow(clippy::expect_used)]
        let mut indexes = self.indexes.lock().expect("lock poisoned");
        let state = indexes.entry(index.to_string()).or_default();

        let mut result = BatchResult::default();
        for document in documents {
            if let Err(reason) = state.schema.validate_and_extend(&document) {
                debug!("index '{index}': rejected document '{}': {reason}", document.doc_id);
                result.rejected.push((document.doc_id, reason));
                continue;
            }
            let doc_id = document.doc_id.clone();
            match state.docs.get(&doc_id) {
                Some(existing) if *existing == document => {
                    // Redelivered duplicate; success without a write.
                }
                _ => {
                    state.docs.insert(doc_id.clone(), document);
                }
            }
            result.acked.push(doc_id);
        }
        result
    }

    pub fn doc_count(&self, index: &str) -> usize {
        #[allow(clippy::expect_used)]
        let indexes = self.indexes.lock().expect("lock poisoned");
        indexes.get(index).map(|s| s.docs.len()).unwrap_or(0)
    }

    pub fn get(&self, index: &str, doc_id: &str) -> Option<IndexDocument> {
        #[allow(clippy::expect_used)]
        let indexes = self.indexes.lock().expect("lock poisoned");
        indexes.get(index).and_then(|s| s.docs.get(doc_id).cloned())
    }

    pub fn index_names(&self) -> Vec<String> {
        #[allow(clippy::expect_used)]
        let indexes = self.indexes.lock().expect("lock poisoned");
        indexes.keys().cloned().collect()
    }

    /// Snapshot of an index's documents, for the query surface.
    pub(crate) fn snapshot(&self, index: &str) -> Vec<IndexDocument> {
        #[allow(clippy::expect_used)]
        let indexes = self.indexes.lock().expect("lock poisoned");
        indexes
            .get(index)
            .map(|s| s.docs.values().cloned().collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use logship_model::{AttrValue, Severity};

    fn doc(doc_id: &str, message: &str) -> IndexDocument {
        IndexDocument {
            doc_id: doc_id.to_string(),
            timestamp_ms: 1,
            service: "svc".to_string(),
            severity: Severity::Info,
            message: message.to_string(),
            attributes: Default::default(),
        }
    }

    #[test]
    fn test_write_batch_acks_all() {
        let store = IndexStore::new();
        let result = store.write_batch("logs", vec![doc("a", "1"), doc("b", "2")]);
        assert!(result.fully_acked());
        assert_eq!(result.acked, vec!["a", "b"]);
        assert_eq!(store.doc_count("logs"), 2);
    }

    #[test]
    fn test_redelivery_is_idempotent() {
        let store = IndexStore::new();
        store.write_batch("logs", vec![doc("a", "same")]);
        let result = store.write_batch("logs", vec![doc("a", "same")]);
        assert!(result.fully_acked());
        assert_eq!(store.doc_count("logs"), 1);
    }

    #[test]
    fn test_rewrite_replaces_by_id() {
        let store = IndexStore::new();
        store.write_batch("logs", vec![doc("a", "old")]);
        store.write_batch("logs", vec![doc("a", "new")]);
        assert_eq!(store.doc_count("logs"), 1);
        assert_eq!(store.get("logs", "a").unwrap().message, "new");
    }

    #[test]
    fn test_schema_rejection_skips_only_offender() {
        let store = IndexStore::new();
        let good = doc("a", "1");
        let mut fixed = doc("b", "2");
        fixed
            .attributes
            .insert("latency".to_string(), AttrValue::Int(10));
        store.write_batch("logs", vec![good, fixed]);

        let mut conflicting = doc("c", "3");
        conflicting
            .attributes
            .insert("latency".to_string(), AttrValue::Str("slow".into()));
        let fine = doc("d", "4");

        let result = store.write_batch("logs", vec![conflicting, fine]);
        assert_eq!(result.acked, vec!["d"]);
        assert_eq!(result.rejected.len(), 1);
        assert_eq!(result.rejected[0].0, "c");
        assert_eq!(store.doc_count("logs"), 3);
    }

    #[test]
    fn test_indexes_are_independent() {
        let store = IndexStore::new();
        store.write_batch("app", vec![doc("a", "1")]);
        store.write_batch("audit", vec![doc("a", "1")]);
        assert_eq!(store.doc_count("app"), 1);
        assert_eq!(store.doc_count("audit"), 1);
        let mut names = store.index_names();
        names.sort();
        assert_eq!(names, vec!["app", "audit"]);
    }
}
