// Copyright 2025-Present Logship authors
// SPDX-License-Identifier: Apache-2.0

//! Read-only search over the index store.

use std::sync::Arc;

use logship_model::{AttrValue, IndexDocument, Severity};

use crate::error::SinkError;
use crate::store::IndexStore;

/// Half-open time window `[start_ms, end_ms)` in epoch milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    pub start_ms: i64,
    pub end_ms: i64,
}

impl TimeRange {
    pub fn new(start_ms: i64, end_ms: i64) -> Self {
        TimeRange { start_ms, end_ms }
    }

    pub fn contains(&self, timestamp_ms: i64) -> bool {
        timestamp_ms >= self.start_ms && timestamp_ms < self.end_ms
    }
}

/// Search predicate: free-text substring over the message, structured
/// equality filters over attributes, and a minimum severity. All parts
/// are conjunctive; an unset part matches everything.
#[derive(Debug, Clone, Default)]
pub struct SearchQuery {
    pub text: Option<String>,
    pub filters: Vec<(String, AttrValue)>,
    pub min_severity: Option<Severity>,
}

impl SearchQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn with_filter(mut self, field: impl Into<String>, value: impl Into<AttrValue>) -> Self {
        self.filters.push((field.into(), value.into()));
        self
    }

    pub fn with_min_severity(mut self, severity: Severity) -> Self {
        self.min_severity = Some(severity);
        self
    }

    pub fn matches(&self, document: &IndexDocument) -> bool {
        if let Some(min) = self.min_severity {
            if document.severity < min {
                return false;
            }
        }
        if let Some(text) = &self.text {
            if !document.message.contains(text.as_str()) {
                return false;
            }
        }
        self.filters
            .iter()
            .all(|(field, value)| document.attributes.get(field) == Some(value))
    }
}

/// One page of search results, ordered by timestamp then document id.
#[derive(Debug, Clone)]
pub struct SearchPage {
    pub documents: Vec<IndexDocument>,
    /// Matches across the whole range, not just this page.
    pub total: usize,
    pub offset: usize,
}

/// Run a query against one index over a time window, with offset/limit
/// pagination. The ordering is total (timestamp, then doc id), so pages
/// are stable across calls as long as the index does not change.
pub fn search(
    store: &Arc<IndexStore>,
    index: &str,
    query: &SearchQuery,
    range: TimeRange,
    offset: usize,
    limit: usize,
) -> Result<SearchPage, SinkError> {
    if range.end_ms < range.start_ms {
        return Err(SinkError::InvalidInput(format!(
            "time range ends ({}) before it starts ({})",
            range.end_ms, range.start_ms
        )));
    }

    let mut matches: Vec<IndexDocument> = store
        .snapshot(index)
        .into_iter()
        .filter(|doc| range.contains(doc.timestamp_ms) && query.matches(doc))
        .collect();
    matches.sort_by(|a, b| {
        a.timestamp_ms
            .cmp(&b.timestamp_ms)
            .then_with(|| a.doc_id.cmp(&b.doc_id))
    });

    let total = matches.len();
    let documents = matches.into_iter().skip(offset).take(limit).collect();
    Ok(SearchPage {
        documents,
        total,
        offset,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with_docs(docs: Vec<IndexDocument>) -> Arc<IndexStore> {
        let store = Arc::new(IndexStore::new());
        store.write_batch("logs", docs);
        store
    }

    fn doc(doc_id: &str, timestamp_ms: i64, severity: Severity, message: &str) -> IndexDocument {
        IndexDocument {
            doc_id: doc_id.to_string(),
            timestamp_ms,
            service: "svc".to_string(),
            severity,
            message: message.to_string(),
            attributes: Default::default(),
        }
    }

    #[test]
    fn test_text_and_severity_filters() {
        let store = store_with_docs(vec![
            doc("a", 10, Severity::Info, "user login ok"),
            doc("b", 20, Severity::Error, "user login failed"),
            doc("c", 30, Severity::Error, "payment failed"),
        ]);
        let query = SearchQuery::new()
            .with_text("login")
            .with_min_severity(Severity::Warn);
        let page = search(&store, "logs", &query, TimeRange::new(0, 100), 0, 10).unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.documents[0].doc_id, "b");
    }

    #[test]
    fn test_attribute_equality_filter() {
        let mut tagged = doc("a", 10, Severity::Info, "m");
        tagged
            .attributes
            .insert("region".to_string(), AttrValue::Str("eu".into()));
        let store = store_with_docs(vec![tagged, doc("b", 20, Severity::Info, "m")]);

        let query = SearchQuery::new().with_filter("region", "eu");
        let page = search(&store, "logs", &query, TimeRange::new(0, 100), 0, 10).unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.documents[0].doc_id, "a");
    }

    #[test]
    fn test_pagination_is_stable() {
        let store = store_with_docs(vec![
            doc("c", 30, Severity::Info, "m"),
            doc("a", 10, Severity::Info, "m"),
            doc("b", 20, Severity::Info, "m"),
        ]);
        let query = SearchQuery::new();
        let first = search(&store, "logs", &query, TimeRange::new(0, 100), 0, 2).unwrap();
        let second = search(&store, "logs", &query, TimeRange::new(0, 100), 2, 2).unwrap();
        assert_eq!(first.total, 3);
        let ids: Vec<_> = first
            .documents
            .iter()
            .chain(second.documents.iter())
            .map(|d| d.doc_id.clone())
            .collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_time_range_is_half_open() {
        let store = store_with_docs(vec![
            doc("a", 10, Severity::Info, "m"),
            doc("b", 20, Severity::Info, "m"),
        ]);
        let page = search(
            &store,
            "logs",
            &SearchQuery::new(),
            TimeRange::new(10, 20),
            0,
            10,
        )
        .unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.documents[0].doc_id, "a");
    }

    #[test]
    fn test_inverted_range_is_rejected() {
        let store = store_with_docs(vec![]);
        let err = search(
            &store,
            "logs",
            &SearchQuery::new(),
            TimeRange::new(20, 10),
            0,
            10,
        )
        .unwrap_err();
        assert!(matches!(err, SinkError::InvalidInput(_)));
    }

    #[test]
    fn test_unknown_index_is_empty() {
        let store = Arc::new(IndexStore::new());
        let page = search(
            &store,
            "nope",
            &SearchQuery::new(),
            TimeRange::new(0, 100),
            0,
            10,
        )
        .unwrap();
        assert_eq!(page.total, 0);
    }
}
