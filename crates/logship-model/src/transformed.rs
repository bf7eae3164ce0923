// Copyright 2025-Present Logship authors
// SPDX-License-Identifier: Apache-2.0

//! Derived record types flowing out of the consumer/aggregator.

use serde::{Deserialize, Serialize};

use crate::record::{Attributes, LogRecord};
use crate::severity::Severity;

/// Output of the transform pipeline for a single consumed record.
///
/// The document id is stable across redeliveries (service id, partition and
/// offset), which is what makes sink writes idempotent: a crash between
/// sink-write and offset commit causes the same document to be written
/// again under the same id.
#[derive(Debug, Clone, PartialEq)]
pub struct TransformedRecord {
    pub index: String,
    pub doc_id: String,
    pub partition: u32,
    pub offset: u64,
    pub timestamp_ms: i64,
    pub service: String,
    pub severity: Severity,
    pub message: String,
    pub attributes: Attributes,
}

impl TransformedRecord {
    /// Derive from a source record at a known (partition, offset) position.
    pub fn derive(record: &LogRecord, index: impl Into<String>, partition: u32, offset: u64) -> Self {
        TransformedRecord {
            index: index.into(),
            doc_id: doc_id(record.service(), partition, offset),
            partition,
            offset,
            timestamp_ms: record.timestamp_ms(),
            service: record.service().to_string(),
            severity: record.severity(),
            message: record.message().to_string(),
            attributes: record.attributes().clone(),
        }
    }

    pub fn into_document(self) -> IndexDocument {
        IndexDocument {
            doc_id: self.doc_id,
            timestamp_ms: self.timestamp_ms,
            service: self.service,
            severity: self.severity,
            message: self.message,
            attributes: self.attributes,
        }
    }
}

/// Stable document id for a record at a given position.
pub fn doc_id(service: &str, partition: u32, offset: u64) -> String {
    format!("{service}-{partition}-{offset}")
}

/// The unit persisted by the indexing sink, keyed by document id within an
/// index. Created on first write, replaced wholesale on re-write of the
/// same id, never patched field-wise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexDocument {
    pub doc_id: String,
    pub timestamp_ms: i64,
    pub service: String,
    pub severity: Severity,
    pub message: String,
    #[serde(default)]
    pub attributes: Attributes,
}
