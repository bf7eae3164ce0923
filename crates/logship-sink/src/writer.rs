// Copyright 2025-Present Logship authors
// SPDX-License-Identifier: Apache-2.0

//! Batching layer between a consumer and the index store.
//!
//! Documents are grouped by target index and flushed when the batch-size
//! threshold is reached or the max-latency timer elapses, trading
//! throughput against indexing latency. `flush` returns the per-document
//! ack status the consumer needs before committing offsets.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use logship_model::TransformedRecord;

use crate::store::{BatchResult, IndexStore};

pub struct BatchWriter {
    store: Arc<IndexStore>,
    max_batch_size: usize,
    max_batch_latency: Duration,
    pending: Vec<TransformedRecord>,
    opened_at: Option<Instant>,
}

impl BatchWriter {
    pub fn new(store: Arc<IndexStore>, max_batch_size: usize, max_batch_latency: Duration) -> Self {
        BatchWriter {
            store,
            max_batch_size,
            max_batch_latency,
            pending: Vec::new(),
            opened_at: None,
        }
    }

    /// Queue a record for indexing. Returns the batch result when the
    /// push crossed the size threshold and triggered a flush.
    pub fn push(&mut self, record: TransformedRecord) -> Option<BatchResult> {
        if self.pending.is_empty() {
            self.opened_at = Some(Instant::now());
        }
        self.pending.push(record);
        if self.pending.len() >= self.max_batch_size {
            return Some(self.flush());
        }
        None
    }

    /// Whether the max-latency timer for the open batch has elapsed.
    pub fn should_flush(&self) -> bool {
        match self.opened_at {
            Some(opened_at) if !self.pending.is_empty() => {
                opened_at.elapsed() >= self.max_batch_latency
            }
            _ => false,
        }
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Write everything pending, grouped by target index, and return the
    /// merged per-document ack status.
    pub fn flush(&mut self) -> BatchResult {
        let mut by_index: HashMap<String, Vec<TransformedRecord>> = HashMap::new();
        for record in self.pending.drain(..) {
            by_index.entry(record.index.clone()).or_default().push(record);
        }
        self.opened_at = None;

        let mut merged = BatchResult::default();
        for (index, records) in by_index {
            let documents = records.into_iter().map(|r| r.into_document()).collect();
            let result = self.store.write_batch(&index, documents);
            merged.acked.extend(result.acked);
            merged.rejected.extend(result.rejected);
        }
        merged
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use logship_model::{LogRecord, Severity};

    fn transformed(offset: u64) -> TransformedRecord {
        let record = LogRecord::new(1_000, "svc-a", Severity::Info, "m").unwrap();
        TransformedRecord::derive(&record, "logs", 0, offset)
    }

    #[test]
    fn test_size_threshold_triggers_flush() {
        let store = Arc::new(IndexStore::new());
        let mut writer = BatchWriter::new(Arc::clone(&store), 3, Duration::from_secs(60));

        assert!(writer.push(transformed(0)).is_none());
        assert!(writer.push(transformed(1)).is_none());
        let result = writer.push(transformed(2)).expect("size flush expected");
        assert_eq!(result.acked.len(), 3);
        assert_eq!(writer.pending(), 0);
        assert_eq!(store.doc_count("logs"), 3);
    }

    #[test]
    fn test_latency_timer_elapses() {
        let store = Arc::new(IndexStore::new());
        let mut writer = BatchWriter::new(store, 100, Duration::from_millis(0));
        assert!(!writer.should_flush());
        writer.push(transformed(0));
        assert!(writer.should_flush());
        let result = writer.flush();
        assert_eq!(result.acked.len(), 1);
        assert!(!writer.should_flush());
    }

    #[test]
    fn test_flush_groups_by_index() {
        let store = Arc::new(IndexStore::new());
        let mut writer = BatchWriter::new(Arc::clone(&store), 100, Duration::from_secs(60));

        let record = LogRecord::new(1_000, "svc-a", Severity::Info, "m").unwrap();
        writer.push(TransformedRecord::derive(&record, "app", 0, 0));
        writer.push(TransformedRecord::derive(&record, "audit", 0, 0));
        let result = writer.flush();
        assert_eq!(result.acked.len(), 2);
        assert_eq!(store.doc_count("app"), 1);
        assert_eq!(store.doc_count("audit"), 1);
    }
}
