// Copyright 2025-Present Logship authors
// SPDX-License-Identifier: Apache-2.0

//! Dead-letter path for records that cannot be transformed or indexed.
//!
//! Entries go into a bounded channel drained by an operator-side task;
//! when the channel is full the entry is dropped and counted rather than
//! blocking the partition loop.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::warn;

use logship_model::LogRecord;

#[derive(Debug, Clone)]
pub struct DeadLetterEntry {
    pub partition: u32,
    pub offset: u64,
    pub reason: String,
    pub record: LogRecord,
}

#[derive(Clone)]
pub struct DeadLetterQueue {
    tx: mpsc::Sender<DeadLetterEntry>,
    total: Arc<AtomicU64>,
    dropped: Arc<AtomicU64>,
}

/// Create a dead-letter queue with a bounded capacity, returning the
/// producer side and the receiver to drain.
pub fn dead_letter_channel(capacity: usize) -> (DeadLetterQueue, mpsc::Receiver<DeadLetterEntry>) {
    let (tx, rx) = mpsc::channel(capacity);
    let queue = DeadLetterQueue {
        tx,
        total: Arc::new(AtomicU64::new(0)),
        dropped: Arc::new(AtomicU64::new(0)),
    };
    (queue, rx)
}

impl DeadLetterQueue {
    /// Record a dead-lettered entry. Never blocks; a full channel drops
    /// the entry and bumps the drop counter.
    pub fn push(&self, entry: DeadLetterEntry) {
        warn!(
            "dead-letter: partition {} offset {} from '{}': {}",
            entry.partition,
            entry.offset,
            entry.record.service(),
            entry.reason
        );
        self.total.fetch_add(1, Ordering::Relaxed);
        if self.tx.try_send(entry).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            warn!("dead-letter channel full, entry dropped");
        }
    }

    /// Total entries dead-lettered, including ones the full channel dropped.
    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use logship_model::Severity;

    fn entry(offset: u64) -> DeadLetterEntry {
        DeadLetterEntry {
            partition: 0,
            offset,
            reason: "invalid JSON".to_string(),
            record: LogRecord::new(1_000, "svc", Severity::Info, "{broken").unwrap(),
        }
    }

    #[tokio::test]
    async fn test_entries_are_drained_in_order() {
        let (queue, mut rx) = dead_letter_channel(4);
        queue.push(entry(1));
        queue.push(entry(2));
        assert_eq!(rx.recv().await.unwrap().offset, 1);
        assert_eq!(rx.recv().await.unwrap().offset, 2);
        assert_eq!(queue.total(), 2);
        assert_eq!(queue.dropped(), 0);
    }

    #[tokio::test]
    async fn test_full_channel_drops_instead_of_blocking() {
        let (queue, _rx) = dead_letter_channel(1);
        queue.push(entry(1));
        queue.push(entry(2));
        assert_eq!(queue.total(), 2);
        assert_eq!(queue.dropped(), 1);
    }
}
