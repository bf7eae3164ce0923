// Copyright 2025-Present Logship authors
// SPDX-License-Identifier: Apache-2.0

//! Bounded local record queues, one per partition key.
//!
//! At-least-once hand-off: the shipper copies a batch out with
//! [`LocalQueues::peek_batch`] and only removes it via
//! [`LocalQueues::release`] after the buffer acknowledged the append.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::timeout;

use logship_model::LogRecord;

pub(crate) struct LocalQueues {
    inner: Mutex<HashMap<String, VecDeque<LogRecord>>>,
    space: Notify,
    data: Notify,
    capacity: usize,
}

impl LocalQueues {
    pub(crate) fn new(capacity: usize) -> Self {
        LocalQueues {
            inner: Mutex::new(HashMap::new()),
            space: Notify::new(),
            data: Notify::new(),
            capacity,
        }
    }

    /// Enqueue without waiting. On a full queue the record is handed back
    /// so the caller can apply its overflow policy.
    pub(crate) fn try_enqueue(&self, record: LogRecord) -> Result<(), LogRecord> {
        #[allow(clippy::expect_used)]
        let mut queues = self.inner.lock().expect("lock poisoned");
        let queue = queues
            .entry(record.partition_key().to_string())
            .or_default();
        if queue.len() >= self.capacity {
            return Err(record);
        }
        queue.push_back(record);
        self.data.notify_one();
        Ok(())
    }

    /// Enqueue, waiting up to `wait` for space (Block overflow mode).
    pub(crate) async fn enqueue_blocking(
        &self,
        record: LogRecord,
        wait: Duration,
    ) -> Result<(), LogRecord> {
        let deadline = tokio::time::Instant::now() + wait;
        let mut record = record;
        loop {
            // Register for the space notification before re-checking, so a
            // release between the check and the wait is not lost.
            let notified = self.space.notified();
            match self.try_enqueue(record) {
                Ok(()) => return Ok(()),
                Err(back) => record = back,
            }
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return Err(record);
            }
            let _ = timeout(remaining, notified).await;
        }
    }

    /// Copy (without removing) up to `max` records from the front of one
    /// non-empty queue. Returns the partition key and the copies.
    pub(crate) fn peek_batch(&self, max: usize) -> Option<(String, Vec<LogRecord>)> {
        #[allow(clippy::expect_used)]
        let queues = self.inner.lock().expect("lock poisoned");
        for (key, queue) in queues.iter() {
            if !queue.is_empty() {
                let batch: Vec<LogRecord> = queue.iter().take(max).cloned().collect();
                return Some((key.clone(), batch));
            }
        }
        None
    }

    /// Drop `count` acknowledged records from the front of `key`'s queue.
    pub(crate) fn release(&self, key: &str, count: usize) {
        #[allow(clippy::expect_used)]
        let mut queues = self.inner.lock().expect("lock poisoned");
        if let Some(queue) = queues.get_mut(key) {
            for _ in 0..count.min(queue.len()) {
                queue.pop_front();
            }
            if queue.is_empty() {
                queues.remove(key);
            }
        }
        drop(queues);
        self.space.notify_waiters();
    }

    pub(crate) fn queued(&self) -> usize {
        #[allow(clippy::expect_used)]
        let queues = self.inner.lock().expect("lock poisoned");
        queues.values().map(VecDeque::len).sum()
    }

    pub(crate) async fn wait_for_data(&self) {
        self.data.notified().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use logship_model::Severity;

    fn record(service: &str, message: &str) -> LogRecord {
        LogRecord::new(1_000, service, Severity::Info, message).unwrap()
    }

    #[test]
    fn test_enqueue_bounded_per_key() {
        let queues = LocalQueues::new(2);
        assert!(queues.try_enqueue(record("a", "1")).is_ok());
        assert!(queues.try_enqueue(record("a", "2")).is_ok());
        assert!(queues.try_enqueue(record("a", "3")).is_err());
        // A different partition key has its own bound.
        assert!(queues.try_enqueue(record("b", "1")).is_ok());
        assert_eq!(queues.queued(), 3);
    }

    #[test]
    fn test_peek_does_not_remove() {
        let queues = LocalQueues::new(8);
        queues.try_enqueue(record("a", "1")).unwrap();
        queues.try_enqueue(record("a", "2")).unwrap();

        let (key, batch) = queues.peek_batch(10).unwrap();
        assert_eq!(key, "a");
        assert_eq!(batch.len(), 2);
        assert_eq!(queues.queued(), 2);

        queues.release(&key, batch.len());
        assert_eq!(queues.queued(), 0);
        assert!(queues.peek_batch(10).is_none());
    }

    #[tokio::test]
    async fn test_blocking_enqueue_times_out() {
        let queues = LocalQueues::new(1);
        queues.try_enqueue(record("a", "1")).unwrap();
        let result = queues
            .enqueue_blocking(record("a", "2"), Duration::from_millis(20))
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_blocking_enqueue_wakes_on_release() {
        let queues = std::sync::Arc::new(LocalQueues::new(1));
        queues.try_enqueue(record("a", "1")).unwrap();

        let waiter = std::sync::Arc::clone(&queues);
        let task = tokio::spawn(async move {
            waiter
                .enqueue_blocking(record("a", "2"), Duration::from_secs(2))
                .await
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        queues.release("a", 1);

        let result = task.await.expect("task failed");
        assert!(result.is_ok());
        assert_eq!(queues.queued(), 1);
    }
}
