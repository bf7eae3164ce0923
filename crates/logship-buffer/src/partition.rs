// Copyright 2025-Present Logship authors
// SPDX-License-Identifier: Apache-2.0

//! A single partition: an ordered, append-only sequence of records with
//! strictly increasing, gapless offsets.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use logship_model::LogRecord;

use crate::error::BufferError;

struct StoredRecord {
    offset: u64,
    appended_at: Instant,
    bytes: usize,
    record: LogRecord,
}

/// Result of a fetch: ordered records, a hint for the next fetch position,
/// and a gap marker set when retention purged records the caller had not
/// yet consumed.
#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub records: Vec<(u64, LogRecord)>,
    pub next_offset: u64,
    pub gap: bool,
}

pub(crate) struct PartitionLog {
    index: u32,
    base_offset: u64,
    next_offset: u64,
    records: VecDeque<StoredRecord>,
    buffered_bytes: usize,
    saturated: bool,
    // Retry-safe re-append: recently seen batch tokens and the offsets
    // they were assigned.
    tokens: HashMap<String, Vec<u64>>,
    token_order: VecDeque<String>,
}

impl PartitionLog {
    pub(crate) fn new(index: u32) -> Self {
        PartitionLog {
            index,
            base_offset: 0,
            next_offset: 0,
            records: VecDeque::new(),
            buffered_bytes: 0,
            saturated: false,
            tokens: HashMap::new(),
            token_order: VecDeque::new(),
        }
    }

    /// Append a batch of records, assigning the next strictly increasing
    /// offsets. A batch whose idempotency token was already seen returns
    /// the previously assigned offsets without appending again.
    pub(crate) fn append_batch(
        &mut self,
        records: Vec<LogRecord>,
        token: Option<&str>,
        high_water_bytes: usize,
        low_water_bytes: usize,
        idempotency_window: usize,
    ) -> Result<Vec<u64>, BufferError> {
        if records.is_empty() {
            return Err(BufferError::InvalidInput("empty append batch".to_string()));
        }
        if let Some(token) = token {
            if let Some(offsets) = self.tokens.get(token) {
                return Ok(offsets.clone());
            }
        }

        // Hysteresis: once saturated, stay saturated until buffered bytes
        // fall below the low-water mark.
        if self.saturated {
            if self.buffered_bytes < low_water_bytes {
                self.saturated = false;
            } else {
                return Err(BufferError::Backpressure {
                    partition: self.index,
                });
            }
        } else if self.buffered_bytes > high_water_bytes {
            self.saturated = true;
            return Err(BufferError::Backpressure {
                partition: self.index,
            });
        }

        let now = Instant::now();
        let mut offsets = Vec::with_capacity(records.len());
        for record in records {
            let offset = self.next_offset;
            let bytes = record.encoded_len();
            self.records.push_back(StoredRecord {
                offset,
                appended_at: now,
                bytes,
                record,
            });
            self.buffered_bytes += bytes;
            self.next_offset += 1;
            offsets.push(offset);
        }

        if let Some(token) = token {
            self.tokens.insert(token.to_string(), offsets.clone());
            self.token_order.push_back(token.to_string());
            while self.token_order.len() > idempotency_window {
                if let Some(evicted) = self.token_order.pop_front() {
                    self.tokens.remove(&evicted);
                }
            }
        }

        Ok(offsets)
    }

    /// Non-destructive ordered read starting at `from_offset`. Records stay
    /// available to every group until retention purges them.
    pub(crate) fn fetch(&self, from_offset: u64, max_records: usize) -> FetchResponse {
        let gap = from_offset < self.base_offset;
        let start = from_offset.max(self.base_offset);

        let mut records = Vec::new();
        if start < self.next_offset {
            let skip = (start - self.base_offset) as usize;
            for stored in self.records.iter().skip(skip).take(max_records) {
                records.push((stored.offset, stored.record.clone()));
            }
        }

        let next_offset = match records.last() {
            Some((offset, _)) => offset + 1,
            None => start,
        };

        FetchResponse {
            records,
            next_offset,
            gap,
        }
    }

    /// Purge records past retention. `safe_limit` is the exclusive upper
    /// bound derived from the minimum committed offset across active
    /// groups minus the safety margin; records at or above it are never
    /// purged regardless of age or size.
    pub(crate) fn purge(
        &mut self,
        max_age: Duration,
        max_bytes: usize,
        safe_limit: Option<u64>,
    ) -> usize {
        let limit = safe_limit.unwrap_or(self.next_offset);
        let now = Instant::now();
        let mut purged = 0;

        loop {
            let (offset, appended_at) = match self.records.front() {
                Some(front) => (front.offset, front.appended_at),
                None => break,
            };
            if offset >= limit {
                break;
            }
            let expired = now.duration_since(appended_at) > max_age;
            let oversized = self.buffered_bytes > max_bytes;
            if !expired && !oversized {
                break;
            }
            if let Some(removed) = self.records.pop_front() {
                self.buffered_bytes -= removed.bytes;
            }
            self.base_offset = front_offset(&self.records).unwrap_or(self.next_offset);
            purged += 1;
        }

        purged
    }

    pub(crate) fn buffered_bytes(&self) -> usize {
        self.buffered_bytes
    }

    pub(crate) fn buffered_records(&self) -> usize {
        self.records.len()
    }

    pub(crate) fn base_offset(&self) -> u64 {
        self.base_offset
    }

    pub(crate) fn next_offset(&self) -> u64 {
        self.next_offset
    }

    pub(crate) fn is_saturated(&self) -> bool {
        self.saturated
    }
}

fn front_offset(records: &VecDeque<StoredRecord>) -> Option<u64> {
    records.front().map(|r| r.offset)
}

#[cfg(test)]
mod tests {
    use super::*;
    use logship_model::Severity;
    use proptest::prelude::*;

    const HIGH: usize = 4096;
    const LOW: usize = 1024;
    const WINDOW: usize = 16;

    fn record(message: &str) -> LogRecord {
        LogRecord::new(1_000, "svc-a", Severity::Info, message).unwrap()
    }

    fn append(log: &mut PartitionLog, n: usize) -> Vec<u64> {
        let records = (0..n).map(|i| record(&format!("m{i}"))).collect();
        log.append_batch(records, None, usize::MAX, LOW, WINDOW)
            .unwrap()
    }

    #[test]
    fn test_offsets_strictly_increasing_and_gapless() {
        let mut log = PartitionLog::new(0);
        let first = append(&mut log, 10);
        let second = append(&mut log, 5);
        let all: Vec<u64> = first.into_iter().chain(second).collect();
        assert_eq!(all, (0..15).collect::<Vec<u64>>());
    }

    #[test]
    fn test_fetch_is_non_destructive() {
        let mut log = PartitionLog::new(0);
        append(&mut log, 5);
        let a = log.fetch(0, 10);
        let b = log.fetch(0, 10);
        assert_eq!(a.records.len(), 5);
        assert_eq!(b.records.len(), 5);
        assert_eq!(a.next_offset, 5);
        assert!(!a.gap);
    }

    #[test]
    fn test_fetch_respects_max_records() {
        let mut log = PartitionLog::new(0);
        append(&mut log, 10);
        let resp = log.fetch(2, 3);
        let offsets: Vec<u64> = resp.records.iter().map(|(o, _)| *o).collect();
        assert_eq!(offsets, vec![2, 3, 4]);
        assert_eq!(resp.next_offset, 5);
    }

    #[test]
    fn test_idempotent_reappend_returns_same_offsets() {
        let mut log = PartitionLog::new(0);
        let records: Vec<LogRecord> = (0..3).map(|i| record(&format!("m{i}"))).collect();
        let first = log
            .append_batch(records.clone(), Some("tok-1"), HIGH, LOW, WINDOW)
            .unwrap();
        let replay = log
            .append_batch(records, Some("tok-1"), HIGH, LOW, WINDOW)
            .unwrap();
        assert_eq!(first, replay);
        assert_eq!(log.buffered_records(), 3);
        assert_eq!(log.next_offset(), 3);
    }

    #[test]
    fn test_backpressure_hysteresis() {
        let mut log = PartitionLog::new(7);
        // Fill past the high-water mark.
        while log.buffered_bytes() <= HIGH {
            log.append_batch(vec![record(&"x".repeat(256))], None, HIGH, LOW, WINDOW)
                .unwrap();
        }
        // Next append trips saturation.
        let err = log
            .append_batch(vec![record("y")], None, HIGH, LOW, WINDOW)
            .unwrap_err();
        assert_eq!(err, BufferError::Backpressure { partition: 7 });
        assert!(log.is_saturated());

        // Purging down to between low and high is not enough: hysteresis
        // keeps rejecting until we are below the low-water mark.
        while log.buffered_bytes() >= LOW && log.buffered_records() > 0 {
            let base = log.base_offset();
            log.purge(Duration::from_secs(0), 0, Some(base + 1));
            if log.buffered_bytes() >= LOW && log.buffered_bytes() <= HIGH {
                assert!(log
                    .append_batch(vec![record("z")], None, HIGH, LOW, WINDOW)
                    .is_err());
            }
        }

        // Below low water, appends are accepted again.
        assert!(log
            .append_batch(vec![record("resumed")], None, HIGH, LOW, WINDOW)
            .is_ok());
        assert!(!log.is_saturated());
    }

    #[test]
    fn test_purge_respects_safe_limit() {
        let mut log = PartitionLog::new(0);
        append(&mut log, 10);
        // Everything is "oversized" with max_bytes 0, but only offsets
        // below the safe limit may go.
        let purged = log.purge(Duration::from_secs(0), 0, Some(4));
        assert_eq!(purged, 4);
        assert_eq!(log.base_offset(), 4);
        let resp = log.fetch(0, 10);
        assert!(resp.gap);
        assert_eq!(resp.records.first().map(|(o, _)| *o), Some(4));
    }

    #[test]
    fn test_purge_reports_nothing_when_fresh_and_small() {
        let mut log = PartitionLog::new(0);
        append(&mut log, 5);
        let purged = log.purge(Duration::from_secs(3600), usize::MAX, None);
        assert_eq!(purged, 0);
        assert_eq!(log.base_offset(), 0);
    }

    proptest! {
        #[test]
        fn prop_offsets_gapless_over_arbitrary_batches(sizes in proptest::collection::vec(1usize..8, 1..20)) {
            let mut log = PartitionLog::new(0);
            let mut expected = 0u64;
            for size in sizes {
                let offsets = append(&mut log, size);
                for offset in offsets {
                    prop_assert_eq!(offset, expected);
                    expected += 1;
                }
            }
            prop_assert_eq!(log.next_offset(), expected);
        }
    }
}
