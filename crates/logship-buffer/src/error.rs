// Copyright 2025-Present Logship authors
// SPDX-License-Identifier: Apache-2.0

/// Errors returned by buffer operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BufferError {
    /// The partition's buffered bytes are above the high-water mark and
    /// have not yet fallen below the low-water mark. The producer must
    /// retry, block or drop per its overflow policy.
    #[error("partition {partition} is saturated, append rejected")]
    Backpressure { partition: u32 },

    /// The caller's group generation is stale: a rebalance has happened
    /// since it joined. The consumer must re-join and pick up its new
    /// assignment before fetching or committing again.
    #[error("stale generation {got} for group '{group}' (current {current})")]
    CommitConflict {
        group: String,
        got: u64,
        current: u64,
    },

    /// Invalid parameters: unknown partition, offset regression, empty
    /// batch, mixed partition keys in one batch.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The buffer service task has stopped and its command channel is
    /// closed.
    #[error("buffer service is not running")]
    ServiceStopped,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = BufferError::Backpressure { partition: 3 };
        assert_eq!(err.to_string(), "partition 3 is saturated, append rejected");

        let err = BufferError::CommitConflict {
            group: "indexers".to_string(),
            got: 1,
            current: 2,
        };
        assert!(err.to_string().contains("stale generation 1"));
    }
}
