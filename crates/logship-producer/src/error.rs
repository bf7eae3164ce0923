// Copyright 2025-Present Logship authors
// SPDX-License-Identifier: Apache-2.0

/// Errors surfaced to services using the producer client.
#[derive(Debug, thiserror::Error)]
pub enum ProducerError {
    /// The local queue for the record's partition key is full and the
    /// configured overflow policy rejects the append.
    #[error("local queue for partition key '{key}' is full")]
    Backpressure { key: String },

    /// Some records exhausted their delivery retry budget and were handed
    /// to the spill sink instead of reaching the buffer.
    #[error("flush completed with {spilled} records spilled")]
    PartialFailure { spilled: u64 },

    /// The background shipper task has stopped.
    #[error("producer is closed")]
    Closed,

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}
