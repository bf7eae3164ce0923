// Copyright 2025-Present Logship authors
// SPDX-License-Identifier: Apache-2.0

//! Transport seam between the producer and the ingest buffer. Tests plug
//! in failing transports; production wires the in-process buffer handle.

use async_trait::async_trait;

use logship_buffer::{BufferError, BufferHandle};
use logship_model::LogRecord;

/// Transport-level failures, split by how the shipper should react.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    /// The buffer rejected the append because the partition is saturated.
    #[error("buffer backpressure: {0}")]
    Backpressure(String),

    /// Transient delivery failure; retried with bounded backoff.
    #[error("delivery failure: {0}")]
    Delivery(String),
}

/// Appends batches of records, returning the offsets the buffer assigned.
///
/// A retried batch must carry the same idempotency token so the buffer can
/// dedupe a re-append whose ack was lost.
#[async_trait]
pub trait RecordTransport: Send + Sync {
    async fn append_batch(
        &self,
        records: Vec<LogRecord>,
        token: String,
    ) -> Result<Vec<u64>, TransportError>;
}

/// Production transport: the buffer service's command channel.
pub struct BufferTransport {
    handle: BufferHandle,
}

impl BufferTransport {
    pub fn new(handle: BufferHandle) -> Self {
        BufferTransport { handle }
    }
}

#[async_trait]
impl RecordTransport for BufferTransport {
    async fn append_batch(
        &self,
        records: Vec<LogRecord>,
        token: String,
    ) -> Result<Vec<u64>, TransportError> {
        self.handle
            .append_batch(records, Some(token))
            .await
            .map_err(|err| match err {
                BufferError::Backpressure { .. } => TransportError::Backpressure(err.to_string()),
                other => TransportError::Delivery(other.to_string()),
            })
    }
}
