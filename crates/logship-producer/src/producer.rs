// Copyright 2025-Present Logship authors
// SPDX-License-Identifier: Apache-2.0

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use logship_buffer::BufferHandle;
use logship_model::{LogRecord, RecordError, Severity};

use crate::config::{OverflowMode, ProducerConfig};
use crate::error::ProducerError;
use crate::queue::LocalQueues;
use crate::shipper::{FlushReport, LogSpill, ShipperCommand, ShipperCounters, ShipperTask, SpillSink};
use crate::transport::{BufferTransport, RecordTransport};

/// Counters exposed to the embedding service.
#[derive(Debug, Clone, Copy)]
pub struct ProducerStats {
    pub queued: usize,
    pub appended: u64,
    pub spilled: u64,
    pub dropped: u64,
}

/// Producer-assigned timestamps never go backwards, even if the wall
/// clock does.
struct MonotonicClock {
    last_ms: AtomicI64,
}

impl MonotonicClock {
    fn new() -> Self {
        MonotonicClock {
            last_ms: AtomicI64::new(0),
        }
    }

    fn now_ms(&self) -> i64 {
        let wall = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(1);
        let prev = self.last_ms.fetch_max(wall, Ordering::AcqRel);
        prev.max(wall)
    }
}

/// Client-side entry point for appending log records.
pub struct Producer {
    queues: Arc<LocalQueues>,
    shipper_tx: mpsc::UnboundedSender<ShipperCommand>,
    shipper_task: Option<JoinHandle<()>>,
    counters: Arc<ShipperCounters>,
    clock: MonotonicClock,
    dropped: AtomicU64,
    config: ProducerConfig,
}

impl Producer {
    /// Start a producer over an arbitrary transport and spill sink.
    pub fn start(
        config: ProducerConfig,
        transport: Arc<dyn RecordTransport>,
        spill: Arc<dyn SpillSink>,
    ) -> Result<Self, ProducerError> {
        config.validate()?;
        let queues = Arc::new(LocalQueues::new(config.queue_capacity));
        let counters = Arc::new(ShipperCounters::default());
        let (tx, rx) = mpsc::unbounded_channel();

        let shipper = ShipperTask::new(
            Arc::clone(&queues),
            transport,
            spill,
            config.clone(),
            Arc::clone(&counters),
            rx,
        );
        let shipper_task = tokio::spawn(shipper.run());

        Ok(Producer {
            queues,
            shipper_tx: tx,
            shipper_task: Some(shipper_task),
            counters,
            clock: MonotonicClock::new(),
            dropped: AtomicU64::new(0),
            config,
        })
    }

    /// Start a producer shipping to an in-process buffer service, with the
    /// default log-and-drop spill sink.
    pub fn connect(config: ProducerConfig, buffer: BufferHandle) -> Result<Self, ProducerError> {
        Self::start(
            config,
            Arc::new(BufferTransport::new(buffer)),
            Arc::new(LogSpill),
        )
    }

    /// Build a record with a producer-assigned, monotonic-safe timestamp.
    pub fn record(
        &self,
        service: impl Into<String>,
        severity: Severity,
        message: impl Into<String>,
    ) -> Result<LogRecord, RecordError> {
        LogRecord::new(self.clock.now_ms(), service, severity, message)
    }

    /// Append a record to the local queue. Behavior on a full queue
    /// follows the configured overflow mode; the caller is never suspended
    /// beyond the local enqueue (plus the bounded block, if configured).
    pub async fn append(&self, record: LogRecord) -> Result<(), ProducerError> {
        match self.config.overflow_mode {
            OverflowMode::FailFast => self.queues.try_enqueue(record).map_err(|rejected| {
                ProducerError::Backpressure {
                    key: rejected.partition_key().to_string(),
                }
            }),
            OverflowMode::Drop => {
                if self.queues.try_enqueue(record).is_err() {
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                }
                Ok(())
            }
            OverflowMode::Block => self
                .queues
                .enqueue_blocking(record, self.config.block_timeout)
                .await
                .map_err(|rejected| ProducerError::Backpressure {
                    key: rejected.partition_key().to_string(),
                }),
        }
    }

    /// Drain all local queues through the shipper. Succeeds only if every
    /// record reached the buffer; records that exhausted their retry
    /// budget surface as a partial failure.
    pub async fn flush(&self) -> Result<FlushReport, ProducerError> {
        // Deltas over the shared counters, so work done by a concurrent
        // background drain between our call and the shipper's reply is
        // still attributed to this flush.
        let appended_before = self.counters.appended.load(Ordering::Relaxed);
        let spilled_before = self.counters.spilled.load(Ordering::Relaxed);

        let (reply_tx, reply_rx) = oneshot::channel();
        self.shipper_tx
            .send(ShipperCommand::Flush(reply_tx))
            .map_err(|_| ProducerError::Closed)?;
        reply_rx.await.map_err(|_| ProducerError::Closed)?;

        let report = FlushReport {
            appended: self.counters.appended.load(Ordering::Relaxed) - appended_before,
            spilled: self.counters.spilled.load(Ordering::Relaxed) - spilled_before,
        };
        if report.spilled > 0 {
            return Err(ProducerError::PartialFailure {
                spilled: report.spilled,
            });
        }
        Ok(report)
    }

    pub fn stats(&self) -> ProducerStats {
        ProducerStats {
            queued: self.queues.queued(),
            appended: self.counters.appended.load(Ordering::Relaxed),
            spilled: self.counters.spilled.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }

    /// Stop the shipper after a final drain.
    pub async fn shutdown(mut self) {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.shipper_tx.send(ShipperCommand::Shutdown(reply_tx)).is_ok() {
            let _ = reply_rx.await;
        }
        if let Some(task) = self.shipper_task.take() {
            let _ = task.await;
        }
    }
}
