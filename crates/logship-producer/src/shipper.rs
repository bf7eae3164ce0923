// Copyright 2025-Present Logship authors
// SPDX-License-Identifier: Apache-2.0

//! Background shipper: drains the local queues in batches, transmits to
//! the buffer with bounded exponential backoff, and spills batches that
//! exhaust their retry budget.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, warn};

use logship_model::LogRecord;

use crate::config::ProducerConfig;
use crate::queue::LocalQueues;
use crate::transport::{RecordTransport, TransportError};

/// Outcome of a `flush`: what reached the buffer and what degraded.
#[derive(Debug, Clone, Copy, Default)]
pub struct FlushReport {
    /// Records acknowledged by the buffer during this flush.
    pub appended: u64,
    /// Records handed to the spill sink after exhausting retries.
    pub spilled: u64,
}

/// Local fallback for records that could not be delivered within the
/// retry budget. The default implementation logs and drops; embedders can
/// plug in a disk spool.
#[async_trait]
pub trait SpillSink: Send + Sync {
    async fn spill(&self, key: &str, records: Vec<LogRecord>, reason: &TransportError);
}

/// Default spill sink: report the loss, keep the pipeline available.
pub struct LogSpill;

#[async_trait]
impl SpillSink for LogSpill {
    async fn spill(&self, key: &str, records: Vec<LogRecord>, reason: &TransportError) {
        error!(
            "spilling {} records for partition key '{key}': {reason}",
            records.len()
        );
    }
}

pub(crate) enum ShipperCommand {
    Flush(oneshot::Sender<FlushReport>),
    Shutdown(oneshot::Sender<()>),
}

/// Counters shared between the shipper task and the producer facade.
#[derive(Default)]
pub(crate) struct ShipperCounters {
    pub(crate) appended: AtomicU64,
    pub(crate) spilled: AtomicU64,
}

pub(crate) struct ShipperTask {
    queues: Arc<LocalQueues>,
    transport: Arc<dyn RecordTransport>,
    spill: Arc<dyn SpillSink>,
    config: ProducerConfig,
    counters: Arc<ShipperCounters>,
    rx: mpsc::UnboundedReceiver<ShipperCommand>,
    token_prefix: u64,
    token_seq: u64,
}

impl ShipperTask {
    pub(crate) fn new(
        queues: Arc<LocalQueues>,
        transport: Arc<dyn RecordTransport>,
        spill: Arc<dyn SpillSink>,
        config: ProducerConfig,
        counters: Arc<ShipperCounters>,
        rx: mpsc::UnboundedReceiver<ShipperCommand>,
    ) -> Self {
        let token_prefix = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or_default();
        ShipperTask {
            queues,
            transport,
            spill,
            config,
            counters,
            rx,
            token_prefix,
            token_seq: 0,
        }
    }

    pub(crate) async fn run(mut self) {
        debug!("producer shipper started");
        let mut tick = tokio::time::interval(self.config.ship_interval);
        tick.tick().await; // discard first tick, which is instantaneous

        loop {
            tokio::select! {
                command = self.rx.recv() => {
                    match command {
                        Some(ShipperCommand::Flush(reply)) => {
                            let report = self.ship_all().await;
                            let _ = reply.send(report);
                        }
                        Some(ShipperCommand::Shutdown(reply)) => {
                            // Drain what we can before stopping.
                            self.ship_all().await;
                            let _ = reply.send(());
                            break;
                        }
                        None => break,
                    }
                }
                _ = tick.tick() => {
                    self.ship_all().await;
                }
                _ = self.queues.wait_for_data() => {
                    self.ship_all().await;
                }
            }
        }

        debug!("producer shipper stopped");
    }

    /// Drain every queued batch once. Failed batches are spilled, not
    /// requeued, so one unreachable partition cannot wedge the drain.
    async fn ship_all(&mut self) -> FlushReport {
        let mut report = FlushReport::default();
        loop {
            let (key, batch) = match self.queues.peek_batch(self.config.max_batch_records) {
                Some(pending) => pending,
                None => break,
            };
            let count = batch.len();
            match self.ship_batch(&key, &batch).await {
                Ok(()) => {
                    self.queues.release(&key, count);
                    self.counters
                        .appended
                        .fetch_add(count as u64, Ordering::Relaxed);
                    report.appended += count as u64;
                }
                Err(reason) => {
                    // Exhausted the retry budget: remove from the queue and
                    // hand to the spill sink so the pipeline stays available.
                    self.queues.release(&key, count);
                    self.counters
                        .spilled
                        .fetch_add(count as u64, Ordering::Relaxed);
                    report.spilled += count as u64;
                    self.spill.spill(&key, batch, &reason).await;
                }
            }
        }
        report
    }

    /// Transmit one batch with a stable idempotency token, retrying with
    /// exponential backoff up to the configured budget.
    async fn ship_batch(&mut self, key: &str, batch: &[LogRecord]) -> Result<(), TransportError> {
        self.token_seq += 1;
        let token = format!("{:x}-{}", self.token_prefix, self.token_seq);

        let mut attempt = 0;
        loop {
            match self
                .transport
                .append_batch(batch.to_vec(), token.clone())
                .await
            {
                Ok(offsets) => {
                    debug!(
                        "appended {} records for key '{key}' at offsets {:?}..",
                        batch.len(),
                        offsets.first()
                    );
                    return Ok(());
                }
                Err(err) => {
                    attempt += 1;
                    if attempt > self.config.retry_budget {
                        return Err(err);
                    }
                    let backoff = self.config.retry_backoff_base * 2u32.pow(attempt - 1);
                    warn!(
                        "append for key '{key}' failed (attempt {attempt}/{}): {err}; \
                         retrying in {backoff:?}",
                        self.config.retry_budget
                    );
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }
}
