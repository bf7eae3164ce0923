// Copyright 2025-Present Logship authors
// SPDX-License-Identifier: Apache-2.0

//! The consumer: joins a group, runs one sequential
//! fetch→transform→sink→commit loop per assigned partition, and re-joins
//! whenever the buffer fences its generation.
//!
//! Offsets are committed only after the sink acks the documents, so a
//! crash between sink write and commit replays the batch; the sink's
//! id-keyed writes make that replay invisible.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use logship_buffer::{BufferError, BufferHandle};
use logship_model::TransformedRecord;
use logship_sink::{BatchResult, BatchWriter, IndexStore};

use crate::config::ConsumerConfig;
use crate::dead_letter::{DeadLetterEntry, DeadLetterQueue};
use crate::error::ConsumerError;
use crate::rules::{apply_rules, TransformRule};

/// Lifecycle of a consumer instance, published through a watch channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerStatus {
    Joining,
    Assigned,
    Consuming,
    Rebalancing,
    Stopped,
}

#[derive(Default)]
pub struct ConsumerCounters {
    indexed: AtomicU64,
    filtered: AtomicU64,
}

impl ConsumerCounters {
    pub fn indexed(&self) -> u64 {
        self.indexed.load(Ordering::Relaxed)
    }

    pub fn filtered(&self) -> u64 {
        self.filtered.load(Ordering::Relaxed)
    }
}

enum WorkerExit {
    Cancelled,
    Rebalance,
}

/// Fate of one fetched offset, used to find the committable prefix.
enum Disposition {
    /// Dropped by a filter or dead-lettered at transform time; nothing
    /// blocks committing past it.
    Committable,
    /// Went to the sink; committable once its document id is acked. The
    /// source record is kept for the dead-letter path on rejection.
    Indexed {
        doc_id: String,
        record: logship_model::LogRecord,
    },
}

pub struct Consumer {
    ctx: WorkerContext,
    status_tx: watch::Sender<ConsumerStatus>,
    status_rx: watch::Receiver<ConsumerStatus>,
}

#[derive(Clone)]
struct WorkerContext {
    config: Arc<ConsumerConfig>,
    buffer: BufferHandle,
    store: Arc<IndexStore>,
    rules: Arc<Vec<Box<dyn TransformRule>>>,
    dead_letter: DeadLetterQueue,
    counters: Arc<ConsumerCounters>,
}

impl Consumer {
    pub fn new(
        config: ConsumerConfig,
        buffer: BufferHandle,
        store: Arc<IndexStore>,
        rules: Vec<Box<dyn TransformRule>>,
        dead_letter: DeadLetterQueue,
    ) -> Result<Self, ConsumerError> {
        config.validate()?;
        let (status_tx, status_rx) = watch::channel(ConsumerStatus::Joining);
        Ok(Consumer {
            ctx: WorkerContext {
                config: Arc::new(config),
                buffer,
                store,
                rules: Arc::new(rules),
                dead_letter,
                counters: Arc::new(ConsumerCounters::default()),
            },
            status_tx,
            status_rx,
        })
    }

    pub fn status(&self) -> watch::Receiver<ConsumerStatus> {
        self.status_rx.clone()
    }

    pub fn counters(&self) -> Arc<ConsumerCounters> {
        Arc::clone(&self.ctx.counters)
    }

    /// Drive the consumer until cancelled. In-flight batches are finished
    /// before the group is left.
    pub async fn run(self, cancel: CancellationToken) -> Result<(), ConsumerError> {
        let ctx = self.ctx;
        let group = ctx.config.group.clone();
        let member = ctx.config.member.clone();
        info!("consumer '{member}' starting in group '{group}'");

        let mut failure: Option<ConsumerError> = None;
        while !cancel.is_cancelled() {
            let _ = self.status_tx.send(ConsumerStatus::Joining);
            let membership = match ctx.buffer.join_group(&group, &member).await {
                Ok(membership) => membership,
                Err(BufferError::ServiceStopped) => break,
                Err(e) => {
                    failure = Some(e.into());
                    break;
                }
            };
            let _ = self.status_tx.send(ConsumerStatus::Assigned);
            debug!(
                "consumer '{member}': generation {}, partitions {:?}",
                membership.generation, membership.partitions
            );

            if membership.partitions.is_empty() {
                // More members than partitions; re-check membership later.
                let idle = ctx.config.poll_interval * 10;
                tokio::select! {
                    _ = sleep(idle) => continue,
                    _ = cancel.cancelled() => break,
                }
            }

            let _ = self.status_tx.send(ConsumerStatus::Consuming);
            let scope = cancel.child_token();
            let mut workers = JoinSet::new();
            for partition in membership.partitions {
                let ctx = ctx.clone();
                let token = scope.clone();
                let generation = membership.generation;
                workers.spawn(async move {
                    ctx.partition_loop(partition, generation, token).await
                });
            }

            let mut rebalance = false;
            while let Some(joined) = workers.join_next().await {
                match joined {
                    Ok(Ok(WorkerExit::Rebalance)) => {
                        rebalance = true;
                        scope.cancel();
                    }
                    Ok(Ok(WorkerExit::Cancelled)) => {}
                    Ok(Err(e)) => {
                        scope.cancel();
                        failure.get_or_insert(e);
                    }
                    Err(e) => {
                        scope.cancel();
                        warn!("consumer '{member}': partition worker panicked: {e}");
                    }
                }
            }

            if failure.is_some() {
                break;
            }
            if rebalance {
                let _ = self.status_tx.send(ConsumerStatus::Rebalancing);
                info!("consumer '{member}': generation fenced, re-joining group '{group}'");
            }
        }

        if let Err(e) = ctx.buffer.leave_group(&group, &member).await {
            debug!("consumer '{member}': leave failed: {e}");
        }
        let _ = self.status_tx.send(ConsumerStatus::Stopped);
        info!("consumer '{member}' stopped");
        match failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl WorkerContext {
    /// Sequential loop over one assigned partition. Returns when the
    /// token fires or the generation is fenced.
    ///
    /// Fetched records accumulate in the batch writer until it fills or
    /// its latency window elapses; the fetch cursor runs ahead of the
    /// committed offset while documents sit in the writer.
    async fn partition_loop(
        &self,
        partition: u32,
        generation: u64,
        token: CancellationToken,
    ) -> Result<WorkerExit, ConsumerError> {
        let group = &self.config.group;
        let mut writer = BatchWriter::new(
            Arc::clone(&self.store),
            self.config.fetch_batch_size,
            self.config.poll_interval,
        );
        let mut pending: Vec<(u64, Disposition)> = Vec::new();
        let mut acked: HashSet<String> = HashSet::new();
        let mut rejected: HashMap<String, String> = HashMap::new();

        let mut next = match self.buffer.committed(group, partition).await? {
            Some(committed) => committed + 1,
            None => 0,
        };

        loop {
            if token.is_cancelled() {
                // Finish in-flight work; a fenced commit here is harmless.
                absorb(&mut acked, &mut rejected, writer.flush());
                if let Some(upto) = self.settle(&mut pending, &mut acked, &mut rejected, partition)
                {
                    let _ = self.buffer.commit(group, partition, generation, upto).await;
                }
                return Ok(WorkerExit::Cancelled);
            }

            let resp = match self
                .buffer
                .fetch(group, partition, generation, next, self.config.fetch_batch_size)
                .await
            {
                Ok(resp) => resp,
                Err(BufferError::CommitConflict { .. }) => return Ok(WorkerExit::Rebalance),
                Err(BufferError::ServiceStopped) => return Ok(WorkerExit::Cancelled),
                Err(e) => return Err(e.into()),
            };

            if resp.gap {
                if resp.records.is_empty() && resp.next_offset > next {
                    warn!(
                        "partition {partition}: retention purged offsets {next}..{}, skipping",
                        resp.next_offset
                    );
                    next = resp.next_offset;
                    continue;
                }
                let resumed = resp.records.first().map(|(o, _)| *o).unwrap_or(next);
                warn!("partition {partition}: resuming after retention gap at offset {resumed}");
            }

            let idle = resp.records.is_empty();
            let batch_end = resp.records.last().map(|(offset, _)| *offset);
            for (offset, record) in resp.records {
                match apply_rules(&self.rules, record.clone()) {
                    Ok(Some(transformed)) => {
                        let doc =
                            TransformedRecord::derive(&transformed, &self.config.index, partition, offset);
                        pending.push((
                            offset,
                            Disposition::Indexed {
                                doc_id: doc.doc_id.clone(),
                                record,
                            },
                        ));
                        if let Some(flushed) = writer.push(doc) {
                            absorb(&mut acked, &mut rejected, flushed);
                        }
                    }
                    Ok(None) => {
                        self.counters.filtered.fetch_add(1, Ordering::Relaxed);
                        pending.push((offset, Disposition::Committable));
                    }
                    Err(failure) => {
                        self.dead_letter.push(DeadLetterEntry {
                            partition,
                            offset,
                            reason: failure.reason,
                            record,
                        });
                        pending.push((offset, Disposition::Committable));
                    }
                }
            }
            if let Some(end) = batch_end {
                next = end + 1;
            }

            if writer.should_flush() {
                absorb(&mut acked, &mut rejected, writer.flush());
            }

            if let Some(upto) = self.settle(&mut pending, &mut acked, &mut rejected, partition) {
                match self.buffer.commit(group, partition, generation, upto).await {
                    Ok(()) => {}
                    Err(BufferError::CommitConflict { .. }) => return Ok(WorkerExit::Rebalance),
                    Err(BufferError::ServiceStopped) => return Ok(WorkerExit::Cancelled),
                    Err(e) => return Err(e.into()),
                }
            }

            if idle {
                tokio::select! {
                    _ = sleep(self.config.poll_interval) => {}
                    _ = token.cancelled() => {}
                }
            }
        }
    }

    /// Drain the longest prefix of `pending` whose records are all
    /// settled: acked by the sink, dropped by a rule, or dead-lettered.
    /// Returns the highest offset in the drained prefix.
    fn settle(
        &self,
        pending: &mut Vec<(u64, Disposition)>,
        acked: &mut HashSet<String>,
        rejected: &mut HashMap<String, String>,
        partition: u32,
    ) -> Option<u64> {
        let mut upto = None;
        let mut consumed = 0;
        for (offset, disposition) in pending.iter() {
            match disposition {
                Disposition::Committable => {}
                Disposition::Indexed { doc_id, record } => {
                    if acked.remove(doc_id) {
                        self.counters.indexed.fetch_add(1, Ordering::Relaxed);
                    } else if let Some(reason) = rejected.remove(doc_id) {
                        // Schema rejections are permanent; replaying the
                        // offset would reject forever, so the record goes
                        // to the dead-letter path and the commit proceeds.
                        self.dead_letter.push(DeadLetterEntry {
                            partition,
                            offset: *offset,
                            reason: format!("sink rejection: {reason}"),
                            record: record.clone(),
                        });
                    } else {
                        break;
                    }
                }
            }
            upto = Some(*offset);
            consumed += 1;
        }
        pending.drain(..consumed);
        upto
    }
}

fn absorb(acked: &mut HashSet<String>, rejected: &mut HashMap<String, String>, from: BatchResult) {
    acked.extend(from.acked);
    rejected.extend(from.rejected);
}
