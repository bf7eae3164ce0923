// Copyright 2025-Present Logship authors
// SPDX-License-Identifier: Apache-2.0

//! Pipeline assembly and lifecycle.
//!
//! `Pipeline::start` spawns the buffer service, the consumer group and the
//! alert scheduler, then hands back a [`PipelineHandle`] for status checks,
//! producing, searching and graceful shutdown. Shutdown cancels the
//! consumers first so in-flight batches reach the sink and commit, then
//! stops the buffer.

use std::sync::Arc;

use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinSet;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use logship_buffer::{BufferHandle, BufferService};
use logship_consumer::{dead_letter_channel, Consumer, ParseRule, TransformRule};
use logship_sink::{AlertRegistry, AlertScheduler, IndexStore};

use crate::config::PipelineConfig;
use crate::error::PipelineError;

/// Status of the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStatus {
    Starting,
    Running,
    Stopping,
    Stopped,
}

/// Builds one consumer's transform rule chain. Each instance needs its
/// own boxed rules, so the pipeline takes a factory instead of a list.
pub type RuleFactory = Arc<dyn Fn() -> Vec<Box<dyn TransformRule>> + Send + Sync>;

/// Handle to the running pipeline.
#[derive(Clone)]
pub struct PipelineHandle {
    status: Arc<RwLock<PipelineStatus>>,
    status_tx: broadcast::Sender<PipelineStatus>,
    shutdown_tx: broadcast::Sender<()>,
    buffer: BufferHandle,
    store: Arc<IndexStore>,
    alerts: Arc<AlertRegistry>,
}

impl std::fmt::Debug for PipelineHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineHandle").finish_non_exhaustive()
    }
}

impl PipelineHandle {
    pub async fn is_running(&self) -> bool {
        matches!(*self.status.read().await, PipelineStatus::Running)
    }

    /// Get a receiver for status updates.
    pub fn status_receiver(&self) -> broadcast::Receiver<PipelineStatus> {
        self.status_tx.subscribe()
    }

    /// Buffer handle for producers (and tests).
    pub fn buffer(&self) -> BufferHandle {
        self.buffer.clone()
    }

    /// The index store backing the query surface.
    pub fn store(&self) -> Arc<IndexStore> {
        Arc::clone(&self.store)
    }

    pub fn alerts(&self) -> Arc<AlertRegistry> {
        Arc::clone(&self.alerts)
    }

    /// Stop the pipeline.
    pub async fn stop(&self) -> Result<(), PipelineError> {
        let mut status = self.status.write().await;
        if *status == PipelineStatus::Stopped {
            return Ok(());
        }
        *status = PipelineStatus::Stopping;
        drop(status);

        let _ = self.shutdown_tx.send(());
        Ok(())
    }
}

/// Main pipeline coordinator.
pub struct Pipeline {
    config: PipelineConfig,
    rule_factory: RuleFactory,
}

impl Pipeline {
    /// Create a pipeline with the default transform chain (message
    /// parsing only).
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            rule_factory: Arc::new(|| vec![Box::new(ParseRule) as Box<dyn TransformRule>]),
        }
    }

    /// Replace the transform chain used by every consumer.
    pub fn with_rules(mut self, factory: RuleFactory) -> Self {
        self.rule_factory = factory;
        self
    }

    /// Start the pipeline. Returns a handle once the services are up.
    pub async fn start(self) -> Result<PipelineHandle, PipelineError> {
        self.config.validate()?;

        let (buffer_service, buffer) = BufferService::new(self.config.buffer.clone())?;
        let store = Arc::new(IndexStore::new());
        let alerts = Arc::new(AlertRegistry::new());

        let status = Arc::new(RwLock::new(PipelineStatus::Starting));
        let (status_tx, _status_rx) = broadcast::channel(16);
        let (shutdown_tx, shutdown_rx) = broadcast::channel(16);

        let handle = PipelineHandle {
            status: Arc::clone(&status),
            status_tx: status_tx.clone(),
            shutdown_tx,
            buffer: buffer.clone(),
            store: Arc::clone(&store),
            alerts: Arc::clone(&alerts),
        };

        let status_clone = Arc::clone(&status);
        let config = self.config;
        let rule_factory = self.rule_factory;
        tokio::spawn(async move {
            if let Err(e) = run_pipeline(
                config,
                rule_factory,
                buffer_service,
                buffer,
                store,
                alerts,
                shutdown_rx,
                status_tx,
                Arc::clone(&status_clone),
            )
            .await
            {
                error!("pipeline error: {e}");
            }
            // Mark as stopped on any exit path.
            let mut s = status_clone.write().await;
            *s = PipelineStatus::Stopped;
        });

        // Wait for the pipeline to reach Running.
        let mut poll = interval(std::time::Duration::from_millis(10));
        for _ in 0..100 {
            poll.tick().await;
            if *status.read().await == PipelineStatus::Running {
                break;
            }
        }

        Ok(handle)
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_pipeline(
    config: PipelineConfig,
    rule_factory: RuleFactory,
    buffer_service: BufferService,
    buffer: BufferHandle,
    store: Arc<IndexStore>,
    alerts: Arc<AlertRegistry>,
    mut shutdown_rx: broadcast::Receiver<()>,
    status_tx: broadcast::Sender<PipelineStatus>,
    status: Arc<RwLock<PipelineStatus>>,
) -> Result<(), PipelineError> {
    debug!("starting buffer service");
    let buffer_task = tokio::spawn(buffer_service.run());

    let cancel = CancellationToken::new();

    debug!("starting alert scheduler");
    let scheduler = AlertScheduler::new(
        Arc::clone(&alerts),
        Arc::clone(&store),
        config.alert_eval_interval,
        cancel.clone(),
    );
    tokio::spawn(scheduler.run());

    let mut consumers = JoinSet::new();
    for i in 0..config.consumers {
        let mut consumer_config = config.consumer.clone();
        consumer_config.member = format!("{}-{i}", consumer_config.member);
        let (dead_letter, mut dead_rx) = dead_letter_channel(consumer_config.dead_letter_capacity);
        // Entries are logged when pushed; this drain keeps the channel
        // from filling up until an operator-side collector exists.
        tokio::spawn(async move { while dead_rx.recv().await.is_some() {} });

        let consumer = Consumer::new(
            consumer_config,
            buffer.clone(),
            Arc::clone(&store),
            (rule_factory)(),
            dead_letter,
        )?;
        consumers.spawn(consumer.run(cancel.clone()));
    }
    info!(
        "pipeline running: {} partitions, {} consumers",
        config.buffer.partitions, config.consumers
    );

    *status.write().await = PipelineStatus::Running;
    let _ = status_tx.send(PipelineStatus::Running);

    let mut status_interval = interval(config.status_interval);
    status_interval.tick().await; // discard first tick, which is instantaneous

    loop {
        tokio::select! {
            _ = status_interval.tick() => {
                for partition in 0..buffer.partition_count() {
                    if let Ok(stats) = buffer.stats(partition).await {
                        debug!(
                            "partition {}: {} records buffered ({} bytes), offsets {}..{}{}",
                            stats.partition,
                            stats.buffered_records,
                            stats.buffered_bytes,
                            stats.base_offset,
                            stats.next_offset,
                            if stats.saturated { ", saturated" } else { "" },
                        );
                    }
                }
            }
            _ = shutdown_rx.recv() => {
                info!("shutting down pipeline");

                // Consumers first, so in-flight batches commit.
                cancel.cancel();
                while let Some(joined) = consumers.join_next().await {
                    match joined {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => error!("consumer exited with error: {e}"),
                        Err(e) => error!("consumer task panicked: {e}"),
                    }
                }

                buffer.shutdown();
                let _ = buffer_task.await;

                let _ = status_tx.send(PipelineStatus::Stopped);
                break;
            }
        }
    }

    Ok(())
}
