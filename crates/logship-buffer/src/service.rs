// Copyright 2025-Present Logship authors
// SPDX-License-Identifier: Apache-2.0

//! The buffer service: a single task owning all partition and group state,
//! driven by a command channel. Producers and consumers interact through a
//! cloneable [`BufferHandle`]; concurrent appends to different partitions
//! are serialized here, which is what makes offset assignment the single
//! point of ordering.

use std::collections::HashMap;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use logship_model::LogRecord;

use crate::config::BufferConfig;
use crate::error::BufferError;
use crate::group::GroupState;
use crate::partition::{FetchResponse, PartitionLog};

/// Assignment returned to a consumer when it joins a group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupMembership {
    pub generation: u64,
    pub partitions: Vec<u32>,
}

/// Point-in-time view of one partition, for tests and status logging.
#[derive(Debug, Clone)]
pub struct PartitionStats {
    pub partition: u32,
    pub base_offset: u64,
    pub next_offset: u64,
    pub buffered_records: usize,
    pub buffered_bytes: usize,
    pub saturated: bool,
}

#[derive(Debug)]
pub enum BufferCommand {
    Append {
        record: Box<LogRecord>,
        token: Option<String>,
        reply: oneshot::Sender<Result<u64, BufferError>>,
    },
    AppendBatch {
        records: Vec<LogRecord>,
        token: Option<String>,
        reply: oneshot::Sender<Result<Vec<u64>, BufferError>>,
    },
    Fetch {
        group: String,
        partition: u32,
        generation: u64,
        from_offset: u64,
        max_records: usize,
        reply: oneshot::Sender<Result<FetchResponse, BufferError>>,
    },
    Commit {
        group: String,
        partition: u32,
        generation: u64,
        offset: u64,
        reply: oneshot::Sender<Result<(), BufferError>>,
    },
    Committed {
        group: String,
        partition: u32,
        reply: oneshot::Sender<Result<Option<u64>, BufferError>>,
    },
    JoinGroup {
        group: String,
        member: String,
        reply: oneshot::Sender<Result<GroupMembership, BufferError>>,
    },
    LeaveGroup {
        group: String,
        member: String,
        reply: oneshot::Sender<Result<(), BufferError>>,
    },
    RetentionSweep {
        reply: oneshot::Sender<usize>,
    },
    Stats {
        partition: u32,
        reply: oneshot::Sender<Result<PartitionStats, BufferError>>,
    },
    Shutdown,
}

#[derive(Clone)]
pub struct BufferHandle {
    tx: mpsc::UnboundedSender<BufferCommand>,
    partitions: u32,
}

impl BufferHandle {
    /// Number of partitions the buffer was configured with.
    pub fn partition_count(&self) -> u32 {
        self.partitions
    }

    /// Partition index a record will be appended to.
    pub fn partition_for(&self, record: &LogRecord) -> u32 {
        LogRecord::partition_index(record.partition_key(), self.partitions)
    }

    pub async fn append(
        &self,
        record: LogRecord,
        token: Option<String>,
    ) -> Result<u64, BufferError> {
        self.request(|reply| BufferCommand::Append {
            record: Box::new(record),
            token,
            reply,
        })
        .await?
    }

    /// Append a batch of records sharing one partition key, with a
    /// retry-safe idempotency token.
    pub async fn append_batch(
        &self,
        records: Vec<LogRecord>,
        token: Option<String>,
    ) -> Result<Vec<u64>, BufferError> {
        self.request(|reply| BufferCommand::AppendBatch {
            records,
            token,
            reply,
        })
        .await?
    }

    pub async fn fetch(
        &self,
        group: impl Into<String>,
        partition: u32,
        generation: u64,
        from_offset: u64,
        max_records: usize,
    ) -> Result<FetchResponse, BufferError> {
        self.request(|reply| BufferCommand::Fetch {
            group: group.into(),
            partition,
            generation,
            from_offset,
            max_records,
            reply,
        })
        .await?
    }

    pub async fn commit(
        &self,
        group: impl Into<String>,
        partition: u32,
        generation: u64,
        offset: u64,
    ) -> Result<(), BufferError> {
        self.request(|reply| BufferCommand::Commit {
            group: group.into(),
            partition,
            generation,
            offset,
            reply,
        })
        .await?
    }

    pub async fn committed(
        &self,
        group: impl Into<String>,
        partition: u32,
    ) -> Result<Option<u64>, BufferError> {
        self.request(|reply| BufferCommand::Committed {
            group: group.into(),
            partition,
            reply,
        })
        .await?
    }

    pub async fn join_group(
        &self,
        group: impl Into<String>,
        member: impl Into<String>,
    ) -> Result<GroupMembership, BufferError> {
        self.request(|reply| BufferCommand::JoinGroup {
            group: group.into(),
            member: member.into(),
            reply,
        })
        .await?
    }

    pub async fn leave_group(
        &self,
        group: impl Into<String>,
        member: impl Into<String>,
    ) -> Result<(), BufferError> {
        self.request(|reply| BufferCommand::LeaveGroup {
            group: group.into(),
            member: member.into(),
            reply,
        })
        .await?
    }

    /// Run a retention sweep now; returns the number of purged records.
    pub async fn retention_sweep(&self) -> Result<usize, BufferError> {
        self.request(|reply| BufferCommand::RetentionSweep { reply })
            .await
    }

    pub async fn stats(&self, partition: u32) -> Result<PartitionStats, BufferError> {
        self.request(|reply| BufferCommand::Stats { partition, reply })
            .await?
    }

    pub fn shutdown(&self) {
        let _ = self.tx.send(BufferCommand::Shutdown);
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> BufferCommand,
    ) -> Result<T, BufferError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(make(reply_tx))
            .map_err(|_| BufferError::ServiceStopped)?;
        reply_rx.await.map_err(|_| BufferError::ServiceStopped)
    }
}

pub struct BufferService {
    config: BufferConfig,
    partitions: Vec<PartitionLog>,
    groups: HashMap<String, GroupState>,
    rx: mpsc::UnboundedReceiver<BufferCommand>,
}

impl BufferService {
    pub fn new(config: BufferConfig) -> Result<(Self, BufferHandle), BufferError> {
        config.validate()?;
        let (tx, rx) = mpsc::unbounded_channel();
        let partitions = (0..config.partitions).map(PartitionLog::new).collect();
        let handle = BufferHandle {
            tx,
            partitions: config.partitions,
        };
        let service = BufferService {
            config,
            partitions,
            groups: HashMap::new(),
            rx,
        };
        Ok((service, handle))
    }

    pub async fn run(mut self) {
        debug!("buffer service started");
        let mut sweep = tokio::time::interval(self.config.sweep_interval);
        sweep.tick().await; // discard first tick, which is instantaneous

        loop {
            tokio::select! {
                command = self.rx.recv() => {
                    match command {
                        Some(BufferCommand::Shutdown) | None => {
                            debug!("buffer service shutting down");
                            break;
                        }
                        Some(command) => self.handle_command(command),
                    }
                }
                _ = sweep.tick() => {
                    let purged = self.sweep();
                    if purged > 0 {
                        debug!("retention sweep purged {purged} records");
                    }
                }
            }
        }

        debug!("buffer service stopped");
    }

    fn handle_command(&mut self, command: BufferCommand) {
        match command {
            BufferCommand::Append {
                record,
                token,
                reply,
            } => {
                let result = self.append_batch(vec![*record], token.as_deref());
                let _ = reply.send(result.map(|offsets| offsets[0]));
            }
            BufferCommand::AppendBatch {
                records,
                token,
                reply,
            } => {
                let _ = reply.send(self.append_batch(records, token.as_deref()));
            }
            BufferCommand::Fetch {
                group,
                partition,
                generation,
                from_offset,
                max_records,
                reply,
            } => {
                let _ = reply.send(self.fetch(&group, partition, generation, from_offset, max_records));
            }
            BufferCommand::Commit {
                group,
                partition,
                generation,
                offset,
                reply,
            } => {
                let _ = reply.send(self.commit(&group, partition, generation, offset));
            }
            BufferCommand::Committed {
                group,
                partition,
                reply,
            } => {
                let result = Ok(self
                    .groups
                    .get(&group)
                    .and_then(|g| g.committed.get(&partition).copied()));
                let _ = reply.send(result);
            }
            BufferCommand::JoinGroup {
                group,
                member,
                reply,
            } => {
                let _ = reply.send(self.join_group(&group, &member));
            }
            BufferCommand::LeaveGroup {
                group,
                member,
                reply,
            } => {
                if let Some(state) = self.groups.get_mut(&group) {
                    state.leave(&member, self.config.partitions);
                    debug!("member '{member}' left group '{group}', generation {}", state.generation);
                }
                let _ = reply.send(Ok(()));
            }
            BufferCommand::RetentionSweep { reply } => {
                let _ = reply.send(self.sweep());
            }
            BufferCommand::Stats { partition, reply } => {
                let _ = reply.send(self.stats(partition));
            }
            BufferCommand::Shutdown => {}
        }
    }

    fn partition_mut(&mut self, index: u32) -> Result<&mut PartitionLog, BufferError> {
        let count = self.config.partitions;
        self.partitions
            .get_mut(index as usize)
            .ok_or_else(|| BufferError::InvalidInput(format!("unknown partition {index} (of {count})")))
    }

    fn append_batch(
        &mut self,
        records: Vec<LogRecord>,
        token: Option<&str>,
    ) -> Result<Vec<u64>, BufferError> {
        let first_key = match records.first() {
            Some(record) => record.partition_key().to_string(),
            None => return Err(BufferError::InvalidInput("empty append batch".to_string())),
        };
        if records.iter().any(|r| r.partition_key() != first_key) {
            return Err(BufferError::InvalidInput(
                "append batch mixes partition keys".to_string(),
            ));
        }
        let partition = LogRecord::partition_index(&first_key, self.config.partitions);
        let high = self.config.high_water_bytes;
        let low = self.config.low_water_bytes;
        let window = self.config.idempotency_window;
        self.partition_mut(partition)?
            .append_batch(records, token, high, low, window)
    }

    fn fetch(
        &mut self,
        group: &str,
        partition: u32,
        generation: u64,
        from_offset: u64,
        max_records: usize,
    ) -> Result<FetchResponse, BufferError> {
        self.check_group(group, generation)?;
        let response = {
            let log = self.partition_mut(partition)?;
            log.fetch(from_offset, max_records)
        };
        if response.gap {
            // Retention overtook this group; the gap is reported, never
            // silently hidden.
            warn!(
                "group '{group}' requested offset {from_offset} on partition {partition}, \
                 but retention purged up to {}",
                response.records.first().map(|(o, _)| *o).unwrap_or(from_offset)
            );
        }
        Ok(response)
    }

    fn commit(
        &mut self,
        group: &str,
        partition: u32,
        generation: u64,
        offset: u64,
    ) -> Result<(), BufferError> {
        if partition >= self.config.partitions {
            return Err(BufferError::InvalidInput(format!(
                "unknown partition {partition}"
            )));
        }
        let next = self.partitions[partition as usize].next_offset();
        if offset >= next {
            return Err(BufferError::InvalidInput(format!(
                "commit offset {offset} beyond partition end {next}"
            )));
        }
        let state = self
            .groups
            .get_mut(group)
            .ok_or_else(|| BufferError::InvalidInput(format!("unknown group '{group}'")))?;
        state.check_generation(group, generation)?;
        state.commit(partition, offset)
    }

    fn check_group(&self, group: &str, generation: u64) -> Result<(), BufferError> {
        let state = self
            .groups
            .get(group)
            .ok_or_else(|| BufferError::InvalidInput(format!("unknown group '{group}'")))?;
        state.check_generation(group, generation)
    }

    fn join_group(&mut self, group: &str, member: &str) -> Result<GroupMembership, BufferError> {
        let state = self
            .groups
            .entry(group.to_string())
            .or_insert_with(GroupState::new);
        let generation = state.join(member, self.config.partitions);
        let partitions = state
            .assignment
            .get(member)
            .cloned()
            .unwrap_or_default();
        debug!(
            "member '{member}' joined group '{group}': generation {generation}, \
             partitions {partitions:?}"
        );
        Ok(GroupMembership {
            generation,
            partitions,
        })
    }

    fn stats(&self, partition: u32) -> Result<PartitionStats, BufferError> {
        let log = self
            .partitions
            .get(partition as usize)
            .ok_or_else(|| BufferError::InvalidInput(format!("unknown partition {partition}")))?;
        Ok(PartitionStats {
            partition,
            base_offset: log.base_offset(),
            next_offset: log.next_offset(),
            buffered_records: log.buffered_records(),
            buffered_bytes: log.buffered_bytes(),
            saturated: log.is_saturated(),
        })
    }

    /// Retention sweep. Size pressure purges only up to the safe limit
    /// derived from the minimum committed offset across active groups
    /// (minus the safety margin). Age expiry is a hard limit and may purge
    /// past a lagging group's position; the group observes the gap on its
    /// next fetch.
    fn sweep(&mut self) -> usize {
        let mut total = 0;
        for index in 0..self.config.partitions {
            let safe_limit = self.safe_limit(index);
            let log = &mut self.partitions[index as usize];

            total += log.purge(
                self.config.retention_max_age,
                self.config.retention_max_bytes,
                safe_limit,
            );

            let expired = log.purge(self.config.retention_max_age, usize::MAX, None);
            if expired > 0 {
                warn!(
                    "partition {index}: age expiry purged {expired} records past the \
                     committed safe limit; lagging groups will observe a gap"
                );
                total += expired;
            }
        }
        total
    }

    /// Exclusive upper bound on purgeable offsets under size pressure:
    /// `min(committed) + 1 - safety_margin` across groups with live
    /// members. `None` when no active group exists.
    fn safe_limit(&self, partition: u32) -> Option<u64> {
        let mut limit: Option<u64> = None;
        for state in self.groups.values() {
            if state.members.is_empty() {
                continue;
            }
            let group_limit = state
                .committed
                .get(&partition)
                .map(|&committed| (committed + 1).saturating_sub(self.config.safety_margin))
                .unwrap_or(0);
            limit = Some(limit.map_or(group_limit, |l| l.min(group_limit)));
        }
        limit
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use logship_model::Severity;
    use std::time::Duration;

    fn config() -> BufferConfig {
        BufferConfig {
            partitions: 4,
            safety_margin: 0,
            sweep_interval: Duration::from_secs(3600),
            ..Default::default()
        }
    }

    fn record(service: &str, message: &str) -> LogRecord {
        LogRecord::new(1_000, service, Severity::Info, message).unwrap()
    }

    async fn start() -> (BufferHandle, tokio::task::JoinHandle<()>) {
        let (service, handle) = BufferService::new(config()).expect("failed to create buffer");
        let task = tokio::spawn(service.run());
        (handle, task)
    }

    #[tokio::test]
    async fn test_append_fetch_commit_flow() {
        let (handle, task) = start().await;
        let partition = handle.partition_for(&record("svc-a", "x"));

        for i in 0..5 {
            let offset = handle
                .append(record("svc-a", &format!("m{i}")), None)
                .await
                .expect("append failed");
            assert_eq!(offset, i);
        }

        let membership = handle.join_group("indexers", "c1").await.unwrap();
        assert_eq!(membership.partitions, vec![0, 1, 2, 3]);

        let resp = handle
            .fetch("indexers", partition, membership.generation, 0, 10)
            .await
            .expect("fetch failed");
        assert_eq!(resp.records.len(), 5);
        assert!(!resp.gap);

        handle
            .commit("indexers", partition, membership.generation, 4)
            .await
            .expect("commit failed");
        assert_eq!(
            handle.committed("indexers", partition).await.unwrap(),
            Some(4)
        );

        handle.shutdown();
        task.await.expect("service task failed");
    }

    #[tokio::test]
    async fn test_stale_generation_is_fenced() {
        let (handle, task) = start().await;
        handle.append(record("svc-a", "x"), None).await.unwrap();
        let partition = handle.partition_for(&record("svc-a", "x"));

        let first = handle.join_group("g", "c1").await.unwrap();
        let second = handle.join_group("g", "c2").await.unwrap();
        assert!(second.generation > first.generation);

        let err = handle
            .commit("g", partition, first.generation, 0)
            .await
            .unwrap_err();
        assert!(matches!(err, BufferError::CommitConflict { .. }));

        let err = handle
            .fetch("g", partition, first.generation, 0, 1)
            .await
            .unwrap_err();
        assert!(matches!(err, BufferError::CommitConflict { .. }));

        handle.shutdown();
        task.await.expect("service task failed");
    }

    #[tokio::test]
    async fn test_rebalance_splits_partitions_evenly() {
        let (handle, task) = start().await;

        let solo = handle.join_group("g", "c1").await.unwrap();
        assert_eq!(solo.partitions.len(), 4);

        let c2 = handle.join_group("g", "c2").await.unwrap();
        let c1 = handle.join_group("g", "c1").await.unwrap();
        // c1's re-join is a no-op: same generation c2's join produced.
        assert_eq!(c1.generation, c2.generation);
        assert_eq!(c1.partitions.len(), 2);
        assert_eq!(c2.partitions.len(), 2);

        let mut all: Vec<u32> = c1.partitions.iter().chain(&c2.partitions).copied().collect();
        all.sort_unstable();
        assert_eq!(all, vec![0, 1, 2, 3]);

        handle.shutdown();
        task.await.expect("service task failed");
    }

    #[tokio::test]
    async fn test_duplicate_batch_token_dedupes() {
        let (handle, task) = start().await;
        let batch = vec![record("svc-a", "1"), record("svc-a", "2")];

        let first = handle
            .append_batch(batch.clone(), Some("tok".to_string()))
            .await
            .unwrap();
        let replay = handle
            .append_batch(batch, Some("tok".to_string()))
            .await
            .unwrap();
        assert_eq!(first, replay);

        let partition = handle.partition_for(&record("svc-a", "x"));
        let stats = handle.stats(partition).await.unwrap();
        assert_eq!(stats.buffered_records, 2);

        handle.shutdown();
        task.await.expect("service task failed");
    }

    #[tokio::test]
    async fn test_mixed_partition_keys_rejected() {
        let (handle, task) = start().await;
        let err = handle
            .append_batch(vec![record("svc-a", "1"), record("svc-b", "2")], None)
            .await
            .unwrap_err();
        assert!(matches!(err, BufferError::InvalidInput(_)));
        handle.shutdown();
        task.await.expect("service task failed");
    }

    #[tokio::test]
    async fn test_retention_gap_is_observable() {
        let mut cfg = config();
        cfg.retention_max_age = Duration::from_millis(0);
        let (service, handle) = BufferService::new(cfg).expect("failed to create buffer");
        let task = tokio::spawn(service.run());

        for i in 0..10 {
            handle
                .append(record("svc-a", &format!("m{i}")), None)
                .await
                .unwrap();
        }
        let partition = handle.partition_for(&record("svc-a", "x"));
        let membership = handle.join_group("g", "c1").await.unwrap();

        // Zero max-age: the sweep's hard age limit purges everything.
        tokio::time::sleep(Duration::from_millis(5)).await;
        let purged = handle.retention_sweep().await.unwrap();
        assert_eq!(purged, 10);

        let resp = handle
            .fetch("g", partition, membership.generation, 0, 10)
            .await
            .unwrap();
        assert!(resp.gap);
        assert!(resp.records.is_empty());

        handle.shutdown();
        task.await.expect("service task failed");
    }
}
