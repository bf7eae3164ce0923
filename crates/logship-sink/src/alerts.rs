// Copyright 2025-Present Logship authors
// SPDX-License-Identifier: Apache-2.0

//! Threshold alerts evaluated over the index store on a fixed interval.
//!
//! The scheduler is decoupled from ingest: it wakes on its own timer,
//! runs each registered condition over the documents that arrived since
//! the condition's last evaluation, and records a [`FiredAlert`] when the
//! match count crosses the threshold. A condition that just fired stays
//! quiet for its cooldown window.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::query::{search, SearchQuery, TimeRange};
use crate::store::IndexStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AlertId(u64);

impl std::fmt::Display for AlertId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "alert-{}", self.0)
    }
}

/// What has to be true for an alert to fire: at least `min_count`
/// documents matching `query` inside one evaluation window.
#[derive(Debug, Clone)]
pub struct AlertCondition {
    pub query: SearchQuery,
    pub min_count: usize,
    pub cooldown: Duration,
}

/// One firing of an alert, drained by the dashboard side.
#[derive(Debug, Clone)]
pub struct FiredAlert {
    pub alert_id: AlertId,
    pub index: String,
    pub matched: usize,
    pub fired_at_ms: i64,
}

struct AlertState {
    index: String,
    condition: AlertCondition,
    last_eval_ms: i64,
    last_fired_ms: Option<i64>,
}

/// Registered alerts plus the queue of firings not yet drained. Shared
/// between the scheduler task and whoever registers conditions.
#[derive(Default)]
pub struct AlertRegistry {
    next_id: AtomicU64,
    alerts: Mutex<HashMap<AlertId, AlertState>>,
    fired: Mutex<Vec<FiredAlert>>,
}

impl AlertRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_alert(&self, condition: AlertCondition, index: impl Into<String>) -> AlertId {
        let id = AlertId(self.next_id.fetch_add(1, Ordering::Relaxed));
        #[allow(clippy::expect_used)]
        let mut alerts = self.alerts.lock().expect("lock poisoned");
        alerts.insert(
            id,
            AlertState {
                index: index.into(),
                condition,
                last_eval_ms: now_ms(),
                last_fired_ms: None,
            },
        );
        id
    }

    pub fn remove_alert(&self, id: AlertId) -> bool {
        #[allow(clippy::expect_used)]
        let mut alerts = self.alerts.lock().expect("lock poisoned");
        alerts.remove(&id).is_some()
    }

    /// Drain every firing recorded since the previous drain.
    pub fn fired(&self) -> Vec<FiredAlert> {
        #[allow(clippy::expect_used)]
        let mut fired = self.fired.lock().expect("lock poisoned");
        std::mem::take(&mut *fired)
    }

    /// Evaluate every alert against documents in `[last_eval, now_ms)`.
    /// The window always advances, even when the alert is cooling down,
    /// so a suppressed burst is not re-counted later.
    pub fn evaluate_all(&self, store: &Arc<IndexStore>, now_ms: i64) {
        #[allow(clippy::expect_used)]
        let mut alerts = self.alerts.lock().expect("lock poisoned");
        for (id, state) in alerts.iter_mut() {
            let range = TimeRange::new(state.last_eval_ms, now_ms);
            state.last_eval_ms = now_ms;

            let matched = match search(store, &state.index, &state.condition.query, range, 0, 0) {
                Ok(page) => page.total,
                Err(e) => {
                    debug!("{id}: skipped evaluation: {e}");
                    continue;
                }
            };
            if matched < state.condition.min_count {
                continue;
            }

            let cooldown_ms = state.condition.cooldown.as_millis() as i64;
            if let Some(last) = state.last_fired_ms {
                if now_ms - last < cooldown_ms {
                    debug!("{id}: {matched} matches suppressed by cooldown");
                    continue;
                }
            }
            state.last_fired_ms = Some(now_ms);
            info!(
                "{id}: fired on index '{}' with {matched} matches",
                state.index
            );
            #[allow(clippy::expect_used)]
            let mut fired = self.fired.lock().expect("lock poisoned");
            fired.push(FiredAlert {
                alert_id: *id,
                index: state.index.clone(),
                matched,
                fired_at_ms: now_ms,
            });
        }
    }
}

/// Periodic evaluation task. Runs until its cancellation token fires.
pub struct AlertScheduler {
    registry: Arc<AlertRegistry>,
    store: Arc<IndexStore>,
    eval_interval: Duration,
    cancel_token: CancellationToken,
}

impl AlertScheduler {
    pub fn new(
        registry: Arc<AlertRegistry>,
        store: Arc<IndexStore>,
        eval_interval: Duration,
        cancel_token: CancellationToken,
    ) -> Self {
        AlertScheduler {
            registry,
            store,
            eval_interval,
            cancel_token,
        }
    }

    pub async fn run(self) {
        let mut ticker = interval(self.eval_interval);
        // discard first tick, which is instantaneous
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.registry.evaluate_all(&self.store, now_ms());
                }
                _ = self.cancel_token.cancelled() => {
                    debug!("alert scheduler cancelled, shutting down");
                    return;
                }
            }
        }
    }
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
