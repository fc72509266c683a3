//! Node liveness transitions and the background jobs driving them.
//!
//! Telemetry arrival moves a node to online ([`touch`]). The recompute job
//! moves online nodes that have been silent longer than the liveness window
//! to offline ([`mark_offline`]). The expiry job deletes nodes silent longer
//! than the maximum age ([`expire_stale`]). Callbacks fire after each
//! transition has been committed.

use crate::error::StoreResult;
use crate::model::NodeStatus;
use crate::scheduler::{schedule, JobHandle};
use crate::store::NodeStore;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Thresholds and job intervals.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LivenessConfig {
    /// Silence after which an online node turns offline
    pub window: Duration,
    /// Silence after which a node is deleted
    pub max_age: Duration,
    pub recompute_interval: Duration,
    pub expiry_interval: Duration,
}

fn chrono_duration(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::MAX)
}

/// Record a telemetry arrival for `node_id`.
///
/// Unknown and offline nodes become online, `lastseen` is refreshed and
/// `firstseen` is set on first sight. `gateway` is recomputed from the
/// caller's view of the gateway set.
pub fn touch(
    store: &dyn NodeStore,
    node_id: &str,
    now: DateTime<Utc>,
    gateway: bool,
) -> StoreResult<NodeStatus> {
    let updated = store.update_status(node_id, &mut |current| {
        let mut status = match current {
            Some(status) => status,
            None => NodeStatus::first_seen(node_id, now),
        };
        if status.node_id.is_empty() {
            status.node_id = node_id.to_string();
        }
        status.touch(now);
        status.gateway = gateway;
        Some(status)
    })?;
    Ok(updated.unwrap_or_else(|| NodeStatus::first_seen(node_id, now)))
}

/// Whether `status` is online and has been silent for longer than `window`.
/// Unparseable timestamps are logged and treated as not silent.
fn went_silent(status: &NodeStatus, now: DateTime<Utc>, window: chrono::Duration) -> bool {
    if !status.online {
        return false;
    }
    match status.is_silent_for(now, window) {
        Ok(silent) => silent,
        Err(e) => {
            warn!(node_id = %status.node_id, "Skipping liveness check: {}", e);
            false
        }
    }
}

/// Turn every online node silent for longer than `window` offline and fire
/// the offline callbacks once per transitioned node.
pub fn mark_offline(
    store: &dyn NodeStore,
    now: DateTime<Utc>,
    window: Duration,
) -> StoreResult<Vec<String>> {
    let window = chrono_duration(window);
    let candidates: Vec<String> = store
        .all_statuses()?
        .into_iter()
        .filter(|status| went_silent(status, now, window))
        .map(|status| status.node_id)
        .collect();

    let mut transitioned = Vec::new();
    for node_id in candidates {
        let mut changed = false;
        // Re-checked under the engine lock; a concurrent touch wins.
        store.update_status(&node_id, &mut |current| {
            let mut status = current?;
            if !went_silent(&status, now, window) {
                return None;
            }
            status.online = false;
            changed = true;
            Some(status)
        })?;
        if changed {
            transitioned.push(node_id);
        }
    }

    for node_id in &transitioned {
        debug!(node_id = %node_id, "Node went offline");
        store.notifier().notify_offline(node_id);
    }
    if !transitioned.is_empty() {
        info!("{} node(s) went offline", transitioned.len());
    }
    Ok(transitioned)
}

/// Delete every node silent for longer than `max_age` and fire the expiry
/// callbacks once per deleted node.
pub fn expire_stale(
    store: &dyn NodeStore,
    now: DateTime<Utc>,
    max_age: Duration,
) -> StoreResult<Vec<String>> {
    let max_age = chrono_duration(max_age);
    let is_expired = |status: &NodeStatus| match status.is_silent_for(now, max_age) {
        Ok(expired) => expired,
        Err(e) => {
            warn!(node_id = %status.node_id, "Skipping expiry check: {}", e);
            false
        }
    };

    let candidates: Vec<String> = store
        .all_statuses()?
        .into_iter()
        .filter(|status| is_expired(status))
        .map(|status| status.node_id)
        .collect();

    let mut expired = Vec::new();
    for node_id in candidates {
        if store.expire_node(&node_id, &is_expired)? {
            expired.push(node_id);
        }
    }

    for node_id in &expired {
        debug!(node_id = %node_id, "Node expired");
        store.notifier().notify_expired(node_id);
    }
    if !expired.is_empty() {
        info!("Expired {} node(s)", expired.len());
    }
    Ok(expired)
}

/// The recompute and expiry jobs of one store.
pub struct LivenessJobs {
    recompute: JobHandle,
    expiry: JobHandle,
}

impl LivenessJobs {
    /// Start both jobs. The recompute job fires immediately so that a
    /// restored store reflects reality right after startup. Sweeps run on
    /// the blocking pool since engines do synchronous I/O.
    pub fn start(store: Arc<dyn NodeStore>, config: LivenessConfig) -> Self {
        let recompute_store = Arc::clone(&store);
        let recompute = schedule(
            "liveness-recompute",
            config.recompute_interval,
            true,
            move || {
                let store = Arc::clone(&recompute_store);
                async move {
                    let result = tokio::task::spawn_blocking(move || {
                        mark_offline(store.as_ref(), Utc::now(), config.window)
                    })
                    .await;
                    match result {
                        Ok(Ok(_)) => {}
                        Ok(Err(e)) => error!("Liveness recomputation failed: {}", e),
                        Err(e) => error!("Liveness recomputation panicked: {}", e),
                    }
                }
            },
        );

        let expiry = schedule("expiry-sweep", config.expiry_interval, true, move || {
            let store = Arc::clone(&store);
            async move {
                let result = tokio::task::spawn_blocking(move || {
                    expire_stale(store.as_ref(), Utc::now(), config.max_age)
                })
                .await;
                match result {
                    Ok(Ok(_)) => {}
                    Ok(Err(e)) => error!("Expiry sweep failed: {}", e),
                    Err(e) => error!("Expiry sweep panicked: {}", e),
                }
            }
        });

        Self { recompute, expiry }
    }

    pub async fn shutdown(self) {
        self.recompute.shutdown().await;
        self.expiry.shutdown().await;
    }
}
