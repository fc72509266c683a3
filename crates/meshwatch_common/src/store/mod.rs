//! Node state store.
//!
//! Holds the latest nodeinfo, statistics, neighbours and derived status per
//! node id, plus the set of gateway MACs. Engines are interchangeable and
//! selected by name at startup through [`open_store`].
//!
//! Every engine must be safe for concurrent use. Per-id read-modify-write of
//! a status goes through [`NodeStore::update_status`], which the engine
//! executes atomically, so the ingestion consumer and the liveness jobs
//! never lose each other's updates.

mod memory;
mod sqlite;
mod ttl_cache;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use ttl_cache::TtlCache;

use crate::config::{AnnouncedConfig, StoreConfig};
use crate::error::{StoreError, StoreResult};
use crate::model::{Neighbours, NodeInfo, NodeStatus, Statistics};
use std::path::PathBuf;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tracing::info;

/// Notification hook, called with the affected node id.
pub type NodeCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Closure applied to the current status of one node inside the engine's
/// critical section. Returning `None` leaves the stored value untouched.
pub type StatusUpdate<'a> = &'a mut dyn FnMut(Option<NodeStatus>) -> Option<NodeStatus>;

/// Operations every storage engine implements identically.
///
/// `get_*` on a missing id returns [`StoreError::NotFound`]; `all_*` on an
/// empty store returns an empty vector.
pub trait NodeStore: Send + Sync {
    /// Registry name of the engine.
    fn engine(&self) -> &'static str;

    fn get_nodeinfo(&self, node_id: &str) -> StoreResult<NodeInfo>;
    fn all_nodeinfos(&self) -> StoreResult<Vec<NodeInfo>>;
    fn put_nodeinfo(&self, nodeinfo: &NodeInfo) -> StoreResult<()>;

    fn get_statistics(&self, node_id: &str) -> StoreResult<Statistics>;
    fn all_statistics(&self) -> StoreResult<Vec<Statistics>>;
    fn put_statistics(&self, statistics: &Statistics) -> StoreResult<()>;

    fn get_status(&self, node_id: &str) -> StoreResult<NodeStatus>;
    fn all_statuses(&self) -> StoreResult<Vec<NodeStatus>>;
    fn put_status(&self, status: &NodeStatus) -> StoreResult<()>;

    /// Atomic get-mutate-put of one node's status.
    fn update_status(&self, node_id: &str, update: StatusUpdate<'_>)
        -> StoreResult<Option<NodeStatus>>;

    fn get_neighbours(&self, node_id: &str) -> StoreResult<Neighbours>;
    fn all_neighbours(&self) -> StoreResult<Vec<Neighbours>>;
    fn put_neighbours(&self, neighbours: &Neighbours) -> StoreResult<()>;

    fn put_gateway(&self, mac: &str) -> StoreResult<()>;
    fn remove_gateway(&self, mac: &str) -> StoreResult<()>;
    fn is_gateway(&self, mac: &str) -> StoreResult<bool>;
    fn gateways(&self) -> StoreResult<Vec<String>>;

    /// Delete all four entities of `node_id` and the gateway entries of its
    /// MACs in one step, provided `still_expired` holds for the status seen
    /// inside that step. Returns whether the node was deleted.
    fn expire_node(
        &self,
        node_id: &str,
        still_expired: &dyn Fn(&NodeStatus) -> bool,
    ) -> StoreResult<bool>;

    fn notifier(&self) -> &Notifier;

    /// Register a callback fired after a node transitions to offline.
    fn on_offline(&self, callback: NodeCallback) {
        self.notifier().register_offline(callback);
    }

    /// Register a callback fired after a node has been expired.
    fn on_expired(&self, callback: NodeCallback) {
        self.notifier().register_expired(callback);
    }

    /// Flush and release engine resources.
    fn close(&self) -> StoreResult<()> {
        Ok(())
    }
}

/// Registered offline and expiry callbacks.
///
/// Callbacks are invoked after the state transition has been committed and
/// outside any engine lock. They still run on the job's task, so they must
/// not block for long.
#[derive(Default)]
pub struct Notifier {
    offline: RwLock<Vec<NodeCallback>>,
    expired: RwLock<Vec<NodeCallback>>,
}

impl Notifier {
    pub fn register_offline(&self, callback: NodeCallback) {
        self.offline
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(callback);
    }

    pub fn register_expired(&self, callback: NodeCallback) {
        self.expired
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(callback);
    }

    pub fn notify_offline(&self, node_id: &str) {
        let callbacks = self
            .offline
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for callback in callbacks {
            callback(node_id);
        }
    }

    pub fn notify_expired(&self, node_id: &str) {
        let callbacks = self
            .expired
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for callback in callbacks {
            callback(node_id);
        }
    }
}

/// Parameters engines are built from.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub path: PathBuf,
    pub cache_capacity: usize,
    pub cache_ttl: Duration,
}

impl EngineOptions {
    pub fn from_config(store: &StoreConfig, announced: &AnnouncedConfig) -> Self {
        Self {
            path: store.path.clone(),
            cache_capacity: store.cache_capacity,
            cache_ttl: announced.liveness_window(),
        }
    }
}

type EngineFactory = fn(&EngineOptions) -> StoreResult<Arc<dyn NodeStore>>;

/// Known engines by name.
const ENGINES: &[(&str, EngineFactory)] = &[
    (MemoryStore::ENGINE, open_memory),
    (SqliteStore::ENGINE, open_sqlite),
];

fn open_memory(options: &EngineOptions) -> StoreResult<Arc<dyn NodeStore>> {
    Ok(Arc::new(MemoryStore::new(
        options.cache_capacity,
        options.cache_ttl,
    )))
}

fn open_sqlite(options: &EngineOptions) -> StoreResult<Arc<dyn NodeStore>> {
    Ok(Arc::new(SqliteStore::open_at(&options.path)?))
}

pub fn engine_names() -> Vec<&'static str> {
    ENGINES.iter().map(|(name, _)| *name).collect()
}

/// Build the engine registered under `name`.
pub fn open_store(name: &str, options: &EngineOptions) -> StoreResult<Arc<dyn NodeStore>> {
    let factory = ENGINES
        .iter()
        .find(|(engine, _)| *engine == name)
        .map(|(_, factory)| *factory)
        .ok_or_else(|| StoreError::UnknownEngine(name.to_string()))?;
    let store = factory(options)?;
    info!(engine = name, "Opened node store");
    Ok(store)
}
