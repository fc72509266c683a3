//! Volatile in-process engine.
//!
//! Everything lives behind one mutex. Statistics and neighbour records sit
//! in TTL caches so that data from nodes which stopped reporting evicts
//! itself; nodeinfo and status persist until expiry or restart.

use super::{NodeStore, Notifier, StatusUpdate, TtlCache};
use crate::error::{EntityKind, StoreError, StoreResult};
use crate::model::{Neighbours, NodeInfo, NodeStatus, Statistics};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;
use std::time::Duration;

struct MemoryInner {
    nodeinfos: BTreeMap<String, NodeInfo>,
    statistics: TtlCache<Statistics>,
    neighbours: TtlCache<Neighbours>,
    statuses: BTreeMap<String, NodeStatus>,
    gateways: BTreeSet<String>,
}

pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
    notifier: Notifier,
}

impl MemoryStore {
    pub const ENGINE: &'static str = "memory";

    /// * `cache_capacity` - Maximum statistics/neighbour records held
    /// * `cache_ttl` - How long such a record outlives its last update
    pub fn new(cache_capacity: usize, cache_ttl: Duration) -> Self {
        Self {
            inner: Mutex::new(MemoryInner {
                nodeinfos: BTreeMap::new(),
                statistics: TtlCache::new(cache_capacity, cache_ttl),
                neighbours: TtlCache::new(cache_capacity, cache_ttl),
                statuses: BTreeMap::new(),
                gateways: BTreeSet::new(),
            }),
            notifier: Notifier::default(),
        }
    }
}

impl NodeStore for MemoryStore {
    fn engine(&self) -> &'static str {
        Self::ENGINE
    }

    fn get_nodeinfo(&self, node_id: &str) -> StoreResult<NodeInfo> {
        let inner = self.inner.lock()?;
        inner
            .nodeinfos
            .get(node_id)
            .cloned()
            .ok_or_else(|| StoreError::not_found(EntityKind::NodeInfo, node_id))
    }

    fn all_nodeinfos(&self) -> StoreResult<Vec<NodeInfo>> {
        Ok(self.inner.lock()?.nodeinfos.values().cloned().collect())
    }

    fn put_nodeinfo(&self, nodeinfo: &NodeInfo) -> StoreResult<()> {
        self.inner
            .lock()?
            .nodeinfos
            .insert(nodeinfo.node_id.clone(), nodeinfo.clone());
        Ok(())
    }

    fn get_statistics(&self, node_id: &str) -> StoreResult<Statistics> {
        self.inner
            .lock()?
            .statistics
            .get(node_id)
            .ok_or_else(|| StoreError::not_found(EntityKind::Statistics, node_id))
    }

    fn all_statistics(&self) -> StoreResult<Vec<Statistics>> {
        Ok(self.inner.lock()?.statistics.values())
    }

    fn put_statistics(&self, statistics: &Statistics) -> StoreResult<()> {
        self.inner
            .lock()?
            .statistics
            .insert(&statistics.node_id, statistics.clone());
        Ok(())
    }

    fn get_status(&self, node_id: &str) -> StoreResult<NodeStatus> {
        let inner = self.inner.lock()?;
        inner
            .statuses
            .get(node_id)
            .cloned()
            .ok_or_else(|| StoreError::not_found(EntityKind::Status, node_id))
    }

    fn all_statuses(&self) -> StoreResult<Vec<NodeStatus>> {
        Ok(self.inner.lock()?.statuses.values().cloned().collect())
    }

    fn put_status(&self, status: &NodeStatus) -> StoreResult<()> {
        self.inner
            .lock()?
            .statuses
            .insert(status.node_id.clone(), status.clone());
        Ok(())
    }

    fn update_status(
        &self,
        node_id: &str,
        update: StatusUpdate<'_>,
    ) -> StoreResult<Option<NodeStatus>> {
        let mut inner = self.inner.lock()?;
        let current = inner.statuses.get(node_id).cloned();
        let updated = update(current);
        if let Some(status) = &updated {
            inner.statuses.insert(node_id.to_string(), status.clone());
        }
        Ok(updated)
    }

    fn get_neighbours(&self, node_id: &str) -> StoreResult<Neighbours> {
        self.inner
            .lock()?
            .neighbours
            .get(node_id)
            .ok_or_else(|| StoreError::not_found(EntityKind::Neighbours, node_id))
    }

    fn all_neighbours(&self) -> StoreResult<Vec<Neighbours>> {
        Ok(self.inner.lock()?.neighbours.values())
    }

    fn put_neighbours(&self, neighbours: &Neighbours) -> StoreResult<()> {
        self.inner
            .lock()?
            .neighbours
            .insert(&neighbours.node_id, neighbours.clone());
        Ok(())
    }

    fn put_gateway(&self, mac: &str) -> StoreResult<()> {
        self.inner.lock()?.gateways.insert(mac.to_string());
        Ok(())
    }

    fn remove_gateway(&self, mac: &str) -> StoreResult<()> {
        self.inner.lock()?.gateways.remove(mac);
        Ok(())
    }

    fn is_gateway(&self, mac: &str) -> StoreResult<bool> {
        Ok(self.inner.lock()?.gateways.contains(mac))
    }

    fn gateways(&self) -> StoreResult<Vec<String>> {
        Ok(self.inner.lock()?.gateways.iter().cloned().collect())
    }

    fn expire_node(
        &self,
        node_id: &str,
        still_expired: &dyn Fn(&NodeStatus) -> bool,
    ) -> StoreResult<bool> {
        let mut inner = self.inner.lock()?;
        match inner.statuses.get(node_id) {
            Some(status) if still_expired(status) => {}
            _ => return Ok(false),
        }

        inner.statuses.remove(node_id);
        inner.statistics.remove(node_id);
        inner.neighbours.remove(node_id);
        if let Some(nodeinfo) = inner.nodeinfos.remove(node_id) {
            for mac in nodeinfo.mesh_macs() {
                inner.gateways.remove(&mac);
            }
        }
        Ok(true)
    }

    fn notifier(&self) -> &Notifier {
        &self.notifier
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_statistics_evict_after_ttl() {
        let store = MemoryStore::new(16, Duration::from_millis(50));
        store
            .put_statistics(&Statistics {
                node_id: "n1".into(),
                ..Default::default()
            })
            .unwrap();
        assert!(store.get_statistics("n1").is_ok());
        std::thread::sleep(Duration::from_millis(80));
        assert!(store.get_statistics("n1").unwrap_err().is_not_found());
        assert!(store.all_statistics().unwrap().is_empty());
    }

    #[test]
    fn test_nodeinfo_does_not_evict() {
        let store = MemoryStore::new(16, Duration::from_millis(10));
        store
            .put_nodeinfo(&NodeInfo {
                node_id: "n1".into(),
                ..Default::default()
            })
            .unwrap();
        std::thread::sleep(Duration::from_millis(30));
        assert!(store.get_nodeinfo("n1").is_ok());
    }
}
