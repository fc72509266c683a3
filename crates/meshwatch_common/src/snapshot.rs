//! Per-node public view served as `nodes.json`.
//!
//! One entry per node with known identity: the nodeinfo as announced, a
//! flattened statistics summary, liveness flags and first/last seen times.
//! Client counts of offline nodes are reported as zero since the stored
//! value is stale by definition.

use crate::error::StoreResult;
use crate::model::{NodeInfo, NodeStatus, Statistics, Traffic};
use crate::model::status::LEGACY_TIME_FORMAT;
use crate::output;
use crate::store::NodeStore;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, error};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeFlags {
    #[serde(default)]
    pub online: bool,
    #[serde(default)]
    pub gateway: bool,
    #[serde(default)]
    pub uplink: bool,
}

/// Statistics summary in the map frontend's layout.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeSummary {
    #[serde(default)]
    pub clients: u32,
    #[serde(default)]
    pub gateway: String,
    #[serde(default)]
    pub loadavg: f64,
    #[serde(default)]
    pub memory_usage: f64,
    #[serde(default)]
    pub rootfs_usage: f64,
    #[serde(default)]
    pub uptime: f64,
    #[serde(default)]
    pub traffic: Option<Traffic>,
}

impl NodeSummary {
    fn from_statistics(statistics: &Statistics, online: bool) -> Self {
        Self {
            clients: if online { statistics.clients.total } else { 0 },
            gateway: statistics.gateway.clone(),
            loadavg: statistics.loadavg,
            memory_usage: statistics.memory.usage(),
            rootfs_usage: statistics.rootfs_usage,
            uptime: statistics.uptime,
            traffic: statistics.traffic.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotNode {
    pub nodeinfo: NodeInfo,
    #[serde(default)]
    pub statistics: NodeSummary,
    #[serde(default)]
    pub flags: NodeFlags,
    #[serde(default)]
    pub lastseen: String,
    #[serde(default)]
    pub firstseen: String,
}

/// Document served as `nodes.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodesJson {
    #[serde(default)]
    pub timestamp: String,
    #[serde(default)]
    pub version: u32,
    #[serde(default)]
    pub nodes: BTreeMap<String, SnapshotNode>,
}

pub struct SnapshotInput {
    pub nodeinfos: Vec<NodeInfo>,
    pub statistics: HashMap<String, Statistics>,
    pub statuses: HashMap<String, NodeStatus>,
}

impl SnapshotInput {
    pub fn load(store: &dyn NodeStore) -> StoreResult<Self> {
        Ok(Self {
            nodeinfos: store.all_nodeinfos()?,
            statistics: store
                .all_statistics()?
                .into_iter()
                .map(|s| (s.node_id.clone(), s))
                .collect(),
            statuses: store
                .all_statuses()?
                .into_iter()
                .map(|s| (s.node_id.clone(), s))
                .collect(),
        })
    }
}

pub fn build_snapshot(input: &SnapshotInput, now: DateTime<Utc>) -> NodesJson {
    let mut nodes = BTreeMap::new();
    for nodeinfo in &input.nodeinfos {
        let status = input.statuses.get(&nodeinfo.node_id);
        let online = status.map(|s| s.online).unwrap_or(false);
        let statistics = input.statistics.get(&nodeinfo.node_id);

        let node = SnapshotNode {
            nodeinfo: nodeinfo.clone(),
            statistics: statistics
                .map(|s| NodeSummary::from_statistics(s, online))
                .unwrap_or_default(),
            flags: NodeFlags {
                online,
                gateway: status.map(|s| s.gateway).unwrap_or(false),
                uplink: statistics.map(Statistics::has_uplink).unwrap_or(false),
            },
            lastseen: status.map(|s| s.lastseen.clone()).unwrap_or_default(),
            firstseen: status.map(|s| s.firstseen.clone()).unwrap_or_default(),
        };
        nodes.insert(nodeinfo.node_id.clone(), node);
    }

    NodesJson {
        timestamp: now.format(LEGACY_TIME_FORMAT).to_string(),
        version: 1,
        nodes,
    }
}

/// Keeps the last rendered `nodes.json`.
pub struct NodesGenerator {
    store: Arc<dyn NodeStore>,
    cached: RwLock<String>,
    output: Option<PathBuf>,
}

impl NodesGenerator {
    pub fn new(store: Arc<dyn NodeStore>, output: Option<PathBuf>) -> Self {
        let empty = NodesJson {
            timestamp: String::new(),
            version: 1,
            nodes: BTreeMap::new(),
        };
        Self {
            store,
            cached: RwLock::new(serde_json::to_string(&empty).unwrap_or_default()),
            output,
        }
    }

    pub fn regenerate(&self) {
        let snapshot = match SnapshotInput::load(self.store.as_ref()) {
            Ok(input) => build_snapshot(&input, Utc::now()),
            Err(e) => {
                error!("Failed to read store for nodes.json: {}", e);
                return;
            }
        };
        let json = match serde_json::to_string(&snapshot) {
            Ok(json) => json,
            Err(e) => {
                error!("Failed to encode nodes.json: {}", e);
                return;
            }
        };
        if let Some(path) = &self.output {
            output::write_file(path, &json);
        }
        debug!(nodes = snapshot.nodes.len(), "Regenerated nodes.json");
        *self.cached.write().unwrap_or_else(PoisonError::into_inner) = json;
    }

    pub fn cached(&self) -> String {
        self.cached
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
