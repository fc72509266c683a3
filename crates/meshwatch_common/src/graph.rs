//! Topology graph built from the mesh neighbour tables.
//!
//! Every own MAC of an online node becomes a graph node with a dense index.
//! Neighbour entries between two known MACs become links. A link is
//! bidirectional when the peer reports the source back, in which case both
//! ends report it and only the first orientation is kept. Link quality is
//! expressed as `255 / tq`, so lower is better and 1.0 is perfect.
//!
//! The rendered JSON is cached and only refreshed by [`GraphGenerator::regenerate`].

use crate::error::StoreResult;
use crate::model::{Neighbours, NodeInfo};
use crate::output;
use crate::store::NodeStore;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, error, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    /// Mesh MAC
    pub id: String,
    pub node_id: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub gateway: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphLink {
    pub bidirect: bool,
    pub source: usize,
    pub target: usize,
    pub tq: f64,
    pub vpn: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatadvGraph {
    pub multigraph: bool,
    pub directed: bool,
    pub nodes: Vec<GraphNode>,
    pub links: Vec<GraphLink>,
    pub graph: Vec<serde_json::Value>,
}

/// Document served as `graph.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphJson {
    pub batadv: BatadvGraph,
    pub version: u32,
}

/// Quality of a single direction. A reported tq of 0 is treated as 1.
fn link_quality(tq: u8) -> f64 {
    1.0 / (f64::from(tq.max(1)) / 255.0)
}

/// Quality of a bidirectional link, driven by the weaker direction.
fn bidirectional_quality(tq_source: u8, tq_target: u8) -> f64 {
    link_quality(tq_source.min(tq_target))
}

/// Input snapshot the graph is computed from.
pub struct GraphInput {
    pub neighbours: Vec<Neighbours>,
    pub online: HashSet<String>,
    pub nodeinfos: HashMap<String, NodeInfo>,
    pub gateways: HashSet<String>,
}

impl GraphInput {
    pub fn load(store: &dyn NodeStore) -> StoreResult<Self> {
        let online = store
            .all_statuses()?
            .into_iter()
            .filter(|status| status.online)
            .map(|status| status.node_id)
            .collect();
        let nodeinfos = store
            .all_nodeinfos()?
            .into_iter()
            .map(|info| (info.node_id.clone(), info))
            .collect();
        Ok(Self {
            neighbours: store.all_neighbours()?,
            online,
            nodeinfos,
            gateways: store.gateways()?.into_iter().collect(),
        })
    }
}

/// Compute the graph for `input`.
pub fn build_graph(input: &GraphInput) -> GraphJson {
    let mut neighbours: Vec<&Neighbours> = input
        .neighbours
        .iter()
        .filter(|n| input.online.contains(&n.node_id))
        .collect();
    neighbours.sort_by(|a, b| a.node_id.cmp(&b.node_id));

    // MAC -> (index, owning record)
    let mut table: BTreeMap<&str, (usize, &Neighbours)> = BTreeMap::new();
    let mut nodes = Vec::new();
    for record in &neighbours {
        for own_mac in record.batadv.keys() {
            if table.contains_key(own_mac.as_str()) {
                warn!(mac = %own_mac, node_id = %record.node_id, "MAC claimed by more than one node");
                continue;
            }
            table.insert(own_mac.as_str(), (nodes.len(), *record));
            nodes.push(GraphNode {
                id: own_mac.clone(),
                node_id: record.node_id.clone(),
                gateway: input.gateways.contains(own_mac),
            });
        }
    }

    let is_tunnel = |node_id: &str, mac: &str| {
        input
            .nodeinfos
            .get(node_id)
            .map(|info| info.is_tunnel_mac(mac))
            .unwrap_or(false)
    };

    let mut bidirectional = Vec::new();
    let mut unidirectional = Vec::new();
    for record in &neighbours {
        for (own_mac, batadv) in &record.batadv {
            for (peer_mac, link) in &batadv.neighbours {
                let (Some(&(source, _)), Some(&(target, peer))) =
                    (table.get(own_mac.as_str()), table.get(peer_mac.as_str()))
                else {
                    debug!(source = %own_mac, target = %peer_mac, "Skipping link to unknown MAC");
                    continue;
                };

                let vpn = is_tunnel(&record.node_id, own_mac) || is_tunnel(&peer.node_id, peer_mac);
                match peer.link(peer_mac, own_mac) {
                    Some(back) => bidirectional.push(GraphLink {
                        bidirect: true,
                        source,
                        target,
                        tq: bidirectional_quality(link.tq, back.tq),
                        vpn,
                    }),
                    None => unidirectional.push(GraphLink {
                        bidirect: false,
                        source,
                        target,
                        tq: link_quality(link.tq),
                        vpn,
                    }),
                }
            }
        }
    }

    let mut seen: HashSet<(usize, usize)> = HashSet::new();
    let mut links: Vec<GraphLink> = bidirectional
        .into_iter()
        .filter(|link| {
            if seen.contains(&(link.target, link.source)) {
                return false;
            }
            seen.insert((link.source, link.target));
            true
        })
        .collect();
    links.extend(unidirectional);

    GraphJson {
        batadv: BatadvGraph {
            multigraph: false,
            directed: false,
            nodes,
            links,
            graph: Vec::new(),
        },
        version: 1,
    }
}

/// Keeps the last rendered `graph.json`.
pub struct GraphGenerator {
    store: Arc<dyn NodeStore>,
    cached: RwLock<String>,
    output: Option<PathBuf>,
}

impl GraphGenerator {
    pub fn new(store: Arc<dyn NodeStore>, output: Option<PathBuf>) -> Self {
        let empty = build_graph(&GraphInput {
            neighbours: Vec::new(),
            online: HashSet::new(),
            nodeinfos: HashMap::new(),
            gateways: HashSet::new(),
        });
        Self {
            store,
            cached: RwLock::new(serde_json::to_string(&empty).unwrap_or_default()),
            output,
        }
    }

    /// Rebuild from the store, replace the cache and write the output file.
    pub fn regenerate(&self) {
        let graph = match GraphInput::load(self.store.as_ref()) {
            Ok(input) => build_graph(&input),
            Err(e) => {
                error!("Failed to read store for graph.json: {}", e);
                return;
            }
        };
        let json = match serde_json::to_string(&graph) {
            Ok(json) => json,
            Err(e) => {
                error!("Failed to encode graph.json: {}", e);
                return;
            }
        };
        if let Some(path) = &self.output {
            output::write_file(path, &json);
        }
        debug!(
            nodes = graph.batadv.nodes.len(),
            links = graph.batadv.links.len(),
            "Regenerated graph.json"
        );
        *self.cached.write().unwrap_or_else(PoisonError::into_inner) = json;
    }

    pub fn cached(&self) -> String {
        self.cached
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
