//! Seeding the store from a `nodes.json` written by an older map backend.
//!
//! Statistics in that format are already summarized, so only clients, load,
//! rootfs, uptime, traffic and memory usage survive the conversion. Memory
//! usage is re-encoded as a 100-unit total so that [`Memory::usage`]
//! reproduces it.
//!
//! [`Memory::usage`]: crate::model::statistics::Memory::usage

use crate::error::StoreError;
use crate::model::statistics::Memory;
use crate::model::{Clients, NodeStatus, Statistics};
use crate::snapshot::{NodeSummary, NodesJson};
use crate::store::NodeStore;
use std::fs;
use std::path::Path;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Error, Debug)]
pub enum ImportError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to parse nodes.json: {0}")]
    Parse(#[from] serde_json::Error),

    #[error(transparent)]
    Store(#[from] StoreError),
}

fn statistics_from_summary(node_id: &str, summary: &NodeSummary) -> Statistics {
    let usage = summary.memory_usage.clamp(0.0, 1.0);
    Statistics {
        node_id: node_id.to_string(),
        clients: Clients {
            wifi: summary.clients,
            total: summary.clients,
        },
        rootfs_usage: summary.rootfs_usage,
        traffic: summary.traffic.clone(),
        memory: Memory {
            total: 100,
            free: (100.0 * (1.0 - usage)).round() as u64,
            ..Default::default()
        },
        uptime: summary.uptime,
        gateway: summary.gateway.clone(),
        loadavg: summary.loadavg,
        ..Default::default()
    }
}

/// Write every node of `document` into `store`. Returns the node count.
pub fn import_nodes(store: &dyn NodeStore, document: NodesJson) -> Result<usize, ImportError> {
    let mut imported = 0;
    for (node_id, node) in document.nodes {
        if node_id.is_empty() {
            warn!("Skipping legacy node without id");
            continue;
        }
        let mut nodeinfo = node.nodeinfo;
        if nodeinfo.node_id.is_empty() {
            nodeinfo.node_id = node_id.clone();
        }

        store.put_nodeinfo(&nodeinfo)?;
        store.put_statistics(&statistics_from_summary(&node_id, &node.statistics))?;
        store.put_status(&NodeStatus {
            node_id: node_id.clone(),
            firstseen: node.firstseen,
            lastseen: node.lastseen,
            online: node.flags.online,
            gateway: node.flags.gateway,
        })?;
        imported += 1;
    }
    Ok(imported)
}

/// Read and import the legacy file at `path`.
pub fn import_nodes_file(store: &dyn NodeStore, path: &Path) -> Result<usize, ImportError> {
    let raw = fs::read_to_string(path).map_err(|source| ImportError::Read {
        path: path.display().to_string(),
        source,
    })?;
    let document: NodesJson = serde_json::from_str(&raw)?;
    let imported = import_nodes(store, document)?;
    info!("Imported {} node(s) from {}", imported, path.display());
    Ok(imported)
}
