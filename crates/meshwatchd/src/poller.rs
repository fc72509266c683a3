//! Outbound queries: periodic mesh-wide polls and per-node re-queries.

use crate::transport::{Transport, GET_NEIGHBOURS, GET_NODEINFO, GET_STATISTICS};
use meshwatch_common::config::AnnouncedConfig;
use meshwatch_common::scheduler::{schedule, JobHandle};
use meshwatch_common::NodeStore;
use std::net::IpAddr;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, warn};

fn send_query(transport: &dyn Transport, request: &str) {
    if let Err(e) = transport.query(request) {
        warn!(request, "Query failed: {}", e);
    }
}

/// Start the nodeinfo poll (fired immediately) and the statistics poll,
/// which follows each statistics query with a neighbours query after
/// `neighbour_delay_secs`.
pub fn start_query_jobs(transport: Arc<dyn Transport>, config: &AnnouncedConfig) -> Vec<JobHandle> {
    let nodeinfo_transport = Arc::clone(&transport);
    let nodeinfo = schedule("query-nodeinfo", config.nodeinfo_interval(), true, move || {
        let transport = Arc::clone(&nodeinfo_transport);
        async move { send_query(transport.as_ref(), GET_NODEINFO) }
    });

    let neighbour_delay = Duration::from_secs(config.neighbour_delay_secs);
    let statistics = schedule(
        "query-statistics",
        config.statistics_interval(),
        true,
        move || {
            let transport = Arc::clone(&transport);
            async move {
                send_query(transport.as_ref(), GET_STATISTICS);
                tokio::time::sleep(neighbour_delay).await;
                send_query(transport.as_ref(), GET_NEIGHBOURS);
            }
        },
    );

    vec![nodeinfo, statistics]
}

/// Unicast `GET statistics` and `GET neighbours` to every announced address
/// of `node_id`.
pub fn requery_node(store: &dyn NodeStore, transport: &dyn Transport, node_id: &str) {
    let nodeinfo = match store.get_nodeinfo(node_id) {
        Ok(nodeinfo) => nodeinfo,
        Err(e) if e.is_not_found() => {
            debug!(node_id = %node_id, "No nodeinfo, cannot re-query");
            return;
        }
        Err(e) => {
            warn!(node_id = %node_id, "Failed to read nodeinfo: {}", e);
            return;
        }
    };

    for raw in &nodeinfo.network.addresses {
        let address: IpAddr = match raw.parse() {
            Ok(address) => address,
            Err(_) => {
                debug!(node_id = %node_id, address = %raw, "Skipping unparseable address");
                continue;
            }
        };
        for request in [GET_STATISTICS, GET_NEIGHBOURS] {
            if let Err(e) = transport.query_unicast(address, request) {
                debug!(node_id = %node_id, %address, request, "Re-query failed: {}", e);
            }
        }
    }
}

/// Re-query nodes as soon as they are marked offline. Best effort only: a
/// re-query does not hold off a later expiry.
pub fn register_offline_requery(store: &Arc<dyn NodeStore>, transport: Arc<dyn Transport>) {
    let weak: Weak<dyn NodeStore> = Arc::downgrade(store);
    store.on_offline(Arc::new(move |node_id: &str| {
        if let Some(store) = weak.upgrade() {
            requery_node(store.as_ref(), transport.as_ref(), node_id);
        }
    }));
}
