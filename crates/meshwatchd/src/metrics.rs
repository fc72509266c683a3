//! Prometheus metrics for the collector.
//!
//! Totals are running accumulators fed with deltas by the metric observer
//! readers. They are seeded once at startup from a full store scan
//! ([`CollectorMetrics::replay`]) and adjusted by the store's offline and
//! expiry callbacks.

use meshwatch_common::config::PrometheusConfig;
use meshwatch_common::model::{NodeInfo, Statistics, TrafficCounter};
use meshwatch_common::{NodeStore, StoreResult};
use prometheus::{
    register_gauge_vec_with_registry, register_gauge_with_registry,
    register_int_counter_vec_with_registry, register_int_gauge_with_registry, Encoder, Gauge,
    GaugeVec, IntCounterVec, IntGauge, Registry, TextEncoder,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, Weak};
use tracing::{debug, info};

/// Which optional labels per-node series carry.
#[derive(Debug, Clone, Copy, Default)]
pub struct NodeLabels {
    pub hostname: bool,
    pub sitecode: bool,
}

impl NodeLabels {
    fn names(&self) -> Vec<&'static str> {
        let mut names = vec!["nodeid"];
        if self.hostname {
            names.push("hostname");
        }
        if self.sitecode {
            names.push("sitecode");
        }
        names
    }

    /// Label values for a node; missing nodeinfo yields empty optional labels.
    fn values(&self, node_id: &str, nodeinfo: Option<&NodeInfo>) -> Vec<String> {
        let mut values = vec![node_id.to_string()];
        if self.hostname {
            values.push(nodeinfo.map(|n| n.hostname.clone()).unwrap_or_default());
        }
        if self.sitecode {
            values.push(nodeinfo.map(|n| n.system.site_code.clone()).unwrap_or_default());
        }
        values
    }
}

/// Traffic directions accumulated into totals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrafficDirection {
    Rx,
    Tx,
    MgmtRx,
    MgmtTx,
}

impl TrafficDirection {
    pub const ALL: [TrafficDirection; 4] = [
        TrafficDirection::Rx,
        TrafficDirection::Tx,
        TrafficDirection::MgmtRx,
        TrafficDirection::MgmtTx,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TrafficDirection::Rx => "rx",
            TrafficDirection::Tx => "tx",
            TrafficDirection::MgmtRx => "mgmt_rx",
            TrafficDirection::MgmtTx => "mgmt_tx",
        }
    }

    /// Counter of this direction in `statistics`, if reported.
    pub fn counter<'a>(&self, statistics: &'a Statistics) -> Option<&'a TrafficCounter> {
        let traffic = statistics.traffic.as_ref()?;
        match self {
            TrafficDirection::Rx => traffic.rx.as_ref(),
            TrafficDirection::Tx => traffic.tx.as_ref(),
            TrafficDirection::MgmtRx => traffic.mgmt_rx.as_ref(),
            TrafficDirection::MgmtTx => traffic.mgmt_tx.as_ref(),
        }
    }
}

/// Metrics sink shared by the readers, the store callbacks and `/metrics`.
pub struct CollectorMetrics {
    pub nodes_total: IntGauge,
    pub nodes_online: IntGauge,
    pub clients_total: Gauge,
    pub traffic_rx: Gauge,
    pub traffic_tx: Gauge,
    pub traffic_mgmt_rx: Gauge,
    pub traffic_mgmt_tx: Gauge,
    pub records_total: IntCounterVec,

    pub node_clients: GaugeVec,
    pub node_uptime: GaugeVec,
    pub node_traffic_rx: GaugeVec,
    pub node_traffic_tx: GaugeVec,

    labels: NodeLabels,
    /// Label values last used per node, to drop series on expiry.
    node_series: Mutex<HashMap<String, Vec<String>>>,
    registry: Registry,
}

impl CollectorMetrics {
    pub fn new(config: &PrometheusConfig) -> prometheus::Result<Self> {
        let registry = Registry::new();
        let labels = NodeLabels {
            hostname: config.namelabel,
            sitecode: config.sitecodelabel,
        };
        let node_labels = labels.names();
        let mut traffic_labels = node_labels.clone();
        traffic_labels.push("type");

        let nodes_total = register_int_gauge_with_registry!(
            "meshnodes_total",
            "Total number of known mesh nodes",
            registry
        )?;

        let nodes_online = register_int_gauge_with_registry!(
            "meshnodes_online_total",
            "Number of mesh nodes currently online",
            registry
        )?;

        let clients_total = register_gauge_with_registry!(
            "total_clients",
            "Clients connected to the mesh",
            registry
        )?;

        let traffic_rx = register_gauge_with_registry!(
            "total_traffic_rx",
            "Bytes received by all nodes",
            registry
        )?;

        let traffic_tx = register_gauge_with_registry!(
            "total_traffic_tx",
            "Bytes sent by all nodes",
            registry
        )?;

        let traffic_mgmt_rx = register_gauge_with_registry!(
            "total_traffic_mgmt_rx",
            "Management bytes received by all nodes",
            registry
        )?;

        let traffic_mgmt_tx = register_gauge_with_registry!(
            "total_traffic_mgmt_tx",
            "Management bytes sent by all nodes",
            registry
        )?;

        let records_total = register_int_counter_vec_with_registry!(
            "collector_records_total",
            "Decoded telemetry records by kind",
            &["kind"],
            registry
        )?;

        let node_clients = register_gauge_vec_with_registry!(
            "meshnode_clients",
            "Clients connected to a node",
            &node_labels,
            registry
        )?;

        let node_uptime = register_gauge_vec_with_registry!(
            "meshnode_uptime",
            "Uptime of a node in seconds",
            &node_labels,
            registry
        )?;

        let node_traffic_rx = register_gauge_vec_with_registry!(
            "meshnode_traffic_rx",
            "Bytes received by a node",
            &traffic_labels,
            registry
        )?;

        let node_traffic_tx = register_gauge_vec_with_registry!(
            "meshnode_traffic_tx",
            "Bytes sent by a node",
            &traffic_labels,
            registry
        )?;

        Ok(Self {
            nodes_total,
            nodes_online,
            clients_total,
            traffic_rx,
            traffic_tx,
            traffic_mgmt_rx,
            traffic_mgmt_tx,
            records_total,
            node_clients,
            node_uptime,
            node_traffic_rx,
            node_traffic_tx,
            labels,
            node_series: Mutex::new(HashMap::new()),
            registry,
        })
    }

    pub fn traffic_total(&self, direction: TrafficDirection) -> &Gauge {
        match direction {
            TrafficDirection::Rx => &self.traffic_rx,
            TrafficDirection::Tx => &self.traffic_tx,
            TrafficDirection::MgmtRx => &self.traffic_mgmt_rx,
            TrafficDirection::MgmtTx => &self.traffic_mgmt_tx,
        }
    }

    /// Set the per-node gauges from the latest statistics.
    pub fn set_node_gauges(&self, statistics: &Statistics, nodeinfo: Option<&NodeInfo>) {
        let values = self.labels.values(&statistics.node_id, nodeinfo);
        let base: Vec<&str> = values.iter().map(String::as_str).collect();

        self.node_clients
            .with_label_values(&base)
            .set(f64::from(statistics.clients.total));
        self.node_uptime.with_label_values(&base).set(statistics.uptime);

        let series = [
            (&self.node_traffic_rx, TrafficDirection::Rx, "traffic"),
            (&self.node_traffic_rx, TrafficDirection::MgmtRx, "mgmt_traffic"),
            (&self.node_traffic_tx, TrafficDirection::Tx, "traffic"),
            (&self.node_traffic_tx, TrafficDirection::MgmtTx, "mgmt_traffic"),
        ];
        for (gauge, direction, kind) in series {
            if let Some(counter) = direction.counter(statistics) {
                let mut labels = base.clone();
                labels.push(kind);
                gauge.with_label_values(&labels).set(counter.bytes);
            }
        }

        let mut known = self.node_series.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = known.insert(statistics.node_id.clone(), values.clone()) {
            if previous != values {
                self.remove_series(&previous);
            }
        }
    }

    fn remove_series(&self, values: &[String]) {
        let base: Vec<&str> = values.iter().map(String::as_str).collect();
        let _ = self.node_clients.remove_label_values(&base);
        let _ = self.node_uptime.remove_label_values(&base);
        for kind in ["traffic", "mgmt_traffic"] {
            let mut labels = base.clone();
            labels.push(kind);
            let _ = self.node_traffic_rx.remove_label_values(&labels);
            let _ = self.node_traffic_tx.remove_label_values(&labels);
        }
    }

    /// Drop every per-node series of `node_id`.
    pub fn forget_node(&self, node_id: &str) {
        let previous = self
            .node_series
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(node_id);
        if let Some(values) = previous {
            self.remove_series(&values);
        }
    }

    /// Seed the accumulators from the current store contents.
    pub fn replay(&self, store: &dyn NodeStore) -> StoreResult<()> {
        let statuses = store.all_statuses()?;
        let online: std::collections::HashSet<&str> = statuses
            .iter()
            .filter(|status| status.online)
            .map(|status| status.node_id.as_str())
            .collect();
        let nodeinfos: HashMap<String, NodeInfo> = store
            .all_nodeinfos()?
            .into_iter()
            .map(|info| (info.node_id.clone(), info))
            .collect();

        self.nodes_total.set(statuses.len() as i64);
        self.nodes_online.set(online.len() as i64);

        let mut clients = 0.0;
        let mut traffic = [0.0; 4];
        for statistics in store.all_statistics()? {
            if online.contains(statistics.node_id.as_str()) {
                clients += f64::from(statistics.clients.total);
                self.set_node_gauges(&statistics, nodeinfos.get(&statistics.node_id));
            }
            for (total, direction) in traffic.iter_mut().zip(TrafficDirection::ALL) {
                if let Some(counter) = direction.counter(&statistics) {
                    *total += counter.bytes;
                }
            }
        }
        self.clients_total.set(clients);
        for (total, direction) in traffic.into_iter().zip(TrafficDirection::ALL) {
            self.traffic_total(direction).set(total);
        }

        info!(
            nodes = statuses.len(),
            online = online.len(),
            clients = clients,
            "Replayed metrics from store"
        );
        Ok(())
    }

    /// Hook the node gauges to the store's offline and expiry transitions.
    pub fn register_callbacks(self: &Arc<Self>, store: &dyn NodeStore) {
        let metrics: Weak<Self> = Arc::downgrade(self);
        store.on_offline(Arc::new(move |node_id: &str| {
            if let Some(metrics) = metrics.upgrade() {
                debug!(node_id = %node_id, "Decrementing online nodes");
                metrics.nodes_online.dec();
            }
        }));

        let metrics: Weak<Self> = Arc::downgrade(self);
        store.on_expired(Arc::new(move |node_id: &str| {
            if let Some(metrics) = metrics.upgrade() {
                metrics.nodes_total.dec();
                metrics.forget_node(node_id);
            }
        }));
    }

    /// Prometheus text exposition of all metrics.
    pub fn export(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
            tracing::error!("Failed to encode metrics: {}", e);
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meshwatch_common::model::{NodeStatus, Traffic};
    use meshwatch_common::store::MemoryStore;
    use std::time::Duration;

    fn stats(node_id: &str, clients: u32, rx: f64) -> Statistics {
        let mut statistics = Statistics {
            node_id: node_id.to_string(),
            traffic: Some(Traffic {
                rx: Some(TrafficCounter {
                    bytes: rx,
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        };
        statistics.clients.total = clients;
        statistics
    }

    fn status(node_id: &str, online: bool) -> NodeStatus {
        NodeStatus {
            node_id: node_id.to_string(),
            firstseen: "2020-01-01T00:00:00Z".into(),
            lastseen: "2020-01-01T00:00:00Z".into(),
            online,
            gateway: false,
        }
    }

    #[test]
    fn test_replay_counts_online_clients_only() {
        let store = MemoryStore::new(16, Duration::from_secs(600));
        store.put_status(&status("a", true)).unwrap();
        store.put_status(&status("b", false)).unwrap();
        store.put_statistics(&stats("a", 3, 100.0)).unwrap();
        store.put_statistics(&stats("b", 7, 50.0)).unwrap();

        let metrics = CollectorMetrics::new(&PrometheusConfig::default()).unwrap();
        metrics.replay(&store).unwrap();

        assert_eq!(metrics.nodes_total.get(), 2);
        assert_eq!(metrics.nodes_online.get(), 1);
        assert_eq!(metrics.clients_total.get(), 3.0);
        assert_eq!(metrics.traffic_rx.get(), 150.0);
        assert_eq!(metrics.traffic_tx.get(), 0.0);
    }

    #[test]
    fn test_callbacks_adjust_gauges() {
        let store = MemoryStore::new(16, Duration::from_secs(600));
        let metrics = Arc::new(CollectorMetrics::new(&PrometheusConfig::default()).unwrap());
        metrics.nodes_total.set(2);
        metrics.nodes_online.set(2);
        metrics.register_callbacks(&store);

        store.notifier().notify_offline("a");
        assert_eq!(metrics.nodes_online.get(), 1);
        store.notifier().notify_expired("a");
        assert_eq!(metrics.nodes_total.get(), 1);
    }

    #[test]
    fn test_extended_labels() {
        let config = PrometheusConfig {
            namelabel: true,
            sitecodelabel: true,
        };
        let metrics = CollectorMetrics::new(&config).unwrap();
        let mut info = NodeInfo {
            node_id: "a".into(),
            hostname: "router-a".into(),
            ..Default::default()
        };
        info.system.site_code = "ffdo".into();
        metrics.set_node_gauges(&stats("a", 4, 10.0), Some(&info));

        let text = metrics.export();
        let line = text
            .lines()
            .find(|line| line.starts_with("meshnode_clients{"))
            .unwrap();
        assert!(line.contains(r#"hostname="router-a""#));
        assert!(line.contains(r#"sitecode="ffdo""#));
        assert!(line.ends_with(" 4"));
        assert!(text.contains(r#"type="traffic""#));

        metrics.forget_node("a");
        assert!(!metrics.export().contains("meshnode_clients{"));
    }

    #[test]
    fn test_missing_nodeinfo_uses_empty_labels() {
        let config = PrometheusConfig {
            namelabel: true,
            sitecodelabel: false,
        };
        let metrics = CollectorMetrics::new(&config).unwrap();
        metrics.set_node_gauges(&stats("a", 1, 0.0), None);
        let text = metrics.export();
        let line = text
            .lines()
            .find(|line| line.starts_with("meshnode_clients{"))
            .unwrap();
        assert!(line.contains(r#"hostname="""#));
        assert!(!line.contains("sitecode"));
    }
}
