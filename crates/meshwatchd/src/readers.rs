//! Reader functions applied to every decoded record.
//!
//! The consumer applies [`default_readers`] in list order, synchronously,
//! once per record. Metric observers compute `new - old` against the value
//! still in the store, so they run before the collectors that replace it.
//! The liveness touch runs last so that observers can still see whether a
//! node was unknown or offline before this record arrived.

use crate::metrics::{CollectorMetrics, TrafficDirection};
use chrono::Utc;
use meshwatch_common::liveness;
use meshwatch_common::model::LivenessState;
use meshwatch_common::{NodeStore, Record, StoreError, StoreResult};
use std::sync::Arc;
use tracing::{debug, warn};

/// One step applied to each record.
pub trait RecordReader: Send + Sync {
    fn name(&self) -> &'static str;

    fn read(&self, store: &dyn NodeStore, record: &Record) -> StoreResult<()>;
}

/// `Ok(None)` for the expected not-found case.
fn optional<T>(result: StoreResult<T>) -> StoreResult<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => Err(e),
    }
}

/// Counts records per kind, errored ones included.
pub struct RecordCounter {
    pub metrics: Arc<CollectorMetrics>,
}

impl RecordReader for RecordCounter {
    fn name(&self) -> &'static str {
        "record-counter"
    }

    fn read(&self, _store: &dyn NodeStore, record: &Record) -> StoreResult<()> {
        self.metrics
            .records_total
            .with_label_values(&[record.kind().as_str()])
            .inc();
        Ok(())
    }
}

/// New-node and returned-node detector.
pub struct NodeCountObserver {
    pub metrics: Arc<CollectorMetrics>,
}

impl RecordReader for NodeCountObserver {
    fn name(&self) -> &'static str {
        "node-count"
    }

    fn read(&self, store: &dyn NodeStore, record: &Record) -> StoreResult<()> {
        let Some(node_id) = record.node_id() else {
            return Ok(());
        };
        let status = optional(store.get_status(node_id))?;
        match LivenessState::of(status.as_ref()) {
            LivenessState::Unknown => {
                debug!(node_id = %node_id, "New node");
                self.metrics.nodes_total.inc();
                self.metrics.nodes_online.inc();
            }
            LivenessState::Offline => {
                debug!(node_id = %node_id, "Node returned");
                self.metrics.nodes_online.inc();
            }
            LivenessState::Online => {}
        }
        Ok(())
    }
}

/// Accumulates the client delta into the total client gauge.
pub struct ClientCountObserver {
    pub metrics: Arc<CollectorMetrics>,
}

impl RecordReader for ClientCountObserver {
    fn name(&self) -> &'static str {
        "client-count"
    }

    fn read(&self, store: &dyn NodeStore, record: &Record) -> StoreResult<()> {
        let Record::Statistics(new) = record else {
            return Ok(());
        };
        let delta = match optional(store.get_statistics(&new.node_id))? {
            Some(old) => f64::from(new.clients.total) - f64::from(old.clients.total),
            None => f64::from(new.clients.total),
        };
        self.metrics.clients_total.add(delta);
        Ok(())
    }
}

/// Accumulates traffic deltas. A counter that went backwards was reset, so
/// the new reading itself is the traffic since the reset.
pub struct TrafficObserver {
    pub metrics: Arc<CollectorMetrics>,
}

impl RecordReader for TrafficObserver {
    fn name(&self) -> &'static str {
        "traffic-count"
    }

    fn read(&self, store: &dyn NodeStore, record: &Record) -> StoreResult<()> {
        let Record::Statistics(new) = record else {
            return Ok(());
        };
        let old = optional(store.get_statistics(&new.node_id))?;

        for direction in TrafficDirection::ALL {
            let Some(current) = direction.counter(new) else {
                continue;
            };
            let previous = old.as_ref().and_then(|old| direction.counter(old));
            let delta = match previous {
                Some(previous) if current.bytes >= previous.bytes => current.bytes - previous.bytes,
                Some(previous) => {
                    warn!(
                        node_id = %new.node_id,
                        direction = direction.as_str(),
                        old = previous.bytes,
                        new = current.bytes,
                        "Traffic counter went backwards, assuming reset"
                    );
                    current.bytes
                }
                None => current.bytes,
            };
            self.metrics.traffic_total(direction).add(delta);
        }
        Ok(())
    }
}

/// Sets per-node gauges from each statistics record.
pub struct NodeGaugeObserver {
    pub metrics: Arc<CollectorMetrics>,
}

impl RecordReader for NodeGaugeObserver {
    fn name(&self) -> &'static str {
        "node-gauges"
    }

    fn read(&self, store: &dyn NodeStore, record: &Record) -> StoreResult<()> {
        if let Record::Statistics(statistics) = record {
            let nodeinfo = optional(store.get_nodeinfo(&statistics.node_id))?;
            self.metrics.set_node_gauges(statistics, nodeinfo.as_ref());
        }
        Ok(())
    }
}

/// Adds the gateway a node reports to the gateway set.
pub struct GatewayCollector;

impl RecordReader for GatewayCollector {
    fn name(&self) -> &'static str {
        "gateway"
    }

    fn read(&self, store: &dyn NodeStore, record: &Record) -> StoreResult<()> {
        match record {
            Record::Statistics(statistics) if !statistics.gateway.is_empty() => {
                store.put_gateway(&statistics.gateway)
            }
            _ => Ok(()),
        }
    }
}

pub struct NodeInfoCollector;

impl RecordReader for NodeInfoCollector {
    fn name(&self) -> &'static str {
        "nodeinfo"
    }

    fn read(&self, store: &dyn NodeStore, record: &Record) -> StoreResult<()> {
        match record {
            Record::NodeInfo(nodeinfo) if !nodeinfo.node_id.is_empty() => {
                store.put_nodeinfo(nodeinfo)
            }
            _ => Ok(()),
        }
    }
}

pub struct StatisticsCollector;

impl RecordReader for StatisticsCollector {
    fn name(&self) -> &'static str {
        "statistics"
    }

    fn read(&self, store: &dyn NodeStore, record: &Record) -> StoreResult<()> {
        match record {
            Record::Statistics(statistics) if !statistics.node_id.is_empty() => {
                store.put_statistics(statistics)
            }
            _ => Ok(()),
        }
    }
}

pub struct NeighbourCollector;

impl RecordReader for NeighbourCollector {
    fn name(&self) -> &'static str {
        "neighbours"
    }

    fn read(&self, store: &dyn NodeStore, record: &Record) -> StoreResult<()> {
        match record {
            Record::Neighbours(neighbours) if !neighbours.node_id.is_empty() => {
                store.put_neighbours(neighbours)
            }
            _ => Ok(()),
        }
    }
}

/// Marks the sending node as alive. Must stay last.
pub struct LivenessTouch;

impl LivenessTouch {
    /// Whether any MAC of the node is a known gateway. Without nodeinfo the
    /// previously derived flag is kept.
    fn is_gateway(store: &dyn NodeStore, node_id: &str) -> StoreResult<bool> {
        match optional(store.get_nodeinfo(node_id))? {
            Some(nodeinfo) => {
                for mac in nodeinfo.mesh_macs() {
                    if store.is_gateway(&mac)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            None => Ok(optional(store.get_status(node_id))?
                .map(|status| status.gateway)
                .unwrap_or(false)),
        }
    }
}

impl RecordReader for LivenessTouch {
    fn name(&self) -> &'static str {
        "liveness"
    }

    fn read(&self, store: &dyn NodeStore, record: &Record) -> StoreResult<()> {
        let Some(node_id) = record.node_id() else {
            return Ok(());
        };
        let gateway = Self::is_gateway(store, node_id)?;
        liveness::touch(store, node_id, Utc::now(), gateway)?;
        Ok(())
    }
}

/// The mandatory reader order: metric observers, state collectors, liveness.
pub fn default_readers(metrics: Arc<CollectorMetrics>) -> Vec<Box<dyn RecordReader>> {
    vec![
        Box::new(RecordCounter {
            metrics: Arc::clone(&metrics),
        }),
        Box::new(NodeCountObserver {
            metrics: Arc::clone(&metrics),
        }),
        Box::new(ClientCountObserver {
            metrics: Arc::clone(&metrics),
        }),
        Box::new(TrafficObserver {
            metrics: Arc::clone(&metrics),
        }),
        Box::new(NodeGaugeObserver { metrics }),
        Box::new(GatewayCollector),
        Box::new(NodeInfoCollector),
        Box::new(StatisticsCollector),
        Box::new(NeighbourCollector),
        Box::new(LivenessTouch),
    ]
}

/// Apply every reader to `record` in order. A failing reader is logged and
/// the remaining readers still run.
pub fn apply(readers: &[Box<dyn RecordReader>], store: &dyn NodeStore, record: &Record) {
    for reader in readers {
        if let Err(e) = reader.read(store, record) {
            log_failure(reader.name(), record, &e);
        }
    }
}

fn log_failure(reader: &str, record: &Record, e: &StoreError) {
    warn!(
        reader = reader,
        kind = record.kind().as_str(),
        node_id = record.node_id().unwrap_or("-"),
        "Reader failed: {}",
        e
    );
}
