//! Typed records produced by the decode stage.

use crate::model::{Neighbours, NodeInfo, Statistics};
use serde::Deserialize;

/// Kind of a decoded record, used for logging and dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    NodeInfo,
    Statistics,
    Neighbours,
    Errored,
}

impl RecordKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::NodeInfo => "nodeinfo",
            RecordKind::Statistics => "statistics",
            RecordKind::Neighbours => "neighbours",
            RecordKind::Errored => "errored",
        }
    }
}

/// One decoded section of a telemetry response.
#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    NodeInfo(NodeInfo),
    Statistics(Statistics),
    Neighbours(Neighbours),
    /// Decompression or decode failed; carried on so it can be counted.
    Errored,
}

impl Record {
    pub fn kind(&self) -> RecordKind {
        match self {
            Record::NodeInfo(_) => RecordKind::NodeInfo,
            Record::Statistics(_) => RecordKind::Statistics,
            Record::Neighbours(_) => RecordKind::Neighbours,
            Record::Errored => RecordKind::Errored,
        }
    }

    /// Node id the record belongs to; `None` for errored records.
    pub fn node_id(&self) -> Option<&str> {
        let id = match self {
            Record::NodeInfo(info) => Some(info.node_id.as_str()),
            Record::Statistics(stats) => Some(stats.node_id.as_str()),
            Record::Neighbours(neighbours) => Some(neighbours.node_id.as_str()),
            Record::Errored => None,
        };
        id.filter(|id| !id.is_empty())
    }
}

/// JSON envelope of a response; any subset of the sections may be present.
#[derive(Debug, Default, Deserialize)]
pub struct Envelope {
    #[serde(default)]
    pub nodeinfo: Option<NodeInfo>,
    #[serde(default)]
    pub statistics: Option<Statistics>,
    #[serde(default)]
    pub neighbours: Option<Neighbours>,
}

impl Envelope {
    /// Split into records in envelope order: nodeinfo, statistics, neighbours.
    pub fn into_records(self) -> Vec<Record> {
        let mut records = Vec::with_capacity(3);
        if let Some(info) = self.nodeinfo {
            records.push(Record::NodeInfo(info));
        }
        if let Some(stats) = self.statistics {
            records.push(Record::Statistics(stats));
        }
        if let Some(neighbours) = self.neighbours {
            records.push(Record::Neighbours(neighbours));
        }
        records
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_fans_out_in_order() {
        let envelope: Envelope = serde_json::from_str(
            r#"{"neighbours":{"node_id":"n1"},"nodeinfo":{"node_id":"n1"},"statistics":{"node_id":"n1"}}"#,
        )
        .unwrap();
        let kinds: Vec<RecordKind> = envelope.into_records().iter().map(Record::kind).collect();
        assert_eq!(
            kinds,
            vec![RecordKind::NodeInfo, RecordKind::Statistics, RecordKind::Neighbours]
        );
    }

    #[test]
    fn test_empty_envelope_has_no_records() {
        let envelope: Envelope = serde_json::from_str("{}").unwrap();
        assert!(envelope.into_records().is_empty());
    }

    #[test]
    fn test_node_id_of_records() {
        assert_eq!(Record::Errored.node_id(), None);
        let record = Record::Statistics(Statistics {
            node_id: "abc".into(),
            ..Default::default()
        });
        assert_eq!(record.node_id(), Some("abc"));
        let nameless = Record::Neighbours(Neighbours::default());
        assert_eq!(nameless.node_id(), None);
    }
}
