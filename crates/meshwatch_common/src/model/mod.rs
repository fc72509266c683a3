//! Telemetry entities announced by mesh nodes, plus the derived status record.

pub mod neighbours;
pub mod nodeinfo;
pub mod statistics;
pub mod status;

pub use neighbours::{BatadvNeighbours, BatmanLink, Neighbours};
pub use nodeinfo::NodeInfo;
pub use statistics::{Clients, MeshVpn, Statistics, Traffic, TrafficCounter};
pub use status::{format_timestamp, parse_timestamp, LivenessState, NodeStatus, TimestampError};
