//! Resource statistics announced in response to `GET statistics`.
//!
//! Byte and packet counters arrive as JSON numbers that routers sometimes
//! encode in exponent notation, so they are kept as `f64`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One direction of interface traffic.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrafficCounter {
    #[serde(default)]
    pub bytes: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub packets: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dropped: Option<f64>,
}

/// Traffic counters; each direction may be missing independently.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Traffic {
    #[serde(default)]
    pub tx: Option<TrafficCounter>,
    #[serde(default)]
    pub rx: Option<TrafficCounter>,
    #[serde(default)]
    pub forward: Option<TrafficCounter>,
    #[serde(default)]
    pub mgmt_tx: Option<TrafficCounter>,
    #[serde(default)]
    pub mgmt_rx: Option<TrafficCounter>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Clients {
    #[serde(default)]
    pub wifi: u32,
    #[serde(default)]
    pub total: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Memory {
    #[serde(default)]
    pub cached: u64,
    #[serde(default)]
    pub total: u64,
    #[serde(default)]
    pub buffers: u64,
    #[serde(default)]
    pub free: u64,
}

impl Memory {
    /// Fraction of memory in use, 0.0 when the router did not report a total.
    pub fn usage(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        let available = self
            .free
            .saturating_add(self.buffers)
            .saturating_add(self.cached);
        let used = self.total.saturating_sub(available);
        used as f64 / self.total as f64
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Processes {
    #[serde(default)]
    pub total: u64,
    #[serde(default)]
    pub running: u64,
}

/// A single VPN peer; `null` in the JSON when the peer is not connected.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MeshVpnPeer {
    #[serde(default)]
    pub established: Option<f64>,
}

/// VPN peer group; groups nest.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MeshVpnGroup {
    #[serde(default)]
    pub peers: BTreeMap<String, Option<MeshVpnPeer>>,
    #[serde(default)]
    pub groups: BTreeMap<String, Option<MeshVpnGroup>>,
}

impl MeshVpnGroup {
    fn has_established_peer(&self) -> bool {
        let direct = self.peers.values().flatten().any(|peer| {
            peer.established
                .map(|established| established > 0.0)
                .unwrap_or(false)
        });
        direct
            || self
                .groups
                .values()
                .flatten()
                .any(|group| group.has_established_peer())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MeshVpn {
    #[serde(default)]
    pub groups: BTreeMap<String, Option<MeshVpnGroup>>,
}

impl MeshVpn {
    /// True iff any peer in any (nested) group reports a positive established time.
    pub fn has_uplink(&self) -> bool {
        self.groups
            .values()
            .flatten()
            .any(|group| group.has_established_peer())
    }
}

/// Latest statistics for one node. Replaced wholesale, never merged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Statistics {
    pub node_id: String,
    #[serde(default)]
    pub clients: Clients,
    #[serde(default)]
    pub rootfs_usage: f64,
    #[serde(default)]
    pub traffic: Option<Traffic>,
    #[serde(default)]
    pub memory: Memory,
    #[serde(default)]
    pub uptime: f64,
    #[serde(default)]
    pub idletime: f64,
    /// MAC of the gateway this node currently routes through.
    #[serde(default)]
    pub gateway: String,
    #[serde(default)]
    pub processes: Processes,
    #[serde(default)]
    pub loadavg: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mesh_vpn: Option<MeshVpn>,
}

impl Statistics {
    pub fn has_uplink(&self) -> bool {
        self.mesh_vpn
            .as_ref()
            .map(MeshVpn::has_uplink)
            .unwrap_or(false)
    }
}
