//! Node identity as announced by a mesh router in response to `GET nodeinfo`.
//!
//! The record is replaced wholesale on every fresh announcement. Only the
//! fields the collector reasons about are typed. `software` is kept as
//! opaque JSON and served unchanged; any other key is dropped on decode.

use serde::{Deserialize, Serialize};

/// Mesh interface MACs grouped by interface kind.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MeshInterfaces {
    #[serde(default)]
    pub wireless: Vec<String>,
    #[serde(default)]
    pub other: Vec<String>,
    /// VPN tunnel interfaces; links touching these MACs are flagged `vpn`.
    #[serde(default)]
    pub tunnel: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatmanInterface {
    #[serde(default)]
    pub interfaces: MeshInterfaces,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MeshStruct {
    #[serde(default)]
    pub bat0: BatmanInterface,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Network {
    #[serde(default)]
    pub mac: String,
    /// Announced IPv6 addresses, used for unicast re-queries.
    #[serde(default)]
    pub addresses: Vec<String>,
    #[serde(default)]
    pub mesh: MeshStruct,
    #[serde(default)]
    pub mesh_interfaces: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Owner {
    #[serde(default)]
    pub contact: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct System {
    #[serde(default)]
    pub site_code: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Location {
    #[serde(default)]
    pub latitude: f64,
    #[serde(default)]
    pub longitude: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Hardware {
    #[serde(default)]
    pub nproc: u32,
    #[serde(default)]
    pub model: String,
}

/// Identity of one mesh node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub node_id: String,
    #[serde(default)]
    pub hostname: String,
    #[serde(default)]
    pub network: Network,
    #[serde(default)]
    pub owner: Owner,
    #[serde(default)]
    pub system: System,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
    #[serde(default)]
    pub hardware: Hardware,
    /// Firmware, autoupdater and friends; opaque to the collector.
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub software: serde_json::Value,
}

impl NodeInfo {
    /// Every mesh-facing MAC this node owns, primary MAC first, deduplicated.
    pub fn mesh_macs(&self) -> Vec<String> {
        let ifaces = &self.network.mesh.bat0.interfaces;
        let mut macs: Vec<String> = Vec::new();
        let candidates = std::iter::once(&self.network.mac)
            .chain(self.network.mesh_interfaces.iter())
            .chain(ifaces.wireless.iter())
            .chain(ifaces.other.iter())
            .chain(ifaces.tunnel.iter());
        for mac in candidates {
            if !mac.is_empty() && !macs.contains(mac) {
                macs.push(mac.clone());
            }
        }
        macs
    }

    pub fn is_tunnel_mac(&self, mac: &str) -> bool {
        self.network
            .mesh
            .bat0
            .interfaces
            .tunnel
            .iter()
            .any(|tunnel| tunnel == mac)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NODEINFO: &str = r#"{
        "hardware": {"model": "TP-Link TL-WR842N/ND v2", "nproc": 1},
        "hostname": "FF-DO-Josephstr-13",
        "network": {
            "addresses": ["fe80::eade:27ff:fe25:2554", "2a03:2260:50:5:eade:27ff:fe25:2554"],
            "mac": "e8:de:27:25:25:54",
            "mesh": {"bat0": {"interfaces": {
                "tunnel": ["ea:e2:27:25:25:54"],
                "wireless": ["ea:e1:28:25:25:54"]
            }}},
            "mesh_interfaces": ["ea:e2:27:25:25:54", "ea:e1:28:25:25:54"]
        },
        "node_id": "e8de27252554",
        "owner": {"contact": "someone@example.org"},
        "software": {"firmware": {"base": "gluon-v2015.1.2", "release": "0.7.2"}},
        "system": {"site_code": "ffdo"}
    }"#;

    #[test]
    fn test_parse_full_nodeinfo() {
        let info: NodeInfo = serde_json::from_str(NODEINFO).unwrap();
        assert_eq!(info.node_id, "e8de27252554");
        assert_eq!(info.hostname, "FF-DO-Josephstr-13");
        assert_eq!(info.system.site_code, "ffdo");
        assert_eq!(info.network.addresses.len(), 2);
        assert_eq!(info.network.mesh.bat0.interfaces.tunnel, vec!["ea:e2:27:25:25:54"]);
        assert_eq!(info.software["firmware"]["release"], "0.7.2");
    }

    #[test]
    fn test_mesh_macs_are_deduplicated() {
        let info: NodeInfo = serde_json::from_str(NODEINFO).unwrap();
        assert_eq!(
            info.mesh_macs(),
            vec!["e8:de:27:25:25:54", "ea:e2:27:25:25:54", "ea:e1:28:25:25:54"]
        );
    }

    #[test]
    fn test_tunnel_mac_detection() {
        let info: NodeInfo = serde_json::from_str(NODEINFO).unwrap();
        assert!(info.is_tunnel_mac("ea:e2:27:25:25:54"));
        assert!(!info.is_tunnel_mac("ea:e1:28:25:25:54"));
    }

    #[test]
    fn test_minimal_nodeinfo() {
        let info: NodeInfo = serde_json::from_str(r#"{"node_id": "abc"}"#).unwrap();
        assert_eq!(info.node_id, "abc");
        assert!(info.mesh_macs().is_empty());
    }

    #[test]
    fn test_only_software_is_passed_through() {
        let info: NodeInfo = serde_json::from_str(
            r#"{
                "node_id": "abc",
                "system": {"site_code": "ffdo", "role": "node"},
                "software": {"autoupdater": {"branch": "stable"}},
                "vendor": "acme"
            }"#,
        )
        .unwrap();
        let served = serde_json::to_value(&info).unwrap();
        assert_eq!(served["software"]["autoupdater"]["branch"], "stable");
        assert_eq!(served["system"]["site_code"], "ffdo");
        assert!(served["system"].get("role").is_none());
        assert!(served.get("vendor").is_none());
    }
}
