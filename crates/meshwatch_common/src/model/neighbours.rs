//! Mesh neighbour tables announced in response to `GET neighbours`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Link as seen by the batman-adv routing protocol.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatmanLink {
    /// Seconds since the peer was last heard.
    #[serde(default)]
    pub lastseen: f64,
    /// Transmit quality, 0..=255, higher is better.
    #[serde(default)]
    pub tq: u8,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatadvNeighbours {
    #[serde(default)]
    pub neighbours: BTreeMap<String, BatmanLink>,
}

/// Per node: own mesh MAC -> peer MAC -> link.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Neighbours {
    pub node_id: String,
    #[serde(default)]
    pub batadv: BTreeMap<String, BatadvNeighbours>,
}

impl Neighbours {
    /// Link quality `own_mac` reports towards `peer_mac`, if any.
    pub fn link(&self, own_mac: &str, peer_mac: &str) -> Option<&BatmanLink> {
        self.batadv.get(own_mac)?.neighbours.get(peer_mac)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_with_wifi_section_ignored() {
        let json = r#"{
            "batadv": {
                "c6:71:20:2c:c4:18": {"neighbours": {
                    "16:cf:21:30:c9:30": {"lastseen": 101.55, "tq": 84},
                    "ea:97:f7:06:2e:0c": {"lastseen": 3.94, "tq": 208}
                }}
            },
            "node_id": "c46e1f2cc418",
            "wifi": {"c6:71:20:2c:c4:18": {"neighbours": {}}}
        }"#;
        let neighbours: Neighbours = serde_json::from_str(json).unwrap();
        assert_eq!(neighbours.node_id, "c46e1f2cc418");
        let link = neighbours
            .link("c6:71:20:2c:c4:18", "ea:97:f7:06:2e:0c")
            .unwrap();
        assert_eq!(link.tq, 208);
        assert!(neighbours.link("c6:71:20:2c:c4:18", "00:00:00:00:00:00").is_none());
        assert!(neighbours.link("ff:ff:ff:ff:ff:ff", "16:cf:21:30:c9:30").is_none());
    }
}
