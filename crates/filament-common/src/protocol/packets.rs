//! Gossip packets exchanged between mesh nodes.
//!
//! Heartbeats carry the full advertised state of the sending node, not a
//! delta: the receiver replaces whatever it previously knew about that node.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One service hosted by a node, with the actions it exposes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServiceAdvert {
    pub service: String,
    pub actions: Vec<String>,
}

impl ServiceAdvert {
    pub fn new(service: impl Into<String>, actions: Vec<String>) -> Self {
        ServiceAdvert {
            service: service.into(),
            actions,
        }
    }
}

/// Periodic liveness announcement.
///
/// `sequence` increases monotonically per sender so receivers can discard
/// reordered packets. `metadata` carries node attributes the control plane
/// does not interpret, except for `"address"` which the TCP transport uses
/// as the dial target.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Heartbeat {
    pub namespace: String,
    pub node_id: String,
    pub sequence: u64,
    pub services: Vec<ServiceAdvert>,
    pub metadata: Map<String, Value>,
}

/// Explicit goodbye sent on orderly shutdown. Receivers drop the node
/// immediately instead of waiting for the heartbeat timeout.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Disconnect {
    pub namespace: String,
    pub node_id: String,
}
