use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use std::time::Instant;

/// Unique node name. Chosen by configuration, or a random UUID when the
/// operator leaves it empty.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub String);

impl NodeId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum NodeState {
    Alive,
    Suspect,
    Dead,
}

/// Represents a single member in the cluster.
///
/// `meta` is the opaque blob the node advertises about itself (the
/// directory puts its location tag and RPC port there). The transport
/// never interprets it; an empty blob is legal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub gossip_addr: SocketAddr,
    pub meta: Vec<u8>,
    pub state: NodeState,
    pub incarnation: u64,

    #[serde(skip)]
    pub last_seen: Option<Instant>,
}

impl Node {
    pub fn is_alive(&self) -> bool {
        self.state == NodeState::Alive
    }
}

/// Datagram protocol spoken between membership services.
///
/// - `Ping/Ack`: liveness checks and state synchronization.
/// - `Join`: sent by new nodes to seed nodes to enter the cluster.
/// - `Suspect/Alive`: disseminate changes in node health.
/// - `Leave`: graceful departure announced by the leaving node itself.
/// - `Broadcast`: piggybacked user payloads drained from the delegate's queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum GossipMessage {
    Ping {
        from: NodeId,
        incarnation: u64,
        meta: Vec<u8>,
    },

    Ack {
        from: NodeId,
        incarnation: u64,
        members: Vec<Node>,
    },

    Join {
        node: Node,
    },

    Suspect {
        node_id: NodeId,
        incarnation: u64,
    },

    Alive {
        node_id: NodeId,
        incarnation: u64,
    },

    Leave {
        node_id: NodeId,
        incarnation: u64,
    },

    Broadcast {
        from: NodeId,
        payloads: Vec<Vec<u8>>,
    },
}

/// Frame carried over the TCP side channel used for reliable unicast.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReliableFrame {
    pub from: NodeId,
    pub payload: Vec<u8>,
}
