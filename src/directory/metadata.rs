//! Per-node metadata advertised through gossip.
//!
//! Every node publishes a small envelope (magic, location tag, RPC port).
//! Peers combine it with the address gossip observed to know where to send
//! remote bucket requests and how far away the peer is.

use crate::membership::types::NodeId;

use bincode::Options;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use thiserror::Error;

/// Identifies metadata produced by this protocol ("BKD1").
pub const METADATA_MAGIC: u32 = 0x424b_4431;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MetadataError {
    #[error("metadata magic {0:#x} does not match")]
    BadMagic(u32),

    #[error("undecodable metadata: {0}")]
    Undecodable(String),
}

#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    magic: u32,
    loc: String,
    port: u16,
}

fn wire() -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .with_limit(64 * 1024)
}

/// What this node advertises about itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalMeta {
    pub loc: String,
    pub port: u16,
}

impl LocalMeta {
    pub fn encode(&self) -> Vec<u8> {
        let envelope = Envelope {
            magic: METADATA_MAGIC,
            loc: self.loc.clone(),
            port: self.port,
        };
        match wire().serialize(&envelope) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::error!("Failed to encode node metadata: {}", e);
                Vec::new()
            }
        }
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, MetadataError> {
        let envelope: Envelope = wire()
            .deserialize(bytes)
            .map_err(|e| MetadataError::Undecodable(e.to_string()))?;
        if envelope.magic != METADATA_MAGIC {
            return Err(MetadataError::BadMagic(envelope.magic));
        }
        Ok(Self {
            loc: envelope.loc,
            port: envelope.port,
        })
    }
}

/// Decoded metadata of a known node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeMetadata {
    pub name: NodeId,
    pub addr: IpAddr,
    pub loc: String,
    pub port: u16,
    /// Discovery order, used to break distance ties.
    pub seq: u64,
}

impl NodeMetadata {
    pub fn rpc_addr(&self) -> SocketAddr {
        SocketAddr::new(self.addr, self.port)
    }
}

/// Distance between two location tags; lower is closer.
pub type DistanceFn = Arc<dyn Fn(&str, &str) -> u32 + Send + Sync>;

pub fn default_distance(a: &str, b: &str) -> u32 {
    if a == b {
        0
    } else {
        1
    }
}

/// Sorts `nodes` by distance from `loc`, ties broken by discovery order.
pub fn sort_by_distance(loc: &str, nodes: &mut [NodeMetadata], distance: &DistanceFn) {
    nodes.sort_by(|a, b| {
        let da = distance(loc, &a.loc);
        let db = distance(loc, &b.loc);
        match da.cmp(&db) {
            Ordering::Equal => a.seq.cmp(&b.seq),
            other => other,
        }
    });
}
