//! Bucket Directory Library
//!
//! A storage-location directory and request router for a sharded object
//! store. Nodes gossip which buckets they hold; any node can then resolve a
//! bucket to a local handle or to a client for the nearest remote owner.
//! The binary (`main.rs`) assembles one node from a config file.
//!
//! ## Architecture Modules
//! - **`membership`**: UDP gossip (SWIM-like) for discovery and failure detection. It carries
//!   directory commands and node metadata through a delegate.
//! - **`directory`**: The replicated bookkeeping: ownership index, network-bucket registry,
//!   health registry, node metadata, and the command stream that keeps them converged.
//! - **`storage`**: Bucket capabilities, the in-memory engine, local resolution, the peer RPC
//!   protocol (server and client), and capacity checks.
//! - **`cluster`**: Cluster-wide resolution with distance ranking, the per-peer connection pool,
//!   and the write-target scheduler.
//! - **`config`** / **`node`**: TOML + CLI configuration and the composition root.

pub mod cluster;
pub mod config;
pub mod directory;
pub mod error;
pub mod membership;
pub mod node;
pub mod storage;
