//! Bucket Directory Module
//!
//! Cluster-wide knowledge of where buckets live, kept eventually consistent
//! over the membership gossip.
//!
//! ## Core Concepts
//! - **Ownership Index**: Which node owns which bucket, queryable in both directions.
//! - **Network Buckets**: Buckets opened through a named provider. Registration is first-writer-wins.
//! - **Health**: Per-bucket writability, issued by capacity checkers and replicated cluster-wide.
//! - **Commands**: Every change is a bincode [`command::Command`], gossiped with a bounded
//!   retransmit count and replayed to joining peers over the reliable channel.
//! - **Node Metadata**: Location tag and RPC port of every peer, used for distance ranking.

pub mod command;
pub mod health;
pub mod metadata;
pub mod netbucket;
pub mod ownership;
pub mod service;

pub use service::{Directory, DirectoryConfig, NodeListener};

#[cfg(test)]
mod tests;
