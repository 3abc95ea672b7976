//! Bucket Storage Module
//!
//! Everything about a bucket that is not directory bookkeeping: the
//! capability traits, the in-memory engine, local resolution, the RPC
//! protocol between peers, and capacity checks.
//!
//! ## Core Concepts
//! - **Capabilities**: A bucket may be readable, writable, and writable with expiry, independently.
//!   `BucketHandle` carries whichever the engine supports.
//! - **Local Selector**: Resolves a bucket on this node only, network buckets first.
//! - **Remote Access**: `RemoteBucketClient` speaks the bincode-over-HTTP protocol that
//!   `handlers::router` serves.
//! - **Health**: `HealthChecker` turns free disk space into writability records.

pub mod bucket_map;
pub mod capacity;
pub mod client;
pub mod handle;
pub mod handlers;
pub mod memory;
pub mod protocol;
pub mod selector;
